//! Typed store gateway layered over [`reservation_storage::StorageBackend`].
//!
//! JSON-encodes typed rows, keys them by a stable prefix scheme, and
//! maintains small secondary indexes (the lease name uniqueness index) as
//! extra keys rather than a second table, since the backend is a flat
//! key-value space.
//!
//! Key scheme:
//! - `lease/<id>`                       — a [`Lease`] row
//! - `lease_name/<name>`                — maps a lease name to its id, for
//!   `create_lease`'s uniqueness check
//! - `reservation/<id>`                 — a [`Reservation`] row
//! - `reservation_index/<lease_id>/<id>` — empty marker, indexes
//!   reservations by lease
//! - `event/<id>`                       — an [`Event`] row
//! - `event_index/<lease_id>/<id>`      — empty marker, indexes events by
//!   lease

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reservation_storage::StorageBackend;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::model::{Event, Lease, Reservation};
use crate::status::{EventStatus, LeaseStatus, ReservationStatus};

/// The typed store gateway.
///
/// Cheap to clone — holds an `Arc` to the configured backend and to the
/// same injectable clock used everywhere else, so `updated_at` stamps
/// written here stay on the same time source as the orchestrator,
/// scheduler, and executor.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

fn encode<T: serde::Serialize>(kind: &'static str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Codec {
        kind,
        reason: e.to_string(),
    })
}

fn decode<T: serde::de::DeserializeOwned>(kind: &'static str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Codec {
        kind,
        reason: e.to_string(),
    })
}

impl Store {
    /// Wrap a storage backend with the typed reservation-manager schema,
    /// stamping `updated_at` writes from the real wall clock.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    /// Wrap a storage backend with an explicit clock — tests use this with
    /// a [`crate::clock::ManualClock`] shared with the rest of the
    /// fixture, so a store-level `updated_at` stamp and the orchestrator's
    /// own `clock.now()` never drift apart.
    #[must_use]
    pub fn with_clock(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    fn lease_key(id: Uuid) -> String {
        format!("lease/{id}")
    }

    fn lease_name_key(name: &str) -> String {
        format!("lease_name/{name}")
    }

    fn reservation_key(id: Uuid) -> String {
        format!("reservation/{id}")
    }

    fn reservation_index_key(lease_id: Uuid, reservation_id: Uuid) -> String {
        format!("reservation_index/{lease_id}/{reservation_id}")
    }

    fn event_key(id: Uuid) -> String {
        format!("event/{id}")
    }

    fn event_index_key(lease_id: Uuid, event_id: Uuid) -> String {
        format!("event_index/{lease_id}/{event_id}")
    }

    // ---- leases ----------------------------------------------------

    /// Insert a brand-new lease, rejecting duplicate names.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateName`] if a lease with this name
    /// already exists, or a backend error otherwise.
    pub async fn create_lease(&self, lease: &Lease) -> Result<(), StoreError> {
        let name_key = Self::lease_name_key(&lease.name);
        let claimed = self
            .backend
            .compare_and_swap(&name_key, None, lease.id.to_string().as_bytes())
            .await?;
        if !claimed {
            return Err(StoreError::DuplicateName {
                name: lease.name.clone(),
            });
        }

        self.backend
            .put(&Self::lease_key(lease.id), &encode("lease", lease)?)
            .await?;
        Ok(())
    }

    /// Fetch a lease by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such lease exists.
    pub async fn get_lease(&self, id: Uuid) -> Result<Lease, StoreError> {
        let bytes = self
            .backend
            .get(&Self::lease_key(id))
            .await?
            .ok_or(StoreError::NotFound {
                kind: "lease",
                id: id.to_string(),
            })?;
        decode("lease", &bytes)
    }

    /// Fetch a lease by id if it exists, without erroring when it doesn't.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the read itself fails.
    pub async fn find_lease(&self, id: Uuid) -> Result<Option<Lease>, StoreError> {
        match self.backend.get(&Self::lease_key(id)).await? {
            Some(bytes) => Ok(Some(decode("lease", &bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite a lease row in place (used after mutating fields other
    /// than status, e.g. `update_lease`'s date changes).
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails.
    pub async fn put_lease(&self, lease: &Lease) -> Result<(), StoreError> {
        self.backend
            .put(&Self::lease_key(lease.id), &encode("lease", lease)?)
            .await
            .map_err(StoreError::from)
    }

    /// Set a lease's status, bumping `updated_at` to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the lease does not exist.
    pub async fn set_lease_status(&self, id: Uuid, status: LeaseStatus) -> Result<(), StoreError> {
        let mut lease = self.get_lease(id).await?;
        lease.status = status;
        lease.updated_at = self.clock.now();
        self.put_lease(&lease).await
    }

    /// Atomically move a lease from `expected` to `new_status`, the
    /// primitive [`crate::status::with_lease_transition`] uses to claim a
    /// lease for a guarded operation.
    ///
    /// Returns `true` if this call won the claim. A losing CAS means
    /// another guard changed the lease's status between the caller's load
    /// and this call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the lease does not exist, or a
    /// backend error if the CAS itself fails.
    pub async fn cas_lease_status(
        &self,
        id: Uuid,
        expected: LeaseStatus,
        new_status: LeaseStatus,
    ) -> Result<bool, StoreError> {
        let mut lease = self.get_lease(id).await?;
        if lease.status != expected {
            return Ok(false);
        }
        let expected_bytes = encode("lease", &lease)?;
        lease.status = new_status;
        lease.updated_at = self.clock.now();
        let new_bytes = encode("lease", &lease)?;

        self.backend
            .compare_and_swap(&Self::lease_key(id), Some(&expected_bytes), &new_bytes)
            .await
            .map_err(StoreError::from)
    }

    /// Remove a lease row and its name index entry.
    ///
    /// Does not cascade to reservations or events — callers (the
    /// orchestrator) are responsible for deleting those first.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the deletion fails.
    pub async fn delete_lease(&self, id: Uuid) -> Result<(), StoreError> {
        if let Some(lease) = self.find_lease(id).await? {
            self.backend.delete(&Self::lease_name_key(&lease.name)).await?;
        }
        self.backend.delete(&Self::lease_key(id)).await.map_err(StoreError::from)
    }

    /// List every lease, optionally filtered to those overlapping
    /// `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the scan fails.
    pub async fn list_leases(
        &self,
        overlapping: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Lease>, StoreError> {
        let keys = self.backend.list("lease/").await?;
        let mut leases = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(bytes) = self.backend.get(&key).await? else {
                continue;
            };
            let lease: Lease = decode("lease", &bytes)?;
            if let Some((start, end)) = overlapping {
                if lease.end_date <= start || lease.start_date >= end {
                    continue;
                }
            }
            leases.push(lease);
        }
        Ok(leases)
    }

    // ---- reservations ------------------------------------------------

    /// Insert a new reservation and index it under its lease.
    ///
    /// # Errors
    ///
    /// Returns a backend error if either write fails.
    pub async fn create_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        self.backend
            .put(
                &Self::reservation_key(reservation.id),
                &encode("reservation", reservation)?,
            )
            .await?;
        self.backend
            .put(
                &Self::reservation_index_key(reservation.lease_id, reservation.id),
                b"1",
            )
            .await
            .map_err(StoreError::from)
    }

    /// Fetch a reservation by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such reservation exists.
    pub async fn get_reservation(&self, id: Uuid) -> Result<Reservation, StoreError> {
        let bytes = self
            .backend
            .get(&Self::reservation_key(id))
            .await?
            .ok_or(StoreError::NotFound {
                kind: "reservation",
                id: id.to_string(),
            })?;
        decode("reservation", &bytes)
    }

    /// Overwrite a reservation row in place.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails.
    pub async fn put_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        self.backend
            .put(
                &Self::reservation_key(reservation.id),
                &encode("reservation", reservation)?,
            )
            .await
            .map_err(StoreError::from)
    }

    /// Set a reservation's status, bumping `updated_at` to now.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the reservation does not exist.
    pub async fn set_reservation_status(
        &self,
        id: Uuid,
        status: ReservationStatus,
    ) -> Result<(), StoreError> {
        let mut reservation = self.get_reservation(id).await?;
        reservation.status = status;
        reservation.updated_at = self.clock.now();
        self.put_reservation(&reservation).await
    }

    /// List all reservations belonging to a lease.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the scan fails, or
    /// [`StoreError::NotFound`] if an indexed reservation row is missing
    /// (index/row desync, which should not happen in normal operation).
    pub async fn list_reservations(&self, lease_id: Uuid) -> Result<Vec<Reservation>, StoreError> {
        let prefix = format!("reservation_index/{lease_id}/");
        let index_keys = self.backend.list(&prefix).await?;
        let mut reservations = Vec::with_capacity(index_keys.len());
        for key in index_keys {
            let id_str = key.rsplit('/').next().unwrap_or_default();
            let id = Uuid::parse_str(id_str).map_err(|e| StoreError::Codec {
                kind: "reservation_index",
                reason: e.to_string(),
            })?;
            reservations.push(self.get_reservation(id).await?);
        }
        Ok(reservations)
    }

    /// Delete a reservation and its lease index entry.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the deletion fails.
    pub async fn delete_reservation(&self, id: Uuid) -> Result<(), StoreError> {
        let reservation = self.get_reservation(id).await?;
        self.backend
            .delete(&Self::reservation_index_key(reservation.lease_id, id))
            .await?;
        self.backend
            .delete(&Self::reservation_key(id))
            .await
            .map_err(StoreError::from)
    }

    // ---- events --------------------------------------------------------

    /// Insert a new event and index it under its lease.
    ///
    /// # Errors
    ///
    /// Returns a backend error if either write fails.
    pub async fn create_event(&self, event: &Event) -> Result<(), StoreError> {
        self.backend
            .put(&Self::event_key(event.id), &encode("event", event)?)
            .await?;
        self.backend
            .put(&Self::event_index_key(event.lease_id, event.id), b"1")
            .await
            .map_err(StoreError::from)
    }

    /// Fetch an event by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such event exists.
    pub async fn get_event(&self, id: Uuid) -> Result<Event, StoreError> {
        let bytes = self
            .backend
            .get(&Self::event_key(id))
            .await?
            .ok_or(StoreError::NotFound {
                kind: "event",
                id: id.to_string(),
            })?;
        decode("event", &bytes)
    }

    /// Overwrite an event row in place.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails.
    pub async fn put_event(&self, event: &Event) -> Result<(), StoreError> {
        self.backend
            .put(&Self::event_key(event.id), &encode("event", event)?)
            .await
            .map_err(StoreError::from)
    }

    /// Atomically claim an `UNDONE` event for execution by CASing its
    /// status to `IN_PROGRESS`.
    ///
    /// Returns `true` if this call won the claim.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the underlying CAS fails, or
    /// [`StoreError::Codec`] if the stored row can't be decoded to check
    /// preconditions (should not happen for rows this crate wrote).
    pub async fn claim_event(&self, event: &Event) -> Result<bool, StoreError> {
        let mut claimed = event.clone();
        claimed.status = EventStatus::InProgress;
        claimed.updated_at = self.clock.now();

        let expected = encode("event", event)?;
        let new_value = encode("event", &claimed)?;
        self.backend
            .compare_and_swap(&Self::event_key(event.id), Some(&expected), &new_value)
            .await
            .map_err(StoreError::from)
    }

    /// List every event for a lease, in no particular order; callers sort
    /// as needed.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the scan fails.
    pub async fn list_events(&self, lease_id: Uuid) -> Result<Vec<Event>, StoreError> {
        let prefix = format!("event_index/{lease_id}/");
        let index_keys = self.backend.list(&prefix).await?;
        let mut events = Vec::with_capacity(index_keys.len());
        for key in index_keys {
            let id_str = key.rsplit('/').next().unwrap_or_default();
            let id = Uuid::parse_str(id_str).map_err(|e| StoreError::Codec {
                kind: "event_index",
                reason: e.to_string(),
            })?;
            events.push(self.get_event(id).await?);
        }
        Ok(events)
    }

    /// List every `UNDONE` event across all leases whose `time` is at or
    /// before `as_of`, ordered by `time` ascending — the scheduler's
    /// due-event query.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the scan fails.
    pub async fn list_due_events(&self, as_of: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        let keys = self.backend.list("event/").await?;
        let mut due = Vec::new();
        for key in keys {
            let Some(bytes) = self.backend.get(&key).await? else {
                continue;
            };
            let event: Event = decode("event", &bytes)?;
            if event.status == EventStatus::Undone && event.time <= as_of {
                due.push(event);
            }
        }
        due.sort_by_key(|event| event.time);
        Ok(due)
    }

    /// Set an event's status, bumping `updated_at` to now.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the event does not exist.
    pub async fn set_event_status(&self, id: Uuid, status: EventStatus) -> Result<(), StoreError> {
        let mut event = self.get_event(id).await?;
        event.status = status;
        event.updated_at = self.clock.now();
        self.put_event(&event).await
    }

    /// Reset an event from `IN_PROGRESS` back to `UNDONE` so a later
    /// scheduler tick re-claims it — the explicit retry reset
    /// allows for retryable `InvalidStatus` failures.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the event does not exist.
    pub async fn reset_event_to_undone(&self, id: Uuid) -> Result<(), StoreError> {
        self.set_event_status(id, EventStatus::Undone).await
    }

    /// Delete an event and its lease index entry.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the deletion fails.
    pub async fn delete_event(&self, id: Uuid) -> Result<(), StoreError> {
        let event = self.get_event(id).await?;
        self.backend
            .delete(&Self::event_index_key(event.lease_id, id))
            .await?;
        self.backend.delete(&Self::event_key(id)).await.map_err(StoreError::from)
    }
}
