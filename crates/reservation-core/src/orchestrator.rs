//! Lease orchestrator: the service-level operations exposed over RPC.
//!
//! The service-level `create_lease`, `update_lease`, and `delete_lease`
//! operations. The three lifecycle
//! event handlers (`start_lease`, `end_lease`, `before_end_lease`) live in
//! [`crate::executor`] alongside `_basic_action`, since they are only ever
//! invoked with an `event_id` by the event executor rather than directly by
//! an RPC caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::OrchestratorError;
use crate::model::{Event, EventType, Lease, LeaseView, Reservation};
use crate::notification::NotificationEmitter;
use crate::plugin::PluginRegistry;
use crate::status::{with_lease_transition, EventStatus, LeaseStatus, ReservationStatus};
use crate::store::Store;

/// The `%Y-%m-%d %H:%M` date format every RPC date field uses.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Tunables that don't belong to any single lease.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long before `end_date` the `before_end` event fires. `0`
    /// disables auto-creation of the `before_end_lease` event.
    pub minutes_before_end_lease: i64,
    /// Max retries for `InvalidStatus` event failures, range `[0, 50]`
    ///. Consumed by [`crate::executor::Executor`], not by the
    /// orchestrator itself — kept here since it shares the same
    /// configuration surface (`manager.*`).
    pub event_max_retries: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            minutes_before_end_lease: 60,
            event_max_retries: 1,
        }
    }
}

/// A single reservation request within `create_lease`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationValues {
    pub resource_type: String,
    #[serde(default)]
    pub resource_properties: Value,
}

/// The full input to `create_lease`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLeaseValues {
    pub name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub project_id: String,
    pub trust_id: String,
    pub start_date: String,
    pub end_date: String,
    /// Caller-supplied `before_end_date`, overriding the
    /// `minutes_before_end_lease`-derived default.
    #[serde(default)]
    pub before_end_date: Option<String>,
    pub reservations: Vec<ReservationValues>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// The input to `update_lease`. All fields but `lease_id` are optional —
/// only supplied fields are changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateLeaseValues {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub before_end_date: Option<String>,
    #[serde(default)]
    pub reservations: Option<Vec<UpdateReservationValues>>,
}

impl UpdateLeaseValues {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.before_end_date.is_none()
            && self.reservations.is_none()
    }

    fn is_rename_only(&self) -> bool {
        self.name.is_some()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.before_end_date.is_none()
            && self.reservations.is_none()
    }
}

/// A reservation update within `update_lease`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReservationValues {
    pub id: Uuid,
    pub resource_properties: Value,
}

fn parse_date(value: &str) -> Result<DateTime<Utc>, OrchestratorError> {
    chrono::NaiveDateTime::parse_from_str(value, DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| OrchestratorError::InvalidDate {
            value: value.to_owned(),
            expected_format: DATE_FORMAT,
        })
}

/// Parse a date field, honoring the literal `"now"`.
fn parse_date_field(value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, OrchestratorError> {
    if value.trim() == "now" {
        Ok(now)
    } else {
        parse_date(value)
    }
}

/// Orchestrates lease lifecycle operations against the store, plugin
/// registry, and notification emitter.
pub struct LeaseOrchestrator {
    store: Store,
    plugins: Arc<PluginRegistry>,
    notifications: Arc<NotificationEmitter>,
    clock: Arc<dyn Clock>,
    config: ManagerConfig,
}

impl LeaseOrchestrator {
    #[must_use]
    pub fn new(
        store: Store,
        plugins: Arc<PluginRegistry>,
        notifications: Arc<NotificationEmitter>,
        clock: Arc<dyn Clock>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            store,
            plugins,
            notifications,
            clock,
            config,
        }
    }

    /// Expose the store to the scheduler and executor, which share it with
    /// the orchestrator rather than owning a second handle pointed at the
    /// same backend.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    async fn view(&self, lease: Lease) -> Result<LeaseView, OrchestratorError> {
        let reservations = self.store.list_reservations(lease.id).await?;
        Ok(LeaseView { lease, reservations })
    }

    /// Fetch a lease with its reservations.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] if the lease does not
    /// exist.
    pub async fn get_lease(&self, lease_id: Uuid) -> Result<LeaseView, OrchestratorError> {
        let lease = self
            .store
            .find_lease(lease_id)
            .await?
            .ok_or(OrchestratorError::NotFound {
                kind: "lease",
                id: lease_id.to_string(),
            })?;
        self.view(lease).await
    }

    /// List leases, optionally restricted to those overlapping a time
    /// window.
    ///
    /// A `query` filter parameter is accepted by the wire contract but
    /// intentionally ignored here — not silently "fixed".
    ///
    /// # Errors
    ///
    /// Returns a store error if the scan fails.
    pub async fn list_leases(
        &self,
        overlapping: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<LeaseView>, OrchestratorError> {
        let leases = self.store.list_leases(overlapping).await?;
        let mut views = Vec::with_capacity(leases.len());
        for lease in leases {
            views.push(self.view(lease).await?);
        }
        Ok(views)
    }

    /// Create a lease: validate input, allocate each reservation's
    /// resource through its plugin, persist the lease/reservations, and
    /// schedule its `start`/`end`/`before_end` events.
    ///
    /// The lease row is inserted with status `CREATING` and only flipped to
    /// `PENDING` once every reservation and event has been persisted; any
    /// failure along the way destroys the lease and whatever reservations
    /// or events were already written.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::MissingTrustId`],
    /// [`OrchestratorError::InvalidDate`],
    /// [`OrchestratorError::InvalidInput`] (end before start, start in the
    /// past, no reservations), [`OrchestratorError::LeaseNameAlreadyExists`],
    /// or an [`OrchestratorError::UnsupportedResourceType`]/
    /// [`OrchestratorError::Plugin`] if a reservation's resource type cannot
    /// be allocated.
    pub async fn create_lease(&self, values: CreateLeaseValues) -> Result<LeaseView, OrchestratorError> {
        if values.trust_id.trim().is_empty() {
            return Err(OrchestratorError::MissingTrustId);
        }
        if values.name.trim().is_empty() {
            return Err(OrchestratorError::MissingParameter {
                params: "name".to_owned(),
            });
        }
        if values.reservations.is_empty() {
            return Err(OrchestratorError::InvalidInput {
                reason: "a lease must request at least one reservation".to_owned(),
            });
        }
        for reservation_values in &values.reservations {
            if reservation_values.resource_type.trim().is_empty() {
                return Err(OrchestratorError::MissingParameter {
                    params: "reservations[].resource_type".to_owned(),
                });
            }
        }

        let now = self.clock.now();
        let start_date = parse_date_field(&values.start_date, now)?;
        let end_date = parse_date_field(&values.end_date, now)?;

        if start_date < now {
            return Err(OrchestratorError::InvalidInput {
                reason: "start_date must not be in the past".to_owned(),
            });
        }
        if end_date <= start_date {
            return Err(OrchestratorError::InvalidInput {
                reason: "end_date must be after start_date".to_owned(),
            });
        }

        let before_end_date = values
            .before_end_date
            .as_deref()
            .map(|value| parse_date_field(value, now))
            .transpose()?;
        if let Some(be) = before_end_date {
            if be <= start_date || be >= end_date {
                return Err(OrchestratorError::InvalidInput {
                    reason: "before_end_date must satisfy start_date < before_end_date < end_date"
                        .to_owned(),
                });
            }
        }

        // Resolve every resource type before allocating anything, so a
        // single unconfigured type fails the request without allocating
        // any resource at all.
        for reservation_values in &values.reservations {
            self.plugins.get(&reservation_values.resource_type)?;
        }

        let lease_id = Uuid::new_v4();
        let lease = Lease {
            id: lease_id,
            name: values.name,
            user_id: values.user_id,
            project_id: values.project_id,
            trust_id: values.trust_id,
            start_date,
            end_date,
            status: LeaseStatus::Creating,
            extra: values.extra,
            created_at: now,
            updated_at: now,
        };

        self.store.create_lease(&lease).await.map_err(|err| match err {
            crate::error::StoreError::DuplicateName { name } => {
                OrchestratorError::LeaseNameAlreadyExists { name }
            }
            other => other.into(),
        })?;

        if let Err(err) = self
            .allocate_reservations(&lease, values.reservations, now)
            .await
        {
            self.rollback_lease(lease_id).await;
            return Err(err);
        }

        if let Err(err) = self
            .schedule_events(&lease, before_end_date, now)
            .await
        {
            self.rollback_lease(lease_id).await;
            return Err(err);
        }

        self.store.set_lease_status(lease_id, LeaseStatus::Pending).await?;

        self.notifications
            .emit("lease.create", serde_json::json!({ "lease_id": lease_id }))
            .await;

        self.get_lease(lease_id).await
    }

    async fn allocate_reservations(
        &self,
        lease: &Lease,
        reservation_values: Vec<ReservationValues>,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        for values in reservation_values {
            let plugin = self.plugins.get(&values.resource_type)?;
            let mut reservation = Reservation {
                id: Uuid::new_v4(),
                lease_id: lease.id,
                resource_type: values.resource_type,
                status: ReservationStatus::Pending,
                resource_properties: values.resource_properties,
                resource_id: None,
                created_at: now,
                updated_at: now,
            };
            let resource_id = plugin.reserve_resource(&reservation).await?;
            reservation.resource_id = Some(resource_id);
            self.store.create_reservation(&reservation).await?;
        }
        Ok(())
    }

    async fn schedule_events(
        &self,
        lease: &Lease,
        explicit_before_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        let mut events = vec![
            Event {
                id: Uuid::new_v4(),
                lease_id: lease.id,
                event_type: EventType::Start,
                time: lease.start_date,
                status: EventStatus::Undone,
                created_at: now,
                updated_at: now,
            },
            Event {
                id: Uuid::new_v4(),
                lease_id: lease.id,
                event_type: EventType::End,
                time: lease.end_date,
                status: EventStatus::Undone,
                created_at: now,
                updated_at: now,
            },
        ];

        let before_end_at = match explicit_before_end {
            Some(be) => Some(be),
            None if self.config.minutes_before_end_lease > 0 => {
                let candidate = lease.before_end_date(self.config.minutes_before_end_lease);
                if candidate < lease.start_date {
                    tracing::warn!(
                        lease_id = %lease.id,
                        "derived before_end_date precedes start_date, clamping up to start_date"
                    );
                    Some(lease.start_date)
                } else {
                    Some(candidate)
                }
            }
            None => None,
        };

        if let Some(before_end_at) = before_end_at {
            events.push(Event {
                id: Uuid::new_v4(),
                lease_id: lease.id,
                event_type: EventType::BeforeEnd,
                time: before_end_at,
                status: EventStatus::Undone,
                created_at: now,
                updated_at: now,
            });
        }

        for event in events {
            self.store.create_event(&event).await?;
        }
        Ok(())
    }

    /// Destroy a lease and whatever reservations/events were written for it
    /// so far — the compensating-delete rollback used in place of a
    /// cross-row transaction.
    async fn rollback_lease(&self, lease_id: Uuid) {
        if let Ok(reservations) = self.store.list_reservations(lease_id).await {
            for reservation in reservations {
                let _ = self.store.delete_reservation(reservation.id).await;
            }
        }
        if let Ok(events) = self.store.list_events(lease_id).await {
            for event in events {
                let _ = self.store.delete_event(event.id).await;
            }
        }
        let _ = self.store.delete_lease(lease_id).await;
    }

    /// Update a lease's name, dates, or reservation properties.
    ///
    /// An empty `values` is a no-op that returns the current lease
    /// unchanged. Supplying only `name` renames the lease without going
    /// through the transition guard at all — renaming is allowed at any
    /// status, including `TERMINATED`. Any other field guards the lease
    /// through every stable status (`PENDING`, `ACTIVE`, `TERMINATED`,
    /// `ERROR`) `→ UPDATING →` back to whichever it started from;
    /// `apply_update`'s own already-ended check is what actually rejects a
    /// date/reservation change on a lease past its `end_date`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidStatus`] if the lease is not in
    /// a stable status (for non-rename updates),
    /// [`OrchestratorError::InvalidInput`] if the lease has already ended,
    /// its immutable `start_date` is targeted after the lease started, or
    /// dates no longer satisfy `start_date < end_date`/`now < end_date`, or
    /// the usual plugin errors (not rolled back on failure).
    pub async fn update_lease(
        &self,
        lease_id: Uuid,
        values: UpdateLeaseValues,
    ) -> Result<LeaseView, OrchestratorError> {
        if values.is_empty() {
            return self.get_lease(lease_id).await;
        }

        if values.is_rename_only() {
            let mut lease = self.store.get_lease(lease_id).await?;
            #[allow(clippy::unwrap_used)]
            {
                lease.name = values.name.unwrap();
            }
            lease.updated_at = self.clock.now();
            self.store.put_lease(&lease).await?;
            self.notifications
                .emit("lease.update", serde_json::json!({ "lease_id": lease_id }))
                .await;
            return self.get_lease(lease_id).await;
        }

        let store = self.store.clone();
        let plugins = Arc::clone(&self.plugins);
        let clock = Arc::clone(&self.clock);
        let mut appended_notifications = Vec::new();

        with_lease_transition(
            &self.store,
            lease_id,
            &[
                LeaseStatus::Pending,
                LeaseStatus::Active,
                LeaseStatus::Terminated,
                LeaseStatus::Error,
            ],
            LeaseStatus::Updating,
            &[],
            {
                let appended = &mut appended_notifications;
                move || async move {
                    apply_update(&store, &plugins, clock.as_ref(), lease_id, values, appended).await
                }
            },
        )
        .await?;

        self.notifications
            .emit("lease.update", serde_json::json!({ "lease_id": lease_id }))
            .await;
        for topic in appended_notifications {
            self.notifications
                .emit(topic, serde_json::json!({ "lease_id": lease_id }))
                .await;
        }

        self.get_lease(lease_id).await
    }

    /// Delete a lease: release every reservation's plugin-allocated
    /// resource, then remove the lease, its reservations, and its
    /// not-yet-fired events.
    ///
    /// If `now` falls within `[start_date, end_date]`, the lease's
    /// `end_lease` event is pre-empted by CASing it to `IN_PROGRESS` before
    /// releasing reservations, so the scheduler can't race this deletion
    /// with its own `end_lease` dispatch.
    ///
    /// The first plugin failure aborts the release loop and is rethrown
    /// without destroying the lease, reservation, or event rows — the
    /// guard drives the lease to `ERROR` instead.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidStatus`] if the lease is not in
    /// a stable status, or the first plugin error encountered while
    /// releasing reservations.
    pub async fn delete_lease(&self, lease_id: Uuid) -> Result<(), OrchestratorError> {
        let store = self.store.clone();
        let plugins = Arc::clone(&self.plugins);
        let clock = Arc::clone(&self.clock);

        let outcome = with_lease_transition(
            &self.store,
            lease_id,
            &[
                LeaseStatus::Pending,
                LeaseStatus::Active,
                LeaseStatus::Terminated,
                LeaseStatus::Error,
            ],
            LeaseStatus::Deleting,
            &[],
            move || async move { delete_lease_inner(&store, &plugins, clock.as_ref(), lease_id).await },
        )
        .await;

        // A successful delete destroys the lease row entirely, so there is
        // no terminal status write to make — `with_lease_transition`'s
        // post-condition write on `Ok` will hit a missing row and surface
        // as NotFound, which we treat as success here.
        match outcome {
            Ok(()) | Err(OrchestratorError::Store(crate::error::StoreError::NotFound { .. })) => {
                self.notifications
                    .emit("lease.delete", serde_json::json!({ "lease_id": lease_id }))
                    .await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// The body of `update_lease`'s guarded operation, factored out so it can
/// be moved into the closure `with_lease_transition` owns without also
/// capturing `&self`.
async fn apply_update(
    store: &Store,
    plugins: &PluginRegistry,
    clock: &dyn Clock,
    lease_id: Uuid,
    values: UpdateLeaseValues,
    appended_notifications: &mut Vec<&'static str>,
) -> Result<(), OrchestratorError> {
    let mut lease = store.get_lease(lease_id).await?;
    let now = clock.now();
    let lease_started = lease.start_date < now;
    let lease_ended = lease.end_date < now;

    if lease_ended {
        return Err(OrchestratorError::InvalidInput {
            reason: "cannot update a lease that has already ended".to_owned(),
        });
    }

    if let Some(name) = values.name {
        lease.name = name;
    }

    if let Some(start_date) = values.start_date {
        if lease_started {
            return Err(OrchestratorError::CantUpdateParameter {
                param: "start_date".to_owned(),
            });
        }
        let parsed = parse_date_field(&start_date, now)?;
        if parsed < now {
            return Err(OrchestratorError::InvalidInput {
                reason: "start_date must not be in the past".to_owned(),
            });
        }
        lease.start_date = parsed;
    }

    let old_end_date = lease.end_date;
    if let Some(end_date) = values.end_date {
        lease.end_date = parse_date_field(&end_date, now)?;
    }
    if lease.end_date <= now || lease.end_date <= lease.start_date {
        return Err(OrchestratorError::InvalidInput {
            reason: "end_date must be after both now and start_date".to_owned(),
        });
    }

    lease.updated_at = now;
    store.put_lease(&lease).await?;

    if let Some(reservation_updates) = values.reservations {
        for update in reservation_updates {
            let mut reservation = store.get_reservation(update.id).await?;
            if reservation.lease_id != lease_id {
                return Err(OrchestratorError::InvalidInput {
                    reason: format!("reservation {} does not belong to lease {lease_id}", update.id),
                });
            }
            let plugin = plugins.get(&reservation.resource_type)?;
            reservation.resource_properties = update.resource_properties;
            // A plugin rejection here is not rolled back: the lease row and
            // any reservations already applied in this loop stay updated.
            // Known, intentional limitation, not something this fixes.
            plugin.update_reservation(&reservation).await?;
            store.put_reservation(&reservation).await?;
        }
    }

    update_lease_events(
        store,
        lease_id,
        &lease,
        old_end_date,
        values.before_end_date,
        now,
        appended_notifications,
    )
    .await?;

    Ok(())
}

/// Update the `start_lease`/`end_lease` event times to match the lease's
/// new dates, and recompute `before_end_lease`.
async fn update_lease_events(
    store: &Store,
    lease_id: Uuid,
    lease: &Lease,
    old_end_date: DateTime<Utc>,
    explicit_before_end: Option<String>,
    now: DateTime<Utc>,
    appended_notifications: &mut Vec<&'static str>,
) -> Result<(), OrchestratorError> {
    let events = store.list_events(lease_id).await?;

    let mut start_event = events
        .iter()
        .find(|e| e.event_type == EventType::Start)
        .cloned()
        .ok_or(OrchestratorError::InvalidInput {
            reason: "lease is missing its start_lease event".to_owned(),
        })?;
    start_event.time = lease.start_date;
    store.put_event(&start_event).await?;

    let mut end_event = events
        .iter()
        .find(|e| e.event_type == EventType::End)
        .cloned()
        .ok_or(OrchestratorError::InvalidInput {
            reason: "lease is missing its end_lease event".to_owned(),
        })?;
    end_event.time = lease.end_date;
    store.put_event(&end_event).await?;

    let before_end_event = events.into_iter().find(|e| e.event_type == EventType::BeforeEnd);

    let new_before_end = if let Some(explicit) = explicit_before_end {
        Some(parse_date_field(&explicit, now)?)
    } else if let Some(ref existing) = before_end_event {
        // Preserve the delta between the old end_date and the old
        // before_end_date, applied to the new end_date.
        let delta = old_end_date - existing.time;
        let candidate = lease.end_date - delta;
        Some(if candidate < lease.start_date {
            lease.start_date
        } else {
            candidate
        })
    } else {
        None
    };

    if let (Some(new_time), Some(mut event)) = (new_before_end, before_end_event) {
        let was_done = event.status == EventStatus::Done;
        event.time = new_time;
        if was_done {
            event.status = EventStatus::Undone;
            appended_notifications.push("event.before_end_lease.stop");
        }
        store.put_event(&event).await?;
    }

    Ok(())
}

async fn delete_lease_inner(
    store: &Store,
    plugins: &PluginRegistry,
    clock: &dyn Clock,
    lease_id: Uuid,
) -> Result<(), OrchestratorError> {
    let lease = store.get_lease(lease_id).await?;
    let now = clock.now();

    if lease.start_date <= now && now <= lease.end_date {
        if let Some(end_event) = store
            .list_events(lease_id)
            .await?
            .into_iter()
            .find(|e| e.event_type == EventType::End)
        {
            if end_event.status == EventStatus::Undone {
                let _ = store.claim_event(&end_event).await?;
            }
        } else {
            return Err(OrchestratorError::InvalidInput {
                reason: "lease is missing its end_lease event".to_owned(),
            });
        }
    }

    let reservations = store.list_reservations(lease_id).await?;
    for reservation in &reservations {
        if reservation.status == ReservationStatus::Deleted {
            continue;
        }
        let outcome = async {
            let plugin = plugins.get(&reservation.resource_type)?;
            plugin.on_end(reservation).await?;
            Ok::<_, OrchestratorError>(())
        }
        .await;

        if let Err(err) = outcome {
            tracing::warn!(
                reservation_id = %reservation.id,
                error = %err,
                "plugin on_end failed during lease deletion, aborting"
            );
            return Err(err);
        }
    }

    for reservation in &reservations {
        store.delete_reservation(reservation.id).await?;
    }
    for event in store.list_events(lease_id).await? {
        store.delete_event(event.id).await?;
    }
    store.delete_lease(lease_id).await?;

    Ok(())
}
