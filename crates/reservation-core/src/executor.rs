//! Event executor: runs the action a due event names against every
//! reservation on its lease.
//!
//! Grounded on the same guard primitive the orchestrator uses
//! ([`with_lease_transition`]) for `start_lease`/`end_lease`, but
//! `before_end_lease` deliberately runs outside the guard — a `before_end`
//! notification is best-effort and must never flip a healthy lease to
//! `ERROR` just because one plugin's warning callback failed.

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{OrchestratorError, PluginError};
use crate::model::{Event, EventType, Reservation};
use crate::notification::NotificationEmitter;
use crate::plugin::{PluginRegistry, ResourcePlugin};
use crate::status::{with_lease_transition, EventStatus, LeaseStatus, ReservationStatus};
use crate::store::Store;

/// Seconds added per retry attempt to an event's original `time` to compute
/// its retry deadline. The
/// retry count itself (`manager.event_max_retries`, default `1`, range
/// `[0, 50]`) is configured per [`Executor`], not fixed here.
const RETRY_WINDOW_SECONDS_PER_ATTEMPT: i64 = 10;

/// The action a due event runs against each of its lease's reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    OnStart,
    OnEnd,
    BeforeEnd,
}

impl Action {
    async fn run(self, plugin: &dyn ResourcePlugin, reservation: &Reservation) -> Result<(), PluginError> {
        match self {
            Self::OnStart => plugin.on_start(reservation).await,
            Self::OnEnd => plugin.on_end(reservation).await,
            Self::BeforeEnd => plugin.before_end(reservation).await,
        }
    }
}

/// Runs the three event actions.
///
/// Cheap to clone — every field is an `Arc` or a clonable handle.
#[derive(Clone)]
pub struct Executor {
    store: Store,
    plugins: Arc<PluginRegistry>,
    notifications: Arc<NotificationEmitter>,
    clock: Arc<dyn Clock>,
    event_max_retries: u32,
}

impl Executor {
    #[must_use]
    pub fn new(
        store: Store,
        plugins: Arc<PluginRegistry>,
        notifications: Arc<NotificationEmitter>,
        clock: Arc<dyn Clock>,
        event_max_retries: u32,
    ) -> Self {
        Self {
            store,
            plugins,
            notifications,
            clock,
            event_max_retries,
        }
    }

    /// Run the action a due, claimed event names.
    ///
    /// On an [`OrchestratorError::InvalidStatus`] — the lease was mid
    /// another guarded operation when this event fired — the event is
    /// reset to `UNDONE` so a later tick retries it, as long as it hasn't
    /// already been retried past `event_max_retries`; past that window it
    /// is left `IN_PROGRESS` forever, a known limitation records
    /// rather than papers over.
    ///
    /// # Errors
    ///
    /// Returns whatever the dispatched action returns. Callers (the
    /// scheduler) only log this — the event's own status row already
    /// records the outcome.
    pub async fn execute(&self, event: &Event) -> Result<(), OrchestratorError> {
        let outcome = match event.event_type {
            EventType::Start => self.start_lease(event).await,
            EventType::End => self.end_lease(event).await,
            EventType::BeforeEnd => self.before_end_lease(event).await,
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(err) if err.is_invalid_status() => {
                self.handle_invalid_status_retry(event).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn handle_invalid_status_retry(&self, event: &Event) {
        let now = self.clock.now();
        let retry_deadline = event.time
            + chrono::Duration::seconds(i64::from(self.event_max_retries) * RETRY_WINDOW_SECONDS_PER_ATTEMPT);

        if now <= retry_deadline {
            if let Err(err) = self.store.reset_event_to_undone(event.id).await {
                tracing::warn!(event_id = %event.id, error = %err, "failed to reset event for retry");
            }
        } else {
            tracing::error!(
                event_id = %event.id,
                lease_id = %event.lease_id,
                "event exhausted its retry window while its lease stayed non-stable; abandoning in place"
            );
        }
    }

    /// `start_lease`: guard the lease `PENDING → STARTING → ACTIVE`, run
    /// `on_start` against every reservation, flip each to `ACTIVE`, and
    /// mark the event `DONE`.
    async fn start_lease(&self, event: &Event) -> Result<(), OrchestratorError> {
        let lease_id = event.lease_id;
        let event_id = event.id;
        let store = self.store.clone();
        let plugins = Arc::clone(&self.plugins);

        with_lease_transition(
            &self.store,
            lease_id,
            &[LeaseStatus::Pending],
            LeaseStatus::Starting,
            &[LeaseStatus::Active],
            move || async move {
                run_basic_action(
                    &store,
                    &plugins,
                    lease_id,
                    event_id,
                    Action::OnStart,
                    Some(ReservationStatus::Active),
                )
                .await
            },
        )
        .await?;

        self.notifications
            .emit(
                "event.start_lease",
                serde_json::json!({ "lease_id": lease_id, "event_id": event_id }),
            )
            .await;
        Ok(())
    }

    /// `end_lease`: guard the lease `ACTIVE|PENDING → TERMINATING →
    /// TERMINATED`, run `on_end` against every reservation, flip each to
    /// `DELETED`, and mark the event `DONE`. Reachable from
    /// `PENDING` too — a lease can be force-ended before it ever started.
    async fn end_lease(&self, event: &Event) -> Result<(), OrchestratorError> {
        let lease_id = event.lease_id;
        let event_id = event.id;
        let store = self.store.clone();
        let plugins = Arc::clone(&self.plugins);

        with_lease_transition(
            &self.store,
            lease_id,
            &[LeaseStatus::Active, LeaseStatus::Pending],
            LeaseStatus::Terminating,
            &[LeaseStatus::Terminated],
            move || async move {
                run_basic_action(
                    &store,
                    &plugins,
                    lease_id,
                    event_id,
                    Action::OnEnd,
                    Some(ReservationStatus::Deleted),
                )
                .await
            },
        )
        .await?;

        self.notifications
            .emit(
                "event.end_lease",
                serde_json::json!({ "lease_id": lease_id, "event_id": event_id }),
            )
            .await;
        Ok(())
    }

    /// `before_end_lease`: run `before_end` against every reservation of a
    /// lease, without going through [`with_lease_transition`] and without
    /// any status precondition — this is a best-effort notification
    /// checkpoint, not a state change, and must never fail with
    /// `InvalidStatus` just because its due time landed in the same
    /// instant as `start_lease`'s guard window. The event is still marked
    /// `DONE`/`ERROR` to record whether it ran cleanly, but that outcome is
    /// never surfaced as an error the caller retries.
    async fn before_end_lease(&self, event: &Event) -> Result<(), OrchestratorError> {
        let had_error = run_basic_action(&self.store, &self.plugins, event.lease_id, event.id, Action::BeforeEnd, None)
            .await
            .is_err();

        self.notifications
            .emit(
                "event.before_end_lease",
                serde_json::json!({ "lease_id": event.lease_id, "event_id": event.id, "had_error": had_error }),
            )
            .await;
        Ok(())
    }
}

/// Run `action` against every reservation on `lease_id`, persisting
/// `target_status` for reservations where it succeeds (or `ERROR` where it
/// doesn't, when a target status is given at all), then write the event's
/// final `DONE`/`ERROR` status.
///
/// Does not stop at the first plugin failure — every reservation gets a
/// chance to run. If any reservation failed, this returns
/// [`OrchestratorError::InvalidInput`]; `start_lease`/`end_lease` let that
/// propagate into `with_lease_transition`, which turns it into
/// `LeaseStatus::Error`. `before_end_lease` discards this `Err` rather than
/// propagating it, since it never guards the lease in the first place.
async fn run_basic_action(
    store: &Store,
    plugins: &PluginRegistry,
    lease_id: Uuid,
    event_id: Uuid,
    action: Action,
    target_status: Option<ReservationStatus>,
) -> Result<(), OrchestratorError> {
    let reservations = store.list_reservations(lease_id).await?;
    let mut had_error = false;

    for reservation in reservations {
        let outcome = async {
            let plugin = plugins.get(&reservation.resource_type)?;
            action.run(plugin.as_ref(), &reservation).await
        }
        .await;

        match outcome {
            Ok(()) => {
                if let Some(status) = target_status {
                    store.set_reservation_status(reservation.id, status).await?;
                }
            }
            Err(err) => {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    lease_id = %lease_id,
                    error = %err,
                    "plugin action failed for reservation"
                );
                if target_status.is_some() {
                    let _ = store
                        .set_reservation_status(reservation.id, ReservationStatus::Error)
                        .await;
                }
                had_error = true;
            }
        }
    }

    let event_status = if had_error { EventStatus::Error } else { EventStatus::Done };
    store.set_event_status(event_id, event_status).await?;

    if had_error {
        return Err(OrchestratorError::InvalidInput {
            reason: format!("one or more reservations failed during event {event_id}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::model::EventType;
    use crate::notification::{LoggingSink, NotificationEmitter};
    use crate::plugin::PluginRegistry;
    use crate::status::EventStatus;
    use reservation_storage::MemoryBackend;

    #[tokio::test]
    async fn handle_invalid_status_retry_resets_event_within_window_and_leaves_it_otherwise() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now));
        let store = Store::with_clock(Arc::new(MemoryBackend::new()), Arc::clone(&clock));
        let no_plugins: Vec<String> = Vec::new();
        let plugins = Arc::new(
            PluginRegistry::load(&no_plugins, &std::collections::HashMap::new())
                .await
                .unwrap(),
        );
        let notifications = Arc::new(NotificationEmitter::new(vec![Box::new(LoggingSink)]));

        let lease_id = Uuid::new_v4();
        let within_window = Event {
            id: Uuid::new_v4(),
            lease_id,
            event_type: EventType::Start,
            time: now,
            status: EventStatus::InProgress,
            created_at: now,
            updated_at: now,
        };
        store.create_event(&within_window).await.unwrap();

        let executor = Executor::new(
            store.clone(),
            Arc::clone(&plugins),
            Arc::clone(&notifications),
            Arc::clone(&clock),
            1,
        );
        executor.handle_invalid_status_retry(&within_window).await;
        let after = store.get_event(within_window.id).await.unwrap();
        assert_eq!(after.status, EventStatus::Undone);

        let expired = Event {
            id: Uuid::new_v4(),
            lease_id,
            event_type: EventType::Start,
            time: now - chrono::Duration::seconds(100),
            status: EventStatus::InProgress,
            created_at: now,
            updated_at: now,
        };
        store.create_event(&expired).await.unwrap();

        let executor = Executor::new(store.clone(), plugins, notifications, clock, 1);
        executor.handle_invalid_status_retry(&expired).await;
        let after_expired = store.get_event(expired.id).await.unwrap();
        assert_eq!(after_expired.status, EventStatus::InProgress);
    }
}
