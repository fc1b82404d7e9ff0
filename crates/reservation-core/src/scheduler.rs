//! Event scheduler: the tick loop that finds due events and hands each one
//! to the executor.
//!
//! A `tokio::time::interval` tick raced against a `tokio::sync::watch`
//! shutdown signal, with the scan itself retried under exponential backoff
//! so a transient backend error doesn't kill the loop.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::watch;

use crate::clock::Clock;
use crate::executor::Executor;
use crate::model::Event;
use crate::store::Store;

/// How many times a due-events scan is retried on a backend error before
/// the tick gives up and waits for the next interval.
const SCAN_MAX_RETRIES: u32 = 3;

/// Consecutive tick failures after which the scheduler escalates its log
/// severity from `warn` to `error`.
const CONSECUTIVE_FAILURES_ESCALATION_THRESHOLD: u32 = 5;

/// The periodic tick that drives lease lifecycle events:
///
/// 1. List every `UNDONE` event due at or before now, ordered by time.
/// 2. For each: skip if its lease isn't [`crate::status::LeaseStatus::is_stable`]
///    (another guarded operation is already running against it); otherwise
///    CAS-claim it to `IN_PROGRESS`.
/// 3. Hand claimed events to the executor via `tokio::spawn`, without
///    awaiting completion inside the tick — one slow or stuck event must
///    never delay the rest of the batch or the next tick.
pub struct Scheduler {
    store: Store,
    executor: Executor,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    #[must_use]
    pub fn new(store: Store, executor: Executor, clock: Arc<dyn Clock>) -> Self {
        Self { store, executor, clock }
    }

    /// Run one tick: scan for due events, claim the ones whose lease is
    /// stable, and spawn the executor against each claimed event.
    ///
    /// Returns the number of events this tick claimed and spawned, mostly
    /// useful for tests.
    ///
    /// # Errors
    ///
    /// Returns a store error if the due-events scan itself fails (claim
    /// failures for individual events are logged and skipped, not
    /// propagated — a losing CAS just means another tick or an in-flight
    /// guarded operation got there first).
    pub async fn tick(&self) -> Result<usize, crate::error::StoreError> {
        let now = self.clock.now();
        let due = self.store.list_due_events(now).await?;
        let mut spawned = 0;

        for event in due {
            if !self.lease_is_stable(&event).await {
                continue;
            }

            match self.store.claim_event(&event).await {
                Ok(true) => {
                    self.spawn_execution(event);
                    spawned += 1;
                }
                Ok(false) => {
                    tracing::debug!(event_id = %event.id, "lost claim race for due event, skipping this tick");
                }
                Err(err) => {
                    tracing::warn!(event_id = %event.id, error = %err, "failed to claim due event");
                }
            }
        }

        Ok(spawned)
    }

    async fn lease_is_stable(&self, event: &Event) -> bool {
        match self.store.find_lease(event.lease_id).await {
            Ok(Some(lease)) => lease.status.is_stable(),
            Ok(None) => {
                tracing::warn!(event_id = %event.id, lease_id = %event.lease_id, "due event references a missing lease");
                false
            }
            Err(err) => {
                tracing::warn!(event_id = %event.id, error = %err, "failed to load lease for due event, skipping");
                false
            }
        }
    }

    fn spawn_execution(&self, event: Event) {
        let executor = self.executor.clone();
        tokio::spawn(async move {
            if let Err(err) = executor.execute(&event).await {
                tracing::warn!(
                    event_id = %event.id,
                    lease_id = %event.lease_id,
                    error = %err,
                    "event execution failed"
                );
            }
        });
    }

    /// Scan for due events with exponential backoff, the retry wrapper
    /// around `list_due_events` the background worker uses so a single
    /// transient backend error doesn't stall every subsequent tick.
    ///
    /// Returns `Ok(None)` if `shutdown` fires mid-retry.
    ///
    /// # Errors
    ///
    /// Returns the last error encountered once `SCAN_MAX_RETRIES` is
    /// exhausted.
    async fn retry_scan(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<usize>, crate::error::StoreError> {
        let mut attempt = 0;
        loop {
            tokio::select! {
                result = self.tick() => {
                    match result {
                        Ok(count) => return Ok(Some(count)),
                        Err(err) => {
                            attempt += 1;
                            if attempt > SCAN_MAX_RETRIES {
                                return Err(err);
                            }
                            let backoff = StdDuration::from_secs(1 << (attempt - 1));
                            tracing::warn!(attempt, error = %err, "scheduler tick failed, retrying after backoff");
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
                _ = shutdown.changed() => return Ok(None),
            }
        }
    }

    /// Run the scheduler loop until `shutdown` is signaled.
    ///
    /// A fixed-interval tick raced against the shutdown signal, with
    /// consecutive tick
    /// failures tracked and escalated to `error` severity after
    /// [`CONSECUTIVE_FAILURES_ESCALATION_THRESHOLD`] in a row.
    pub async fn run(self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(StdDuration::from_secs(interval_secs));
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.retry_scan(&mut shutdown).await {
                        Ok(Some(count)) => {
                            consecutive_failures = 0;
                            if count > 0 {
                                tracing::debug!(claimed = count, "scheduler tick claimed events");
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            consecutive_failures += 1;
                            if consecutive_failures >= CONSECUTIVE_FAILURES_ESCALATION_THRESHOLD {
                                tracing::error!(error = %err, consecutive_failures, "scheduler tick repeatedly failing");
                            } else {
                                tracing::warn!(error = %err, consecutive_failures, "scheduler tick failed");
                            }
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("scheduler loop exiting on shutdown signal");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use reservation_storage::MemoryBackend;
    use uuid::Uuid;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::PluginError;
    use crate::model::{Event, EventType, Lease, Reservation};
    use crate::notification::{LoggingSink, NotificationEmitter};
    use crate::plugin::{PluginRegistry, ResourcePlugin};
    use crate::status::{EventStatus, LeaseStatus, ReservationStatus};

    struct NoopPlugin;

    #[async_trait]
    impl ResourcePlugin for NoopPlugin {
        fn resource_type(&self) -> &str {
            "test:noop"
        }

        async fn reserve_resource(&self, _reservation: &Reservation) -> Result<String, PluginError> {
            Ok("resource-1".to_owned())
        }

        async fn update_reservation(&self, _reservation: &Reservation) -> Result<(), PluginError> {
            Ok(())
        }

        async fn on_start(&self, _reservation: &Reservation) -> Result<(), PluginError> {
            Ok(())
        }

        async fn on_end(&self, _reservation: &Reservation) -> Result<(), PluginError> {
            Ok(())
        }

        async fn before_end(&self, _reservation: &Reservation) -> Result<(), PluginError> {
            Ok(())
        }

        async fn delete_reservation(&self, _reservation: &Reservation) -> Result<(), PluginError> {
            Ok(())
        }
    }

    async fn test_registry() -> Arc<PluginRegistry> {
        let mut factories: std::collections::HashMap<String, crate::plugin::PluginFactory> =
            std::collections::HashMap::new();
        factories.insert("noop".to_owned(), || Arc::new(NoopPlugin));
        Arc::new(PluginRegistry::load(&["noop".to_owned()], &factories).await.unwrap())
    }

    #[tokio::test]
    async fn tick_claims_due_event_and_skips_non_stable_lease() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Store::with_clock(Arc::new(MemoryBackend::new()), Arc::clone(&clock) as Arc<dyn Clock>);
        let plugins = test_registry().await;
        let notifications = Arc::new(NotificationEmitter::new(vec![Box::new(LoggingSink)]));
        let executor = Executor::new(store.clone(), Arc::clone(&plugins), notifications, Arc::clone(&clock) as Arc<dyn Clock>, 1);
        let scheduler = Scheduler::new(store.clone(), executor, Arc::clone(&clock) as Arc<dyn Clock>);

        let now = clock.now();
        let lease_id = Uuid::new_v4();
        let lease = Lease {
            id: lease_id,
            name: "lease-a".to_owned(),
            user_id: String::new(),
            project_id: String::new(),
            trust_id: "trust".to_owned(),
            start_date: now,
            end_date: now + Duration::hours(1),
            status: LeaseStatus::Pending,
            extra: std::collections::HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        store.create_lease(&lease).await.unwrap();

        let reservation = Reservation {
            id: Uuid::new_v4(),
            lease_id,
            resource_type: "test:noop".to_owned(),
            status: ReservationStatus::Pending,
            resource_properties: serde_json::Value::Null,
            resource_id: Some("resource-1".to_owned()),
            created_at: now,
            updated_at: now,
        };
        store.create_reservation(&reservation).await.unwrap();

        let due_event = Event {
            id: Uuid::new_v4(),
            lease_id,
            event_type: EventType::Start,
            time: now,
            status: EventStatus::Undone,
            created_at: now,
            updated_at: now,
        };
        store.create_event(&due_event).await.unwrap();

        let claimed = scheduler.tick().await.unwrap();
        assert_eq!(claimed, 1);

        // give the spawned executor a chance to run
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let lease_after = store.get_lease(lease_id).await.unwrap();
        assert_eq!(lease_after.status, LeaseStatus::Active);
    }

    #[tokio::test]
    async fn tick_skips_events_whose_lease_is_not_stable() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Store::with_clock(Arc::new(MemoryBackend::new()), Arc::clone(&clock) as Arc<dyn Clock>);
        let plugins = test_registry().await;
        let notifications = Arc::new(NotificationEmitter::new(vec![Box::new(LoggingSink)]));
        let executor = Executor::new(store.clone(), Arc::clone(&plugins), notifications, Arc::clone(&clock) as Arc<dyn Clock>, 1);
        let scheduler = Scheduler::new(store.clone(), executor, Arc::clone(&clock) as Arc<dyn Clock>);

        let now = clock.now();
        let lease_id = Uuid::new_v4();
        let lease = Lease {
            id: lease_id,
            name: "lease-b".to_owned(),
            user_id: String::new(),
            project_id: String::new(),
            trust_id: "trust".to_owned(),
            start_date: now,
            end_date: now + Duration::hours(1),
            status: LeaseStatus::Updating,
            extra: std::collections::HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        store.create_lease(&lease).await.unwrap();

        let due_event = Event {
            id: Uuid::new_v4(),
            lease_id,
            event_type: EventType::Start,
            time: now,
            status: EventStatus::Undone,
            created_at: now,
            updated_at: now,
        };
        store.create_event(&due_event).await.unwrap();

        let claimed = scheduler.tick().await.unwrap();
        assert_eq!(claimed, 0);

        let event_after = store.get_event(due_event.id).await.unwrap();
        assert_eq!(event_after.status, EventStatus::Undone);
    }
}
