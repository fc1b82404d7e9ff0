//! End-to-end lease lifecycle scenarios, exercised against `MemoryBackend`
//! and a `ManualClock` rather than mocks of the orchestrator's own
//! collaborators.
//!
//! Each test corresponds to one of the literal scenarios.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::Value;

use reservation_core::error::{OrchestratorError, PluginError};
use reservation_core::notification::{LoggingSink, NotificationEmitter, NotificationSink};
use reservation_core::orchestrator::{CreateLeaseValues, ReservationValues, UpdateLeaseValues, DATE_FORMAT};
use reservation_core::{
    Clock, EventType, Executor, LeaseOrchestrator, LeaseStatus, ManagerConfig, ManualClock,
    PluginFactory, PluginRegistry, Reservation, ReservationStatus, ResourcePlugin, Store,
};
use reservation_storage::MemoryBackend;

struct DummyPlugin;

#[async_trait]
impl ResourcePlugin for DummyPlugin {
    fn resource_type(&self) -> &str {
        "dummy"
    }

    async fn reserve_resource(&self, _reservation: &Reservation) -> Result<String, PluginError> {
        Ok("dummy-resource".to_owned())
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

/// Counts its own `on_start` calls so S5 can assert the healthy reservation
/// in a partially-failing lease still ran its callback.
static GOOD_ON_START_CALLS: AtomicUsize = AtomicUsize::new(0);

struct GoodPlugin;

#[async_trait]
impl ResourcePlugin for GoodPlugin {
    fn resource_type(&self) -> &str {
        "good"
    }

    async fn reserve_resource(&self, _reservation: &Reservation) -> Result<String, PluginError> {
        Ok("good-resource".to_owned())
    }

    async fn update_reservation(&self, _reservation: &Reservation) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_start(&self, _reservation: &Reservation) -> Result<(), PluginError> {
        GOOD_ON_START_CALLS.fetch_add(1, Ordering::SeqCst);
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

/// Always fails `on_start`, for S5's partial-failure scenario.
struct FlakyPlugin;

#[async_trait]
impl ResourcePlugin for FlakyPlugin {
    fn resource_type(&self) -> &str {
        "flaky"
    }

    async fn reserve_resource(&self, _reservation: &Reservation) -> Result<String, PluginError> {
        Ok("flaky-resource".to_owned())
    }

    async fn update_reservation(&self, _reservation: &Reservation) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_start(&self, reservation: &Reservation) -> Result<(), PluginError> {
        Err(PluginError::Operation {
            resource_type: reservation.resource_type.clone(),
            reason: "flaky plugin always fails on_start".to_owned(),
        })
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

fn dummy_factory() -> Arc<dyn ResourcePlugin> {
    Arc::new(DummyPlugin)
}
fn good_factory() -> Arc<dyn ResourcePlugin> {
    Arc::new(GoodPlugin)
}
fn flaky_factory() -> Arc<dyn ResourcePlugin> {
    Arc::new(FlakyPlugin)
}

async fn test_registry() -> Arc<PluginRegistry> {
    let mut factories: HashMap<String, PluginFactory> = HashMap::new();
    factories.insert("dummy".to_owned(), dummy_factory);
    factories.insert("good".to_owned(), good_factory);
    factories.insert("flaky".to_owned(), flaky_factory);
    Arc::new(
        PluginRegistry::load(
            &["dummy".to_owned(), "good".to_owned(), "flaky".to_owned()],
            &factories,
        )
        .await
        .unwrap(),
    )
}

struct Harness {
    orchestrator: LeaseOrchestrator,
    executor: Executor,
    store: Store,
    clock: Arc<ManualClock>,
}

async fn harness(now: chrono::DateTime<chrono::Utc>, config: ManagerConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(now));
    let store = Store::with_clock(Arc::new(MemoryBackend::new()), Arc::clone(&clock) as Arc<dyn Clock>);
    let plugins = test_registry().await;
    let sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(LoggingSink)];
    let notifications = Arc::new(NotificationEmitter::new(sinks));

    let orchestrator = LeaseOrchestrator::new(
        store.clone(),
        Arc::clone(&plugins),
        Arc::clone(&notifications),
        Arc::clone(&clock) as Arc<dyn Clock>,
        config.clone(),
    );
    let executor = Executor::new(
        store.clone(),
        plugins,
        notifications,
        Arc::clone(&clock) as Arc<dyn Clock>,
        config.event_max_retries,
    );

    Harness {
        orchestrator,
        executor,
        store,
        clock,
    }
}

fn fmt(t: chrono::DateTime<chrono::Utc>) -> String {
    t.format(DATE_FORMAT).to_string()
}

fn lease_values(name: &str, start: chrono::DateTime<chrono::Utc>, end: chrono::DateTime<chrono::Utc>, resource_type: &str) -> CreateLeaseValues {
    CreateLeaseValues {
        name: name.to_owned(),
        user_id: "user-1".to_owned(),
        project_id: "project-1".to_owned(),
        trust_id: "trust-1".to_owned(),
        start_date: fmt(start),
        end_date: fmt(end),
        before_end_date: None,
        reservations: vec![ReservationValues {
            resource_type: resource_type.to_owned(),
            resource_properties: Value::Null,
        }],
        extra: HashMap::new(),
    }
}

/// S1 — happy path: create, then let `start_lease`/`end_lease` fire in
/// order, driving the lease and its reservation through their full
/// lifecycle.
#[tokio::test]
async fn s1_happy_path_create_start_end() {
    let now = chrono::Utc::now();
    let start = now;
    let end = start + Duration::hours(1);
    let h = harness(now, ManagerConfig::default()).await;

    let created = h
        .orchestrator
        .create_lease(lease_values("s1-lease", start, end, "dummy"))
        .await
        .unwrap();
    assert_eq!(created.lease.status, LeaseStatus::Pending);
    assert_eq!(created.reservations.len(), 1);

    let events = h.store.list_events(created.lease.id).await.unwrap();
    // 60-minute before-end would land exactly on start_date here, which
    // still produces a before_end_lease event (clamped, not dropped).
    assert_eq!(events.len(), 3);
    let before_end = events.iter().find(|e| e.event_type == EventType::BeforeEnd).unwrap();
    assert_eq!(before_end.time, start);

    let start_event = events.iter().find(|e| e.event_type == EventType::Start).unwrap().clone();
    h.executor.execute(&start_event).await.unwrap();

    let lease_after_start = h.store.get_lease(created.lease.id).await.unwrap();
    assert_eq!(lease_after_start.status, LeaseStatus::Active);
    let reservation_after_start = h.store.list_reservations(created.lease.id).await.unwrap();
    assert_eq!(reservation_after_start[0].status, ReservationStatus::Active);

    h.clock.set(end);
    let end_event = events.iter().find(|e| e.event_type == EventType::End).unwrap().clone();
    h.executor.execute(&end_event).await.unwrap();

    let lease_after_end = h.store.get_lease(created.lease.id).await.unwrap();
    assert_eq!(lease_after_end.status, LeaseStatus::Terminated);
    let reservation_after_end = h.store.list_reservations(created.lease.id).await.unwrap();
    assert_eq!(reservation_after_end[0].status, ReservationStatus::Deleted);
}

/// S2 — update extends `end_date` while the lease is `ACTIVE`; the
/// `before_end_lease` event's delta to `end_date` is preserved.
#[tokio::test]
async fn s2_update_extends_end_preserves_before_end_delta() {
    let now = chrono::Utc::now();
    let start = now;
    let end = start + Duration::hours(1);
    let h = harness(now, ManagerConfig::default()).await;

    let created = h
        .orchestrator
        .create_lease(lease_values("s2-lease", start, end, "dummy"))
        .await
        .unwrap();

    let events = h.store.list_events(created.lease.id).await.unwrap();
    let start_event = events.iter().find(|e| e.event_type == EventType::Start).unwrap().clone();
    h.executor.execute(&start_event).await.unwrap();

    let new_end = end + Duration::hours(1);
    let updated = h
        .orchestrator
        .update_lease(
            created.lease.id,
            UpdateLeaseValues {
                end_date: Some(fmt(new_end)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.lease.status, LeaseStatus::Active);

    let events_after = h.store.list_events(created.lease.id).await.unwrap();
    let end_event_after = events_after.iter().find(|e| e.event_type == EventType::End).unwrap();
    assert_eq!(end_event_after.time, new_end);

    let before_end_after = events_after
        .iter()
        .find(|e| e.event_type == EventType::BeforeEnd)
        .unwrap();
    // Delta between old end_date and old before_end_date was exactly 60
    // minutes; the new before_end_date must sit 60 minutes ahead of the
    // new end_date.
    assert_eq!(before_end_after.time, new_end - Duration::minutes(60));
}

/// S3 — a `start_date` one minute in the past is rejected and leaves no
/// rows behind.
#[tokio::test]
async fn s3_start_in_the_past_is_rejected() {
    let now = chrono::Utc::now();
    let h = harness(now, ManagerConfig::default()).await;

    let start = now - Duration::minutes(1);
    let end = now + Duration::hours(1);
    let err = h
        .orchestrator
        .create_lease(lease_values("s3-lease", start, end, "dummy"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidInput { .. }));

    let leases = h.store.list_leases(None).await.unwrap();
    assert!(leases.is_empty());
}

/// S4 — a duplicate lease name on the second `create_lease` call rolls
/// back whatever partial rows it wrote, leaving only the first lease.
#[tokio::test]
async fn s4_duplicate_name_is_rejected_and_rolled_back() {
    let now = chrono::Utc::now();
    let start = now;
    let end = start + Duration::hours(1);
    let h = harness(now, ManagerConfig::default()).await;

    h.orchestrator
        .create_lease(lease_values("dup-lease", start, end, "dummy"))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .create_lease(lease_values("dup-lease", start, end, "dummy"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::LeaseNameAlreadyExists { .. }));

    let leases = h.store.list_leases(None).await.unwrap();
    assert_eq!(leases.len(), 1);
}

/// S5 — one reservation's `on_start` fails; its sibling still runs its
/// callback, and the lease/event/failing-reservation all land in `ERROR`.
#[tokio::test]
async fn s5_plugin_failure_on_start_is_partial() {
    let now = chrono::Utc::now();
    let start = now;
    let end = start + Duration::hours(1);
    let h = harness(now, ManagerConfig::default()).await;

    let mut values = lease_values("s5-lease", start, end, "good");
    values.reservations.push(ReservationValues {
        resource_type: "flaky".to_owned(),
        resource_properties: Value::Null,
    });

    let created = h.orchestrator.create_lease(values).await.unwrap();
    assert_eq!(created.reservations.len(), 2);

    let before = GOOD_ON_START_CALLS.load(Ordering::SeqCst);

    let events = h.store.list_events(created.lease.id).await.unwrap();
    let start_event = events.iter().find(|e| e.event_type == EventType::Start).unwrap().clone();
    let result = h.executor.execute(&start_event).await;
    assert!(result.is_err());

    assert_eq!(GOOD_ON_START_CALLS.load(Ordering::SeqCst), before + 1);

    let lease_after = h.store.get_lease(created.lease.id).await.unwrap();
    assert_eq!(lease_after.status, LeaseStatus::Error);

    let event_after = h.store.get_event(start_event.id).await.unwrap();
    assert_eq!(event_after.status, reservation_core::EventStatus::Error);

    let reservations_after = h.store.list_reservations(created.lease.id).await.unwrap();
    let good = reservations_after.iter().find(|r| r.resource_type == "good").unwrap();
    let flaky = reservations_after.iter().find(|r| r.resource_type == "flaky").unwrap();
    assert_eq!(good.status, ReservationStatus::Active);
    assert_eq!(flaky.status, ReservationStatus::Error);
}

/// S6 — the lease is mid-transition (e.g. `update_lease`'s guard is
/// holding `UPDATING`) when `start_lease` fires; the executor resets the
/// event to `UNDONE` rather than erroring it outright, and a retry within
/// the window succeeds.
#[tokio::test]
async fn s6_retryable_invalid_status_succeeds_on_retry() {
    let now = chrono::Utc::now();
    let start = now;
    let end = start + Duration::hours(1);
    let h = harness(now, ManagerConfig::default()).await;

    let created = h
        .orchestrator
        .create_lease(lease_values("s6-lease", start, end, "dummy"))
        .await
        .unwrap();

    // Simulate another guarded operation mid-flight.
    let claimed = h
        .store
        .cas_lease_status(created.lease.id, LeaseStatus::Pending, LeaseStatus::Updating)
        .await
        .unwrap();
    assert!(claimed);

    let events = h.store.list_events(created.lease.id).await.unwrap();
    let start_event = events.iter().find(|e| e.event_type == EventType::Start).unwrap().clone();

    // The scheduler would have claimed this event to IN_PROGRESS before
    // spawning the executor.
    h.store.claim_event(&start_event).await.unwrap();

    let first_attempt = h.executor.execute(&start_event).await;
    assert!(matches!(first_attempt, Err(OrchestratorError::InvalidStatus { .. })));

    let event_after_first = h.store.get_event(start_event.id).await.unwrap();
    assert_eq!(event_after_first.status, reservation_core::EventStatus::Undone);

    // The other guarded operation finishes and returns the lease to PENDING.
    h.store
        .cas_lease_status(created.lease.id, LeaseStatus::Updating, LeaseStatus::Pending)
        .await
        .unwrap();

    let claimed_again = h.store.claim_event(&event_after_first).await.unwrap();
    assert!(claimed_again);

    let second_attempt = h.executor.execute(&event_after_first).await;
    assert!(second_attempt.is_ok());

    let lease_after = h.store.get_lease(created.lease.id).await.unwrap();
    assert_eq!(lease_after.status, LeaseStatus::Active);
}

/// Invariant 6 — `update_lease` with an empty `values` is a no-op that
/// returns the lease unchanged.
#[tokio::test]
async fn empty_update_is_idempotent_no_op() {
    let now = chrono::Utc::now();
    let start = now;
    let end = start + Duration::hours(1);
    let h = harness(now, ManagerConfig::default()).await;

    let created = h
        .orchestrator
        .create_lease(lease_values("noop-lease", start, end, "dummy"))
        .await
        .unwrap();

    let unchanged = h
        .orchestrator
        .update_lease(created.lease.id, UpdateLeaseValues::default())
        .await
        .unwrap();

    assert_eq!(unchanged.lease.status, created.lease.status);
    assert_eq!(unchanged.lease.start_date, created.lease.start_date);
    assert_eq!(unchanged.lease.end_date, created.lease.end_date);
}

/// Rename-only updates are allowed on a lease that has already ended,
/// when every other update would be rejected.
#[tokio::test]
async fn rename_only_update_allowed_after_lease_ended() {
    let now = chrono::Utc::now();
    let start = now;
    let end = start + Duration::minutes(1);
    let h = harness(now, ManagerConfig::default()).await;

    let created = h
        .orchestrator
        .create_lease(lease_values("old-name", start, end, "dummy"))
        .await
        .unwrap();

    h.clock.set(end + Duration::minutes(1));

    let renamed = h
        .orchestrator
        .update_lease(
            created.lease.id,
            UpdateLeaseValues {
                name: Some("new-name".to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.lease.name, "new-name");

    let non_rename = h
        .orchestrator
        .update_lease(
            created.lease.id,
            UpdateLeaseValues {
                end_date: Some(fmt(end + Duration::hours(1))),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(non_rename, OrchestratorError::InvalidInput { .. }));
}

/// `before_end_lease` runs its notification checkpoint against an
/// `ACTIVE` lease without flipping any status, and leaves the event
/// `DONE`.
#[tokio::test]
async fn before_end_lease_runs_as_unguarded_notification_checkpoint() {
    let now = chrono::Utc::now();
    let start = now;
    let end = start + Duration::hours(2);
    let h = harness(now, ManagerConfig::default()).await;

    let created = h
        .orchestrator
        .create_lease(lease_values("before-end-lease", start, end, "good"))
        .await
        .unwrap();

    let events = h.store.list_events(created.lease.id).await.unwrap();
    let start_event = events.iter().find(|e| e.event_type == EventType::Start).unwrap().clone();
    h.executor.execute(&start_event).await.unwrap();

    let before_end_event = events
        .iter()
        .find(|e| e.event_type == EventType::BeforeEnd)
        .unwrap()
        .clone();
    h.executor.execute(&before_end_event).await.unwrap();

    let event_after = h.store.get_event(before_end_event.id).await.unwrap();
    assert_eq!(event_after.status, reservation_core::EventStatus::Done);

    let lease_after = h.store.get_lease(created.lease.id).await.unwrap();
    assert_eq!(lease_after.status, LeaseStatus::Active);
}

/// `update_lease` on a `TERMINATED` lease reaches `apply_update`'s
/// already-ended check rather than being rejected by the guard itself —
/// the guard now accepts every stable status, matching `delete_lease`.
#[tokio::test]
async fn update_lease_on_terminated_lease_is_invalid_input_not_invalid_status() {
    let now = chrono::Utc::now();
    let start = now;
    let end = start + Duration::minutes(30);
    let h = harness(now, ManagerConfig::default()).await;

    let created = h
        .orchestrator
        .create_lease(lease_values("terminated-lease", start, end, "dummy"))
        .await
        .unwrap();

    let events = h.store.list_events(created.lease.id).await.unwrap();
    let start_event = events.iter().find(|e| e.event_type == EventType::Start).unwrap().clone();
    h.executor.execute(&start_event).await.unwrap();

    h.clock.set(end);
    let end_event = events.iter().find(|e| e.event_type == EventType::End).unwrap().clone();
    h.executor.execute(&end_event).await.unwrap();

    let lease_after_end = h.store.get_lease(created.lease.id).await.unwrap();
    assert_eq!(lease_after_end.status, LeaseStatus::Terminated);

    h.clock.set(end + Duration::minutes(1));
    let err = h
        .orchestrator
        .update_lease(
            created.lease.id,
            UpdateLeaseValues {
                end_date: Some(fmt(end + Duration::hours(1))),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidInput { .. }));
}

/// `delete_lease` mid-window pre-empts the scheduler by claiming the
/// `end_lease` event before releasing reservations, and always calls
/// every non-deleted reservation's `on_end`.
#[tokio::test]
async fn delete_mid_window_preempts_end_event_and_releases_reservations() {
    let now = chrono::Utc::now();
    let start = now;
    let end = start + Duration::hours(1);
    let h = harness(now, ManagerConfig::default()).await;

    let created = h
        .orchestrator
        .create_lease(lease_values("delete-me", start, end, "dummy"))
        .await
        .unwrap();

    let events = h.store.list_events(created.lease.id).await.unwrap();
    let start_event = events.iter().find(|e| e.event_type == EventType::Start).unwrap().clone();
    h.executor.execute(&start_event).await.unwrap();

    h.clock.set(start + Duration::minutes(30));
    h.orchestrator.delete_lease(created.lease.id).await.unwrap();

    let lease_after = h.store.find_lease(created.lease.id).await.unwrap();
    assert!(lease_after.is_none());
    let reservations_after = h.store.list_reservations(created.lease.id).await.unwrap();
    assert!(reservations_after.is_empty());
}
