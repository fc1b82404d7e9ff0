//! Status machines for leases, reservations, and events.
//!
//! Each enum is a closed set — there is no "other" status a row can carry.
//! Transitions are checked explicitly rather than inferred, and the lease
//! machine is wrapped by [`with_lease_transition`], an explicit guard
//! function that centralizes the load-check-CAS-run pattern every guarded
//! operation needs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestratorError, StatusError};
use crate::store::Store;

/// The status of a lease as a whole.
///
/// `CREATING`/`STARTING`/`UPDATING`/`TERMINATING`/`DELETING` are held only
/// while [`with_lease_transition`] is running the wrapped operation — they
/// double as a single-writer lock per lease: the event
/// scheduler skips any lease whose status is not [`LeaseStatus::is_stable`]
/// rather than risk a second concurrent transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LeaseStatus {
    Creating,
    Pending,
    Starting,
    Active,
    Updating,
    Terminating,
    Terminated,
    Deleting,
    Error,
}

impl LeaseStatus {
    /// Whether this status is a settled state the guard is willing to leave
    /// via a new transition, rather than one reached only transiently while
    /// a guarded operation is running.
    #[must_use]
    pub fn is_stable(self) -> bool {
        matches!(self, Self::Pending | Self::Active | Self::Terminated | Self::Error)
    }
}

/// The status of a single reservation within a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReservationStatus {
    Pending,
    Active,
    Deleted,
    Error,
}

impl ReservationStatus {
    /// Whether `to` is a permitted transition from this status:
    /// `PENDING → ACTIVE`, `ACTIVE → DELETED`, and any status may
    /// move to `ERROR`.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use ReservationStatus::{Active, Deleted, Error, Pending};
        match (self, to) {
            (_, Error) => true,
            (Pending, Active) => true,
            (Active, Deleted) => true,
            _ => false,
        }
    }
}

/// The status of a scheduled lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Undone,
    InProgress,
    Done,
    Error,
}

impl EventStatus {
    /// Whether `to` is a permitted transition from this status:
    /// `UNDONE → IN_PROGRESS → DONE|ERROR`, with `IN_PROGRESS →
    /// UNDONE` allowed only as the executor's explicit retry reset.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use EventStatus::{Done, Error, InProgress, Undone};
        matches!(
            (self, to),
            (Undone, InProgress) | (InProgress, Done | Error | Undone)
        )
    }
}

/// Run `op` against the lease identified by `lease_id`, guarding it with the
/// three-step CAS pattern of: load-and-check, CAS to `transition`,
/// run `op`, then write the post-condition status.
///
/// Concretely:
///
/// 1. Loads the lease and verifies its current status is one of
///    `expected_current`, failing with [`OrchestratorError::InvalidStatus`]
///    otherwise (retryable by the event executor).
/// 2. CAS-updates the lease's status to `transition`; a losing CAS (another
///    guard got there first) also fails with `InvalidStatus`.
/// 3. Runs `op`.
/// 4. On success, writes `result_in[0]` as the lease's new status — or, if
///    `result_in` is empty, writes back whatever status the lease held
///    before step 2 (the shape `update_lease` needs: land back on `PENDING`
///    or `ACTIVE`, whichever it started from). On any other failure, writes
///    [`LeaseStatus::Error`] and returns the original error. An
///    `InvalidStatus` error from `op` itself is propagated without a
///    further status write — there's nothing to roll back, the
///    precondition just wasn't met downstream.
///
/// # Errors
///
/// Returns whatever `op` returns, or [`OrchestratorError::InvalidStatus`] if
/// the precondition check or the transition CAS fails, or a wrapped
/// `StoreError` if the lease cannot be loaded or saved.
pub async fn with_lease_transition<F, Fut, T>(
    store: &Store,
    lease_id: Uuid,
    expected_current: &[LeaseStatus],
    transition: LeaseStatus,
    result_in: &[LeaseStatus],
    op: F,
) -> Result<T, OrchestratorError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
{
    let lease = store.get_lease(lease_id).await?;
    let original_status = lease.status;

    if !expected_current.contains(&original_status) {
        return Err(StatusError::InvalidLeaseStatus { lease_id }.into());
    }

    let claimed = store.cas_lease_status(lease_id, original_status, transition).await?;
    if !claimed {
        return Err(StatusError::InvalidLeaseStatus { lease_id }.into());
    }

    match op().await {
        Ok(value) => {
            let on_success = result_in.first().copied().unwrap_or(original_status);
            store.set_lease_status(lease_id, on_success).await?;
            Ok(value)
        }
        Err(err) if err.is_invalid_status() => Err(err),
        Err(err) => {
            let _ = store.set_lease_status(lease_id, LeaseStatus::Error).await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_active_terminated_error_are_stable() {
        assert!(LeaseStatus::Pending.is_stable());
        assert!(LeaseStatus::Active.is_stable());
        assert!(LeaseStatus::Terminated.is_stable());
        assert!(LeaseStatus::Error.is_stable());
        assert!(!LeaseStatus::Creating.is_stable());
        assert!(!LeaseStatus::Starting.is_stable());
        assert!(!LeaseStatus::Updating.is_stable());
        assert!(!LeaseStatus::Terminating.is_stable());
        assert!(!LeaseStatus::Deleting.is_stable());
    }

    #[test]
    fn reservation_transitions_match_spec_table() {
        use ReservationStatus::{Active, Deleted, Error, Pending};
        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Deleted));
        assert!(Pending.can_transition_to(Error));
        assert!(Active.can_transition_to(Error));
        assert!(Deleted.can_transition_to(Error));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Pending.can_transition_to(Deleted));
        assert!(!Active.can_transition_to(Pending));
    }

    #[test]
    fn event_transitions_match_spec_table() {
        use EventStatus::{Done, Error, InProgress, Undone};
        assert!(Undone.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Done));
        assert!(InProgress.can_transition_to(Error));
        assert!(InProgress.can_transition_to(Undone));
        assert!(!Undone.can_transition_to(Done));
        assert!(!Done.can_transition_to(Undone));
    }
}
