//! Error types for `reservation-core`.
//!
//! Each error variant carries enough context to diagnose the problem
//! without a debugger. Variants are grouped by the subsystem that raises
//! them: input validation errors never mutate state; state
//! machine errors are sometimes retryable; plugin/backend errors are
//! always caught at the orchestrator boundary and translated into a
//! lease `ERROR` status by the transition guard.

use reservation_storage::StorageError;

/// Errors from the store gateway (component B).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// `lease_create` was given a name already used by another lease.
    ///
    /// Distinguishable from other backend failures
    #[error("lease name already exists: {name}")]
    DuplicateName { name: String },

    /// The row failed to (de)serialize. This should not happen for rows
    /// this crate itself wrote; it indicates storage corruption or a
    /// schema change.
    #[error("failed to (de)serialize {kind} row: {reason}")]
    Codec { kind: &'static str, reason: String },

    /// The underlying storage backend returned an error.
    #[error("store backend error: {0}")]
    Backend(#[from] StorageError),
}

/// Errors from plugin registry and plugin dispatch (component A).
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A plugin name in the configured list has no matching factory entry.
    #[error("no plugin registered under the name '{name}'")]
    UnknownName { name: String },

    /// Two plugins claim the same resource type after loading.
    #[error(
        "multiple plugins provide resource type '{resource_type}'; configure one plugin per resource type"
    )]
    DuplicateResourceType { resource_type: String },

    /// No plugin is registered for this resource type.
    #[error("unsupported resource type: {resource_type}")]
    UnsupportedResourceType { resource_type: String },

    /// The plugin's constructor or `setup` raised. The plugin is skipped
    /// (logged) rather than failing the whole registry —
    /// unless it's the only candidate for a required resource type, in
    /// which case the caller surfaces this as a configuration error.
    #[error("plugin '{name}' failed to load: {reason}")]
    ConstructorFailed { name: String, reason: String },

    /// A plugin callback (`reserve_resource`, `on_start`, ...) failed.
    #[error("plugin operation failed for resource type '{resource_type}': {reason}")]
    Operation {
        resource_type: String,
        reason: String,
    },
}

/// Raised at service startup when the plugin configuration is invalid.
///
/// Fatal — the service must not start.
#[derive(Debug, thiserror::Error)]
#[error("plugin configuration error: {0}")]
pub struct PluginConfigurationError(pub String);

/// Errors from the lease/reservation/event status machines (component C).
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// A lease-mutating operation was attempted while the lease was in a
    /// non-stable status, or a reservation/event transition was attempted
    /// that the state machine does not allow.
    ///
    /// Retryable by the event executor
    #[error("invalid status transition for lease {lease_id}")]
    InvalidLeaseStatus { lease_id: uuid::Uuid },

    /// A reservation status transition was not permitted by the state
    /// table.
    #[error("invalid reservation status transition: {from:?} -> {to:?}")]
    InvalidReservationTransition {
        from: crate::status::ReservationStatus,
        to: crate::status::ReservationStatus,
    },
}

/// Errors raised by the lease orchestrator (component F) and surfaced to
/// RPC callers.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A required parameter was missing from the request.
    #[error("missing required parameter(s): {params}")]
    MissingParameter { params: String },

    /// `trust_id` was missing from `create_lease` values.
    #[error("trust_id is required")]
    MissingTrustId,

    /// A date string could not be parsed against `YYYY-MM-DD HH:MM`.
    #[error("invalid date '{value}': expected format '{expected_format}'")]
    InvalidDate {
        value: String,
        expected_format: &'static str,
    },

    /// Generic input validation failure (date ordering, immutable field
    /// change, unknown reservation id, and the like).
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// `create_lease` was given a name already in use.
    #[error("a lease named '{name}' already exists")]
    LeaseNameAlreadyExists { name: String },

    /// A reservation named an unconfigured resource type.
    #[error("unsupported resource type: {resource_type}")]
    UnsupportedResourceType { resource_type: String },

    /// An attempt was made to change an immutable parameter (e.g.
    /// `resource_type` on an existing reservation).
    #[error("cannot update parameter: {param}")]
    CantUpdateParameter { param: String },

    /// The lease/reservation/event status machine rejected the
    /// transition. Retryable inside the event executor.
    #[error("invalid status transition for lease {lease_id}")]
    InvalidStatus { lease_id: uuid::Uuid },

    /// The requested lease, reservation, or event does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A plugin operation failed.
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// The store gateway returned an error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    /// Whether the event executor should treat this as the retryable
    /// `InvalidStatus` case of, rather than a terminal
    /// error.
    #[must_use]
    pub fn is_invalid_status(&self) -> bool {
        matches!(self, Self::InvalidStatus { .. })
    }
}

impl From<StatusError> for OrchestratorError {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::InvalidLeaseStatus { lease_id } => Self::InvalidStatus { lease_id },
            StatusError::InvalidReservationTransition { .. } => Self::InvalidInput {
                reason: err.to_string(),
            },
        }
    }
}

/// Errors from the RPC dispatcher shim (component H).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// `<resource_type>:<method>` named an unconfigured resource type.
    #[error("unsupported resource type: {resource_type}")]
    UnsupportedResourceType { resource_type: String },

    /// `<resource_type>:<method>` named a method the plugin interface
    /// doesn't expose.
    #[error("plugin has no method '{method}'")]
    UnknownPluginMethod { method: String },

    /// A bare method name matched neither the orchestrator's method table
    /// nor the `<type>:<method>` convention.
    #[error("unknown RPC method: {method}")]
    UnknownMethod { method: String },

    /// The request body didn't match what the target method expects.
    #[error("invalid request payload: {reason}")]
    InvalidPayload { reason: String },

    /// The dispatched orchestrator or plugin call failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Errors from notification publication (component G).
///
/// Never propagated to callers — always logged and swallowed by
/// [`crate::notification::NotificationEmitter`]
#[derive(Debug, thiserror::Error)]
#[error("notification publish to '{topic}' failed: {reason}")]
pub struct NotificationError {
    pub topic: String,
    pub reason: String,
}
