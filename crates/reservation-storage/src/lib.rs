//! Storage backend abstraction for the reservation manager.
//!
//! This crate defines [`StorageBackend`] — a pure key-value storage
//! interface that knows nothing about leases, reservations, or events. The
//! typed store gateway in `reservation-core` layers structured JSON
//! entities on top of it.
//!
//! Two implementations are provided:
//!
//! - [`MemoryBackend`] — in-memory, default, used in tests and for
//!   single-process development deployments.
//! - [`PostgresBackend`] — persistent, backed by `PostgreSQL` (feature
//!   `postgres-backend`).

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresBackend;

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g. `lease/<id>`,
/// `event/<id>`). Values are opaque byte arrays — the store gateway
/// encodes entities as JSON before they reach this layer.
///
/// Implementations must be safe to share across async tasks (`Send +
/// Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. This is idempotent — deleting a non-existent key is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys that start with the given prefix, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and
    /// checks for `Some`. Backends may override this with a more
    /// efficient check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Atomically replace the value at `key` with `new_value`, but only if
    /// the current value equals `expected`.
    ///
    /// Returns `Ok(true)` if the swap happened, `Ok(false)` if the current
    /// value did not match `expected` (no write occurred). This is the
    /// primitive the event scheduler relies on to CAS an event's status
    /// from `UNDONE` to `IN_PROGRESS` without double-dispatching it across
    /// overlapping ticks.
    ///
    /// The default implementation is a non-atomic check-then-write guarded
    /// by a backend-local lock; it is sufficient for the single
    /// active-scheduler deployment model this service assumes but would need a real compare-and-swap primitive (e.g. a SQL
    /// `UPDATE ... WHERE value = $expected`) to be safe across multiple
    /// scheduler processes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new_value: &[u8],
    ) -> Result<bool, StorageError> {
        let current = self.get(key).await?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        self.put(key, new_value).await?;
        Ok(true)
    }
}
