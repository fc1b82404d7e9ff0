//! In-memory storage backend for testing and single-process deployments.
//!
//! This backend stores all data in a `BTreeMap` behind a `RwLock`. It is
//! not persistent — all data is lost when the process exits. Use this for
//! unit tests and for development environments that don't need data to
//! survive a restart.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// Thread-safe and async-compatible. Data is sorted by key, which makes
/// prefix listing efficient via `BTreeMap::range`.
///
/// # Examples
///
/// ```
/// # use reservation_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("lease/abc", b"data").await.unwrap();
/// let val = backend.get("lease/abc").await.unwrap();
/// assert_eq!(val, Some(b"data".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        let keys = data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new_value: &[u8],
    ) -> Result<bool, StorageError> {
        // Hold the write lock across the check-and-swap so concurrent
        // ticks racing on the same event key can't both observe a match.
        let mut data = self.data.write().await;
        if data.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        data.insert(key.to_owned(), new_value.to_vec());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_nonexistent_returns_none() {
        let backend = MemoryBackend::new();
        let result = backend.get("does/not/exist").await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn put_and_get_roundtrip() {
        let backend = MemoryBackend::new();
        backend.put("lease/abc", b"hello").await.unwrap();
        let val = backend.get("lease/abc").await.unwrap();
        assert_eq!(val, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn put_overwrites_existing() {
        let backend = MemoryBackend::new();
        backend.put("key", b"v1").await.unwrap();
        backend.put("key", b"v2").await.unwrap();
        let val = backend.get("key").await.unwrap();
        assert_eq!(val, Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn delete_nonexistent_is_noop() {
        let backend = MemoryBackend::new();
        backend.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn list_with_prefix_is_sorted() {
        let backend = MemoryBackend::new();
        backend.put("event/b", b"2").await.unwrap();
        backend.put("event/a", b"1").await.unwrap();
        backend.put("lease/a", b"3").await.unwrap();

        let keys = backend.list("event/").await.unwrap();
        assert_eq!(keys, vec!["event/a", "event/b"]);
    }

    #[tokio::test]
    async fn compare_and_swap_succeeds_on_match() {
        let backend = MemoryBackend::new();
        backend.put("event/1", b"UNDONE").await.unwrap();
        let swapped = backend
            .compare_and_swap("event/1", Some(b"UNDONE"), b"IN_PROGRESS")
            .await
            .unwrap();
        assert!(swapped);
        assert_eq!(
            backend.get("event/1").await.unwrap(),
            Some(b"IN_PROGRESS".to_vec())
        );
    }

    #[tokio::test]
    async fn compare_and_swap_fails_on_mismatch() {
        let backend = MemoryBackend::new();
        backend.put("event/1", b"IN_PROGRESS").await.unwrap();
        let swapped = backend
            .compare_and_swap("event/1", Some(b"UNDONE"), b"ERROR")
            .await
            .unwrap();
        assert!(!swapped);
        assert_eq!(
            backend.get("event/1").await.unwrap(),
            Some(b"IN_PROGRESS".to_vec())
        );
    }

    #[tokio::test]
    async fn compare_and_swap_on_missing_key_requires_none_expected() {
        let backend = MemoryBackend::new();
        let swapped = backend
            .compare_and_swap("event/new", None, b"UNDONE")
            .await
            .unwrap();
        assert!(swapped);
    }
}
