//! Durable store for queued request payloads.
//!
//! Boundary contract: a keyed map from request id to serialized payload that
//! survives a process restart. The ledger writes a request here before it
//! acknowledges the submission and deletes it once the request leaves the
//! Queued state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, SchedError};

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn add(&self, request_id: &str, payload: &str) -> Result<()>;
    async fn get_all(&self) -> Result<HashMap<String, String>>;
    async fn delete(&self, request_id: &str) -> Result<()>;
    async fn len(&self) -> Result<usize>;
}

/// Volatile store for tests and simulation runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn add(&self, request_id: &str, payload: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(request_id.to_string(), payload.to_string());
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<String, String>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn delete(&self, request_id: &str) -> Result<()> {
        self.entries.lock().await.remove(request_id);
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().await.len())
    }
}

/// Store backed by a single JSON document on disk.
///
/// Every mutation rewrites the document through a temp file followed by a
/// rename, so a crash mid-write leaves the previous generation intact.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the store, loading any entries a previous process left behind.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| SchedError::unavailable(format!("corrupt store file: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(SchedError::unavailable(format!("read store file: {e}"))),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> Result<()> {
        let serialized = serde_json::to_string_pretty(entries)
            .map_err(|e| SchedError::unavailable(format!("serialize store: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serialized)
            .await
            .map_err(|e| SchedError::unavailable(format!("write store file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SchedError::unavailable(format!("rename store file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl RequestStore for JsonFileStore {
    async fn add(&self, request_id: &str, payload: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(request_id.to_string(), payload.to_string());
        self.flush(&entries).await
    }

    async fn get_all(&self) -> Result<HashMap<String, String>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn delete(&self, request_id: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(request_id).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.add("r1", "{\"a\":1}").await.unwrap();
        store.add("r2", "{\"b\":2}").await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
        store.delete("r1").await.unwrap();
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("r2").map(String::as_str), Some("{\"b\":2}"));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        store.add("r1", "payload-1").await.unwrap();
        store.add("r2", "payload-2").await.unwrap();
        store.delete("r1").await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let all = reopened.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("r2").map(String::as_str), Some("payload-2"));
    }

    #[tokio::test]
    async fn file_store_open_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("absent.json"))
            .await
            .unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
