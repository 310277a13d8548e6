//! Checkpoint persistence
//!
//! After every merged step the scheduler can record a snapshot keyed by
//! `(thread_id, step)`. Snapshots are append-only per thread: a store never
//! overwrites an existing key, so a run's history stays replayable. The
//! in-memory store backs tests; the file store persists one directory per
//! thread with one JSON file per step, written atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::RunError;
use crate::state::{GraphState, StateSchema};

/// One persisted step of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Logical conversation/run identity
    pub thread_id: String,
    /// 1-based scheduler step this snapshot follows
    pub step: usize,
    /// Node scheduled to run next (`END` when terminal)
    pub next_node: String,
    /// Full field values at this step
    pub values: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl StateSnapshot {
    /// Capture the state after a merged step.
    pub fn capture(
        thread_id: impl Into<String>,
        step: usize,
        next_node: impl Into<String>,
        state: &GraphState,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            step,
            next_node: next_node.into(),
            values: state.values().clone(),
            timestamp: Utc::now(),
        }
    }

    /// Rebuild a runnable state from this snapshot against a schema.
    pub fn restore(&self, schema: Arc<StateSchema>) -> Result<GraphState, RunError> {
        GraphState::restore(schema, self.values.clone())
    }
}

/// Storage for run snapshots, keyed by `(thread_id, step)`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot. Must refuse to overwrite an existing key.
    async fn put(&self, snapshot: StateSnapshot) -> Result<(), RunError>;

    /// Fetch the snapshot at an exact step, if present.
    async fn get(&self, thread_id: &str, step: usize) -> Result<Option<StateSnapshot>, RunError>;

    /// Fetch the highest-step snapshot for a thread, if any.
    async fn latest(&self, thread_id: &str) -> Result<Option<StateSnapshot>, RunError>;
}

/// In-memory store. Snapshots live as long as the store.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: Mutex<HashMap<String, Vec<StateSnapshot>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots recorded for a thread.
    pub fn step_count(&self, thread_id: &str) -> usize {
        self.threads
            .lock()
            .map(|t| t.get(thread_id).map(|s| s.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, snapshot: StateSnapshot) -> Result<(), RunError> {
        let mut threads = self
            .threads
            .lock()
            .map_err(|_| RunError::checkpoint_error("checkpoint store lock poisoned"))?;
        let steps = threads.entry(snapshot.thread_id.clone()).or_default();
        if steps.iter().any(|s| s.step == snapshot.step) {
            return Err(RunError::checkpoint_error(format!(
                "snapshot already recorded for thread '{}' step {}",
                snapshot.thread_id, snapshot.step
            )));
        }
        steps.push(snapshot);
        Ok(())
    }

    async fn get(&self, thread_id: &str, step: usize) -> Result<Option<StateSnapshot>, RunError> {
        let threads = self
            .threads
            .lock()
            .map_err(|_| RunError::checkpoint_error("checkpoint store lock poisoned"))?;
        Ok(threads
            .get(thread_id)
            .and_then(|steps| steps.iter().find(|s| s.step == step))
            .cloned())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<StateSnapshot>, RunError> {
        let threads = self
            .threads
            .lock()
            .map_err(|_| RunError::checkpoint_error("checkpoint store lock poisoned"))?;
        Ok(threads
            .get(thread_id)
            .and_then(|steps| steps.iter().max_by_key(|s| s.step))
            .cloned())
    }
}

/// File-backed store: one directory per thread, one snapshot file per step.
///
/// Writes go through a temp file in the target directory followed by an
/// atomic rename, so a crash never leaves a half-written snapshot behind.
pub struct FileCheckpointStore {
    root: PathBuf,
    compress: bool,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compress: false,
        }
    }

    /// Compress snapshot files with zstd.
    pub fn with_compression(mut self) -> Self {
        self.compress = true;
        self
    }

    fn thread_dir(&self, thread_id: &str) -> PathBuf {
        self.root.join(thread_id)
    }

    fn snapshot_path(&self, thread_id: &str, step: usize) -> PathBuf {
        let name = if self.compress {
            format!("snapshot_{:05}.json.zst", step)
        } else {
            format!("snapshot_{:05}.json", step)
        };
        self.thread_dir(thread_id).join(name)
    }

    async fn write_atomic(&self, path: &Path, bytes: Vec<u8>) -> Result<(), RunError> {
        let dir = path
            .parent()
            .ok_or_else(|| RunError::checkpoint_error("snapshot path has no parent directory"))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RunError::checkpoint_error("snapshot path has no file name"))?;
        let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| RunError::checkpoint_error(format!("write snapshot: {}", e)))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(RunError::checkpoint_error(format!("persist snapshot: {}", e)));
        }
        Ok(())
    }

    async fn read_snapshot(&self, path: &Path) -> Result<StateSnapshot, RunError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RunError::checkpoint_error(format!("read snapshot: {}", e)))?;
        let bytes = if self.compress {
            tokio::task::spawn_blocking(move || zstd::decode_all(bytes.as_slice()))
                .await
                .map_err(|e| RunError::checkpoint_error(format!("decompress task: {}", e)))?
                .map_err(|e| RunError::checkpoint_error(format!("decompress snapshot: {}", e)))?
        } else {
            bytes
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| RunError::checkpoint_error(format!("decode snapshot: {}", e)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, snapshot: StateSnapshot) -> Result<(), RunError> {
        let dir = self.thread_dir(&snapshot.thread_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RunError::checkpoint_error(format!("create thread directory: {}", e)))?;

        let path = self.snapshot_path(&snapshot.thread_id, snapshot.step);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| RunError::checkpoint_error(format!("stat snapshot: {}", e)))?;
        if exists {
            return Err(RunError::checkpoint_error(format!(
                "snapshot already recorded for thread '{}' step {}",
                snapshot.thread_id, snapshot.step
            )));
        }

        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| RunError::checkpoint_error(format!("encode snapshot: {}", e)))?;
        let bytes = if self.compress {
            tokio::task::spawn_blocking(move || zstd::encode_all(json.as_slice(), 3))
                .await
                .map_err(|e| RunError::checkpoint_error(format!("compress task: {}", e)))?
                .map_err(|e| RunError::checkpoint_error(format!("compress snapshot: {}", e)))?
        } else {
            json
        };

        self.write_atomic(&path, bytes).await?;
        tracing::debug!(
            thread_id = %snapshot.thread_id,
            step = snapshot.step,
            path = %path.display(),
            "snapshot persisted"
        );
        Ok(())
    }

    async fn get(&self, thread_id: &str, step: usize) -> Result<Option<StateSnapshot>, RunError> {
        let path = self.snapshot_path(thread_id, step);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| RunError::checkpoint_error(format!("stat snapshot: {}", e)))?;
        if !exists {
            return Ok(None);
        }
        self.read_snapshot(&path).await.map(Some)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<StateSnapshot>, RunError> {
        let dir = self.thread_dir(thread_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RunError::checkpoint_error(format!(
                    "list thread directory: {}",
                    e
                )))
            }
        };

        let mut best: Option<(usize, PathBuf)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RunError::checkpoint_error(format!("list snapshot: {}", e)))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(step) = parse_step(&name) else {
                continue;
            };
            if best.as_ref().map(|(s, _)| step > *s).unwrap_or(true) {
                best = Some((step, entry.path()));
            }
        }

        match best {
            Some((_, path)) => self.read_snapshot(&path).await.map(Some),
            None => Ok(None),
        }
    }
}

fn parse_step(file_name: &str) -> Option<usize> {
    let rest = file_name.strip_prefix("snapshot_")?;
    let digits = rest
        .strip_suffix(".json.zst")
        .or_else(|| rest.strip_suffix(".json"))?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(thread: &str, step: usize) -> StateSnapshot {
        let schema = Arc::new(
            StateSchema::new()
                .append_field("messages")
                .plain_field("phase"),
        );
        let state = GraphState::new(schema)
            .with_value("phase", format!("step-{}", step))
            .unwrap();
        StateSnapshot::capture(thread, step, "next", &state)
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryCheckpointStore::new();
        store.put(snapshot("t1", 1)).await.unwrap();
        store.put(snapshot("t1", 2)).await.unwrap();

        let got = store.get("t1", 1).await.unwrap().unwrap();
        assert_eq!(got.values["phase"], json!("step-1"));

        let latest = store.latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.step, 2);
    }

    #[tokio::test]
    async fn memory_store_keys_by_thread_and_step() {
        let store = MemoryCheckpointStore::new();
        store.put(snapshot("t1", 1)).await.unwrap();
        store.put(snapshot("t2", 1)).await.unwrap();

        assert!(store.get("t1", 1).await.unwrap().is_some());
        assert!(store.get("t2", 1).await.unwrap().is_some());
        assert!(store.get("t3", 1).await.unwrap().is_none());
        assert!(store.get("t1", 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_never_overwrites() {
        let store = MemoryCheckpointStore::new();
        store.put(snapshot("t1", 1)).await.unwrap();
        let err = store.put(snapshot("t1", 1)).await.unwrap_err();
        assert!(matches!(err, RunError::Checkpoint(_)));

        // The original survives
        let got = store.latest("t1").await.unwrap().unwrap();
        assert_eq!(got.step, 1);
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.put(snapshot("thread-a", 1)).await.unwrap();
        store.put(snapshot("thread-a", 2)).await.unwrap();

        let got = store.get("thread-a", 2).await.unwrap().unwrap();
        assert_eq!(got.next_node, "next");
        assert_eq!(got.values["phase"], json!("step-2"));

        let latest = store.latest("thread-a").await.unwrap().unwrap();
        assert_eq!(latest.step, 2);

        assert!(store.get("thread-a", 9).await.unwrap().is_none());
        assert!(store.latest("thread-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_compressed_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).with_compression();

        store.put(snapshot("thread-z", 7)).await.unwrap();
        let got = store.get("thread-z", 7).await.unwrap().unwrap();
        assert_eq!(got.step, 7);
        assert!(dir
            .path()
            .join("thread-z")
            .join("snapshot_00007.json.zst")
            .exists());
    }

    #[tokio::test]
    async fn file_store_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.put(snapshot("t", 3)).await.unwrap();
        assert!(store.put(snapshot("t", 3)).await.is_err());
    }

    #[tokio::test]
    async fn latest_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.put(snapshot("t", 1)).await.unwrap();

        // Stray temp files and unrelated names never count as snapshots
        let thread_dir = dir.path().join("t");
        std::fs::write(thread_dir.join(".snapshot_00009.json.abc.tmp"), b"junk").unwrap();
        std::fs::write(thread_dir.join("notes.txt"), b"junk").unwrap();

        let latest = store.latest("t").await.unwrap().unwrap();
        assert_eq!(latest.step, 1);
    }

    #[tokio::test]
    async fn snapshot_restores_runnable_state() {
        let schema = Arc::new(
            StateSchema::new()
                .append_field("messages")
                .plain_field("phase"),
        );
        let snap = snapshot("t", 1);
        let state = snap.restore(schema).unwrap();
        assert_eq!(state.get("phase"), Some(&json!("step-1")));
        assert_eq!(state.get("messages"), Some(&json!([])));
    }

    #[test]
    fn step_parsing_handles_both_extensions() {
        assert_eq!(parse_step("snapshot_00012.json"), Some(12));
        assert_eq!(parse_step("snapshot_00012.json.zst"), Some(12));
        assert_eq!(parse_step("notes.txt"), None);
    }
}
