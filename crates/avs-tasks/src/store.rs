use crate::{Result, TaskError, TaskRecord};
use async_trait::async_trait;
use avs_types::TaskIndex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Durable home of task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or replace the record for its task.
    async fn put(&self, record: &TaskRecord) -> Result<()>;

    async fn get(&self, task_index: TaskIndex) -> Result<Option<TaskRecord>>;

    /// All records, ascending by task index.
    async fn list(&self) -> Result<Vec<TaskRecord>>;

    async fn remove(&self, task_index: TaskIndex) -> Result<()>;

    /// Records still in a non-terminal state.
    async fn list_active(&self) -> Result<Vec<TaskRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| !r.state.is_terminal())
            .collect())
    }
}

/// In-memory store for tests and the local simulation.
#[derive(Default)]
pub struct MemoryTaskStore {
    records: RwLock<BTreeMap<TaskIndex, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.index(), record.clone());
        Ok(())
    }

    async fn get(&self, task_index: TaskIndex) -> Result<Option<TaskRecord>> {
        Ok(self.records.read().await.get(&task_index).cloned())
    }

    async fn list(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn remove(&self, task_index: TaskIndex) -> Result<()> {
        self.records.write().await.remove(&task_index);
        Ok(())
    }
}

/// One JSON file per task under a directory.
///
/// Records are written to a temporary file and renamed into place, so a
/// crash leaves either the old or the new record.
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, task_index: TaskIndex) -> PathBuf {
        self.dir.join(format!("task-{:010}.json", task_index.0))
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<()> {
        let path = self.path_for(record.index());
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(task_index = %record.index(), state = ?record.state, "💾 Task record persisted");
        Ok(())
    }

    async fn get(&self, task_index: TaskIndex) -> Result<Option<TaskRecord>> {
        match tokio::fs::read(self.path_for(task_index)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<TaskRecord>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let record: TaskRecord = serde_json::from_slice(&bytes).map_err(|e| {
                TaskError::Store(format!("corrupt task record {}: {e}", path.display()))
            })?;
            records.push(record);
        }
        records.sort_by_key(|r| r.index());
        Ok(records)
    }

    async fn remove(&self, task_index: TaskIndex) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(task_index)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskState;
    use avs_types::{BlockNumber, QuorumNumber, Task};
    use tempfile::TempDir;

    fn record(index: u32, state: TaskState) -> TaskRecord {
        let mut record = TaskRecord::new(Task {
            index: TaskIndex(index),
            input: vec![index as u8],
            quorum_number: QuorumNumber(0),
            quorum_threshold_percentage: 67,
            created_block: BlockNumber::new(1),
            response_deadline: BlockNumber::new(5),
            challenge_deadline: BlockNumber::new(15),
        });
        record.state = state;
        record
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = FileTaskStore::open(temp_dir.path()).await.unwrap();
            store.put(&record(2, TaskState::Submitting)).await.unwrap();
            store.put(&record(1, TaskState::Final)).await.unwrap();
            store.put(&record(2, TaskState::AwaitingChallengeWindow)).await.unwrap();
        }

        let store = FileTaskStore::open(temp_dir.path()).await.unwrap();
        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index(), TaskIndex(1));
        assert_eq!(records[1].state, TaskState::AwaitingChallengeWindow);

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].index(), TaskIndex(2));

        assert_eq!(store.get(TaskIndex(1)).await.unwrap(), Some(records[0].clone()));
        store.remove(TaskIndex(1)).await.unwrap();
        store.remove(TaskIndex(1)).await.unwrap();
        assert!(store.get(TaskIndex(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTaskStore::open(temp_dir.path()).await.unwrap();
        tokio::fs::write(temp_dir.path().join("task-0000000009.json"), b"{not json")
            .await
            .unwrap();
        assert!(matches!(store.list().await, Err(TaskError::Store(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryTaskStore::new();
        store.put(&record(3, TaskState::Collecting)).await.unwrap();
        store.put(&record(1, TaskState::Abandoned)).await.unwrap();
        let indices: Vec<_> = store.list().await.unwrap().iter().map(|r| r.index()).collect();
        assert_eq!(indices, vec![TaskIndex(1), TaskIndex(3)]);
        assert_eq!(store.list_active().await.unwrap().len(), 1);
    }
}
