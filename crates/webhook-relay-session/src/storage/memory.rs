//! In-memory session storage.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use webhook_relay_core::{
    envelope::unix_timestamp,
    traits::{
        AgentTask, Artifact, ArtifactMeta, ConversationChunk, Memory, MemoryQuery, Session,
        SessionFilter, SessionMetadata, SessionStats, SessionStatus, SessionStore, SessionSummary,
        StorageError, TaskStatus,
    },
};

struct SessionData {
    metadata: SessionMetadata,
    status: SessionStatus,
    created: i64,
    last_activity: i64,
    chunks: Vec<ConversationChunk>,
    memories: Vec<Memory>,
    tasks: Vec<AgentTask>,
    artifacts: Vec<Artifact>,
}

impl SessionData {
    fn touch(&mut self) {
        self.last_activity = unix_timestamp();
    }
}

/// A session held entirely in memory.
pub struct MemorySession {
    id: String,
    data: RwLock<SessionData>,
}

impl MemorySession {
    fn new(id: &str, metadata: SessionMetadata) -> Self {
        let timestamp = unix_timestamp();
        let metadata = SessionMetadata {
            title: if metadata.title.is_empty() {
                id.to_string()
            } else {
                metadata.title
            },
            ..metadata
        };
        Self {
            id: id.to_string(),
            data: RwLock::new(SessionData {
                metadata,
                status: SessionStatus::Active,
                created: timestamp,
                last_activity: timestamp,
                chunks: Vec::new(),
                memories: Vec::new(),
                tasks: Vec::new(),
                artifacts: Vec::new(),
            }),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, SessionData>, StorageError> {
        self.data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, SessionData>, StorageError> {
        self.data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    fn summarize(&self, data: &SessionData) -> SessionSummary {
        #[allow(clippy::cast_precision_loss)]
        let duration_minutes = (data.last_activity - data.created) as f64 / 60.0;
        SessionSummary {
            session_id: self.id.clone(),
            title: data.metadata.title.clone(),
            participants: data.metadata.participants.clone(),
            context: data.metadata.context.clone(),
            status: data.status,
            created: data.created,
            last_activity: data.last_activity,
            duration_minutes,
            stats: SessionStats {
                conversation_chunks: data.chunks.len(),
                memories: data.memories.len(),
                tasks: data.tasks.len(),
                artifacts: data.artifacts.len(),
                active_tasks: data
                    .tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::InProgress)
                    .count(),
            },
        }
    }
}

/// Newest first; ties keep reverse insertion order.
fn newest_first<T: Clone>(items: &[T], timestamp: impl Fn(&T) -> i64) -> Vec<T> {
    let mut result: Vec<T> = items.iter().rev().cloned().collect();
    result.sort_by_key(|item| std::cmp::Reverse(timestamp(item)));
    result
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn summary(&self) -> Result<SessionSummary, StorageError> {
        let data = self.read()?;
        Ok(self.summarize(&data))
    }

    async fn append_conversation(&self, chunk: ConversationChunk) -> Result<String, StorageError> {
        let mut data = self.write()?;
        let chunk_id = chunk.chunk_id.clone();
        data.chunks.push(chunk);
        data.touch();
        Ok(chunk_id)
    }

    async fn store_memory(&self, memory: Memory) -> Result<String, StorageError> {
        let mut data = self.write()?;
        let key = memory.key.clone();
        data.memories.retain(|m| m.key != key);
        data.memories.push(memory);
        data.touch();
        Ok(key)
    }

    async fn get_memory(&self, key: &str) -> Result<Option<Memory>, StorageError> {
        Ok(self.read()?.memories.iter().find(|m| m.key == key).cloned())
    }

    async fn query_memories(&self, query: &MemoryQuery) -> Result<Vec<Memory>, StorageError> {
        let data = self.read()?;
        let matching: Vec<Memory> = data
            .memories
            .iter()
            .filter(|m| {
                if let Some(ref memory_type) = query.memory_type {
                    if m.memory_type != *memory_type {
                        return false;
                    }
                }
                if !query.tags.is_empty() && !query.tags.iter().any(|t| m.tags.contains(t)) {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        let mut result = newest_first(&matching, |m| m.timestamp);
        result.truncate(query.limit);
        Ok(result)
    }

    async fn add_task(&self, task: AgentTask) -> Result<String, StorageError> {
        let mut data = self.write()?;
        let task_id = task.task_id.clone();
        data.tasks.retain(|t| t.task_id != task_id);
        data.tasks.push(task);
        data.touch();
        Ok(task_id)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<AgentTask>, StorageError> {
        Ok(self.read()?.tasks.iter().find(|t| t.task_id == task_id).cloned())
    }

    async fn update_task(&self, task: AgentTask) -> Result<(), StorageError> {
        let mut data = self.write()?;
        let slot = data
            .tasks
            .iter_mut()
            .find(|t| t.task_id == task.task_id)
            .ok_or_else(|| StorageError::Internal(format!("Task not found: {}", task.task_id)))?;
        *slot = task;
        data.touch();
        Ok(())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<AgentTask>, StorageError> {
        let data = self.read()?;
        let matching: Vec<AgentTask> = data
            .tasks
            .iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        Ok(newest_first(&matching, |t| t.created))
    }

    async fn add_artifact(&self, artifact: Artifact) -> Result<String, StorageError> {
        let mut data = self.write()?;
        let artifact_id = artifact.metadata.id.clone();
        data.artifacts.retain(|a| a.metadata.id != artifact_id);
        data.artifacts.push(artifact);
        data.touch();
        Ok(artifact_id)
    }

    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<Artifact>, StorageError> {
        Ok(self
            .read()?
            .artifacts
            .iter()
            .find(|a| a.metadata.id == artifact_id)
            .cloned())
    }

    async fn list_artifacts(&self) -> Result<Vec<ArtifactMeta>, StorageError> {
        let data = self.read()?;
        let metas: Vec<ArtifactMeta> = data.artifacts.iter().map(|a| a.metadata.clone()).collect();
        Ok(newest_first(&metas, |m| m.created))
    }
}

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<MemorySession>>>,
}

impl MemorySessionStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Arc<dyn Session>>, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(id)
            .map(|s| Arc::clone(s) as Arc<dyn Session>))
    }

    async fn create(
        &self,
        id: &str,
        metadata: SessionMetadata,
    ) -> Result<Arc<dyn Session>, StorageError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        if sessions.contains_key(id) {
            return Err(StorageError::AlreadyExists(id.to_string()));
        }

        let session = Arc::new(MemorySession::new(id, metadata));
        sessions.insert(id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    async fn list(&self, filter: SessionFilter) -> Result<Vec<SessionSummary>, StorageError> {
        let sessions: Vec<Arc<MemorySession>> = self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .values()
            .cloned()
            .collect();

        let mut result = Vec::with_capacity(sessions.len());
        for session in sessions {
            let summary = session.summary().await?;
            if filter.status.is_some_and(|status| summary.status != status) {
                continue;
            }
            result.push(summary);
        }

        // Sort by last activity descending
        result.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });

        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }

        Ok(result)
    }
}
