//! Session store collaborator traits and the records they exchange.
//!
//! Durable storage of sessions is owned by the implementor; the relay only
//! calls these operations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Session identifier, chosen by the caller.
pub type SessionId = String;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

impl SessionStatus {
    /// Parse a status name as used in command filters.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Metadata supplied when a session is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub context: String,
}

/// Session filter for listings.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Filter by status.
    pub status: Option<SessionStatus>,
    /// Limit results.
    pub limit: Option<usize>,
}

/// Record counters for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub conversation_chunks: usize,
    pub memories: usize,
    pub tasks: usize,
    pub artifacts: usize,
    pub active_tasks: usize,
}

/// Summary view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub title: String,
    pub participants: Vec<String>,
    pub context: String,
    pub status: SessionStatus,
    /// Creation timestamp (Unix epoch seconds).
    pub created: i64,
    pub last_activity: i64,
    pub duration_minutes: f64,
    pub stats: SessionStats,
}

/// A chunk of captured conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationChunk {
    pub chunk_id: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// `dialogue`, `summary` or `transcript`.
    pub format: String,
    pub content: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub extracted_items: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: i64,
}

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    #[serde(rename = "type")]
    pub memory_type: String,
    pub key: String,
    pub content: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timestamp: i64,
    pub session_id: SessionId,
}

/// Memory query. Tags match when any requested tag is present.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub memory_type: Option<String>,
    pub tags: Vec<String>,
    pub limit: usize,
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A task delegated to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: String,
    pub agent_name: String,
    pub task_type: String,
    #[serde(default)]
    pub data: Value,
    pub status: TaskStatus,
    pub created: i64,
    #[serde(default)]
    pub started: Option<i64>,
    #[serde(default)]
    pub completed: Option<i64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Artifact metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub id: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub name: String,
    /// `markdown`, `json`, `text` or `html`.
    pub format: String,
    pub created: i64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// An artifact with its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub metadata: ArtifactMeta,
    pub content: String,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Session already exists: {0}")]
    AlreadyExists(SessionId),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// A persisted collaborative session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Session identifier.
    fn id(&self) -> &str;

    /// Current summary, including record counters.
    async fn summary(&self) -> Result<SessionSummary, StorageError>;

    /// Append a conversation chunk. Returns its id.
    async fn append_conversation(&self, chunk: ConversationChunk) -> Result<String, StorageError>;

    /// Store a memory, replacing any memory with the same key. Returns the key.
    async fn store_memory(&self, memory: Memory) -> Result<String, StorageError>;

    /// Get a memory by key.
    async fn get_memory(&self, key: &str) -> Result<Option<Memory>, StorageError>;

    /// Query memories, newest first.
    async fn query_memories(&self, query: &MemoryQuery) -> Result<Vec<Memory>, StorageError>;

    /// Add a task. Returns its id.
    async fn add_task(&self, task: AgentTask) -> Result<String, StorageError>;

    /// Get a task by id.
    async fn get_task(&self, task_id: &str) -> Result<Option<AgentTask>, StorageError>;

    /// Replace a stored task.
    async fn update_task(&self, task: AgentTask) -> Result<(), StorageError>;

    /// List tasks, newest first, optionally filtered by status.
    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<AgentTask>, StorageError>;

    /// Store an artifact. Returns its id.
    async fn add_artifact(&self, artifact: Artifact) -> Result<String, StorageError>;

    /// Get an artifact by id.
    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<Artifact>, StorageError>;

    /// List artifact metadata, newest first.
    async fn list_artifacts(&self) -> Result<Vec<ArtifactMeta>, StorageError>;
}

/// Trait for session storage backends.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, if it exists.
    async fn load(&self, id: &str) -> Result<Option<Arc<dyn Session>>, StorageError>;

    /// Create a new session.
    ///
    /// Returns `AlreadyExists` if the id is taken.
    async fn create(
        &self,
        id: &str,
        metadata: SessionMetadata,
    ) -> Result<Arc<dyn Session>, StorageError>;

    /// List session summaries by most recent activity.
    async fn list(&self, filter: SessionFilter) -> Result<Vec<SessionSummary>, StorageError>;
}
