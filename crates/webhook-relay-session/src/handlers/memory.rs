//! Memory storage and retrieval for sessions.

use async_trait::async_trait;
use serde_json::{Value, json};
use webhook_relay_core::{
    Session,
    envelope::unix_timestamp,
    traits::{Memory, MemoryQuery},
};

use super::{
    CommandError, CommandHandler, CommandOutput, limit_field, required_str, str_field, string_list,
};

const DEFAULT_QUERY_LIMIT: usize = 10;

/// Handles `store_memory`, `retrieve_memory` and `query_memories`.
#[derive(Debug, Default, Clone)]
pub struct MemoryKeeper;

impl MemoryKeeper {
    async fn store(&self, data: &Value, session: &dyn Session) -> Result<CommandOutput, CommandError> {
        let memory_type = str_field(data, "type").unwrap_or("general").to_string();
        let key = match str_field(data, "key") {
            Some(key) => key.to_string(),
            None => {
                let count = session.summary().await?.stats.memories;
                format!("{memory_type}_{}", count + 1)
            }
        };

        session
            .store_memory(Memory {
                memory_type: memory_type.clone(),
                key: key.clone(),
                content: data.get("content").cloned().unwrap_or(Value::Null),
                tags: string_list(data.get("tags")),
                timestamp: unix_timestamp(),
                session_id: session.id().to_string(),
            })
            .await?;

        tracing::info!(session_id = session.id(), key = %key, memory_type = %memory_type, "Stored memory");
        Ok(CommandOutput::new(
            format!("Memory '{key}' stored"),
            json!({"key": key, "type": memory_type}),
        ))
    }

    async fn retrieve(
        &self,
        data: &Value,
        session: &dyn Session,
    ) -> Result<CommandOutput, CommandError> {
        let key = required_str(data, "key")?;
        let memory = session
            .get_memory(key)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("Memory '{key}' not found")))?;

        Ok(CommandOutput::new(
            format!("Memory '{key}' retrieved"),
            json!({"memory": memory}),
        ))
    }

    async fn query(&self, data: &Value, session: &dyn Session) -> Result<CommandOutput, CommandError> {
        let filter = data.get("filter").cloned().unwrap_or(Value::Null);
        let query = MemoryQuery {
            memory_type: str_field(&filter, "type").map(ToString::to_string),
            tags: string_list(filter.get("tags")),
            limit: limit_field(data, DEFAULT_QUERY_LIMIT),
        };

        let memories = session.query_memories(&query).await?;
        let count = memories.len();
        Ok(CommandOutput::new(
            format!("Found {count} memories"),
            json!({"memories": memories, "count": count}),
        ))
    }
}

#[async_trait]
impl CommandHandler for MemoryKeeper {
    fn name(&self) -> &str {
        "memory_keeper"
    }

    fn can_handle(&self, command: &str, _data: &Value) -> bool {
        matches!(command, "store_memory" | "retrieve_memory" | "query_memories")
    }

    async fn execute(
        &self,
        command: &str,
        data: &Value,
        session: &dyn Session,
    ) -> Result<CommandOutput, CommandError> {
        match command {
            "store_memory" => self.store(data, session).await,
            "retrieve_memory" => self.retrieve(data, session).await,
            "query_memories" => self.query(data, session).await,
            other => Err(CommandError::NoHandler(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use webhook_relay_core::{SessionStore, traits::SessionMetadata};

    use super::*;
    use crate::storage::MemorySessionStore;

    #[tokio::test]
    async fn test_store_then_retrieve() {
        let store = MemorySessionStore::new();
        let session = store.create("s1", SessionMetadata::default()).await.unwrap();
        let keeper = MemoryKeeper;

        let stored = keeper
            .execute(
                "store_memory",
                &json!({"type": "decision", "key": "db", "content": "use sqlite", "tags": ["infra"]}),
                session.as_ref(),
            )
            .await
            .unwrap();
        assert_eq!(stored.data["key"], "db");

        let retrieved = keeper
            .execute("retrieve_memory", &json!({"key": "db"}), session.as_ref())
            .await
            .unwrap();
        assert_eq!(retrieved.data["memory"]["content"], "use sqlite");
        assert_eq!(retrieved.data["memory"]["type"], "decision");
    }

    #[tokio::test]
    async fn test_store_generates_key() {
        let store = MemorySessionStore::new();
        let session = store.create("s1", SessionMetadata::default()).await.unwrap();

        let out = MemoryKeeper
            .execute("store_memory", &json!({"content": "x"}), session.as_ref())
            .await
            .unwrap();
        assert_eq!(out.data["key"], "general_1");
        assert_eq!(out.data["type"], "general");
    }

    #[tokio::test]
    async fn test_retrieve_requires_key() {
        let store = MemorySessionStore::new();
        let session = store.create("s1", SessionMetadata::default()).await.unwrap();

        let err = MemoryKeeper
            .execute("retrieve_memory", &json!({}), session.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument(_)));

        let err = MemoryKeeper
            .execute("retrieve_memory", &json!({"key": "nope"}), session.as_ref())
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::NotFound("Memory 'nope' not found".into()));
    }

    #[tokio::test]
    async fn test_query_by_type() {
        let store = MemorySessionStore::new();
        let session = store.create("s1", SessionMetadata::default()).await.unwrap();
        for (key, kind) in [("a", "idea"), ("b", "decision"), ("c", "idea")] {
            MemoryKeeper
                .execute(
                    "store_memory",
                    &json!({"key": key, "type": kind, "content": key}),
                    session.as_ref(),
                )
                .await
                .unwrap();
        }

        let out = MemoryKeeper
            .execute(
                "query_memories",
                &json!({"filter": {"type": "idea"}, "limit": 5}),
                session.as_ref(),
            )
            .await
            .unwrap();
        assert_eq!(out.data["count"], 2);
    }
}
