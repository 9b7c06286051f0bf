//! Conversation capture.
//!
//! Stores chunks of conversation sent by clients and turns any items the
//! sender already extracted (ideas, decisions, questions, action items) into
//! session memories tagged `extracted`.

use async_trait::async_trait;
use serde_json::{Value, json};
use webhook_relay_core::{
    Session,
    envelope::unix_timestamp,
    traits::{ConversationChunk, Memory},
};

use super::{CommandError, CommandHandler, CommandOutput, object_field, str_field, string_list};

/// Extracted item category and the memory type/key prefix it maps to.
const EXTRACTED_KINDS: [(&str, &str, &str); 4] = [
    ("ideas", "idea", "idea"),
    ("decisions", "decision", "decision"),
    ("questions", "question", "question"),
    ("action_items", "action_item", "action"),
];

/// Handles `append_conversation`.
#[derive(Debug, Default, Clone)]
pub struct ConversationProcessor;

impl ConversationProcessor {
    async fn store_extracted(
        &self,
        extracted: &serde_json::Map<String, Value>,
        session: &dyn Session,
    ) -> Result<usize, CommandError> {
        let mut count = 0;
        let mut stored = session.summary().await?.stats.memories;

        for (category, memory_type, prefix) in EXTRACTED_KINDS {
            let Some(items) = extracted.get(category).and_then(Value::as_array) else {
                continue;
            };
            for item in items {
                stored += 1;
                session
                    .store_memory(Memory {
                        memory_type: memory_type.to_string(),
                        key: format!("{prefix}_{stored}"),
                        content: item.clone(),
                        tags: vec!["extracted".to_string()],
                        timestamp: unix_timestamp(),
                        session_id: session.id().to_string(),
                    })
                    .await?;
                count += 1;
            }
        }

        if count > 0 {
            tracing::info!(session_id = session.id(), count, "Stored extracted conversation items");
        }
        Ok(count)
    }
}

#[async_trait]
impl CommandHandler for ConversationProcessor {
    fn name(&self) -> &str {
        "conversation_processor"
    }

    fn can_handle(&self, command: &str, _data: &Value) -> bool {
        command == "append_conversation"
    }

    async fn execute(
        &self,
        _command: &str,
        data: &Value,
        session: &dyn Session,
    ) -> Result<CommandOutput, CommandError> {
        let chunk_data = data
            .get("conversation_chunk")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let summary = session.summary().await?;

        let timestamp = unix_timestamp();
        let chunk_id = format!("{:03}_{timestamp}", summary.stats.conversation_chunks + 1);
        let participants = match chunk_data.get("participants") {
            Some(list) => string_list(Some(list)),
            None => summary.participants,
        };
        let extracted_items = object_field(&chunk_data, "extracted_items");

        let chunk = ConversationChunk {
            chunk_id: chunk_id.clone(),
            start_time: str_field(&chunk_data, "start_time").map(ToString::to_string),
            end_time: str_field(&chunk_data, "end_time").map(ToString::to_string),
            format: str_field(&chunk_data, "format")
                .unwrap_or("dialogue")
                .to_string(),
            content: str_field(&chunk_data, "content").unwrap_or_default().to_string(),
            participants,
            extracted_items: extracted_items.clone(),
            metadata: object_field(&chunk_data, "metadata"),
            timestamp,
        };
        let content_size = chunk.content.len();

        session.append_conversation(chunk).await?;
        tracing::info!(session_id = session.id(), chunk_id = %chunk_id, content_size, "Saved conversation chunk");

        let items_processed = self.store_extracted(&extracted_items, session).await?;

        Ok(CommandOutput::new(
            format!("Conversation chunk {chunk_id} processed"),
            json!({
                "chunk_id": chunk_id,
                "content_size": content_size,
                "extracted_items_processed": items_processed,
            }),
        ))
    }
}
