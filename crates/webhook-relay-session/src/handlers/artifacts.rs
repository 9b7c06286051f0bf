//! Artifact storage (documents, reports and similar outputs).

use async_trait::async_trait;
use serde_json::{Value, json};
use webhook_relay_core::{
    Session,
    envelope::unix_timestamp,
    traits::{Artifact, ArtifactMeta},
};

use super::{CommandError, CommandHandler, CommandOutput, object_field, required_str, str_field};

const FORMATS: [&str; 4] = ["markdown", "json", "text", "html"];

/// Handles `store_artifact`, `get_artifact` and `list_artifacts`.
#[derive(Debug, Default, Clone)]
pub struct ArtifactKeeper;

impl ArtifactKeeper {
    async fn store(&self, data: &Value, session: &dyn Session) -> Result<CommandOutput, CommandError> {
        let artifact_type = str_field(data, "type").unwrap_or("document");
        let name = required_str(data, "name")?;
        let metadata = object_field(data, "metadata");
        // Unknown formats are stored as plain text.
        let format = metadata
            .get("format")
            .and_then(Value::as_str)
            .filter(|f| FORMATS.contains(f))
            .unwrap_or("text")
            .to_string();
        let artifact_id = format!("{artifact_type}_{name}");

        let meta = ArtifactMeta {
            id: artifact_id.clone(),
            artifact_type: artifact_type.to_string(),
            name: name.to_string(),
            format,
            created: unix_timestamp(),
            metadata,
        };
        session
            .add_artifact(Artifact {
                metadata: meta.clone(),
                content: str_field(data, "content").unwrap_or_default().to_string(),
            })
            .await?;

        tracing::info!(session_id = session.id(), artifact_id = %artifact_id, "Stored artifact");
        Ok(CommandOutput::new(
            format!("Artifact '{artifact_id}' stored"),
            json!({"artifact_id": artifact_id, "metadata": meta}),
        ))
    }

    async fn get(&self, data: &Value, session: &dyn Session) -> Result<CommandOutput, CommandError> {
        let artifact_id = required_str(data, "artifact_id")?;
        let artifact = session
            .get_artifact(artifact_id)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("Artifact '{artifact_id}' not found")))?;
        Ok(CommandOutput::new(
            format!("Artifact '{artifact_id}' retrieved"),
            json!({"metadata": artifact.metadata, "content": artifact.content}),
        ))
    }

    async fn list(&self, session: &dyn Session) -> Result<CommandOutput, CommandError> {
        let artifacts = session.list_artifacts().await?;
        let count = artifacts.len();
        Ok(CommandOutput::new(
            format!("Found {count} artifacts"),
            json!({"artifacts": artifacts, "count": count}),
        ))
    }
}

#[async_trait]
impl CommandHandler for ArtifactKeeper {
    fn name(&self) -> &str {
        "artifact_keeper"
    }

    fn can_handle(&self, command: &str, _data: &Value) -> bool {
        matches!(command, "store_artifact" | "get_artifact" | "list_artifacts")
    }

    async fn execute(
        &self,
        command: &str,
        data: &Value,
        session: &dyn Session,
    ) -> Result<CommandOutput, CommandError> {
        match command {
            "store_artifact" => self.store(data, session).await,
            "get_artifact" => self.get(data, session).await,
            "list_artifacts" => self.list(session).await,
            other => Err(CommandError::NoHandler(other.to_string())),
        }
    }
}
