//! Command router for collaborative sessions.
//!
//! Session lifecycle commands (`create_session`, `resume_session`,
//! `get_session_summary`, `list_sessions`) and `batch` are handled here.
//! Every other command needs an existing session and goes to the first
//! registered handler that accepts it. Registration order is the tie-break
//! when several handlers could accept the same command.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use webhook_relay_core::{
    Session, SessionStore,
    traits::{SessionFilter, SessionMetadata, SessionStatus},
};

use crate::handlers::{
    ArtifactKeeper, CommandError, CommandHandler, CommandOutput, CommandResult,
    ConversationProcessor, MemoryKeeper, TaskTracker, limit_field, str_field, string_list,
};

const DEFAULT_LIST_LIMIT: usize = 20;

/// Routes session commands to handlers.
pub struct CommandRouter {
    store: Arc<dyn SessionStore>,
    handlers: Vec<Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    /// Create a router with no handlers.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            handlers: Vec::new(),
        }
    }

    /// Create a router with the built-in handlers registered.
    #[must_use]
    pub fn with_default_handlers(store: Arc<dyn SessionStore>) -> Self {
        let router = Self::new(store)
            .with_handler(ConversationProcessor)
            .with_handler(MemoryKeeper)
            .with_handler(TaskTracker)
            .with_handler(ArtifactKeeper);
        tracing::info!(handlers = ?router.handler_names(), "Command router initialized");
        router
    }

    /// Register a handler after the existing ones.
    #[must_use]
    pub fn with_handler(mut self, handler: impl CommandHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Registered handler names, in lookup order.
    #[must_use]
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Route one command.
    ///
    /// Failures are reported in the result, never raised.
    pub async fn route(&self, command: &str, data: &Value, session_id: Option<&str>) -> CommandResult {
        tracing::info!(command, session_id = session_id.unwrap_or("-"), "Processing command");

        let result = match command {
            "create_session" => self.create_session(session_id, data).await,
            "resume_session" => self
                .summary(session_id)
                .await
                .map(|(id, summary)| CommandOutput::new(format!("Session '{id}' resumed"), summary)),
            "get_session_summary" => self
                .summary(session_id)
                .await
                .map(|(id, summary)| CommandOutput::new(format!("Session '{id}' summary"), summary)),
            "list_sessions" => self.list_sessions(data).await,
            "batch" => self.batch(session_id, data).await,
            _ => match self.require_session(session_id).await {
                Ok(session) => self.dispatch(command, data, session.as_ref()).await,
                Err(e) => Err(e),
            },
        };

        if let Err(ref e) = result {
            tracing::warn!(command, "Command failed: {e}");
        }
        result.into()
    }

    /// First-match handler lookup.
    async fn dispatch(
        &self,
        command: &str,
        data: &Value,
        session: &dyn Session,
    ) -> Result<CommandOutput, CommandError> {
        let handler = self
            .handlers
            .iter()
            .find(|h| h.can_handle(command, data))
            .ok_or_else(|| CommandError::NoHandler(command.to_string()))?;

        tracing::debug!(command, handler = handler.name(), "Dispatching command");
        handler.execute(command, data, session).await
    }

    async fn require_session(&self, session_id: Option<&str>) -> Result<Arc<dyn Session>, CommandError> {
        let id = session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CommandError::InvalidArgument("'session_id' is required".to_string()))?;
        self.store
            .load(id)
            .await?
            .ok_or_else(|| CommandError::SessionNotFound(id.to_string()))
    }

    async fn summary(&self, session_id: Option<&str>) -> Result<(String, Value), CommandError> {
        let session = self.require_session(session_id).await?;
        let summary = session.summary().await?;
        Ok((session.id().to_string(), json!(summary)))
    }

    async fn create_session(
        &self,
        session_id: Option<&str>,
        data: &Value,
    ) -> Result<CommandOutput, CommandError> {
        let id = session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CommandError::InvalidArgument("'session_id' is required".to_string()))?;

        let metadata = SessionMetadata {
            title: str_field(data, "title").unwrap_or_default().to_string(),
            participants: string_list(data.get("participants")),
            context: str_field(data, "context").unwrap_or_default().to_string(),
        };
        let session = self.store.create(id, metadata).await?;
        let summary = session.summary().await?;

        tracing::info!(session_id = id, title = %summary.title, "Created session");
        Ok(CommandOutput::new(
            format!("Session '{id}' created"),
            json!(summary),
        ))
    }

    async fn list_sessions(&self, data: &Value) -> Result<CommandOutput, CommandError> {
        let status = match str_field(data, "filter") {
            None | Some("all") => None,
            Some(name) => Some(SessionStatus::parse(name).ok_or_else(|| {
                CommandError::InvalidArgument(format!("Unknown session status: {name}"))
            })?),
        };
        let sessions = self
            .store
            .list(SessionFilter {
                status,
                limit: Some(limit_field(data, DEFAULT_LIST_LIMIT)),
            })
            .await?;

        let count = sessions.len();
        Ok(CommandOutput::new(
            format!("Found {count} sessions"),
            json!({"sessions": sessions, "count": count}),
        ))
    }

    /// Run sub-commands sequentially against one session.
    ///
    /// A failing sub-command is recorded and the batch carries on.
    async fn batch(&self, session_id: Option<&str>, data: &Value) -> Result<CommandOutput, CommandError> {
        let session = self.require_session(session_id).await?;
        let mut results = Vec::new();

        if let Some(chunk) = data.get("conversation_chunk").filter(|c| !c.is_null()) {
            let chunk_data = json!({"conversation_chunk": chunk});
            let result: CommandResult = self
                .dispatch("append_conversation", &chunk_data, session.as_ref())
                .await
                .into();
            results.push(batch_entry("append_conversation", &result));
        }

        let empty = Vec::new();
        let commands = data
            .get("commands")
            .and_then(Value::as_array)
            .unwrap_or(&empty);

        for cmd in commands {
            let command = str_field(cmd, "command").unwrap_or_default();
            let cmd_data = cmd
                .get("data")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            let result: CommandResult = self.dispatch(command, &cmd_data, session.as_ref()).await.into();
            results.push(batch_entry(command, &result));
        }

        let processed = results.len();
        Ok(CommandOutput::new(
            format!("Batch processed: {processed} commands"),
            json!({"results": results, "processed": processed}),
        ))
    }
}

fn batch_entry(command: &str, result: &CommandResult) -> Value {
    let mut entry = json!({
        "command": command,
        "status": result.status(),
        "message": result.message,
    });
    if let Some(ref error) = result.error {
        entry["error"] = json!(error);
    }
    entry
}
