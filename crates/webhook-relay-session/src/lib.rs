//! Command routing and session storage for the webhook relay.
//!
//! Provides:
//! - `CommandRouter` - Route session commands to the first capable handler
//! - Command handlers (conversation, memory, tasks, artifacts)
//! - Storage implementations (memory)

pub mod handlers;
pub mod router;
pub mod storage;

pub use handlers::{CommandError, CommandHandler, CommandOutput, CommandResult};
pub use router::CommandRouter;
