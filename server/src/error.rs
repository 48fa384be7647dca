//! Error taxonomy for the chat server

use shared::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Framing or socket failure, fatal to that connection only
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The requested login belongs to another session
    #[error("login '{login}' is already taken")]
    RegistryConflict { login: String },

    /// The hub queue stayed full for the whole broadcast wait
    #[error("broadcast queue stayed full, message dropped")]
    BroadcastTimeout,

    /// A dispatched command could not be carried out
    #[error("command {command} failed: {reason}")]
    CommandHandler { command: String, reason: String },

    /// A recipient's outbound queue was full or already closed
    #[error("could not deliver to {recipient}")]
    Delivery { recipient: String },

    #[error("hub is no longer running")]
    HubClosed,
}

impl ChatError {
    pub fn command(command: &str, reason: impl Into<String>) -> Self {
        ChatError::CommandHandler {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
