//! Error Types
//!
//! Errors of the chat layer itself. A tool that fails for a domain reason
//! replies with a failed `ToolResult`; a `ChatError` means the call could
//! not be served at all.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    /// No tool registered under the name
    #[error("unknown tool '{0}'")]
    ToolNotFound(String),

    /// Arguments missing, malformed or outside the allowed values
    #[error("invalid arguments: {0}")]
    ToolValidation(String),

    /// The tool accepted the call but could not complete it
    #[error("tool failed: {0}")]
    ToolExecution(String),

    /// Session missing, expired or holding unexpected state
    #[error("session error: {0}")]
    Session(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ChatError {
    /// Text to send back to the chat
    pub fn user_message(&self) -> String {
        match self {
            Self::ToolNotFound(name) => format!("The command '{name}' is not available."),
            Self::ToolValidation(msg) => format!("Invalid input: {msg}"),
            Self::ToolExecution(msg) => format!("Command failed: {msg}"),
            Self::Session(_) => "Your previous step has expired. Please start again.".into(),
            Self::Json(_) | Self::Other(_) => "An unexpected error occurred.".into(),
        }
    }
}
