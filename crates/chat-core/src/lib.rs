//! # chat-core
//!
//! Chat-facing tool framework and per-chat session state.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      Chat adapter                          │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────┐   │
//! │  │   ToolCall   │──▶│ ToolRegistry │──▶│  Tool impls   │   │
//! │  └──────────────┘   └──────────────┘   └───────┬───────┘   │
//! │                                                │           │
//! │                                       ┌────────▼────────┐  │
//! │                                       │  SessionStore   │  │
//! │                                       └─────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! A chat transport turns inbound events into `ToolCall`s. Tools that need
//! multi-step input keep their intermediate state in the chat's `Session`.

pub mod error;
pub mod session;
pub mod tool;

pub use error::{ChatError, Result};
pub use session::{ChatId, MemorySessionStore, Session, SessionStore};
pub use tool::{ParameterSchema, Tool, ToolCall, ToolRegistry, ToolResult, ToolSchema};
