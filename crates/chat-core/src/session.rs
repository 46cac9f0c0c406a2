//! Session Management
//!
//! Per-chat state that survives between tool calls: the portfolio the user
//! is working with, a pending purchase plan, the page they are looking at.
//! Sessions expire after a configurable idle period.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;

use crate::error::{ChatError, Result};

/// Chat identifier as issued by the messenger
pub type ChatId = i64;

/// State attached to a single chat
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Owning chat
    pub chat_id: ChatId,

    /// Arbitrary typed values keyed by name
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty session for a chat
    pub fn new(chat_id: ChatId) -> Self {
        let now = Utc::now();
        Self {
            chat_id,
            data: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Store a value under `key`, replacing any previous one
    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.data.insert(key.to_string(), serde_json::to_value(value)?);
        self.touch();
        Ok(())
    }

    /// Read a value stored under `key`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.data
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(ChatError::from)
    }

    /// Read a value that must be present
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| ChatError::Session(format!("no '{key}' in session")))
    }

    /// Remove and return a value
    pub fn take<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        let value = self.data.remove(key);
        self.touch();
        Ok(value.map(serde_json::from_value).transpose()?)
    }

    /// Whether the session has been idle longer than `ttl`
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.updated_at > ttl
    }
}

/// Session store trait for persistence
pub trait SessionStore: Send + Sync {
    /// Save a session
    fn save(&self, session: &Session) -> Result<()>;

    /// Load the session of a chat; expired sessions are reported as absent
    fn load(&self, chat_id: ChatId) -> Result<Option<Session>>;

    /// Delete a session
    fn delete(&self, chat_id: ChatId) -> Result<()>;

    /// Remove a value from the chat's session in a single step.
    ///
    /// Concurrent callers never receive the same value twice.
    fn take_value(&self, chat_id: ChatId, key: &str) -> Result<Option<serde_json::Value>>;

    /// Load the chat's session or start a fresh one
    fn load_or_new(&self, chat_id: ChatId) -> Result<Session> {
        Ok(self
            .load(chat_id)?
            .unwrap_or_else(|| Session::new(chat_id)))
    }
}

/// In-memory session store with idle expiry
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<ChatId, Session>>,
    ttl: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::hours(1))
    }
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Drop every expired session, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(self.ttl, now));
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, "purged expired chat sessions");
        }
        removed
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &Session) -> Result<()> {
        self.sessions.write().insert(session.chat_id, session.clone());
        Ok(())
    }

    fn load(&self, chat_id: ChatId) -> Result<Option<Session>> {
        let sessions = self.sessions.read();
        Ok(sessions
            .get(&chat_id)
            .filter(|s| !s.is_expired(self.ttl, Utc::now()))
            .cloned())
    }

    fn delete(&self, chat_id: ChatId) -> Result<()> {
        self.sessions.write().remove(&chat_id);
        Ok(())
    }

    fn take_value(&self, chat_id: ChatId, key: &str) -> Result<Option<serde_json::Value>> {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions
            .get_mut(&chat_id)
            .filter(|s| !s.is_expired(self.ttl, Utc::now()))
        else {
            return Ok(None);
        };

        let value = session.data.remove(key);
        if value.is_some() {
            session.touch();
        }
        Ok(value)
    }
}
