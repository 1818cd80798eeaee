//! # Session store
//!
//! Durable per-session chat history plus metadata. Two backends: an
//! in-memory store for tests and one-shot runs, and a filesystem store
//! laying each session out as a directory with `metadata.yaml` and
//! `history.jsonl`.

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Message, SessionInfo};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {id:?} not found")]
    NotFound { id: String },

    #[error("session {id:?} already exists")]
    AlreadyExists { id: String },

    #[error("i/o failure on session store: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("failed to encode session data: {reason}")]
    Encoding { reason: String },
}

/// Message operations scoped to one session.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one message; durable before returning.
    async fn append(&self, message: &Message) -> Result<(), SessionError>;

    /// Replace the whole history.
    async fn replace(&self, messages: &[Message]) -> Result<(), SessionError>;

    /// All messages in append order. Malformed entries are skipped so one
    /// corrupted record never blocks recovery.
    async fn list(&self) -> Result<Vec<Message>, SessionError>;

    /// Drop all messages.
    async fn clear(&self) -> Result<(), SessionError>;
}

/// Session CRUD plus access to each session's message store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, id: &str) -> Result<SessionInfo, SessionError>;

    async fn create(&self, info: &SessionInfo) -> Result<(), SessionError>;

    async fn update(&self, info: &SessionInfo) -> Result<(), SessionError>;

    /// All sessions, newest first by last-modified.
    async fn list(&self) -> Result<Vec<SessionInfo>, SessionError>;

    async fn delete(&self, id: &str) -> Result<(), SessionError>;

    fn messages(&self, id: &str) -> std::sync::Arc<dyn MessageStore>;
}
