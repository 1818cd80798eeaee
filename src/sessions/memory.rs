//! In-memory session store: process-local, lost on exit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{MessageStore, SessionError, Store};
use crate::types::{Message, SessionInfo};

#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, SessionInfo>>,
    histories: std::sync::Mutex<HashMap<String, Arc<MemoryMessageStore>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, id: &str) -> Result<SessionInfo, SessionError> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    async fn create(&self, info: &SessionInfo) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&info.id) {
            return Err(SessionError::AlreadyExists { id: info.id.clone() });
        }
        sessions.insert(info.id.clone(), info.clone());
        Ok(())
    }

    async fn update(&self, info: &SessionInfo) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(&info.id) {
            return Err(SessionError::NotFound { id: info.id.clone() });
        }
        sessions.insert(info.id.clone(), info.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionInfo>, SessionError> {
        let sessions = self.sessions.lock().await;
        let mut all: Vec<SessionInfo> = sessions.values().cloned().collect();
        all.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(id).is_none() {
            return Err(SessionError::NotFound { id: id.to_string() });
        }
        self.histories
            .lock()
            .expect("history map poisoned")
            .remove(id);
        Ok(())
    }

    fn messages(&self, id: &str) -> Arc<dyn MessageStore> {
        let mut histories = self.histories.lock().expect("history map poisoned");
        histories
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(MemoryMessageStore::default()))
            .clone()
    }
}

#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<Message>>,
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: &Message) -> Result<(), SessionError> {
        self.messages.lock().await.push(message.clone());
        Ok(())
    }

    async fn replace(&self, messages: &[Message]) -> Result<(), SessionError> {
        *self.messages.lock().await = messages.to_vec();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Message>, SessionError> {
        Ok(self.messages.lock().await.clone())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        self.messages.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_sorts_newest_first() {
        let store = MemoryStore::new();
        let mut a = SessionInfo::new("gemini", "gemini-2.5-pro");
        let mut b = SessionInfo::new("gemini", "gemini-2.5-pro");
        a.last_modified = chrono::Utc::now() - chrono::Duration::minutes(5);
        b.last_modified = chrono::Utc::now();
        store.create(&a).await.expect("creates a");
        store.create(&b).await.expect("creates b");

        let listed = store.list().await.expect("lists");
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[tokio::test]
    async fn duplicate_create_fails() {
        let store = MemoryStore::new();
        let info = SessionInfo::new("openai", "gpt-4.1");
        store.create(&info).await.expect("creates");
        assert!(matches!(
            store.create(&info).await,
            Err(SessionError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn message_store_preserves_order() {
        let store = MemoryStore::new();
        let info = SessionInfo::new("openai", "gpt-4.1");
        store.create(&info).await.expect("creates");

        let messages = store.messages(&info.id);
        messages.append(&Message::user_text("first")).await.expect("appends");
        messages.append(&Message::agent_text("second")).await.expect("appends");

        let listed = messages.list().await.expect("lists");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].payload.text.as_deref(), Some("first"));
        assert_eq!(listed[1].payload.text.as_deref(), Some("second"));
    }
}
