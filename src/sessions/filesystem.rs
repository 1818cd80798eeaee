//! Filesystem session store.
//!
//! Layout: one directory per session under the base path,
//! `<base>/<session-id>/metadata.yaml` for the metadata and
//! `<base>/<session-id>/history.jsonl` with one JSON message per line.
//! Unknown fields in either file survive a round-trip.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use super::{MessageStore, SessionError, Store};
use crate::types::{Message, SessionInfo};

const METADATA_FILE: &str = "metadata.yaml";
const HISTORY_FILE: &str = "history.jsonl";

pub struct FilesystemStore {
    base_path: PathBuf,
    // One lock per session serialises appends within the process.
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FilesystemStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.base_path.join(id)
    }

    fn session_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("session lock map poisoned");
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn load_metadata(&self, id: &str) -> Result<SessionInfo, SessionError> {
        let path = self.session_path(id).join(METADATA_FILE);
        let content = std::fs::read_to_string(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                SessionError::NotFound { id: id.to_string() }
            } else {
                SessionError::Io { source: err }
            }
        })?;
        serde_yaml::from_str(&content).map_err(|err| SessionError::Encoding {
            reason: format!("parsing {}: {err}", path.display()),
        })
    }

    fn save_metadata(&self, info: &SessionInfo) -> Result<(), SessionError> {
        let encoded = serde_yaml::to_string(info).map_err(|err| SessionError::Encoding {
            reason: format!("encoding metadata: {err}"),
        })?;
        std::fs::write(self.session_path(&info.id).join(METADATA_FILE), encoded)?;
        Ok(())
    }
}

#[async_trait]
impl Store for FilesystemStore {
    async fn get(&self, id: &str) -> Result<SessionInfo, SessionError> {
        self.load_metadata(id)
    }

    async fn create(&self, info: &SessionInfo) -> Result<(), SessionError> {
        let path = self.session_path(&info.id);
        if path.join(METADATA_FILE).exists() {
            return Err(SessionError::AlreadyExists { id: info.id.clone() });
        }
        std::fs::create_dir_all(&path)?;
        self.save_metadata(info)
    }

    async fn update(&self, info: &SessionInfo) -> Result<(), SessionError> {
        // Existing metadata is loaded first so unknown fields written by a
        // newer build are kept.
        let mut stored = self.load_metadata(&info.id)?;
        stored.provider_id = info.provider_id.clone();
        stored.model_id = info.model_id.clone();
        stored.last_modified = info.last_modified;
        self.save_metadata(&stored)
    }

    async fn list(&self) -> Result<Vec<SessionInfo>, SessionError> {
        let entries = match std::fs::read_dir(&self.base_path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SessionError::Io { source: err }),
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.load_metadata(&id) {
                Ok(info) => sessions.push(info),
                Err(err) => {
                    // One corrupted session must not break the listing.
                    warn!(session = id.as_str(), %err, "could not load session");
                }
            }
        }
        sessions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(sessions)
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Err(SessionError::NotFound { id: id.to_string() });
        }
        std::fs::remove_dir_all(path)?;
        self.locks.lock().expect("session lock map poisoned").remove(id);
        Ok(())
    }

    fn messages(&self, id: &str) -> Arc<dyn MessageStore> {
        Arc::new(FileMessageStore {
            history_path: self.session_path(id).join(HISTORY_FILE),
            lock: self.session_lock(id),
        })
    }
}

/// Message history backed by a JSON-lines file.
pub struct FileMessageStore {
    history_path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileMessageStore {
    pub fn new(history_path: impl Into<PathBuf>) -> Self {
        Self {
            history_path: history_path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    fn write_all(&self, messages: &[Message]) -> Result<(), SessionError> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.history_path)?;
        for message in messages {
            let line = serde_json::to_vec(message).map_err(|err| SessionError::Encoding {
                reason: format!("encoding message: {err}"),
            })?;
            file.write_all(&line)?;
            file.write_all(b"\n")?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn append(&self, message: &Message) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.history_path)?;
        let line = serde_json::to_vec(message).map_err(|err| SessionError::Encoding {
            reason: format!("encoding message: {err}"),
        })?;
        file.write_all(&line)?;
        file.write_all(b"\n")?;
        Ok(())
    }

    async fn replace(&self, messages: &[Message]) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        self.write_all(messages)
    }

    async fn list(&self) -> Result<Vec<Message>, SessionError> {
        let _guard = self.lock.lock().await;
        let content = match std::fs::read_to_string(&self.history_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SessionError::Io { source: err }),
        };
        let mut messages = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    // Skip malformed lines; recovery must not stop here.
                    warn!(%err, "skipping malformed history line");
                }
            }
        }
        Ok(messages)
    }

    async fn clear(&self) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        self.write_all(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;

    #[tokio::test]
    async fn create_get_update_delete_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::new(dir.path());

        let mut info = SessionInfo::new("gemini", "gemini-2.5-pro");
        store.create(&info).await.expect("creates");

        let loaded = store.get(&info.id).await.expect("loads");
        assert_eq!(loaded.provider_id, "gemini");

        info.model_id = "gemini-2.5-flash".to_string();
        info.touch();
        store.update(&info).await.expect("updates");
        let loaded = store.get(&info.id).await.expect("reloads");
        assert_eq!(loaded.model_id, "gemini-2.5-flash");
        assert!(loaded.last_modified >= loaded.created_at);

        store.delete(&info.id).await.expect("deletes");
        assert!(matches!(
            store.get(&info.id).await,
            Err(SessionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn history_appends_one_line_per_message() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::new(dir.path());
        let info = SessionInfo::new("openai", "gpt-4.1");
        store.create(&info).await.expect("creates");

        let messages = store.messages(&info.id);
        messages.append(&Message::user_text("q")).await.expect("appends");
        messages.append(&Message::agent_text("a")).await.expect("appends");

        let raw = std::fs::read_to_string(dir.path().join(&info.id).join(HISTORY_FILE))
            .expect("history file exists");
        assert_eq!(raw.lines().count(), 2);

        let listed = messages.list().await.expect("lists");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].kind, MessageType::Text);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::new(dir.path());
        let info = SessionInfo::new("openai", "gpt-4.1");
        store.create(&info).await.expect("creates");

        let messages = store.messages(&info.id);
        messages.append(&Message::user_text("good")).await.expect("appends");

        let history_path = dir.path().join(&info.id).join(HISTORY_FILE);
        let mut content = std::fs::read_to_string(&history_path).expect("reads");
        content.push_str("{not valid json\n");
        std::fs::write(&history_path, content).expect("writes");
        messages.append(&Message::agent_text("after")).await.expect("appends");

        let listed = messages.list().await.expect("lists");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].payload.text.as_deref(), Some("good"));
        assert_eq!(listed[1].payload.text.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn concurrent_appends_produce_whole_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FilesystemStore::new(dir.path()));
        let info = SessionInfo::new("openai", "gpt-4.1");
        store.create(&info).await.expect("creates");

        let mut handles = Vec::new();
        for i in 0..32 {
            let messages = store.messages(&info.id);
            handles.push(tokio::spawn(async move {
                messages
                    .append(&Message::user_text(format!("message {i}")))
                    .await
                    .expect("append succeeds");
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }

        let raw = std::fs::read_to_string(dir.path().join(&info.id).join(HISTORY_FILE))
            .expect("history exists");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 32);
        for line in lines {
            serde_json::from_str::<Message>(line).expect("every line is well-formed");
        }
    }

    #[tokio::test]
    async fn unknown_metadata_fields_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::new(dir.path());
        let mut info = SessionInfo::new("gemini", "gemini-2.5-pro");
        info.extra
            .insert("future_field".to_string(), serde_json::json!("kept"));
        store.create(&info).await.expect("creates");

        let mut updated = store.get(&info.id).await.expect("loads");
        updated.touch();
        store.update(&updated).await.expect("updates");

        let reloaded = store.get(&info.id).await.expect("reloads");
        assert_eq!(reloaded.extra.get("future_field"), Some(&serde_json::json!("kept")));
    }
}
