use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::config::{ConversationStoreKind, Settings};
use crate::llm_client::{Message, Role};

/// Storage for chat transcripts keyed by conversation id.
///
/// Unknown ids read as an empty history; they are never an error.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn history(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Append `messages` to the end of the conversation in one step.
    async fn append(&self, conversation_id: &str, messages: Vec<Message>) -> Result<()>;

    /// Like `append`, but `system` goes first when the conversation has no system
    /// message yet. Checked and written in one step, so racing first turns open the
    /// conversation once.
    async fn append_opening(
        &self,
        conversation_id: &str,
        system: Message,
        messages: Vec<Message>,
    ) -> Result<()>;

    /// Returns whether anything was removed.
    async fn clear(&self, conversation_id: &str) -> Result<bool>;
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, conversation_id: &str, messages: Vec<Message>) -> Result<()> {
        self.conversations
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .extend(messages);
        Ok(())
    }

    async fn append_opening(
        &self,
        conversation_id: &str,
        system: Message,
        messages: Vec<Message>,
    ) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let history = conversations.entry(conversation_id.to_string()).or_default();
        push_opening(history, system, messages);
        Ok(())
    }

    async fn clear(&self, conversation_id: &str) -> Result<bool> {
        Ok(self.conversations.write().await.remove(conversation_id).is_some())
    }
}

fn push_opening(history: &mut Vec<Message>, system: Message, messages: Vec<Message>) {
    if !history.iter().any(|m| m.role == Role::System) {
        history.insert(0, system);
    }
    history.extend(messages);
}

#[derive(Debug, Serialize, Deserialize)]
struct ConversationFile {
    id: String,
    messages: Vec<Message>,
    updated_at: DateTime<Utc>,
}

/// One JSON file per conversation, named by [`conversation_file_stem`].
pub struct JsonConversationStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", conversation_file_stem(conversation_id)))
    }

    async fn read(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let path = self.path_for(conversation_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
        };

        let file: ConversationFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse conversation file {:?}", path))?;
        Ok(file.messages)
    }

    /// Read, edit and write back under the write lock.
    async fn update<F>(&self, conversation_id: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Message>) + Send,
    {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", self.dir))?;

        let mut messages = self.read(conversation_id).await?;
        edit(&mut messages);

        let file = ConversationFile {
            id: conversation_id.to_string(),
            messages,
            updated_at: Utc::now(),
        };
        let path = self.path_for(conversation_id);
        write_atomically(&path, &serde_json::to_string_pretty(&file)?).await
    }
}

/// File name for a conversation id. Lowercase ascii letters, digits and `-` are kept;
/// every other byte becomes `_xx` (hex), so distinct ids never share a file, even on
/// case-insensitive filesystems.
pub fn conversation_file_stem(conversation_id: &str) -> String {
    let mut stem = String::with_capacity(conversation_id.len());
    for byte in conversation_id.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' => stem.push(char::from(byte)),
            _ => stem.push_str(&format!("_{:02x}", byte)),
        }
    }
    stem
}

#[async_trait]
impl ConversationStore for JsonConversationStore {
    async fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.read(conversation_id).await
    }

    async fn append(&self, conversation_id: &str, messages: Vec<Message>) -> Result<()> {
        self.update(conversation_id, |history| history.extend(messages))
            .await
    }

    async fn append_opening(
        &self,
        conversation_id: &str,
        system: Message,
        messages: Vec<Message>,
    ) -> Result<()> {
        self.update(conversation_id, |history| push_opening(history, system, messages))
            .await
    }

    async fn clear(&self, conversation_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.read(conversation_id).await?.is_empty() {
            return Ok(false);
        }
        let path = self.path_for(conversation_id);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to remove {:?}", path))?;
        Ok(true)
    }
}

async fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp_path))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move {:?} into place", tmp_path))
}

pub fn build_conversation_store(settings: &Settings) -> Arc<dyn ConversationStore> {
    match settings.conversation_store {
        ConversationStoreKind::Memory => Arc::new(InMemoryConversationStore::new()),
        ConversationStoreKind::Json => {
            let dir = settings.conversations_dir();
            tracing::info!("Persisting conversations under {:?}", dir);
            Arc::new(JsonConversationStore::new(dir))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise_store(store: &dyn ConversationStore) {
        assert!(store.history("missing").await.expect("history").is_empty());

        store
            .append("c1", vec![Message::system("be nice"), Message::user("hi")])
            .await
            .expect("append");
        store
            .append("c1", vec![Message::assistant("hello")])
            .await
            .expect("append again");

        let history = store.history("c1").await.expect("history");
        assert_eq!(history.len(), 3);
        assert_eq!(history[2], Message::assistant("hello"));

        assert!(store.clear("c1").await.expect("clear"));
        assert!(!store.clear("c1").await.expect("clear again"));
        assert!(store.history("c1").await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn in_memory_store_appends_and_clears() {
        exercise_store(&InMemoryConversationStore::new()).await;
    }

    #[tokio::test]
    async fn json_store_appends_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        exercise_store(&JsonConversationStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        JsonConversationStore::new(dir.path())
            .append("abc", vec![Message::user("remember me")])
            .await
            .expect("append");

        let reopened = JsonConversationStore::new(dir.path());
        assert_eq!(
            reopened.history("abc").await.expect("history"),
            vec![Message::user("remember me")]
        );
    }

    #[tokio::test]
    async fn ids_that_look_alike_keep_separate_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonConversationStore::new(dir.path());
        store
            .append("a-b", vec![Message::user("first"), Message::assistant("reply")])
            .await
            .expect("append");
        assert!(store.history("a_b").await.expect("history").is_empty());

        store
            .append("a_b", vec![Message::user("second")])
            .await
            .expect("append other");
        store
            .append("A-B", vec![Message::user("third")])
            .await
            .expect("append upper");

        assert_eq!(store.history("a-b").await.expect("history").len(), 2);
        assert_eq!(
            store.history("a_b").await.expect("history"),
            vec![Message::user("second")]
        );
        assert_eq!(
            store.history("A-B").await.expect("history"),
            vec![Message::user("third")]
        );
    }

    #[test]
    fn file_stems_are_readable_for_uuids_and_escape_the_rest() {
        let uuid = "3f2b6c1e-0a4d-4e1b-9c5a-2d7e8f901234";
        assert_eq!(conversation_file_stem(uuid), uuid);
        assert_eq!(conversation_file_stem("a_b"), "a_5fb");
        assert_eq!(conversation_file_stem("A/b"), "_41_2fb");
    }

    async fn opening_is_written_once(store: &dyn ConversationStore) {
        store
            .append_opening("c", Message::system("first prompt"), vec![Message::user("one")])
            .await
            .expect("open");
        store
            .append_opening("c", Message::system("second prompt"), vec![Message::user("two")])
            .await
            .expect("open again");

        assert_eq!(
            store.history("c").await.expect("history"),
            vec![
                Message::system("first prompt"),
                Message::user("one"),
                Message::user("two"),
            ]
        );
    }

    #[tokio::test]
    async fn in_memory_opening_is_written_once() {
        opening_is_written_once(&InMemoryConversationStore::new()).await;
    }

    #[tokio::test]
    async fn json_opening_is_written_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        opening_is_written_once(&JsonConversationStore::new(dir.path())).await;
    }
}
