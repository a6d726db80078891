//! Conversation persistence.
//!
//! Each conversation is a JSONL file: a metadata first line, then one message
//! per line. Loads are lenient so a single corrupt line never loses a
//! conversation.

use edith_core::types::ChatMessage;
use edith_core::{Paths, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_type")]
enum ConversationLine {
    #[serde(rename = "metadata")]
    Metadata {
        created_at: String,
        updated_at: String,
        #[serde(default)]
        title: String,
    },
    #[serde(untagged)]
    Message(ChatMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ConversationStore {
    paths: Paths,
}

impl ConversationStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn load(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let path = self.paths.conversation_file(conversation_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        let mut messages = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConversationLine>(&line) {
                Ok(ConversationLine::Message(msg)) => messages.push(msg),
                Ok(ConversationLine::Metadata { .. }) => {}
                Err(e) => {
                    debug!(error = %e, "Skipping unparsable conversation line");
                }
            }
        }

        Ok(messages)
    }

    pub fn save(&self, conversation_id: &str, title: &str, messages: &[ChatMessage]) -> Result<()> {
        let path = self.paths.conversation_file(conversation_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let now = chrono::Utc::now().to_rfc3339();
        let created_at = if path.exists() {
            self.read_metadata(&path)
                .map(|m| m.created_at)
                .unwrap_or_else(|| now.clone())
        } else {
            now.clone()
        };

        let mut file = File::create(&path)?;
        let metadata = ConversationLine::Metadata {
            created_at,
            updated_at: now,
            title: title.to_string(),
        };
        writeln!(file, "{}", serde_json::to_string(&metadata)?)?;
        for msg in messages {
            writeln!(file, "{}", serde_json::to_string(msg)?)?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<ConversationSummary>> {
        let dir = self.paths.conversations_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            if let Some(meta) = self.read_metadata(&path) {
                summaries.push(ConversationSummary {
                    id,
                    title: meta.title,
                    created_at: meta.created_at,
                    updated_at: meta.updated_at,
                });
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    fn read_metadata(&self, path: &std::path::Path) -> Option<Metadata> {
        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        let mut first_line = String::new();
        reader.read_line(&mut first_line).ok()?;
        match serde_json::from_str::<ConversationLine>(first_line.trim()).ok()? {
            ConversationLine::Metadata {
                created_at,
                updated_at,
                title,
            } => Some(Metadata {
                created_at,
                updated_at,
                title,
            }),
            _ => None,
        }
    }
}

struct Metadata {
    created_at: String,
    updated_at: String,
    title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ConversationStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());
        (tmp, ConversationStore::new(paths))
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (_tmp, store) = store();
        let messages = vec![
            ChatMessage::user("open google"),
            ChatMessage::assistant("Opening it now."),
        ];
        store.save("conv-1", "open google", &messages).unwrap();

        let loaded = store.load("conv-1").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].role, "user");
        assert_eq!(loaded[0].content, "open google");
        assert_eq!(loaded[1].role, "assistant");
    }

    #[test]
    fn test_load_missing_conversation_is_empty() {
        let (_tmp, store) = store();
        assert!(store.load("nope").unwrap().is_empty());
    }

    #[test]
    fn test_save_preserves_created_at() {
        let (_tmp, store) = store();
        store.save("conv-2", "t", &[ChatMessage::user("a")]).unwrap();
        let first = store.list().unwrap();
        let created = first[0].created_at.clone();

        store
            .save("conv-2", "t", &[ChatMessage::user("a"), ChatMessage::assistant("b")])
            .unwrap();
        let second = store.list().unwrap();
        assert_eq!(second[0].created_at, created);
    }

    #[test]
    fn test_list_returns_titles() {
        let (_tmp, store) = store();
        store
            .save("conv-a", "compare iPhone prices", &[ChatMessage::user("x")])
            .unwrap();
        let list = store.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "conv-a");
        assert_eq!(list[0].title, "compare iPhone prices");
    }

    #[test]
    fn test_load_skips_corrupt_lines() {
        let (_tmp, store) = store();
        store.save("conv-c", "t", &[ChatMessage::user("ok")]).unwrap();

        let path = store.paths.conversation_file("conv-c");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{ not json\n");
        std::fs::write(&path, content).unwrap();

        let loaded = store.load("conv-c").unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
