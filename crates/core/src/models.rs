use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backends::Provider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub chunk_id: String,
    pub content: String,
    pub source: String,
    pub ordinal: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub key: String,
    pub chunk: TextChunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub key: String,
    pub content: String,
    pub source: String,
    pub ordinal: usize,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub backend_id: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            backend_id: String::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, backend_id: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            backend_id: backend_id.into(),
        }
    }

    pub fn as_message(&self) -> Message {
        Message::new(self.role, self.content.clone())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BackendHandle {
    pub provider: Provider,
    pub model: String,
    pub credential: String,
}

impl BackendHandle {
    pub fn new(provider: Provider, model: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            credential: credential.into(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}/{}", self.provider.as_str(), self.model)
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("credential", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let message = Message::new(Role::Assistant, "hi");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"], "hi");
    }

    #[test]
    fn handle_debug_hides_credential() {
        let handle = BackendHandle::new(Provider::Groq, "llama", "sk-secret");
        let rendered = format!("{handle:?}");
        assert!(!rendered.contains("sk-secret"));
        assert_eq!(handle.id(), "groq/llama");
    }

    #[test]
    fn user_turns_have_no_backend() {
        let turn = ConversationTurn::user("question");
        assert_eq!(turn.role, Role::User);
        assert!(turn.backend_id.is_empty());
    }
}
