use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingConfig;
use crate::IngestError;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the conversation history \
to provide contextual responses, and prefer the supplied context when it answers the question.";
pub const DEFAULT_HISTORY_WINDOW: usize = 20;
pub const DEFAULT_RETRIEVAL_TOP_K: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub system_prompt: String,
    pub history_window: usize,
    pub retrieval_top_k: usize,
    pub chunking: ChunkingConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_window: DEFAULT_HISTORY_WINDOW,
            retrieval_top_k: DEFAULT_RETRIEVAL_TOP_K,
            chunking: ChunkingConfig::default(),
        }
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        self.chunking.validate()?;
        if self.history_window == 0 {
            return Err(IngestError::InvalidArgument(
                "history window must hold at least one turn".to_string(),
            ));
        }
        Ok(())
    }
}
