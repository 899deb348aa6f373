use async_trait::async_trait;
use serde::Serialize;

use crate::error::ProviderError;
use crate::types::{MemoryEntry, Role};

/// One message on the wire to a chat provider. Both supported APIs take
/// the same `{role, content}` shape.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&MemoryEntry> for ChatMessage {
    fn from(entry: &MemoryEntry) -> Self {
        Self {
            role: entry.role,
            content: entry.content.clone(),
        }
    }
}

/// Fully-formed request — the provider just sends it.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
}

/// Pure chat API call. No state, no history management, no memory.
/// Request in, reply text out.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError>;

    /// Short identifier recorded on assistant memory entries.
    fn name(&self) -> &str;
}
