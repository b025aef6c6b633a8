//! Core message/tool data model shared by every backend driver.
//!
//! A message's content is either plain text or an ordered list of typed
//! blocks, so that an assistant turn can interleave prose with tool_use
//! blocks and a follow-up user turn can carry matching tool_result blocks
//! at the same index.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Role of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single typed block inside a message's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Cache boundary marker. Only ever attached to system messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheControl {
    Ephemeral,
}

/// A message in the conversation submitted to (or returned from) a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::Text { text: text.into() }],
            cache_control: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
            cache_control: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
            cache_control: None,
        }
    }

    pub fn with_cache_control(mut self, cache_control: CacheControl) -> Self {
        self.cache_control = Some(cache_control);
        self
    }

    /// Plain-text view of the message, concatenating all `Text` blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_use_blocks(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }

    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
    }
}

/// Description of a tool surfaced to the model, after the registry has
/// applied its `mcp_` prefixing and schema conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call observed while streaming, assembled incrementally from
/// `ToolUseStart` + `ToolInputDelta` chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw accumulated JSON text; parsed to a `Value` at `ContentBlockStop`.
    pub partial_input_text: String,
    pub index: usize,
}

/// Result of executing one tool call, ready to be embedded in a
/// `tool_result` content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub tool_name: String,
    pub result_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reason a model turn finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    Other,
}

/// Token usage for one model call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
}

/// A unified chunk variant emitted by every `ModelDriver::stream` call.
///
/// Drivers unwrap provider-native SSE events into these variants and never
/// synthesize filler text or fabricate tool calls.
#[derive(Debug, Clone)]
pub enum Chunk {
    TextDelta(String),
    ToolUseStart {
        id: String,
        name: String,
        index: usize,
    },
    ToolInputDelta {
        index: usize,
        json_fragment: String,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageStop {
        finish_reason: FinishReason,
        usage: TokenUsage,
    },
    ProviderError {
        raw: String,
    },
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, crate::error::ZiyaError>> + Send>>;
