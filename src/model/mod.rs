//! Model abstraction: a single `ModelDriver` trait dispatched by family
//! tag, with one struct per backend. No shared base class — each driver
//! owns its request/response shapes end to end.

pub mod anthropic;
pub mod bedrock_nova;
pub mod descriptor;
pub mod error_classifier;
pub mod google;
pub mod openai;
pub mod provider;
pub mod retry;

use crate::error::ZiyaError;
use descriptor::{ModelDescriptor, ParamKind, ParamValue};
use provider::{ChunkStream, Chunk, ContentBlock, Message, Role, ToolDescriptor};
use std::collections::HashMap;

/// One backend's streaming chat endpoint.
///
/// Implementations translate `messages`/`tools`/`params` into their native
/// wire format, issue the HTTP request, and adapt the provider's SSE frames
/// into the shared `Chunk` sequence. They never retry on their own — that is
/// the retry wrapper's job — and never inspect tool results; they only see
/// the flattened message history the caller hands them.
#[async_trait::async_trait]
pub trait ModelDriver: Send + Sync {
    fn descriptor(&self) -> &ModelDescriptor;

    /// `extended_context` is set by the retry wrapper on the one-shot resubmit
    /// after a `ContextSize` error; a driver whose descriptor carries no
    /// `extended_context_header` ignores it.
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &HashMap<ParamKind, ParamValue>,
        extended_context: bool,
    ) -> Result<ChunkStream, ZiyaError>;

    /// Non-streaming turn: drive `stream` to completion and fold the chunk
    /// sequence into a single assistant `Message`. Every backend shares this
    /// accumulation logic, so it is provided once here rather than per driver.
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &HashMap<ParamKind, ParamValue>,
    ) -> Result<Message, ZiyaError> {
        let mut stream = self.stream(messages, tools, params, false).await?;
        collect_message(&mut stream).await
    }
}

/// Fold a `ChunkStream` into one assistant `Message`, in content-block order.
async fn collect_message(stream: &mut ChunkStream) -> Result<Message, ZiyaError> {
    use futures::StreamExt;

    let mut text = String::new();
    let mut active: HashMap<usize, (String, String, String)> = HashMap::new();
    let mut blocks: Vec<(usize, ContentBlock)> = Vec::new();

    while let Some(item) = stream.next().await {
        match item? {
            Chunk::TextDelta(delta) => text.push_str(&delta),
            Chunk::ToolUseStart { id, name, index } => {
                active.insert(index, (id, name, String::new()));
            }
            Chunk::ToolInputDelta { index, json_fragment } => {
                if let Some((_, _, partial)) = active.get_mut(&index) {
                    partial.push_str(&json_fragment);
                }
            }
            Chunk::ContentBlockStop { index } => {
                if let Some((id, name, partial)) = active.remove(&index) {
                    let input = if partial.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&partial).unwrap_or(serde_json::json!({}))
                    };
                    blocks.push((index, ContentBlock::ToolUse { id, name, input }));
                }
            }
            Chunk::MessageStop { .. } => break,
            Chunk::ProviderError { raw } => {
                return Err(error_classifier::classify(&raw));
            }
        }
    }

    blocks.sort_by_key(|(index, _)| *index);
    let mut content = Vec::new();
    if !text.trim().is_empty() {
        content.push(ContentBlock::Text { text });
    }
    content.extend(blocks.into_iter().map(|(_, block)| block));

    Ok(Message {
        role: Role::Assistant,
        content,
        cache_control: None,
    })
}
