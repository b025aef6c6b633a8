//! Anthropic Messages API driver: reqwest + SSE streaming.
//!
//! Handles the `content_block_start` / `content_block_delta` /
//! `content_block_stop` / `message_delta` event sequence, adapted to emit
//! the shared `Chunk` sequence common to every backend.

use super::descriptor::{filter_params, ModelDescriptor, ParamKind, ParamValue};
use super::provider::{
    CacheControl, Chunk, ChunkStream, ContentBlock, FinishReason, Message, Role, TokenUsage,
    ToolDescriptor,
};
use super::ModelDriver;
use crate::error::ZiyaError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const API_BASE: &str = "https://api.anthropic.com/v1";

pub struct AnthropicDriver {
    client: reqwest::Client,
    api_key: String,
    descriptor: ModelDescriptor,
}

impl AnthropicDriver {
    pub fn new(api_key: impl Into<String>, descriptor: ModelDescriptor) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            descriptor,
        }
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &HashMap<ParamKind, ParamValue>,
    ) -> CreateMessageRequest {
        let mut system: Option<Vec<SystemBlock>> = None;
        let mut wire_messages = Vec::with_capacity(messages.len());

        for msg in messages {
            if msg.role == Role::System {
                let blocks = system.get_or_insert_with(Vec::new);
                blocks.push(SystemBlock {
                    block_type: "text",
                    text: msg.text(),
                    cache_control: msg.cache_control.map(|_| CacheControlWire::ephemeral()),
                });
                continue;
            }
            wire_messages.push(WireMessage {
                role: match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => unreachable!(),
                },
                content: msg
                    .content
                    .iter()
                    .map(WireBlock::from_content_block)
                    .collect(),
            });
        }

        let wire_tools = (!tools.is_empty()).then(|| {
            tools
                .iter()
                .map(|t| WireTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect::<Vec<_>>()
        });

        let temperature = match params.get(&ParamKind::Temperature) {
            Some(ParamValue::Float(v)) => Some(*v),
            _ => None,
        };
        let top_p = match params.get(&ParamKind::TopP) {
            Some(ParamValue::Float(v)) => Some(*v),
            _ => None,
        };
        let top_k = match params.get(&ParamKind::TopK) {
            Some(ParamValue::UInt(v)) => Some(*v),
            _ => None,
        };
        let max_tokens = match params.get(&ParamKind::MaxTokens) {
            Some(ParamValue::UInt(v)) => *v,
            _ => self.descriptor.max_output_tokens,
        };

        CreateMessageRequest {
            model: self.descriptor.default_model_id.clone(),
            max_tokens,
            messages: wire_messages,
            system,
            temperature,
            top_p,
            top_k,
            stream: true,
            tools: wire_tools,
            tool_choice: (!tools.is_empty()).then_some(ToolChoice { choice_type: "auto" }),
        }
    }
}

#[async_trait]
impl ModelDriver for AnthropicDriver {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &HashMap<ParamKind, ParamValue>,
        extended_context: bool,
    ) -> Result<ChunkStream, ZiyaError> {
        let filtered = filter_params(&self.descriptor, params);
        let request = self.build_request(messages, tools, &filtered);

        let mut req = self
            .client
            .post(format!("{}/messages", API_BASE))
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        if extended_context {
            if let Some((name, value)) = self.descriptor.extended_context_header {
                req = req.header(name, value);
            }
        }

        let response = req.json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(super::error_classifier::classify(&format!(
                "anthropic HTTP {}: {}",
                status, body
            )));
        }

        let event_stream = response.bytes_stream().eventsource();

        let stream = async_stream::stream! {
            futures::pin_mut!(event_stream);

            let mut open_index: Option<usize> = None;
            let mut next_index: usize = 0;

            while let Some(event_result) = event_stream.next().await {
                let event = match event_result {
                    Ok(event) => event,
                    Err(err) => {
                        yield Err(super::error_classifier::classify(&format!("anthropic stream error: {err}")));
                        return;
                    }
                };

                if event.event == "message_stop" || event.data.trim().is_empty() {
                    if event.event == "message_stop" {
                        break;
                    }
                    continue;
                }

                match event.event.as_str() {
                    "content_block_start" => {
                        if let Ok(start) = serde_json::from_str::<ContentBlockStartEvent>(&event.data) {
                            let index = start.index;
                            next_index = next_index.max(index + 1);
                            if let WireBlockStart::ToolUse { id, name } = start.content_block {
                                open_index = Some(index);
                                yield Ok(Chunk::ToolUseStart { id, name, index });
                            }
                        }
                    }
                    "content_block_delta" => {
                        if let Ok(delta) = serde_json::from_str::<ContentBlockDeltaEvent>(&event.data) {
                            match delta.delta {
                                WireDelta::TextDelta { text } => yield Ok(Chunk::TextDelta(text)),
                                WireDelta::InputJsonDelta { partial_json } => {
                                    yield Ok(Chunk::ToolInputDelta { index: delta.index, json_fragment: partial_json });
                                }
                                WireDelta::ThinkingDelta { .. } => {}
                            }
                        }
                    }
                    "content_block_stop" => {
                        if let Ok(stop) = serde_json::from_str::<ContentBlockStopEvent>(&event.data) {
                            yield Ok(Chunk::ContentBlockStop { index: stop.index });
                            if open_index == Some(stop.index) {
                                open_index = None;
                            }
                        }
                    }
                    "message_delta" => {
                        if let Ok(msg_delta) = serde_json::from_str::<MessageDeltaEvent>(&event.data) {
                            let finish_reason = match msg_delta.delta.stop_reason.as_deref() {
                                Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
                                Some("max_tokens") => FinishReason::Length,
                                Some("tool_use") => FinishReason::ToolUse,
                                _ => FinishReason::Other,
                            };
                            let usage = msg_delta.usage.map(|u| TokenUsage {
                                input_tokens: 0,
                                output_tokens: u.output_tokens,
                                cached_tokens: 0,
                            }).unwrap_or_default();
                            yield Ok(Chunk::MessageStop { finish_reason, usage });
                        }
                    }
                    "error" => {
                        yield Err(super::error_classifier::classify(&event.data));
                        return;
                    }
                    _ => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

// --- wire types -------------------------------------------------------

#[derive(Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<SystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    choice_type: &'static str,
}

#[derive(Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControlWire>,
}

#[derive(Serialize)]
struct CacheControlWire {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl CacheControlWire {
    fn ephemeral() -> Self {
        Self { kind: "ephemeral" }
    }
}

impl From<CacheControl> for CacheControlWire {
    fn from(_: CacheControl) -> Self {
        Self::ephemeral()
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum WireBlock {
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

impl WireBlock {
    fn from_content_block(block: &ContentBlock) -> Self {
        match block {
            ContentBlock::Text { text } => WireBlock::Text { text: text.clone() },
            ContentBlock::ToolUse { id, name, input } => WireBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => WireBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.clone(),
                is_error: *is_error,
            },
        }
    }
}

#[derive(Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ContentBlockStartEvent {
    index: usize,
    content_block: WireBlockStart,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireBlockStart {
    #[serde(rename = "text")]
    Text { #[allow(dead_code)] text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ContentBlockDeltaEvent {
    index: usize,
    delta: WireDelta,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { #[allow(dead_code)] thinking: String },
}

#[derive(Deserialize)]
struct ContentBlockStopEvent {
    index: usize,
}

#[derive(Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDeltaInner,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct MessageDeltaInner {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    output_tokens: u32,
}
