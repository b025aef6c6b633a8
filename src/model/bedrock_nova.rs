//! Bedrock Nova driver, talking to the Converse-stream HTTP API directly
//! via `reqwest` rather than the AWS SDK. Message/param shaping follows
//! the Converse API's own event names (`contentBlockStart` /
//! `contentBlockDelta` / `contentBlockStop` / `messageStop` / `metadata`).
//!
//! Signing a real request needs a SigV4-capable credential; this driver
//! accepts a pre-signed bearer token (as issued by the caller's credential
//! provider) the same way `AnthropicDriver` accepts a bearer API key, and
//! leaves request signing to the caller.

use super::descriptor::{filter_params, ModelDescriptor, ParamKind, ParamValue};
use super::provider::{Chunk, ChunkStream, ContentBlock, FinishReason, Message, Role, TokenUsage, ToolDescriptor};
use super::ModelDriver;
use crate::error::ZiyaError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub struct BedrockNovaDriver {
    client: reqwest::Client,
    bearer_token: String,
    region: String,
    descriptor: ModelDescriptor,
}

impl BedrockNovaDriver {
    pub fn new(bearer_token: impl Into<String>, region: impl Into<String>, descriptor: ModelDescriptor) -> Self {
        Self {
            client: reqwest::Client::new(),
            bearer_token: bearer_token.into(),
            region: region.into(),
            descriptor,
        }
    }

    /// Nova has no system role in its Converse payload; system text is
    /// carried in a dedicated top-level `system` array instead
    /// (`NovaFormatter.format_system_prompt`).
    fn to_wire(messages: &[Message]) -> (Option<Vec<NovaText>>, Vec<NovaMessage>) {
        let mut system = None;
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                Role::System => {
                    system
                        .get_or_insert_with(Vec::new)
                        .push(NovaText { text: msg.text() });
                }
                Role::User | Role::Assistant => {
                    let content = msg
                        .content
                        .iter()
                        .map(|block| match block {
                            ContentBlock::Text { text } => NovaContent::Text { text: text.clone() },
                            ContentBlock::ToolUse { id, name, input } => NovaContent::ToolUse {
                                tool_use: NovaToolUse {
                                    tool_use_id: id.clone(),
                                    name: name.clone(),
                                    input: input.clone(),
                                },
                            },
                            ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                is_error,
                            } => NovaContent::ToolResult {
                                tool_result: NovaToolResult {
                                    tool_use_id: tool_use_id.clone(),
                                    content: vec![NovaText { text: content.clone() }],
                                    status: if is_error.unwrap_or(false) { "error" } else { "success" },
                                },
                            },
                        })
                        .collect();
                    out.push(NovaMessage {
                        role: if msg.role == Role::User { "user" } else { "assistant" },
                        content,
                    });
                }
            }
        }
        (system, out)
    }
}

#[async_trait]
impl ModelDriver for BedrockNovaDriver {
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
        let _ = extended_context;
        let params = filter_params(&self.descriptor, params);
        let params = &params;
        let (system, wire_messages) = Self::to_wire(messages);

        let tool_config = (!tools.is_empty()).then(|| NovaToolConfig {
            tools: tools
                .iter()
                .map(|t| NovaToolSpec {
                    tool_spec: NovaToolSpecInner {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: NovaJsonSchema { json: t.input_schema.clone() },
                    },
                })
                .collect(),
        });

        let temperature = match params.get(&ParamKind::Temperature) {
            Some(ParamValue::Float(v)) => Some(*v),
            _ => None,
        };
        let top_p = match params.get(&ParamKind::TopP) {
            Some(ParamValue::Float(v)) => Some(*v),
            _ => Some(0.9),
        };
        let max_tokens = match params.get(&ParamKind::MaxTokens) {
            Some(ParamValue::UInt(v)) => *v,
            _ => self.descriptor.max_output_tokens,
        };

        let request = ConverseStreamRequest {
            messages: wire_messages,
            system,
            inference_config: NovaInferenceConfig {
                max_tokens,
                temperature,
                top_p,
            },
            tool_config,
        };

        let model_id = self.descriptor.model_id_for_region(Some(&self.region));
        let url = format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/converse-stream",
            self.region, model_id
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.bearer_token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(super::error_classifier::classify(&format!(
                "bedrock nova HTTP {}: {}",
                status, body
            )));
        }

        let event_stream = response.bytes_stream().eventsource();

        let stream = async_stream::stream! {
            futures::pin_mut!(event_stream);

            let mut open_tool_names: HashMap<usize, String> = HashMap::new();

            while let Some(event_result) = event_stream.next().await {
                let event = match event_result {
                    Ok(event) => event,
                    Err(err) => {
                        yield Err(super::error_classifier::classify(&format!("bedrock nova stream error: {err}")));
                        return;
                    }
                };
                if event.data.trim().is_empty() {
                    continue;
                }

                let Ok(frame) = serde_json::from_str::<ConverseStreamFrame>(&event.data) else { continue };

                if let Some(start) = frame.content_block_start {
                    if let Some(tool_use) = start.start.tool_use {
                        open_tool_names.insert(start.content_block_index, tool_use.name.clone());
                        yield Ok(Chunk::ToolUseStart {
                            id: tool_use.tool_use_id,
                            name: tool_use.name,
                            index: start.content_block_index,
                        });
                    }
                }
                if let Some(delta) = frame.content_block_delta {
                    match delta.delta {
                        NovaDelta::Text { text } => yield Ok(Chunk::TextDelta(text)),
                        NovaDelta::ToolUse { tool_use } => {
                            yield Ok(Chunk::ToolInputDelta { index: delta.content_block_index, json_fragment: tool_use.input });
                        }
                    }
                }
                if let Some(stop) = frame.content_block_stop {
                    yield Ok(Chunk::ContentBlockStop { index: stop.content_block_index });
                }
                if let Some(msg_stop) = frame.message_stop {
                    let finish_reason = match msg_stop.stop_reason.as_str() {
                        "end_turn" | "stop_sequence" => FinishReason::Stop,
                        "max_tokens" => FinishReason::Length,
                        "tool_use" => FinishReason::ToolUse,
                        _ => FinishReason::Other,
                    };
                    let usage = frame.metadata.map(|m| TokenUsage {
                        input_tokens: m.usage.input_tokens,
                        output_tokens: m.usage.output_tokens,
                        cached_tokens: 0,
                    }).unwrap_or_default();
                    yield Ok(Chunk::MessageStop { finish_reason, usage });
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Serialize)]
struct ConverseStreamRequest {
    messages: Vec<NovaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<NovaText>>,
    inference_config: NovaInferenceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<NovaToolConfig>,
}

#[derive(Serialize)]
struct NovaInferenceConfig {
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize)]
struct NovaMessage {
    role: &'static str,
    content: Vec<NovaContent>,
}

#[derive(Serialize)]
struct NovaText {
    text: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum NovaContent {
    Text { text: String },
    ToolUse { #[serde(rename = "toolUse")] tool_use: NovaToolUse },
    ToolResult { #[serde(rename = "toolResult")] tool_result: NovaToolResult },
}

#[derive(Serialize)]
struct NovaToolUse {
    #[serde(rename = "toolUseId")]
    tool_use_id: String,
    name: String,
    input: serde_json::Value,
}

#[derive(Serialize)]
struct NovaToolResult {
    #[serde(rename = "toolUseId")]
    tool_use_id: String,
    content: Vec<NovaText>,
    status: &'static str,
}

#[derive(Serialize)]
struct NovaToolConfig {
    tools: Vec<NovaToolSpec>,
}

#[derive(Serialize)]
struct NovaToolSpec {
    #[serde(rename = "toolSpec")]
    tool_spec: NovaToolSpecInner,
}

#[derive(Serialize)]
struct NovaToolSpecInner {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: NovaJsonSchema,
}

#[derive(Serialize)]
struct NovaJsonSchema {
    json: serde_json::Value,
}

#[derive(Deserialize, Default)]
struct ConverseStreamFrame {
    #[serde(rename = "contentBlockStart")]
    content_block_start: Option<WireContentBlockStart>,
    #[serde(rename = "contentBlockDelta")]
    content_block_delta: Option<WireContentBlockDelta>,
    #[serde(rename = "contentBlockStop")]
    content_block_stop: Option<WireContentBlockStop>,
    #[serde(rename = "messageStop")]
    message_stop: Option<WireMessageStop>,
    metadata: Option<WireMetadata>,
}

#[derive(Deserialize)]
struct WireContentBlockStart {
    #[serde(rename = "contentBlockIndex")]
    content_block_index: usize,
    start: WireStart,
}

#[derive(Deserialize, Default)]
struct WireStart {
    #[serde(rename = "toolUse")]
    tool_use: Option<WireToolUseStart>,
}

#[derive(Deserialize)]
struct WireToolUseStart {
    #[serde(rename = "toolUseId")]
    tool_use_id: String,
    name: String,
}

#[derive(Deserialize)]
struct WireContentBlockDelta {
    #[serde(rename = "contentBlockIndex")]
    content_block_index: usize,
    delta: NovaDelta,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NovaDelta {
    Text { text: String },
    ToolUse { #[serde(rename = "toolUse")] tool_use: WireToolUseDelta },
}

#[derive(Deserialize)]
struct WireToolUseDelta {
    input: String,
}

#[derive(Deserialize)]
struct WireContentBlockStop {
    #[serde(rename = "contentBlockIndex")]
    content_block_index: usize,
}

#[derive(Deserialize)]
struct WireMessageStop {
    #[serde(rename = "stopReason")]
    stop_reason: String,
}

#[derive(Deserialize)]
struct WireMetadata {
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(rename = "inputTokens")]
    input_tokens: u32,
    #[serde(rename = "outputTokens")]
    output_tokens: u32,
}
