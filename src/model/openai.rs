//! OpenAI Chat Completions driver: reqwest + SSE streaming.
//!
//! Tool turns come from the shared content-block `Message` (a `User`
//! message carrying `ToolResult` blocks) rather than a dedicated
//! `Role::Tool` variant, so the request builder reshapes them into
//! OpenAI's `tool` role messages at the edge.

use super::descriptor::{filter_params, ModelDescriptor, ParamKind, ParamValue};
use super::provider::{Chunk, ChunkStream, ContentBlock, FinishReason, Message, Role, TokenUsage, ToolDescriptor};
use super::ModelDriver;
use crate::error::ZiyaError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiDriver {
    client: reqwest::Client,
    api_key: String,
    descriptor: ModelDescriptor,
}

impl OpenAiDriver {
    pub fn new(api_key: impl Into<String>, descriptor: ModelDescriptor) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            descriptor,
        }
    }

    /// Flatten the shared `Message` sequence into OpenAI chat messages.
    /// An assistant `ToolUse` block becomes a `tool_calls` entry; a user
    /// `ToolResult` block becomes its own `tool` message, one per result,
    /// in order, immediately after the assistant turn it answers.
    fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                Role::System => out.push(WireMessage::System { content: msg.text() }),
                Role::User => {
                    let tool_results: Vec<_> = msg
                        .content
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => Some((tool_use_id.clone(), content.clone())),
                            _ => None,
                        })
                        .collect();
                    if !tool_results.is_empty() {
                        for (tool_call_id, content) in tool_results {
                            out.push(WireMessage::Tool {
                                content,
                                tool_call_id,
                            });
                        }
                    } else {
                        out.push(WireMessage::User { content: msg.text() });
                    }
                }
                Role::Assistant => {
                    let text = msg.text();
                    let tool_calls: Vec<_> = msg
                        .tool_use_blocks()
                        .map(|(id, name, input)| WireToolCall {
                            id: id.to_string(),
                            tool_type: "function".to_string(),
                            function: WireFunctionCall {
                                name: name.to_string(),
                                arguments: serde_json::to_string(input).unwrap_or_default(),
                            },
                        })
                        .collect();
                    out.push(WireMessage::Assistant {
                        content: (!text.is_empty()).then_some(text),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    });
                }
            }
        }
        out
    }
}

#[async_trait]
impl ModelDriver for OpenAiDriver {
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
        let wire_tools = (!tools.is_empty()).then(|| {
            tools
                .iter()
                .map(|t| WireTool {
                    tool_type: "function".to_string(),
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect::<Vec<_>>()
        });

        let temperature = match params.get(&ParamKind::Temperature) {
            Some(ParamValue::Float(v)) => Some(*v),
            _ => None,
        };
        let max_tokens = match params.get(&ParamKind::MaxTokens) {
            Some(ParamValue::UInt(v)) => Some(*v),
            _ => None,
        };

        let request = ChatCompletionRequest {
            model: self.descriptor.default_model_id.clone(),
            messages: Self::to_wire_messages(messages),
            temperature,
            max_completion_tokens: max_tokens,
            stream: true,
            stream_options: Some(StreamOptions { include_usage: true }),
            tools: wire_tools,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", API_BASE))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(super::error_classifier::classify(&format!(
                "openai HTTP {}: {}",
                status, body
            )));
        }

        let event_stream = response.bytes_stream().eventsource();

        let stream = async_stream::stream! {
            futures::pin_mut!(event_stream);

            // OpenAI tool call deltas arrive keyed by index with the id only
            // on the first fragment; track names separately so ToolUseStart
            // only needs to fire once per index.
            let mut started_indices: std::collections::HashSet<usize> = std::collections::HashSet::new();

            while let Some(event_result) = event_stream.next().await {
                let event = match event_result {
                    Ok(event) => event,
                    Err(err) => {
                        yield Err(super::error_classifier::classify(&format!("openai stream error: {err}")));
                        return;
                    }
                };

                if event.data.trim() == "[DONE]" {
                    break;
                }
                if event.data.trim().is_empty() {
                    continue;
                }

                let chunk: ChatCompletionChunk = match serde_json::from_str(&event.data) {
                    Ok(c) => c,
                    Err(_) => continue,
                };

                if let Some(usage) = chunk.usage {
                    yield Ok(Chunk::MessageStop {
                        finish_reason: FinishReason::Stop,
                        usage: TokenUsage {
                            input_tokens: usage.prompt_tokens,
                            output_tokens: usage.completion_tokens,
                            cached_tokens: 0,
                        },
                    });
                }

                for choice in chunk.choices {
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield Ok(Chunk::TextDelta(text));
                        }
                    }
                    for call in choice.delta.tool_calls.unwrap_or_default() {
                        if !started_indices.contains(&call.index) {
                            if let (Some(id), Some(function)) = (&call.id, &call.function) {
                                if let Some(name) = &function.name {
                                    started_indices.insert(call.index);
                                    yield Ok(Chunk::ToolUseStart {
                                        id: id.clone(),
                                        name: name.clone(),
                                        index: call.index,
                                    });
                                }
                            }
                        }
                        if let Some(function) = call.function {
                            if let Some(arguments) = function.arguments {
                                if !arguments.is_empty() {
                                    yield Ok(Chunk::ToolInputDelta { index: call.index, json_fragment: arguments });
                                }
                            }
                        }
                    }
                    if let Some(reason) = choice.finish_reason {
                        for index in &started_indices {
                            yield Ok(Chunk::ContentBlockStop { index: *index });
                        }
                        let finish_reason = match reason.as_str() {
                            "stop" => FinishReason::Stop,
                            "length" => FinishReason::Length,
                            "tool_calls" => FinishReason::ToolUse,
                            _ => FinishReason::Other,
                        };
                        yield Ok(Chunk::MessageStop { finish_reason, usage: TokenUsage::default() });
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
#[serde(tag = "role")]
enum WireMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<WireToolCall>>,
    },
    #[serde(rename = "tool")]
    Tool { content: String, tool_call_id: String },
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
