//! Google Gemini driver against `streamGenerateContent?alt=sse`.
//!
//! Messages flatten into `contents`/`parts`; function-call parts surface
//! via `candidate.content.parts`, and a function-call turn is answered by
//! a `functionResponse` part. Wire framing follows the same `reqwest` +
//! `eventsource-stream` shape as the other drivers; Gemini's REST API is
//! plain HTTPS with an API key query param, so no separate SDK dependency
//! is needed.

use super::descriptor::{filter_params, ModelDescriptor, ParamKind, ParamValue};
use super::provider::{Chunk, ChunkStream, ContentBlock, FinishReason, Message, Role, TokenUsage, ToolDescriptor};
use super::ModelDriver;
use crate::error::ZiyaError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleDriver {
    client: reqwest::Client,
    api_key: String,
    descriptor: ModelDescriptor,
}

impl GoogleDriver {
    pub fn new(api_key: impl Into<String>, descriptor: ModelDescriptor) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            descriptor,
        }
    }

    fn to_wire(messages: &[Message]) -> (Option<GeminiContent>, Vec<GeminiContent>) {
        let mut system = None;
        let mut contents = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                Role::System => {
                    system = Some(GeminiContent {
                        role: "user".to_string(),
                        parts: vec![GeminiPart::Text(msg.text())],
                    });
                }
                Role::User | Role::Assistant => {
                    let parts = msg
                        .content
                        .iter()
                        .map(|block| match block {
                            ContentBlock::Text { text } => GeminiPart::Text(text.clone()),
                            ContentBlock::ToolUse { name, input, .. } => GeminiPart::FunctionCall(GeminiFunctionCall {
                                name: name.clone(),
                                args: input.clone(),
                            }),
                            // ContentBlock carries tool_use_id, not the original function
                            // name; Gemini only uses `name` to pair the response back to
                            // its call, so the id serves that role here.
                            ContentBlock::ToolResult { tool_use_id, content, .. } => {
                                GeminiPart::FunctionResponse(GeminiFunctionResponse {
                                    name: tool_use_id.clone(),
                                    response: serde_json::json!({ "content": content }),
                                })
                            }
                        })
                        .collect();
                    contents.push(GeminiContent {
                        role: if msg.role == Role::User { "user".to_string() } else { "model".to_string() },
                        parts,
                    });
                }
            }
        }
        (system, contents)
    }
}

#[async_trait]
impl ModelDriver for GoogleDriver {
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
        let (system_instruction, contents) = Self::to_wire(messages);

        let tools_wire = (!tools.is_empty()).then(|| {
            vec![GeminiToolSet {
                function_declarations: tools
                    .iter()
                    .map(|t| GeminiFunctionDecl {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    })
                    .collect(),
            }]
        });

        let temperature = match params.get(&ParamKind::Temperature) {
            Some(ParamValue::Float(v)) => Some(*v),
            _ => None,
        };
        let max_output_tokens = match params.get(&ParamKind::MaxTokens) {
            Some(ParamValue::UInt(v)) => Some(*v),
            _ => Some(self.descriptor.max_output_tokens),
        };

        let request = GenerateContentRequest {
            contents,
            system_instruction,
            tools: tools_wire,
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens,
            },
        };

        let model_id = &self.descriptor.default_model_id;
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            API_BASE, model_id, self.api_key
        );

        let response = self.client.post(url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(super::error_classifier::classify(&format!(
                "google HTTP {}: {}",
                status, body
            )));
        }

        let event_stream = response.bytes_stream().eventsource();

        let stream = async_stream::stream! {
            futures::pin_mut!(event_stream);
            let mut next_index = 0usize;

            while let Some(event_result) = event_stream.next().await {
                let event = match event_result {
                    Ok(event) => event,
                    Err(err) => {
                        yield Err(super::error_classifier::classify(&format!("google stream error: {err}")));
                        return;
                    }
                };
                if event.data.trim().is_empty() {
                    continue;
                }
                let Ok(frame) = serde_json::from_str::<GenerateContentResponse>(&event.data) else { continue };

                for candidate in frame.candidates {
                    for part in candidate.content.parts {
                        match part {
                            GeminiPart::Text(text) => yield Ok(Chunk::TextDelta(text)),
                            GeminiPart::FunctionCall(function_call) => {
                                let index = next_index;
                                next_index += 1;
                                yield Ok(Chunk::ToolUseStart {
                                    id: format!("{}-{}", function_call.name, index),
                                    name: function_call.name.clone(),
                                    index,
                                });
                                yield Ok(Chunk::ToolInputDelta {
                                    index,
                                    json_fragment: function_call.args.to_string(),
                                });
                                yield Ok(Chunk::ContentBlockStop { index });
                            }
                            GeminiPart::FunctionResponse(_) => {}
                        }
                    }
                    if let Some(reason) = candidate.finish_reason {
                        let finish_reason = match reason.as_str() {
                            "STOP" => FinishReason::Stop,
                            "MAX_TOKENS" => FinishReason::Length,
                            _ => FinishReason::Other,
                        };
                        let usage = frame.usage_metadata.as_ref().map(|u| TokenUsage {
                            input_tokens: u.prompt_token_count,
                            output_tokens: u.candidates_token_count,
                            cached_tokens: 0,
                        }).unwrap_or_default();
                        yield Ok(Chunk::MessageStop { finish_reason, usage });
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiToolSet>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
enum GeminiPart {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "functionCall")]
    FunctionCall(GeminiFunctionCall),
    #[serde(rename = "functionResponse")]
    FunctionResponse(GeminiFunctionResponse),
}

#[derive(Serialize, Deserialize, Clone)]
struct GeminiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Serialize)]
struct GeminiToolSet {
    function_declarations: Vec<GeminiFunctionDecl>,
}

#[derive(Serialize)]
struct GeminiFunctionDecl {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}
