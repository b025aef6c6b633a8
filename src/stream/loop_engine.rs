//! Streaming tool-use conversation loop. Owns one request for its whole
//! lifetime: drives a model turn through the retry wrapper, accumulates
//! text and tool calls, executes tools through the MCP manager, appends
//! both sides to the conversation, and loops until the model is done or a
//! safety cutoff fires.

use super::code_block::CodeBlockTracker;
use super::loop_detector::{DetectedCall, LoopAction, LoopDetector};
use super::optimizer::ContentOptimizer;
use super::{
    FrameEvent, EMPTY_TOOL_CALL_SUPPRESS_THRESHOLD, EMPTY_TOOL_CALL_WARN_THRESHOLD,
    MAX_BLOCKED_TOOLS_PER_ITERATION, MAX_CODE_BLOCK_CONTINUATIONS, MAX_ITER,
};
use crate::context::oracle::FileStateOracle;
use crate::model::descriptor::{ParamKind, ParamValue};
use crate::model::provider::{Chunk, ContentBlock, Message, Role, ToolDescriptor};
use crate::model::retry::{stream_with_retry, CancelFlag, RetryPolicy};
use crate::model::ModelDriver;
use crate::tools::sentinel;
use crate::tools::McpManager;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Knobs that shape the loop beyond its structural invariants.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub chunk_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
        }
    }
}

struct ActiveTool {
    id: String,
    name: String,
    partial_input: String,
}

/// One finalized tool-use block this iteration, in the order it appeared.
struct FinalizedTool {
    index: usize,
    id: String,
    name: String,
    input: serde_json::Value,
}

fn is_shell_tool(name: &str) -> bool {
    name == "run_shell_command" || name == "mcp_run_shell_command"
}

/// Normalize a tool's return value: `{content: [{text}]}`, `{error,
/// message}`, or an opaque value, all collapsed to a string.
fn normalize_tool_result(outcome: Result<serde_json::Value, String>) -> (String, bool) {
    match outcome {
        Err(transport_err) => (
            format!("ERROR: tool execution failed ({transport_err}). Check the tool server and retry."),
            false,
        ),
        Ok(value) => {
            if let Some(message) = value.get("error").and_then(|e| e.as_str().or_else(|| value.get("message").and_then(|m| m.as_str()))) {
                (format!("ERROR: {message}. Check the arguments and retry."), false)
            } else if let Some(content) = value.get("content").and_then(|c| c.as_array()) {
                let text = content
                    .iter()
                    .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n");
                (text, true)
            } else if let Some(s) = value.as_str() {
                (s.to_string(), true)
            } else {
                (value.to_string(), true)
            }
        }
    }
}

/// Pull the trailing substring after the last fenced block or tool result
/// marker out of `assistant_text`, for the completion heuristic.
fn text_after_last_structured_content(assistant_text: &str) -> &str {
    let fence_pos = assistant_text.rfind("```").map(|p| p + 3);
    fence_pos
        .map(|p| &assistant_text[p.min(assistant_text.len())..])
        .unwrap_or(assistant_text)
}

fn looks_complete(tail: &str) -> bool {
    let words = tail.split_whitespace().count();
    words >= 20 && tail.trim_end().ends_with(['.', '!', '?'])
}

fn suggests_continuation(assistant_text: &str, tail: &str) -> bool {
    let word_count = tail.split_whitespace().count();
    let trimmed_tail = tail.trim_end();
    trimmed_tail.ends_with(':')
        || assistant_text.trim_end().ends_with("```")
        || word_count < 20
        || !trimmed_tail.ends_with(['.', '!', '?'])
}

/// Run the tool-calling loop for one request, returning the ordered
/// `FrameEvent` sequence the SSE framer turns into bytes.
#[allow(clippy::too_many_arguments)]
pub fn run<'a>(
    driver: &'a dyn ModelDriver,
    manager: &'a dyn McpManager,
    mut conversation: Vec<Message>,
    tools: Vec<ToolDescriptor>,
    params: HashMap<ParamKind, ParamValue>,
    cancel: CancelFlag,
    config: LoopConfig,
    stream_id: String,
    oracle: &'a dyn FileStateOracle,
    conversation_id: String,
) -> impl futures::Stream<Item = FrameEvent> + 'a {
    async_stream::stream! {
        yield FrameEvent::Heartbeat { timestamp_ms: super::now_ms() };

        let mut consecutive_empty_tool_calls: u32 = 0;
        let mut suppress_tools = false;
        let mut iteration: u32 = 0;
        let empty_tools: Vec<ToolDescriptor> = Vec::new();
        // Carried across turns, not reset per iteration: a (name, id) pair
        // the model repeats in a later turn is just as much a duplicate as
        // one repeated within the same turn's stream.
        let mut executed_signatures: HashSet<(String, String)> = HashSet::new();
        // Supplementary to executed_signatures: catches calls that never
        // repeat the same (name, id) but oscillate between a small set of
        // name+argument shapes without making progress.
        let mut loop_detector = LoopDetector::new();

        'request: loop {
            if iteration >= MAX_ITER {
                // Safety cutoff, not a failure: the prior turns in this
                // conversation completed cleanly, so the file state they
                // submitted is now stable.
                oracle.mark_submitted(&conversation_id);
                yield FrameEvent::StreamEnd;
                break 'request;
            }
            if cancel.is_cancelled() {
                // Cancelled before any turn in this request ran; nothing
                // was submitted, so the oracle's state must not advance.
                yield FrameEvent::StreamEnd;
                break 'request;
            }

            let tools_for_request: &[ToolDescriptor] = if suppress_tools { &empty_tools } else { &tools };

            let stream_result = stream_with_retry(
                driver,
                &conversation,
                tools_for_request,
                &params,
                config.retry_policy,
                &cancel,
            )
            .await;

            let mut chunk_stream = match stream_result {
                Ok(s) => s,
                Err(err) => {
                    yield FrameEvent::Error {
                        error: err.kind().tag().to_string(),
                        detail: err.detail(),
                        status_code: err.kind().status_code(),
                        retry_after: err.retry_after(),
                        preserved_content: None,
                        preserved_text: None,
                        successful_tool_results: None,
                        pre_streaming_work: None,
                        tool_execution_summary: None,
                        stream_id: stream_id.clone(),
                    };
                    break 'request;
                }
            };
            yield FrameEvent::Heartbeat { timestamp_ms: super::now_ms() };

            let mut assistant_text = String::new();
            let mut active_tools: HashMap<usize, ActiveTool> = HashMap::new();
            let mut skipped_indices: HashSet<usize> = HashSet::new();
            let mut finalized_tools: Vec<FinalizedTool> = Vec::new();
            let mut tool_result_texts: Vec<(String, String)> = Vec::new(); // (tool_use_id, result_text)
            let mut empty_tool_calls_this_iteration: u32 = 0;
            let mut blocked_tools_this_iteration: u32 = 0;
            let mut optimizer = ContentOptimizer::new();
            let mut code_tracker = CodeBlockTracker::new();
            let mut chunks_since_heartbeat: u32 = 0;
            let mut timed_out = false;
            let mut loop_terminate = false;

            loop {
                if cancel.is_cancelled() {
                    yield FrameEvent::StreamEnd;
                    break 'request;
                }

                let next = tokio::time::timeout(config.chunk_timeout, chunk_stream.next()).await;
                let chunk = match next {
                    Err(_elapsed) => {
                        timed_out = true;
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(err))) => {
                        yield FrameEvent::Error {
                            error: err.kind().tag().to_string(),
                            detail: err.detail(),
                            status_code: err.kind().status_code(),
                            retry_after: err.retry_after(),
                            preserved_content: Some(assistant_text.clone()),
                            preserved_text: Some(assistant_text.clone()),
                            successful_tool_results: None,
                            pre_streaming_work: None,
                            tool_execution_summary: None,
                            stream_id: stream_id.clone(),
                        };
                        break 'request;
                    }
                    Ok(Some(Ok(chunk))) => chunk,
                };

                chunks_since_heartbeat += 1;
                if chunks_since_heartbeat >= 10 {
                    chunks_since_heartbeat = 0;
                    yield FrameEvent::Heartbeat { timestamp_ms: super::now_ms() };
                }

                match chunk {
                    Chunk::ToolUseStart { id, name, index } => {
                        let signature = (name.clone(), id.clone());
                        if executed_signatures.contains(&signature) {
                            skipped_indices.insert(index);
                            blocked_tools_this_iteration += 1;
                        } else {
                            yield FrameEvent::ToolStart {
                                tool_id: id.clone(),
                                tool_name: name.clone(),
                                args: serde_json::Value::Null,
                                timestamp_ms: super::now_ms(),
                            };
                            active_tools.insert(index, ActiveTool { id, name, partial_input: String::new() });
                        }
                    }
                    Chunk::ToolInputDelta { index, json_fragment } => {
                        if let Some(active) = active_tools.get_mut(&index) {
                            active.partial_input.push_str(&json_fragment);
                        }
                    }
                    Chunk::ContentBlockStop { index } => {
                        if skipped_indices.contains(&index) {
                            continue;
                        }
                        let Some(active) = active_tools.remove(&index) else { continue };
                        let parsed: serde_json::Value = if active.partial_input.trim().is_empty() {
                            serde_json::json!({})
                        } else {
                            serde_json::from_str(&active.partial_input).unwrap_or(serde_json::json!({}))
                        };
                        executed_signatures.insert((active.name.clone(), active.id.clone()));
                        let detection = loop_detector.check(&DetectedCall {
                            name: active.name.clone(),
                            arguments: parsed.clone(),
                        });
                        if matches!(detection.as_ref().map(|d| d.action), Some(LoopAction::Terminate)) {
                            loop_terminate = true;
                        }
                        let warning = detection.and_then(|d| d.warning_message);

                        if is_shell_tool(&active.name) && parsed.get("command").is_none() {
                            empty_tool_calls_this_iteration += 1;
                            let mut retry_text = "Your run_shell_command call was missing the required \
                                `command` field. Retry the call with a JSON object shaped like \
                                {\"command\": \"<shell command>\"}."
                                .to_string();
                            if let Some(warning) = &warning {
                                retry_text.push_str("\n\n");
                                retry_text.push_str(warning);
                            }
                            tool_result_texts.push((active.id.clone(), retry_text));
                            finalized_tools.push(FinalizedTool {
                                index,
                                id: active.id,
                                name: active.name,
                                input: parsed,
                            });
                        } else {
                            let outcome = manager.execute(&active.name, parsed.clone()).await;
                            let (mut result_text, _succeeded) = normalize_tool_result(outcome);
                            if let Some(warning) = &warning {
                                result_text.push_str("\n\n");
                                result_text.push_str(warning);
                            }
                            yield FrameEvent::ToolDisplay {
                                tool_id: active.id.clone(),
                                tool_name: active.name.clone(),
                                result: result_text.clone(),
                                args: Some(parsed.clone()),
                                timestamp_ms: super::now_ms(),
                            };
                            tool_result_texts.push((active.id.clone(), result_text));
                            finalized_tools.push(FinalizedTool {
                                index,
                                id: active.id,
                                name: active.name,
                                input: parsed,
                            });
                        }
                    }
                    Chunk::TextDelta(text) => {
                        let clean = if sentinel::contains_fake_tool_call(&text) {
                            sentinel::strip_fake_tool_calls(&text)
                        } else {
                            text
                        };
                        assistant_text.push_str(&clean);
                        code_tracker.feed(&clean);
                        if let Some(out) = optimizer.add_content(&clean) {
                            yield FrameEvent::Text { content: out, timestamp_ms: super::now_ms() };
                        }
                    }
                    Chunk::MessageStop { .. } => break,
                    Chunk::ProviderError { raw } => {
                        let classified = crate::model::error_classifier::classify(&raw);
                        yield FrameEvent::Error {
                            error: classified.kind().tag().to_string(),
                            detail: classified.detail(),
                            status_code: classified.kind().status_code(),
                            retry_after: classified.retry_after(),
                            preserved_content: Some(assistant_text.clone()),
                            preserved_text: Some(assistant_text.clone()),
                            successful_tool_results: None,
                            pre_streaming_work: None,
                            tool_execution_summary: None,
                            stream_id: stream_id.clone(),
                        };
                        break 'request;
                    }
                }
            }

            if timed_out && assistant_text.trim().is_empty() {
                assistant_text = format!(
                    "[No response received within {}s; continuing.]",
                    config.chunk_timeout.as_secs()
                );
            }

            if let Some(out) = optimizer.flush_remaining() {
                yield FrameEvent::Text { content: out, timestamp_ms: super::now_ms() };
            }

            // Auto-continuation: drain any still-open fenced block by
            // submitting follow-up turns before this iteration's code
            // completes.
            let mut continuations = 0u32;
            while code_tracker.is_open() && continuations < MAX_CODE_BLOCK_CONTINUATIONS {
                continuations += 1;
                let trimmed = assistant_text.trim_end_matches(|c: char| c != '\n');
                conversation.push(Message::assistant(trimmed.to_string()));
                conversation.push(Message::user(
                    "Continue exactly where you left off and close the open fenced block.".to_string(),
                ));
                let continuation_result = stream_with_retry(
                    driver,
                    &conversation,
                    &[],
                    &params,
                    config.retry_policy,
                    &cancel,
                )
                .await;
                let Ok(mut cont_stream) = continuation_result else { break };
                let mut produced_any = false;
                while let Some(item) = cont_stream.next().await {
                    let Ok(chunk) = item else { break };
                    match chunk {
                        Chunk::TextDelta(text) => {
                            if !text.is_empty() {
                                produced_any = true;
                            }
                            assistant_text.push_str(&text);
                            code_tracker.feed(&text);
                            yield FrameEvent::Text { content: text, timestamp_ms: super::now_ms() };
                        }
                        Chunk::MessageStop { .. } => break,
                        _ => {}
                    }
                }
                if !produced_any {
                    break;
                }
            }

            // End-of-iteration reconciliation.
            finalized_tools.sort_by_key(|t| t.index);
            let mut assistant_blocks: Vec<ContentBlock> = Vec::new();
            if !assistant_text.trim().is_empty() {
                assistant_blocks.push(ContentBlock::Text { text: assistant_text.clone() });
            }
            for tool in &finalized_tools {
                assistant_blocks.push(ContentBlock::ToolUse {
                    id: tool.id.clone(),
                    name: tool.name.clone(),
                    input: tool.input.clone(),
                });
            }
            if !assistant_blocks.is_empty() {
                conversation.push(Message {
                    role: Role::Assistant,
                    content: assistant_blocks,
                    cache_control: None,
                });
            }
            for (tool_use_id, result_text) in &tool_result_texts {
                conversation.push(Message {
                    role: Role::User,
                    content: vec![ContentBlock::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: result_text.clone(),
                        is_error: None,
                    }],
                    cache_control: None,
                });
            }

            let any_real_tool_executed = finalized_tools.iter().any(|t| {
                !(is_shell_tool(&t.name) && t.input.get("command").is_none())
            });

            if blocked_tools_this_iteration > MAX_BLOCKED_TOOLS_PER_ITERATION {
                oracle.mark_submitted(&conversation_id);
                yield FrameEvent::StreamEnd;
                break 'request;
            }

            if loop_terminate {
                // The detector escalated past its warning budget: the model
                // has oscillated through the same tool calls three times
                // running without making progress.
                oracle.mark_submitted(&conversation_id);
                yield FrameEvent::StreamEnd;
                break 'request;
            }

            if any_real_tool_executed {
                iteration += 1;
                if empty_tool_calls_this_iteration == 0 {
                    consecutive_empty_tool_calls = 0;
                } else {
                    consecutive_empty_tool_calls += 1;
                }
                if consecutive_empty_tool_calls >= EMPTY_TOOL_CALL_SUPPRESS_THRESHOLD {
                    suppress_tools = true;
                    conversation.push(Message::user(
                        "Tool calls have not been productive. Answer directly without using tools.".to_string(),
                    ));
                } else if consecutive_empty_tool_calls >= EMPTY_TOOL_CALL_WARN_THRESHOLD {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                yield FrameEvent::IterationContinue { iteration };
                continue 'request;
            }

            // No real tool executed this turn — decide whether the model
            // is actually done or just needs one more turn to finish.
            let tail = text_after_last_structured_content(&assistant_text);
            if looks_complete(tail) {
                oracle.mark_submitted(&conversation_id);
                yield FrameEvent::StreamEnd;
                break 'request;
            }
            if suggests_continuation(&assistant_text, tail) && iteration < MAX_ITER {
                iteration += 1;
                continue 'request;
            }
            oracle.mark_submitted(&conversation_id);
            yield FrameEvent::StreamEnd;
            break 'request;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::oracle::InMemoryFileStateOracle;
    use crate::model::descriptor::{Family, ModelDescriptor};
    use crate::model::provider::{ChunkStream, FinishReason, TokenUsage};
    use crate::tools::RawToolSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn test_descriptor() -> ModelDescriptor {
        ModelDescriptor {
            endpoint_tag: "stub".to_string(),
            region_model_ids: HashMap::new(),
            default_model_id: "stub-model".to_string(),
            token_limit: 100_000,
            max_output_tokens: 4096,
            supported_parameters: Default::default(),
            family: Family::Anthropic,
            extended_context_header: None,
            supports_context_caching: true,
            supports_thinking: false,
        }
    }

    /// A driver whose turns are scripted in advance: each call to
    /// `stream()` returns the next script entry's chunks in order.
    struct ScriptedDriver {
        descriptor: ModelDescriptor,
        turns: Mutex<Vec<Vec<Chunk>>>,
        calls: AtomicUsize,
        /// Tool-list length passed to each `stream` call, in order; lets a
        /// test confirm tool suppression took effect on a specific turn.
        tools_lens: Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl ModelDriver for ScriptedDriver {
        fn descriptor(&self) -> &ModelDescriptor {
            &self.descriptor
        }

        async fn stream(
            &self,
            _messages: &[Message],
            tools: &[ToolDescriptor],
            _params: &HashMap<ParamKind, ParamValue>,
            _extended_context: bool,
        ) -> Result<ChunkStream, crate::error::ZiyaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tools_lens.lock().unwrap().push(tools.len());
            let mut turns = self.turns.lock().unwrap();
            let chunks = if turns.is_empty() { Vec::new() } else { turns.remove(0) };
            let stream = async_stream::stream! {
                for chunk in chunks {
                    yield Ok(chunk);
                }
            };
            Ok(Box::pin(stream))
        }
    }

    struct NoopManager;
    #[async_trait::async_trait]
    impl McpManager for NoopManager {
        fn list_tools(&self) -> Vec<RawToolSpec> {
            Vec::new()
        }
        async fn execute(&self, _name: &str, _input: serde_json::Value) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!({"content": [{"text": "/home/user"}]}))
        }
    }

    /// Counts how many times a tool was actually executed, to distinguish
    /// "blocked as a duplicate" from "ran again".
    struct CountingManager {
        calls: AtomicUsize,
    }
    #[async_trait::async_trait]
    impl McpManager for CountingManager {
        fn list_tools(&self) -> Vec<RawToolSpec> {
            Vec::new()
        }
        async fn execute(&self, _name: &str, _input: serde_json::Value) -> Result<serde_json::Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"content": [{"text": "/home/user"}]}))
        }
    }

    fn text_turn(text: &str) -> Vec<Chunk> {
        vec![
            Chunk::TextDelta(text.to_string()),
            Chunk::MessageStop { finish_reason: FinishReason::Stop, usage: TokenUsage::default() },
        ]
    }

    #[tokio::test]
    async fn happy_path_emits_text_then_stream_end() {
        let driver = ScriptedDriver {
            descriptor: test_descriptor(),
            turns: Mutex::new(vec![text_turn(
                "The answer to two plus two is 4, a basic arithmetic fact worth stating plainly.",
            )]),
            calls: AtomicUsize::new(0),
            tools_lens: Mutex::new(Vec::new()),
        };
        let manager = NoopManager;
        let oracle = InMemoryFileStateOracle::new();
        oracle.mark_changed("c1", "a.rs");
        let events = run(
            &driver,
            &manager,
            vec![Message::user("what is 2+2?".to_string())],
            Vec::new(),
            HashMap::new(),
            CancelFlag::new(),
            LoopConfig::default(),
            "stream-1".to_string(),
            &oracle,
            "c1".to_string(),
        );
        let collected: Vec<FrameEvent> = events.collect().await;
        assert!(collected.iter().any(|e| matches!(e, FrameEvent::Text { content, .. } if content.contains('4'))));
        assert!(matches!(collected.last(), Some(FrameEvent::StreamEnd)));
        assert!(!oracle.has_changed_since_last_submission("c1", "a.rs"));
    }

    #[tokio::test]
    async fn single_tool_call_executes_then_answers() {
        let tool_turn = vec![
            Chunk::ToolUseStart { id: "t1".to_string(), name: "mcp_run_shell_command".to_string(), index: 0 },
            Chunk::ToolInputDelta { index: 0, json_fragment: "{\"command\":\"pwd\"}".to_string() },
            Chunk::ContentBlockStop { index: 0 },
            Chunk::MessageStop { finish_reason: FinishReason::ToolUse, usage: TokenUsage::default() },
        ];
        let answer_turn = text_turn(
            "Your current working directory is /home/user, as returned by the pwd command.",
        );
        let driver = ScriptedDriver {
            descriptor: test_descriptor(),
            turns: Mutex::new(vec![tool_turn, answer_turn]),
            calls: AtomicUsize::new(0),
            tools_lens: Mutex::new(Vec::new()),
        };
        let manager = NoopManager;
        let oracle = InMemoryFileStateOracle::new();
        let events = run(
            &driver,
            &manager,
            vec![Message::user("what is my current working directory?".to_string())],
            vec![ToolDescriptor {
                name: "mcp_run_shell_command".to_string(),
                description: "run a shell command".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
            HashMap::new(),
            CancelFlag::new(),
            LoopConfig::default(),
            "stream-2".to_string(),
            &oracle,
            "c1".to_string(),
        );
        let collected: Vec<FrameEvent> = events.collect().await;
        assert!(collected.iter().any(|e| matches!(e, FrameEvent::ToolStart { tool_name, .. } if tool_name == "mcp_run_shell_command")));
        assert!(collected.iter().any(|e| matches!(e, FrameEvent::ToolDisplay { result, .. } if result.contains("/home/user"))));
        assert!(matches!(collected.last(), Some(FrameEvent::StreamEnd)));
    }

    #[tokio::test]
    async fn cancellation_aborts_without_further_calls() {
        let driver = ScriptedDriver {
            descriptor: test_descriptor(),
            turns: Mutex::new(vec![text_turn("partial")]),
            calls: AtomicUsize::new(0),
            tools_lens: Mutex::new(Vec::new()),
        };
        let manager = NoopManager;
        let cancel = CancelFlag::new();
        cancel.cancel();
        let oracle = InMemoryFileStateOracle::new();
        oracle.mark_changed("c1", "a.rs");
        let events = run(
            &driver,
            &manager,
            vec![Message::user("hi".to_string())],
            Vec::new(),
            HashMap::new(),
            cancel,
            LoopConfig::default(),
            "stream-3".to_string(),
            &oracle,
            "c1".to_string(),
        );
        let collected: Vec<FrameEvent> = events.collect().await;
        assert!(matches!(collected.last(), Some(FrameEvent::StreamEnd)));
        assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
        assert!(oracle.has_changed_since_last_submission("c1", "a.rs"));
    }

    #[tokio::test]
    async fn duplicate_tool_call_across_turns_is_blocked_not_reexecuted() {
        // Turn 1 executes a real tool call. Turn 2 repeats the exact same
        // (name, id) signature — the guard must block it even though it
        // arrives in a later turn, not just within the same stream.
        let turn1 = vec![
            Chunk::ToolUseStart { id: "t1".to_string(), name: "mcp_run_shell_command".to_string(), index: 0 },
            Chunk::ToolInputDelta { index: 0, json_fragment: "{\"command\":\"pwd\"}".to_string() },
            Chunk::ContentBlockStop { index: 0 },
            Chunk::MessageStop { finish_reason: FinishReason::ToolUse, usage: TokenUsage::default() },
        ];
        let turn2_duplicate = vec![
            Chunk::ToolUseStart { id: "t1".to_string(), name: "mcp_run_shell_command".to_string(), index: 0 },
            Chunk::ToolInputDelta { index: 0, json_fragment: "{\"command\":\"pwd\"}".to_string() },
            Chunk::ContentBlockStop { index: 0 },
            Chunk::MessageStop { finish_reason: FinishReason::ToolUse, usage: TokenUsage::default() },
        ];
        let turn3_answer = text_turn(
            "The current working directory has already been reported in this conversation, so here is \
            the final complete answer without needing any further tool calls at all.",
        );
        let driver = ScriptedDriver {
            descriptor: test_descriptor(),
            turns: Mutex::new(vec![turn1, turn2_duplicate, turn3_answer]),
            calls: AtomicUsize::new(0),
            tools_lens: Mutex::new(Vec::new()),
        };
        let manager = CountingManager { calls: AtomicUsize::new(0) };
        let oracle = InMemoryFileStateOracle::new();
        let events = run(
            &driver,
            &manager,
            vec![Message::user("what is my current working directory?".to_string())],
            vec![ToolDescriptor {
                name: "mcp_run_shell_command".to_string(),
                description: "run a shell command".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
            HashMap::new(),
            CancelFlag::new(),
            LoopConfig::default(),
            "stream-4".to_string(),
            &oracle,
            "c1".to_string(),
        );
        let collected: Vec<FrameEvent> = events.collect().await;
        let tool_start_count = collected.iter().filter(|e| matches!(e, FrameEvent::ToolStart { .. })).count();
        assert_eq!(tool_start_count, 1, "the duplicate signature must never surface a second tool_start");
        assert_eq!(manager.calls.load(Ordering::SeqCst), 1, "the duplicate must not be re-executed");
        assert!(matches!(collected.last(), Some(FrameEvent::StreamEnd)));
    }

    #[tokio::test]
    async fn empty_tool_call_suppression_kicks_in_on_sixth_turn() {
        // Each of the first five turns pairs one valid shell call with one
        // missing-`command` shell call, driving consecutive_empty_tool_calls
        // to the suppress threshold. The sixth turn must be offered no
        // tools at all.
        // Arguments vary per turn so the loop detector's own exact-duplicate
        // and pattern checks (a separate, supplementary guard) don't fire
        // and terminate the request before suppression gets a chance to.
        fn mixed_turn(n: u32) -> Vec<Chunk> {
            vec![
                Chunk::ToolUseStart { id: format!("good{n}"), name: "mcp_run_shell_command".to_string(), index: 0 },
                Chunk::ToolInputDelta { index: 0, json_fragment: format!("{{\"command\":\"echo test{n}\"}}") },
                Chunk::ContentBlockStop { index: 0 },
                Chunk::ToolUseStart { id: format!("bad{n}"), name: "mcp_run_shell_command".to_string(), index: 1 },
                Chunk::ToolInputDelta { index: 1, json_fragment: format!("{{\"reason\":\"attempt{n}\"}}") },
                Chunk::ContentBlockStop { index: 1 },
                Chunk::MessageStop { finish_reason: FinishReason::ToolUse, usage: TokenUsage::default() },
            ]
        }
        let mut turns: Vec<Vec<Chunk>> = (1..=5).map(mixed_turn).collect();
        turns.push(text_turn(
            "Tools were not helping at all during this conversation, so here is a direct and complete \
            answer without making any further tool calls right now.",
        ));
        let driver = ScriptedDriver {
            descriptor: test_descriptor(),
            turns: Mutex::new(turns),
            calls: AtomicUsize::new(0),
            tools_lens: Mutex::new(Vec::new()),
        };
        let manager = CountingManager { calls: AtomicUsize::new(0) };
        let oracle = InMemoryFileStateOracle::new();
        let events = run(
            &driver,
            &manager,
            vec![Message::user("do something".to_string())],
            vec![ToolDescriptor {
                name: "mcp_run_shell_command".to_string(),
                description: "run a shell command".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
            HashMap::new(),
            CancelFlag::new(),
            LoopConfig::default(),
            "stream-5".to_string(),
            &oracle,
            "c1".to_string(),
        );
        let collected: Vec<FrameEvent> = events.collect().await;
        assert!(matches!(collected.last(), Some(FrameEvent::StreamEnd)));
        let tools_lens = driver.tools_lens.lock().unwrap();
        assert_eq!(tools_lens.len(), 6, "five mixed turns plus the final direct answer");
        assert!(tools_lens[..5].iter().all(|&n| n == 1), "tools stay offered through the fifth turn");
        assert_eq!(tools_lens[5], 0, "the sixth turn must be suppressed down to no tools");
    }

    #[tokio::test]
    async fn code_block_continuation_is_capped_at_ten_rounds() {
        // The initial turn opens a fenced block and never closes it; each
        // continuation round appends more unfenced text. The cap must stop
        // requesting further continuations at exactly ten rounds even
        // though the fence is technically still open.
        let opening_turn = vec![
            Chunk::TextDelta("Here is the body:\n```rust\nfn demo() {\n".to_string()),
            Chunk::MessageStop { finish_reason: FinishReason::Stop, usage: TokenUsage::default() },
        ];
        let mut turns: Vec<Vec<Chunk>> = vec![opening_turn];
        for round in 1..=10u32 {
            let text = if round < 10 {
                "adding another line to the function body here".to_string()
            } else {
                "and now the final line completes the thought for this test.".to_string()
            };
            turns.push(vec![
                Chunk::TextDelta(text),
                Chunk::MessageStop { finish_reason: FinishReason::Stop, usage: TokenUsage::default() },
            ]);
        }
        let driver = ScriptedDriver {
            descriptor: test_descriptor(),
            turns: Mutex::new(turns),
            calls: AtomicUsize::new(0),
            tools_lens: Mutex::new(Vec::new()),
        };
        let manager = NoopManager;
        let oracle = InMemoryFileStateOracle::new();
        let events = run(
            &driver,
            &manager,
            vec![Message::user("write a function".to_string())],
            Vec::new(),
            HashMap::new(),
            CancelFlag::new(),
            LoopConfig::default(),
            "stream-6".to_string(),
            &oracle,
            "c1".to_string(),
        );
        let collected: Vec<FrameEvent> = events.collect().await;
        assert!(matches!(collected.last(), Some(FrameEvent::StreamEnd)));
        // One call for the opening turn, ten more for the capped
        // continuation rounds, and no eleventh full request turn.
        assert_eq!(driver.calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn oscillating_tool_calls_terminate_once_the_loop_detector_escalates() {
        // Alternating read_file(a.rs) / read_file(b.rs) calls, each turn a
        // distinct id so executed_signatures never blocks any of them: the
        // supplementary loop_detector is the only thing watching for this
        // kind of non-progress, and it must stop the request once its
        // warning budget (two warnings) is spent.
        fn read_turn(n: u32, path: &str) -> Vec<Chunk> {
            vec![
                Chunk::ToolUseStart { id: format!("call{n}"), name: "read_file".to_string(), index: 0 },
                Chunk::ToolInputDelta { index: 0, json_fragment: format!("{{\"path\":\"{path}\"}}") },
                Chunk::ContentBlockStop { index: 0 },
                Chunk::MessageStop { finish_reason: FinishReason::ToolUse, usage: TokenUsage::default() },
            ]
        }
        let turns = vec![
            read_turn(1, "a.rs"),
            read_turn(2, "b.rs"),
            read_turn(3, "a.rs"),
            read_turn(4, "b.rs"),
            read_turn(5, "a.rs"),
            read_turn(6, "b.rs"),
            read_turn(7, "a.rs"),
            read_turn(8, "b.rs"),
        ];
        let driver = ScriptedDriver {
            descriptor: test_descriptor(),
            turns: Mutex::new(turns),
            calls: AtomicUsize::new(0),
            tools_lens: Mutex::new(Vec::new()),
        };
        let manager = CountingManager { calls: AtomicUsize::new(0) };
        let oracle = InMemoryFileStateOracle::new();
        let events = run(
            &driver,
            &manager,
            vec![Message::user("keep re-reading these two files".to_string())],
            vec![ToolDescriptor {
                name: "read_file".to_string(),
                description: "read a file".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
            HashMap::new(),
            CancelFlag::new(),
            LoopConfig::default(),
            "stream-7".to_string(),
            &oracle,
            "c1".to_string(),
        );
        let collected: Vec<FrameEvent> = events.collect().await;
        assert!(matches!(collected.last(), Some(FrameEvent::StreamEnd)));
        assert_eq!(driver.calls.load(Ordering::SeqCst), 7, "the detector must cut the request short before the 8th scripted turn");
        assert_eq!(manager.calls.load(Ordering::SeqCst), 7);
        let tool_start_count = collected.iter().filter(|e| matches!(e, FrameEvent::ToolStart { .. })).count();
        assert_eq!(tool_start_count, 7, "none of the seven calls share a signature, so none are blocked as duplicates");
    }
}
