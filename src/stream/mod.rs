//! Streaming subsystem: the tool-calling loop engine, its two text
//! filters, the code-block tracker, per-stream metrics, and the SSE
//! framer.

pub mod code_block;
pub mod loop_detector;
pub mod loop_engine;
pub mod metrics;
pub mod optimizer;
pub mod sse;

use serde::Serialize;

/// The event vocabulary the loop hands to the framer. One variant per
/// `data: <json>\n\n` payload shape; `[DONE]` is not a variant, it is a
/// framer-level sentinel appended after the final event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum FrameEvent {
    Text {
        content: String,
        timestamp_ms: i64,
    },
    ToolStart {
        tool_id: String,
        tool_name: String,
        args: serde_json::Value,
        timestamp_ms: i64,
    },
    ToolDisplay {
        tool_id: String,
        tool_name: String,
        result: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<serde_json::Value>,
        timestamp_ms: i64,
    },
    Heartbeat {
        timestamp_ms: i64,
    },
    IterationContinue {
        iteration: u32,
    },
    StreamEnd,
    Error {
        error: String,
        detail: String,
        status_code: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        preserved_content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        preserved_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        successful_tool_results: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pre_streaming_work: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_execution_summary: Option<String>,
        stream_id: String,
    },
}

/// Hard per-request iteration bound.
pub const MAX_ITER: u32 = 50;

/// Threshold at which consecutive empty tool calls triggers a one-turn
/// delay-and-warn.
pub const EMPTY_TOOL_CALL_WARN_THRESHOLD: u32 = 3;

/// Threshold at which consecutive empty tool calls triggers tool
/// suppression on the next request body.
pub const EMPTY_TOOL_CALL_SUPPRESS_THRESHOLD: u32 = 5;

/// Safety cutoff: more than this many blocked tool calls in one iteration
/// ends the stream (almost certainly a duplicate-call runaway).
pub const MAX_BLOCKED_TOOLS_PER_ITERATION: u32 = 3;

/// Continuation cap for incomplete fenced blocks.
pub const MAX_CODE_BLOCK_CONTINUATIONS: u32 = 10;

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
