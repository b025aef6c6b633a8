//! Conversation sanitization: a defensive boundary for conversation history
//! arriving from outside this crate (e.g. rehydrated from persisted
//! storage) as loosely-typed JSON, where a frontend-only event type might
//! have been accidentally retained alongside real turns.
//!
//! The in-process loop engine never pushes a frame event onto the typed
//! `Vec<Message>` conversation in the first place, so this is not
//! exercised on that path; it exists for the boundary where conversation
//! state crosses back in from JSON.

use crate::model::provider::{ContentBlock, Message, Role};
use serde_json::Value;

/// Frontend-only event tags that must never reach the model.
const FRONTEND_ONLY_TYPES: &[&str] =
    &["tool_execution", "tool_display", "tool_start", "heartbeat", "stream_end", "error"];

/// Filter a raw, loosely-typed conversation down to the messages a model
/// call may see, converting the one frontend/model dual-purpose shape
/// (`tool_result_for_model`) into a proper `tool_result` user message.
pub fn sanitize_for_model(raw_messages: &[Value]) -> Vec<Message> {
    let mut clean = Vec::new();
    for msg in raw_messages {
        let Some(obj) = msg.as_object() else {
            continue;
        };
        let msg_type = obj.get("type").and_then(|t| t.as_str());

        if let Some(t) = msg_type {
            if FRONTEND_ONLY_TYPES.contains(&t) {
                continue;
            }
            if t == "tool_result_for_model" {
                let tool_use_id = obj.get("tool_use_id").and_then(|v| v.as_str()).unwrap_or_default();
                let content = obj.get("content").and_then(|v| v.as_str()).unwrap_or_default();
                clean.push(Message {
                    role: Role::User,
                    content: vec![ContentBlock::ToolResult {
                        tool_use_id: tool_use_id.to_string(),
                        content: content.to_string(),
                        is_error: None,
                    }],
                    cache_control: None,
                });
                continue;
            }
        }

        let Some(role) = obj.get("role").and_then(|r| r.as_str()) else {
            continue;
        };
        let text = obj.get("content").and_then(|c| c.as_str()).unwrap_or_default();
        let message = match role {
            "system" => Message::system(text.to_string()),
            "assistant" => Message::assistant(text.to_string()),
            "user" => Message::user(text.to_string()),
            _ => continue,
        };
        clean.push(message);
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_frontend_only_event_types() {
        let raw = vec![
            json!({"type": "tool_start", "tool_name": "mcp_run_shell_command"}),
            json!({"type": "heartbeat", "timestamp_ms": 1}),
            json!({"role": "user", "content": "hello"}),
        ];
        let clean = sanitize_for_model(&raw);
        assert_eq!(clean.len(), 1);
        assert_eq!(clean[0].role, Role::User);
    }

    #[test]
    fn converts_tool_result_for_model_into_tool_result_message() {
        let raw = vec![json!({
            "type": "tool_result_for_model",
            "tool_use_id": "t1",
            "content": "/home/user",
        })];
        let clean = sanitize_for_model(&raw);
        assert_eq!(clean.len(), 1);
        assert_eq!(clean[0].role, Role::User);
        let ids: Vec<&str> = clean[0].tool_result_ids().collect();
        assert_eq!(ids, vec!["t1"]);
    }

    #[test]
    fn preserves_ordinary_conversation_messages() {
        let raw = vec![
            json!({"role": "user", "content": "hi"}),
            json!({"role": "assistant", "content": "hello there"}),
        ];
        let clean = sanitize_for_model(&raw);
        assert_eq!(clean.len(), 2);
        assert_eq!(clean[1].role, Role::Assistant);
    }
}
