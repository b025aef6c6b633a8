//! Fake tool-call filter, applied to each text delta before it is buffered.
//!
//! Some backends, when they lack native tool-calling, occasionally emit a
//! textual imitation of one instead of a real `tool_use` block — a fenced
//! ```` ```tool:... ``` ```` block, or a bare `run_shell_command\n$ ...`
//! line. These must never be forwarded to the client or treated as a real
//! call; they are a known model mis-behavior, not a legitimate tool
//! sentinel (see GLOSSARY: a real sentinel is a marker a *text-only*
//! backend is deliberately configured to use, fenced as
//! `<TOOL_SENTINEL>...</TOOL_SENTINEL>`, which this filter leaves alone).

use regex::Regex;
use std::sync::OnceLock;

fn fenced_pseudo_tool_call() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```tool:[^\n]*\n.*?```").unwrap())
}

fn bare_pseudo_tool_call() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^run_shell_command\n\$.*$").unwrap())
}

/// True when `text` contains a sequence that looks like a Markdown
/// pseudo-tool-call rather than genuine prose.
pub fn contains_fake_tool_call(text: &str) -> bool {
    fenced_pseudo_tool_call().is_match(text) || bare_pseudo_tool_call().is_match(text)
}

/// Strip any fake tool-call sequences out of `text`, leaving the
/// surrounding prose intact.
pub fn strip_fake_tool_calls(text: &str) -> String {
    let without_fenced = fenced_pseudo_tool_call().replace_all(text, "");
    bare_pseudo_tool_call().replace_all(&without_fenced, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_fenced_pseudo_tool_call() {
        let text = "before\n```tool:run_shell_command\n{\"command\": \"ls\"}\n```\nafter";
        assert!(contains_fake_tool_call(text));
        let stripped = strip_fake_tool_calls(text);
        assert!(!stripped.contains("tool:run_shell_command"));
        assert!(stripped.contains("before"));
        assert!(stripped.contains("after"));
    }

    #[test]
    fn detects_bare_pseudo_tool_call() {
        let text = "run_shell_command\n$ rm -rf /";
        assert!(contains_fake_tool_call(text));
    }

    #[test]
    fn ordinary_prose_is_not_flagged() {
        let text = "Here's how you'd run `ls` from a shell.";
        assert!(!contains_fake_tool_call(text));
    }

    #[test]
    fn real_tool_sentinel_markers_are_left_alone() {
        let text = "<TOOL_SENTINEL>{\"name\": \"mcp_read_file\"}</TOOL_SENTINEL>";
        assert!(!contains_fake_tool_call(text));
        assert_eq!(strip_fake_tool_calls(text), text);
    }
}
