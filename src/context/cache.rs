//! Context cache and splitter: locate the codebase section, parse it into
//! per-file chunks on the `File: <path>` delimiter (excluding
//! `<!-- TEMPLATE EXAMPLE START/END -->` spans), and partition by the file
//! state oracle's per-file change bit. See DESIGN.md for the rationale
//! behind the stable-content character threshold below.

use super::oracle::FileStateOracle;

const CODEBASE_PREAMBLE: &str = "Below is the current codebase of the user:";
const TEMPLATE_EXAMPLE_START: &str = "<!-- TEMPLATE EXAMPLE START -->";
const TEMPLATE_EXAMPLE_END: &str = "<!-- TEMPLATE EXAMPLE END -->";
const STABLE_CONTENT_THRESHOLD: usize = 5000;

/// Result of splitting a system prompt's codebase section by file-change
/// status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSplit {
    pub stable_content: String,
    pub stable_files: Vec<String>,
    pub dynamic_content: String,
    pub dynamic_files: Vec<String>,
}

impl ContextSplit {
    fn dynamic_only(full_prompt: &str, file_paths: &[String]) -> Self {
        ContextSplit {
            stable_content: String::new(),
            stable_files: Vec::new(),
            dynamic_content: full_prompt.to_string(),
            dynamic_files: file_paths.to_vec(),
        }
    }
}

/// Split `full_prompt`'s codebase section into stable/dynamic parts.
///
/// Returns `None` when the stable portion falls below the caching
/// threshold; the caller then falls back to non-split caching (or none).
pub fn split_context(
    oracle: &dyn FileStateOracle,
    conversation_id: &str,
    full_prompt: &str,
    file_paths: &[String],
) -> Option<ContextSplit> {
    let Some(codebase_start) = full_prompt.find(CODEBASE_PREAMBLE) else {
        return None;
    };
    let codebase_section = &full_prompt[codebase_start..];

    let file_sections = parse_context_by_files(codebase_section);

    let mut stable_files = Vec::new();
    let mut dynamic_files = Vec::new();
    let mut stable_parts = Vec::new();
    let mut dynamic_parts = Vec::new();

    // preserve original file-selection order, not the map's iteration order
    for path in file_paths {
        let Some(content) = file_sections.get(path) else { continue };
        if oracle.has_changed_since_last_submission(conversation_id, path) {
            dynamic_files.push(path.clone());
            dynamic_parts.push(content.as_str());
        } else {
            stable_files.push(path.clone());
            stable_parts.push(content.as_str());
        }
    }

    let stable_content = stable_parts.join("\n");
    if stable_content.len() < STABLE_CONTENT_THRESHOLD {
        return None;
    }

    Some(ContextSplit {
        stable_content,
        stable_files,
        dynamic_content: dynamic_parts.join("\n"),
        dynamic_files,
    })
}

/// Used by the caller when `split_context` returns `None`: the whole prompt
/// is dynamic, nothing is cached.
pub fn unsplit(full_prompt: &str, file_paths: &[String]) -> ContextSplit {
    ContextSplit::dynamic_only(full_prompt, file_paths)
}

fn parse_context_by_files(context: &str) -> std::collections::HashMap<String, String> {
    let mut sections = std::collections::HashMap::new();
    let mut current_file: Option<String> = None;
    let mut current_lines: Vec<&str> = Vec::new();
    let mut in_template_example = false;

    for line in context.lines() {
        if line.contains(TEMPLATE_EXAMPLE_START) {
            in_template_example = true;
            continue;
        }
        if line.contains(TEMPLATE_EXAMPLE_END) {
            in_template_example = false;
            continue;
        }
        if in_template_example {
            continue;
        }

        if let Some(path) = line.strip_prefix("File: ") {
            if let Some(file) = current_file.take() {
                if !current_lines.is_empty() {
                    sections.insert(file, current_lines.join("\n"));
                }
            }
            current_file = Some(path.to_string());
            current_lines = vec![line];
        } else if current_file.is_some() {
            current_lines.push(line);
        }
    }
    if let Some(file) = current_file {
        if !current_lines.is_empty() {
            sections.insert(file, current_lines.join("\n"));
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::oracle::InMemoryFileStateOracle;

    fn prompt_with(files: &[(&str, &str)]) -> String {
        let mut body = String::from("SYSTEM: instructions\n\n");
        body.push_str(CODEBASE_PREAMBLE);
        body.push('\n');
        for (path, content) in files {
            body.push_str(&format!("File: {path}\n{content}\n"));
        }
        body
    }

    #[test]
    fn absent_preamble_returns_none_and_caller_falls_back_to_dynamic() {
        let oracle = InMemoryFileStateOracle::new();
        let prompt = "no codebase section here".to_string();
        assert!(split_context(&oracle, "c1", &prompt, &[]).is_none());
        let fallback = unsplit(&prompt, &["a.rs".to_string()]);
        assert_eq!(fallback.dynamic_content, prompt);
        assert_eq!(fallback.dynamic_files, vec!["a.rs".to_string()]);
    }

    #[test]
    fn unchanged_files_are_stable_changed_files_are_dynamic() {
        let oracle = InMemoryFileStateOracle::new();
        oracle.mark_changed("c1", "b.rs");
        let big_content = "x".repeat(6000);
        let prompt = prompt_with(&[("a.rs", &big_content), ("b.rs", "fn changed() {}")]);
        let paths = vec!["a.rs".to_string(), "b.rs".to_string()];

        let split = split_context(&oracle, "c1", &prompt, &paths).expect("above threshold");
        assert_eq!(split.stable_files, vec!["a.rs".to_string()]);
        assert_eq!(split.dynamic_files, vec!["b.rs".to_string()]);
        assert!(split.stable_content.contains("File: a.rs"));
        assert!(split.dynamic_content.contains("File: b.rs"));
    }

    #[test]
    fn below_threshold_returns_none() {
        let oracle = InMemoryFileStateOracle::new();
        let prompt = prompt_with(&[("a.rs", "short")]);
        let paths = vec!["a.rs".to_string()];
        assert!(split_context(&oracle, "c1", &prompt, &paths).is_none());
    }

    #[test]
    fn template_example_lines_are_excluded() {
        let oracle = InMemoryFileStateOracle::new();
        let big_content = "x".repeat(6000);
        let mut prompt = prompt_with(&[("a.rs", &big_content)]);
        prompt.push_str(&format!(
            "{TEMPLATE_EXAMPLE_START}\nFile: excluded.rs\nshould not appear\n{TEMPLATE_EXAMPLE_END}\n"
        ));
        let paths = vec!["a.rs".to_string(), "excluded.rs".to_string()];
        let split = split_context(&oracle, "c1", &prompt, &paths).expect("above threshold");
        assert!(!split.stable_files.contains(&"excluded.rs".to_string()));
        assert!(!split.dynamic_files.contains(&"excluded.rs".to_string()));
    }
}
