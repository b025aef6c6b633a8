//! File state oracle: an external collaborator contract. This crate does
//! not implement file-change tracking itself; it is expressed here as a
//! trait so the context splitter can be tested against an in-memory
//! double without pulling in a real tracker.

/// Whether a file has changed since the conversation's context was last
/// submitted to the model.
pub trait FileStateOracle: Send + Sync {
    fn has_changed_since_last_submission(&self, conversation_id: &str, file_path: &str) -> bool;
    fn mark_submitted(&self, conversation_id: &str);

    /// File content annotated with change markers (e.g. per-line diff
    /// markers), one entry per line, for embedding into the codebase
    /// section. An oracle with nothing to annotate just returns the
    /// file's plain lines.
    fn annotated_content(&self, conversation_id: &str, file_path: &str) -> Vec<String>;

    /// Free-form "what changed overall" / "what changed recently" notes to
    /// prepend to the codebase section; empty when there is nothing to say.
    fn change_summary(&self, conversation_id: &str) -> ChangeSummary;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub overall: String,
    pub recent: String,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.overall.is_empty() && self.recent.is_empty()
    }
}

/// Test double: every file is "changed" until explicitly marked unchanged,
/// and `mark_submitted` clears the changed set for that conversation.
#[derive(Default)]
pub struct InMemoryFileStateOracle {
    changed: parking_lot::Mutex<std::collections::HashMap<String, std::collections::HashSet<String>>>,
    contents: parking_lot::Mutex<std::collections::HashMap<String, String>>,
}

impl InMemoryFileStateOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_changed(&self, conversation_id: &str, file_path: &str) {
        self.changed
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .insert(file_path.to_string());
    }

    pub fn set_content(&self, file_path: &str, content: impl Into<String>) {
        self.contents.lock().insert(file_path.to_string(), content.into());
    }
}

impl FileStateOracle for InMemoryFileStateOracle {
    fn has_changed_since_last_submission(&self, conversation_id: &str, file_path: &str) -> bool {
        self.changed
            .lock()
            .get(conversation_id)
            .map(|files| files.contains(file_path))
            .unwrap_or(false)
    }

    fn mark_submitted(&self, conversation_id: &str) {
        self.changed.lock().remove(conversation_id);
    }

    fn annotated_content(&self, _conversation_id: &str, file_path: &str) -> Vec<String> {
        self.contents
            .lock()
            .get(file_path)
            .map(|content| content.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn change_summary(&self, _conversation_id: &str) -> ChangeSummary {
        ChangeSummary::default()
    }
}

/// Minimal default oracle for the CLI: reads each file fresh off disk
/// relative to a root directory and never tracks change state, so every
/// file is always resubmitted in full. Real change tracking is an
/// external collaborator the CLI does not implement.
pub struct DiskFileStateOracle {
    root: std::path::PathBuf,
}

impl DiskFileStateOracle {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileStateOracle for DiskFileStateOracle {
    fn has_changed_since_last_submission(&self, _conversation_id: &str, _file_path: &str) -> bool {
        true
    }

    fn mark_submitted(&self, _conversation_id: &str) {}

    fn annotated_content(&self, _conversation_id: &str, file_path: &str) -> Vec<String> {
        std::fs::read_to_string(self.root.join(file_path))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn change_summary(&self, _conversation_id: &str) -> ChangeSummary {
        ChangeSummary::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmarked_files_report_unchanged() {
        let oracle = InMemoryFileStateOracle::new();
        assert!(!oracle.has_changed_since_last_submission("c1", "a.rs"));
    }

    #[test]
    fn marked_files_report_changed_until_submission() {
        let oracle = InMemoryFileStateOracle::new();
        oracle.mark_changed("c1", "a.rs");
        assert!(oracle.has_changed_since_last_submission("c1", "a.rs"));
        oracle.mark_submitted("c1");
        assert!(!oracle.has_changed_since_last_submission("c1", "a.rs"));
    }
}
