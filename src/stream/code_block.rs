//! Code-block tracker: a line-by-line scan maintaining a stack of open
//! fenced blocks, tagged by the word following the opening fence.

/// One open fence on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenBlock {
    pub block_type: String,
}

/// Tracks fenced code blocks across an assistant turn's emitted text.
#[derive(Debug, Default)]
pub struct CodeBlockTracker {
    stack: Vec<OpenBlock>,
}

impl CodeBlockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        !self.stack.is_empty()
    }

    /// The tag of the innermost open block, if any (e.g. `mermaid`, `rust`).
    pub fn current_block_type(&self) -> Option<&str> {
        self.stack.last().map(|b| b.block_type.as_str())
    }

    /// Feed a chunk of newly emitted text through the tracker, line by line.
    pub fn feed(&mut self, text: &str) {
        for line in text.split('\n') {
            let stripped = line.trim();
            if stripped.starts_with("```") {
                if self.stack.is_empty() {
                    let tag = stripped[3..].trim();
                    let block_type = if tag.is_empty() { "code".to_string() } else { tag.to_string() };
                    self.stack.push(OpenBlock { block_type });
                } else {
                    // Any closing fence closes the innermost block; the
                    // original never requires the tag to match on close.
                    self.stack.pop();
                }
            }
        }
    }
}
