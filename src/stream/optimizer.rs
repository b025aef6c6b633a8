//! Content optimizer: buffer incoming text and only release it at a word
//! boundary, so the client never sees a chunk split mid-word. While a
//! fenced block is open the buffer is held back entirely (this is what
//! makes a visualization block tagged `mermaid`/`vega-lite`/`graphviz`/`d3`
//! come out atomically — the fence parity check doesn't care which tag it
//! is) except for a safety valve if the buffer grows unreasonably large.

const MIN_CHUNK_SIZE: usize = 15;
const MAX_BUFFER_SIZE: usize = 500;
const CODE_BLOCK_SAFETY_VALVE: usize = 5000;

#[derive(Debug, Default)]
pub struct ContentOptimizer {
    buffer: String,
    in_code_block: bool,
}

impl ContentOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add newly arrived text; returns whatever is now safe to emit.
    pub fn add_content(&mut self, content: &str) -> Option<String> {
        self.buffer.push_str(content);
        self.update_code_block_state();

        if self.in_code_block {
            if self.buffer.len() > CODE_BLOCK_SAFETY_VALVE {
                return self.flush_complete_words();
            }
            return None;
        }

        if self.buffer.len() > MAX_BUFFER_SIZE || self.buffer.len() >= MIN_CHUNK_SIZE {
            return self.flush_complete_words();
        }
        None
    }

    /// Drain everything left in the buffer, e.g. at `MessageStop`.
    pub fn flush_remaining(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }

    fn update_code_block_state(&mut self) {
        let marker_count = self.buffer.matches("```").count();
        self.in_code_block = marker_count % 2 == 1;
    }

    /// Split the buffer on whitespace runs, keeping the delimiters, and
    /// send everything but the last (possibly incomplete) part.
    fn flush_complete_words(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            return None;
        }

        let parts = split_keep_whitespace(&self.buffer);
        if parts.len() <= 2 {
            return None;
        }

        let (complete, tail) = parts.split_at(parts.len() - 1);
        let chunk: String = complete.concat();
        if chunk.trim().is_empty() {
            return None;
        }
        self.buffer = tail.concat();
        Some(chunk)
    }
}

/// Split `text` on runs of whitespace, keeping the whitespace runs as their
/// own elements (mirrors Python's `re.split(r'(\s+)', text)`).
fn split_keep_whitespace(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_ws: Option<bool> = None;

    for ch in text.chars() {
        let ws = ch.is_whitespace();
        if in_ws == Some(ws) {
            current.push(ch);
        } else {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            current.push(ch);
            in_ws = Some(ws);
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_below_threshold_are_held() {
        let mut opt = ContentOptimizer::new();
        assert_eq!(opt.add_content("hi"), None);
    }

    #[test]
    fn complete_words_flush_once_threshold_reached() {
        let mut opt = ContentOptimizer::new();
        let out = opt.add_content("the quick brown fox jumped");
        assert!(out.is_some());
        assert!(!out.unwrap().ends_with("jumped"));
    }

    #[test]
    fn open_code_block_withholds_everything_until_safety_valve() {
        let mut opt = ContentOptimizer::new();
        assert_eq!(opt.add_content("```mermaid\ngraph TD;\n  A-->B;\n"), None);
        assert!(opt.in_code_block);
    }

    #[test]
    fn closing_fence_releases_the_whole_block() {
        let mut opt = ContentOptimizer::new();
        opt.add_content("```mermaid\ngraph TD;\n");
        let out = opt.add_content("A-->B;\n```\nafter");
        assert!(out.is_some() || opt.flush_remaining().is_some());
    }

    #[test]
    fn flush_remaining_drains_the_buffer() {
        let mut opt = ContentOptimizer::new();
        opt.add_content("partial");
        let remaining = opt.flush_remaining();
        assert_eq!(remaining.as_deref(), Some("partial"));
        assert_eq!(opt.flush_remaining(), None);
    }
}
