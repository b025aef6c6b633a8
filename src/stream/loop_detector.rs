//! Supplementary tool-call loop detector: layered underneath
//! `loop_engine`'s own exact `executed_signatures` de-dup to also catch
//! oscillating patterns (A, B, A, B, ...) that never repeat the same
//! `(name, id)` pair but still make no forward progress.

use std::collections::VecDeque;

/// One tool call as the detector sees it: name plus parsed arguments, no
/// call id (two calls with different ids but identical name+arguments are
/// still the same call for loop-detection purposes).
#[derive(Debug, Clone)]
pub struct DetectedCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Action to take when a loop is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Warn,
    Terminate,
}

#[derive(Debug, Clone)]
pub struct LoopDetectorConfig {
    pub max_exact_duplicates: usize,
    pub exact_window_size: usize,
    pub enable_pattern_detection: bool,
    pub min_pattern_length: usize,
    pub max_pattern_length: usize,
    pub pattern_window_size: usize,
    pub first_detection_action: LoopAction,
    pub second_detection_action: LoopAction,
    pub third_detection_action: LoopAction,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            max_exact_duplicates: 3,
            exact_window_size: 10,
            enable_pattern_detection: true,
            min_pattern_length: 2,
            max_pattern_length: 3,
            pattern_window_size: 20,
            first_detection_action: LoopAction::Warn,
            second_detection_action: LoopAction::Warn,
            third_detection_action: LoopAction::Terminate,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopType {
    ExactDuplicate { call: DetectedCall, count: usize },
    Pattern { pattern: Vec<DetectedCall>, repetitions: usize },
}

impl PartialEq for DetectedCall {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.arguments == other.arguments
    }
}

#[derive(Debug, Clone)]
pub struct LoopDetection {
    pub loop_type: LoopType,
    pub suggestion: String,
    pub action: LoopAction,
    pub detection_count: usize,
    pub warning_message: Option<String>,
}

struct CallRecord {
    call: DetectedCall,
}

/// Tracks a conversation's recent tool calls and flags exact-duplicate or
/// oscillating-pattern sequences.
pub struct LoopDetector {
    config: LoopDetectorConfig,
    recent_calls: VecDeque<CallRecord>,
    detection_count: usize,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::with_config(LoopDetectorConfig::default())
    }

    pub fn with_config(config: LoopDetectorConfig) -> Self {
        let capacity = config.exact_window_size.max(config.pattern_window_size);
        Self {
            config,
            recent_calls: VecDeque::with_capacity(capacity),
            detection_count: 0,
        }
    }

    /// Check a tool call against recent history before it executes.
    pub fn check(&mut self, call: &DetectedCall) -> Option<LoopDetection> {
        if let Some(mut detection) = self.check_exact_duplicate(call) {
            self.detection_count += 1;
            self.apply_action_policy(&mut detection);
            self.record_call(call);
            return Some(detection);
        }

        if self.config.enable_pattern_detection {
            if let Some(mut detection) = self.check_pattern(call) {
                self.detection_count += 1;
                self.apply_action_policy(&mut detection);
                self.record_call(call);
                return Some(detection);
            }
        }

        self.record_call(call);
        None
    }

    fn apply_action_policy(&self, detection: &mut LoopDetection) {
        detection.detection_count = self.detection_count;
        let action = match self.detection_count {
            1 => self.config.first_detection_action,
            2 => self.config.second_detection_action,
            _ => self.config.third_detection_action,
        };
        detection.action = action;
        if action == LoopAction::Warn {
            detection.warning_message = Some(self.generate_warning_message(detection));
        }
    }

    fn generate_warning_message(&self, detection: &LoopDetection) -> String {
        let ordinal = match self.detection_count {
            1 => "first",
            2 => "second",
            n => return format!("Loop detected {n} times."),
        };
        let description = match &detection.loop_type {
            LoopType::ExactDuplicate { call, count } => {
                format!("the tool '{}' has been called with identical arguments {count} times in a row", call.name)
            }
            LoopType::Pattern { pattern, repetitions } => {
                let names: Vec<&str> = pattern.iter().map(|c| c.name.as_str()).collect();
                format!("a {}-call pattern [{}] has repeated {repetitions} times", pattern.len(), names.join(" -> "))
            }
        };
        format!(
            "This is the {ordinal} time unproductive tool-call repetition has been detected: {description}. \
            Try a different approach, ask for clarification, or answer directly instead of repeating the same calls."
        )
    }

    fn check_exact_duplicate(&self, call: &DetectedCall) -> Option<LoopDetection> {
        let count = self
            .recent_calls
            .iter()
            .rev()
            .take(self.config.exact_window_size)
            .filter(|r| &r.call == call)
            .count();

        if count >= self.config.max_exact_duplicates {
            Some(LoopDetection {
                loop_type: LoopType::ExactDuplicate { call: call.clone(), count: count + 1 },
                suggestion: format!(
                    "the tool '{}' has been called {} times with identical arguments",
                    call.name,
                    count + 1
                ),
                action: LoopAction::Warn,
                detection_count: 0,
                warning_message: None,
            })
        } else {
            None
        }
    }

    fn check_pattern(&self, call: &DetectedCall) -> Option<LoopDetection> {
        let min_required = self.config.min_pattern_length * 2;
        if self.recent_calls.len() < min_required {
            return None;
        }
        for pattern_len in self.config.min_pattern_length..=self.config.max_pattern_length {
            if let Some(detection) = self.check_pattern_of_length(call, pattern_len) {
                return Some(detection);
            }
        }
        None
    }

    fn check_pattern_of_length(&self, call: &DetectedCall, pattern_len: usize) -> Option<LoopDetection> {
        if self.recent_calls.len() < pattern_len * 2 {
            return None;
        }
        let recent: Vec<_> = self.recent_calls.iter().rev().take(pattern_len).collect();
        let prev_pattern: Vec<_> = self.recent_calls.iter().rev().skip(pattern_len).take(pattern_len).collect();

        let matches = recent.iter().zip(prev_pattern.iter()).all(|(a, b)| a.call == b.call);
        if !matches {
            return None;
        }
        if call != &recent[recent.len() - 1].call {
            return None;
        }

        let pattern: Vec<DetectedCall> = recent.iter().rev().map(|r| r.call.clone()).collect();
        Some(LoopDetection {
            loop_type: LoopType::Pattern { pattern, repetitions: 2 },
            suggestion: format!("a repeating pattern of {pattern_len} tool calls has repeated at least twice"),
            action: LoopAction::Warn,
            detection_count: 0,
            warning_message: None,
        })
    }

    fn record_call(&mut self, call: &DetectedCall) {
        let max_size = self.config.exact_window_size.max(self.config.pattern_window_size);
        if self.recent_calls.len() >= max_size {
            self.recent_calls.pop_front();
        }
        self.recent_calls.push_back(CallRecord { call: call.clone() });
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: serde_json::Value) -> DetectedCall {
        DetectedCall { name: name.to_string(), arguments: args }
    }

    #[test]
    fn exact_duplicate_flags_on_the_fourth_identical_call() {
        let mut detector = LoopDetector::new();
        let c = call("run_shell_command", json!({"command": "ls"}));
        assert!(detector.check(&c).is_none());
        assert!(detector.check(&c).is_none());
        assert!(detector.check(&c).is_none());
        let detection = detector.check(&c).expect("fourth identical call should be flagged");
        match detection.loop_type {
            LoopType::ExactDuplicate { count, .. } => assert_eq!(count, 4),
            _ => panic!("expected ExactDuplicate"),
        }
    }

    #[test]
    fn distinct_arguments_never_flag() {
        let mut detector = LoopDetector::new();
        let ls = call("run_shell_command", json!({"command": "ls"}));
        let pwd = call("run_shell_command", json!({"command": "pwd"}));
        let echo = call("run_shell_command", json!({"command": "echo hi"}));
        assert!(detector.check(&ls).is_none());
        assert!(detector.check(&pwd).is_none());
        assert!(detector.check(&echo).is_none());
        assert!(detector.check(&ls).is_none());
    }

    #[test]
    fn oscillating_ab_pattern_is_flagged_on_the_fifth_call() {
        let mut detector = LoopDetector::new();
        let a = call("read_file", json!({"path": "a.rs"}));
        let b = call("read_file", json!({"path": "b.rs"}));
        assert!(detector.check(&a).is_none());
        assert!(detector.check(&b).is_none());
        assert!(detector.check(&a).is_none());
        assert!(detector.check(&b).is_none());
        let detection = detector.check(&a).expect("A,B,A,B,A should flag an oscillating pattern");
        match detection.loop_type {
            LoopType::Pattern { pattern, repetitions } => {
                assert_eq!(pattern.len(), 2);
                assert_eq!(repetitions, 2);
            }
            _ => panic!("expected Pattern"),
        }
    }

    #[test]
    fn detection_count_escalates_to_terminate_on_the_third_flag() {
        let config = LoopDetectorConfig { max_exact_duplicates: 1, ..LoopDetectorConfig::default() };
        let mut detector = LoopDetector::with_config(config);
        let c = call("noop", json!({}));
        assert!(detector.check(&c).is_none());
        let first = detector.check(&c).expect("second call already exceeds max_exact_duplicates=1");
        assert_eq!(first.action, LoopAction::Warn);
        let second = detector.check(&c).expect("still flagged");
        assert_eq!(second.action, LoopAction::Warn);
        let third = detector.check(&c).expect("still flagged");
        assert_eq!(third.action, LoopAction::Terminate);
    }
}
