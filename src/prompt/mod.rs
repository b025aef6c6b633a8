//! Prompt assembler: builds the ordered message list for one turn.
//!
//! History normalization drops a turn whose human or assistant side is
//! empty after trimming, whichever shape it arrives in. The
//! codebase-section/system-message assembly hands off to
//! `context::cache::split_context` for the stable/dynamic split.

use crate::context::cache::{self, ContextSplit};
use crate::context::oracle::FileStateOracle;
use crate::context::prompt_cache::{CacheEntry, CacheKey, PromptCache};
use crate::model::provider::{CacheControl, Message, Role};

/// One exchange in the prior chat history, in either input shape the caller
/// might hand us.
#[derive(Debug, Clone)]
pub enum HistoryTurn {
    Pair { human: String, ai: String },
    Record { role: Role, content: String },
}

/// Inputs to prompt assembly.
pub struct PromptInput<'a> {
    pub conversation_id: &'a str,
    pub system_template: &'a str,
    pub history: &'a [HistoryTurn],
    pub file_paths: &'a [String],
    pub auxiliary_notes: &'a str,
    pub user_question: &'a str,
}

/// Step 1: drop history turns where either side is empty after trim.
fn normalize_history(history: &[HistoryTurn]) -> Vec<Message> {
    let mut out = Vec::new();
    for turn in history {
        match turn {
            HistoryTurn::Pair { human, ai } => {
                if human.trim().is_empty() || ai.trim().is_empty() {
                    continue;
                }
                out.push(Message::user(human.trim().to_string()));
                out.push(Message::assistant(ai.trim().to_string()));
            }
            HistoryTurn::Record { role, content } => {
                if content.trim().is_empty() {
                    continue;
                }
                out.push(match role {
                    Role::User => Message::user(content.trim().to_string()),
                    Role::Assistant => Message::assistant(content.trim().to_string()),
                    Role::System => continue,
                });
            }
        }
    }
    out
}

/// Step 2: build the codebase section from the oracle's annotated content
/// per file, with an overall/recent-changes preface when the oracle has
/// anything to say.
fn build_codebase_section(oracle: &dyn FileStateOracle, conversation_id: &str, file_paths: &[String]) -> String {
    let summary = oracle.change_summary(conversation_id);
    let mut section = String::new();
    if !summary.is_empty() {
        if !summary.overall.is_empty() {
            section.push_str(&format!("Overall changes:\n{}\n\n", summary.overall));
        }
        if !summary.recent.is_empty() {
            section.push_str(&format!("Recent changes:\n{}\n\n", summary.recent));
        }
    }
    section.push_str("Below is the current codebase of the user:\n");
    for path in file_paths {
        let body = oracle.annotated_content(conversation_id, path).join("\n");
        section.push_str(&format!("File: {path}\n{body}\n"));
    }
    section
}

/// Record (or refresh) a cache entry for this turn's stable content.
fn reconcile_prompt_cache(cache: &PromptCache, conversation_id: &str, split: &ContextSplit) {
    let now = chrono::Utc::now();
    if split.stable_content.is_empty() {
        return;
    }
    let content_hash = PromptCache::content_hash(&split.stable_content, &split.stable_files);
    let key = CacheKey {
        conversation_id: conversation_id.to_string(),
        content_hash: content_hash.clone(),
    };
    if cache.get(&key, now).is_some() {
        return;
    }
    cache.insert(
        key,
        CacheEntry {
            structure_hash: content_hash.clone(),
            file_content_hash: content_hash,
            conversation_id: conversation_id.to_string(),
            file_paths: split.stable_files.clone(),
            created_at: now,
            ttl: chrono::Duration::zero(),
            token_count: (split.stable_content.len() / 4) as u32,
            ast_context_hash: None,
        },
        now,
    );
}

/// Assemble the full ordered message list for one turn.
pub fn assemble(
    oracle: &dyn FileStateOracle,
    cache: &PromptCache,
    input: &PromptInput,
    supports_caching: bool,
) -> Vec<Message> {
    let codebase_section = build_codebase_section(oracle, input.conversation_id, input.file_paths);
    let full_system_prompt = format!(
        "{}\n\n{}\n\n{}",
        input.system_template, codebase_section, input.auxiliary_notes
    );

    // A file the oracle now reports changed invalidates any stable-content
    // cache entry that was built from its last-known (unchanged) state,
    // regardless of whether this turn's split still clears the caching
    // threshold.
    let changed_files: Vec<String> = input
        .file_paths
        .iter()
        .filter(|path| oracle.has_changed_since_last_submission(input.conversation_id, path))
        .cloned()
        .collect();
    if !changed_files.is_empty() {
        cache.invalidate_files(&changed_files);
    }

    let split = if supports_caching {
        cache::split_context(oracle, input.conversation_id, &full_system_prompt, input.file_paths)
    } else {
        None
    };

    let mut messages = Vec::new();
    match split {
        Some(split) => {
            reconcile_prompt_cache(cache, input.conversation_id, &split);
            messages.push(Message::system(split.stable_content).with_cache_control(CacheControl::Ephemeral));
            if !split.dynamic_content.trim().is_empty() {
                messages.push(Message::system(split.dynamic_content));
            }
        }
        None => {
            messages.push(Message::system(full_system_prompt));
        }
    }

    messages.extend(normalize_history(input.history));
    messages.push(Message::user(input.user_question.to_string()));
    messages
}
