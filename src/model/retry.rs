//! Retry/backoff wrapper. Wraps a `ModelDriver::stream` call, classifies
//! the first error the stream yields, and decides whether to resubmit.
//!
//! Backoff jitter uses `rand::Rng::gen_range`; cancellation races a sleep
//! against a cancellation signal via `tokio::select!` rather than aborting
//! the task outright, so an in-flight HTTP request gets a chance to drop
//! cleanly.

use crate::error::{ErrorKind, ZiyaError};
use crate::model::descriptor::{ModelDescriptor, ParamKind, ParamValue};
use crate::model::provider::{ChunkStream, Message, ToolDescriptor};
use crate::model::ModelDriver;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry policy constants.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_retries: u32,
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_retries: 4,
            jitter_max_ms: 250,
        }
    }
}

/// Cooperative cancellation flag shared with the caller. A plain
/// `AtomicBool` is enough here; the chat loop's own shutdown command already
/// flows through an mpsc channel, so this just needs to be checked between
/// sleeps, not awaited on directly.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Issue one `stream` call through a backend driver with retry-on-throttle.
///
/// Only the classification of the *first* error observed on a stream drives
/// the decision: a stream that starts emitting `TextDelta`s and only later
/// errors is not eligible for a clean resubmit, since partial content has
/// already reached the caller. The loop engine is responsible for that
/// case; this wrapper only governs full-stream-open failures.
pub async fn stream_with_retry(
    driver: &dyn ModelDriver,
    messages: &[Message],
    tools: &[ToolDescriptor],
    params: &HashMap<ParamKind, ParamValue>,
    policy: RetryPolicy,
    cancel: &CancelFlag,
) -> Result<ChunkStream, ZiyaError> {
    let mut attempt: u32 = 0;
    let mut extended_context_tried = false;
    loop {
        match driver.stream(messages, tools, params, extended_context_tried).await {
            Ok(stream) => return Ok(stream),
            // One-shot extended-context resubmit: only taken once, before any
            // throttle-retry accounting, and only surfaced as context_size_error
            // if the resubmit itself fails.
            Err(err) if !extended_context_tried && extended_context_eligible(&err, driver.descriptor()) => {
                extended_context_tried = true;
            }
            Err(err) if should_retry(&err, attempt, policy.max_retries) => {
                let extra_delay = err.retry_after().map(Duration::from_secs).unwrap_or_default();
                let backoff = policy.base * 2u32.pow(attempt) + extra_delay;
                let jitter = jitter_delay(policy.jitter_max_ms);
                sleep_cancellable(backoff + jitter, cancel).await?;
                attempt += 1;
            }
            Err(err) if err.kind() == ErrorKind::Throttling => {
                return Err(ZiyaError::ThrottlingExhausted { attempts: attempt });
            }
            Err(err) => return Err(err),
        }
    }
}

fn should_retry(err: &ZiyaError, attempt: u32, max_retries: u32) -> bool {
    err.kind().retryable() && attempt < max_retries
}

fn jitter_delay(max_ms: u64) -> Duration {
    let millis = rand::thread_rng().gen_range(0..max_ms.max(1));
    Duration::from_millis(millis)
}

async fn sleep_cancellable(delay: Duration, cancel: &CancelFlag) -> Result<(), ZiyaError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = poll_cancelled(cancel) => Err(ZiyaError::Cancelled),
    }
}

async fn poll_cancelled(cancel: &CancelFlag) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Extended-context one-shot retry: on a context-size error from a
/// descriptor that advertises extended context, resubmit exactly once
/// with the extended-context header set. Independent of the prompt-cache
/// decision — caching is a message-shape concern, this is a
/// transport-header concern.
pub fn extended_context_eligible(err: &ZiyaError, descriptor: &ModelDescriptor) -> bool {
    err.kind() == ErrorKind::ContextSize && descriptor.extended_context_header.is_some()
}
