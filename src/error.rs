//! Crate-wide error type and the closed taxonomy from the SSE error envelope.

use thiserror::Error;

/// Stable taxonomy tag emitted in the SSE error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    AccessDenied,
    Throttling,
    QuotaExceeded,
    ContextSize,
    ModelNotFound,
    Server,
}

impl ErrorKind {
    /// Stable string tag used on the wire.
    pub fn tag(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Auth => "auth_error",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::Throttling => "throttling_error",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::ContextSize => "context_size_error",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::Server => "server_error",
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Auth => 401,
            ErrorKind::AccessDenied => 403,
            ErrorKind::Throttling => 429,
            ErrorKind::QuotaExceeded => 429,
            ErrorKind::ContextSize => 413,
            ErrorKind::ModelNotFound => 404,
            ErrorKind::Server => 500,
        }
    }

    /// Whether the retry wrapper should ever attempt a retry for this kind.
    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::Throttling)
    }
}

#[derive(Debug, Error)]
pub enum ZiyaError {
    #[error("{kind:?}: {detail}")]
    Classified {
        kind: ErrorKind,
        detail: String,
        retry_after: Option<u64>,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("throttling retries exhausted after {attempts} attempts")]
    ThrottlingExhausted { attempts: u32 },

    #[error("chat loop channel closed unexpectedly")]
    LoopClosed,

    #[error("stream cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl ZiyaError {
    pub fn classified(kind: ErrorKind, detail: impl Into<String>) -> Self {
        ZiyaError::Classified {
            kind,
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        if let ZiyaError::Classified { retry_after, .. } = &mut self {
            *retry_after = Some(seconds);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ZiyaError::Classified { kind, .. } => *kind,
            ZiyaError::ThrottlingExhausted { .. } => ErrorKind::Throttling,
            _ => ErrorKind::Server,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            ZiyaError::Classified { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ZiyaError::Classified { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
