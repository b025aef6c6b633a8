//! Error classifier — parses raw provider error strings into the closed
//! taxonomy. Kept narrow and table-driven: this is the one place string
//! matching on error text happens.

use crate::error::{ErrorKind, ZiyaError};

/// Classify a raw backend error message into `(kind, detail, retry_after)`.
pub fn classify(raw: &str) -> ZiyaError {
    let (kind, detail, retry_after): (ErrorKind, String, Option<u64>) =
        if raw.contains("ThrottlingException") || raw.contains("Too many requests") {
            if raw.contains("reached max retries") {
                (
                    ErrorKind::Throttling,
                    "Rate limit exceeded. All automatic retries have been exhausted. \
                     You can try again now, or wait 1-2 minutes for better success rate."
                        .to_string(),
                    Some(60),
                )
            } else {
                (
                    ErrorKind::Throttling,
                    "Too many requests to the model backend. The system will automatically retry."
                        .to_string(),
                    Some(5),
                )
            }
        } else if raw.contains("validationException") && raw.contains("Input is too long") {
            (
                ErrorKind::ContextSize,
                "Selected content is too large for the model. Please reduce the number of files."
                    .to_string(),
                None,
            )
        } else if (raw.contains("ExpiredToken")
            || raw.contains("InvalidIdentityToken")
            || raw.contains("InvalidClientTokenId"))
            && (raw.contains("botocore") || raw.contains("AWS") || raw.contains("credentials"))
        {
            (
                ErrorKind::Auth,
                "Credentials have expired. Please refresh your credentials.".to_string(),
                None,
            )
        } else if raw.contains("CredentialRetrievalError") || raw.contains("You may need to authenticate")
        {
            (
                ErrorKind::Auth,
                "Could not retrieve credentials. Please re-authenticate.".to_string(),
                None,
            )
        } else if raw.contains("Resource has been exhausted") && raw.contains("check quota") {
            (
                ErrorKind::QuotaExceeded,
                "API quota has been exceeded. Please try again in a few minutes.".to_string(),
                Some(60),
            )
        } else if raw.contains("model_id") && raw.contains("not found") {
            (
                ErrorKind::ModelNotFound,
                "The selected model is not available. Please try a different model.".to_string(),
                None,
            )
        } else if raw.contains("AccessDeniedException") {
            (
                ErrorKind::AccessDenied,
                "Access denied. Your credentials don't have sufficient permissions to use this model."
                    .to_string(),
                None,
            )
        } else {
            (ErrorKind::Server, raw.to_string(), None)
        };

    let mut err = ZiyaError::classified(kind, detail);
    if let Some(secs) = retry_after {
        err = err.with_retry_after(secs);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_throttling() {
        let err = classify("ThrottlingException: Too many requests to the model");
        assert_eq!(err.kind(), ErrorKind::Throttling);
        assert_eq!(err.retry_after(), Some(5));
    }

    #[test]
    fn classifies_throttling_exhausted_retries() {
        let err = classify("ThrottlingException: reached max retries (4)");
        assert_eq!(err.kind(), ErrorKind::Throttling);
        assert_eq!(err.retry_after(), Some(60));
    }

    #[test]
    fn classifies_context_size() {
        let err = classify("validationException: Input is too long for requested model");
        assert_eq!(err.kind(), ErrorKind::ContextSize);
    }

    #[test]
    fn classifies_auth() {
        let err = classify("botocore.exceptions: ExpiredToken AWS credentials expired");
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[test]
    fn classifies_quota() {
        let err = classify("Resource has been exhausted, check quota for project");
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(err.retry_after(), Some(60));
    }

    #[test]
    fn classifies_model_not_found() {
        let err = classify("model_id `foo` not found in catalog");
        assert_eq!(err.kind(), ErrorKind::ModelNotFound);
    }

    #[test]
    fn classifies_access_denied() {
        let err = classify("AccessDeniedException: user is not authorized");
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[test]
    fn falls_back_to_server_error() {
        let err = classify("some completely unrecognized backend failure");
        assert_eq!(err.kind(), ErrorKind::Server);
    }
}
