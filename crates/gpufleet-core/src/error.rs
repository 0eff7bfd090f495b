//! The unified error domain for the fleet control plane.
//!
//! Unlike `tower-resilience-core`'s generic `ResilienceError<E>` (built to
//! wrap an arbitrary application error for a generic middleware stack), this
//! crate owns one concrete application: every engine returns `CoreError`
//! directly, so a single `thiserror` enum with one variant per error kind
//! is the right shape here.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("offer unavailable: {0}")]
    OfferUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("circuit '{strategy}' open until {reopen_at}")]
    CircuitOpen {
        strategy: String,
        reopen_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("ssh unreachable: {0}")]
    SshUnreachable(String),

    #[error("restore validation failed: expected {expected} files, found {found}")]
    RestoreValidationFailed { expected: u64, found: u64 },

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ServiceUnavailable(_) | CoreError::StorageFailure(_)
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::ValidationError(_))
    }

    /// HTTP status mapping for a marketplace `InstanceProvider` response.
    /// Implementations of `InstanceProvider` use this to turn a raw status +
    /// body into a `CoreError` without duplicating the mapping table in
    /// every adapter.
    pub fn from_provider_http(status: u16, body: &str) -> Self {
        let lower = body.to_ascii_lowercase();
        match status {
            400 if lower.contains("balance") || lower.contains("credit") => {
                CoreError::InsufficientFunds(body.to_string())
            }
            400 if lower.contains("not available") || lower.contains("rented") => {
                CoreError::OfferUnavailable(body.to_string())
            }
            401 | 403 => CoreError::AuthFailed(body.to_string()),
            404 => CoreError::NotFound(body.to_string()),
            429 => CoreError::RateLimited {
                retry_after: Duration::from_secs(1),
            },
            500..=599 => CoreError::ServiceUnavailable(body.to_string()),
            _ => CoreError::ServiceUnavailable(format!("unexpected status {status}: {body}")),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_balance_body_to_insufficient_funds() {
        let err = CoreError::from_provider_http(400, "insufficient credit balance");
        assert!(matches!(err, CoreError::InsufficientFunds(_)));
    }

    #[test]
    fn maps_rented_body_to_offer_unavailable() {
        let err = CoreError::from_provider_http(400, "offer already rented");
        assert!(matches!(err, CoreError::OfferUnavailable(_)));
    }

    #[test]
    fn maps_403_to_auth_failed() {
        assert!(matches!(
            CoreError::from_provider_http(403, "forbidden"),
            CoreError::AuthFailed(_)
        ));
    }

    #[test]
    fn maps_5xx_to_service_unavailable() {
        assert!(matches!(
            CoreError::from_provider_http(502, "bad gateway"),
            CoreError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn retryable_classifies_storage_and_service_errors_only() {
        assert!(CoreError::ServiceUnavailable("x".into()).is_retryable());
        assert!(CoreError::StorageFailure("x".into()).is_retryable());
        assert!(!CoreError::NotFound("x".into()).is_retryable());
    }
}
