//! Error types for factor resolution and calculation.

/// Errors surfaced by the calculation engine and aggregation functions.
///
/// Each variant fails a single activity (or a single derived metric);
/// batch callers collect them per item instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    #[error("no conversion path from '{from}' to '{to}'")]
    UnsupportedUnit { from: String, to: String },

    #[error("invalid activity: {0}")]
    Validation(String),

    #[error("factor provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("no emission factor available for {key}: {reason}")]
    FactorUnavailable { key: String, reason: String },

    #[error("division by zero")]
    DivisionByZero,
}

/// Errors from a single factor fetch.
///
/// `Clone` so that one outcome can be handed to every waiter coalesced
/// onto the same in-flight fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network failure or 5xx/429; retried with backoff.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Non-retryable 4xx.
    #[error("provider rejected lookup ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("provider call timed out after {0} ms")]
    Timeout(u64),

    /// The quota tracker denied the call before it was attempted.
    #[error("quota exhausted")]
    QuotaExceeded,

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Unavailable(_) | FetchError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Unavailable("503".into()).is_transient());
        assert!(FetchError::Timeout(5000).is_transient());
        assert!(!FetchError::QuotaExceeded.is_transient());
        assert!(!FetchError::Malformed("x".into()).is_transient());
        assert!(!FetchError::Rejected {
            status: 404,
            message: "unknown subtype".into()
        }
        .is_transient());
    }

    #[test]
    fn test_error_messages_name_the_key() {
        let err = CalcError::FactorUnavailable {
            key: "waste_diverted/paper/PT/2024/-".into(),
            reason: "quota exhausted".into(),
        };
        assert!(err.to_string().contains("waste_diverted/paper/PT/2024/-"));
    }
}
