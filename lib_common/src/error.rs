//! # Relay Errors
//!
//! A single error type for everything that can go wrong between the upstream
//! bus and the downstream consumers. None of these variants is fatal to the
//! process: the ingestion loop logs them and moves on (or reconnects).

use thiserror::Error;

/// Errors raised by the relay pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream frame is not a JSON object, or lacks a usable `_EVENT`.
    #[error("Malformed upstream message: {0}")]
    MalformedMessage(String),

    /// An analytics-eligible event arrived without a block time.
    #[error("Event '{event_type}' is analytics-eligible but carries no block time")]
    MissingBlockTime {
        /// The offending event type.
        event_type: String,
    },

    /// The upstream bus could not be reached or the session broke.
    #[error("Upstream feed error: {0}")]
    Upstream(String),

    /// The analytics store rejected or failed a write.
    #[error("Analytics store error: {0}")]
    Analytics(String),

    /// The administrative interface of the analytics database failed.
    #[error("Database admin error: {0}")]
    Admin(String),
}

impl RelayError {
    /// Whether the error points at a contract breach by the upstream producer
    /// rather than an infrastructure hiccup.
    pub fn is_upstream_contract_breach(&self) -> bool {
        matches!(self, RelayError::MalformedMessage(_) | RelayError::MissingBlockTime { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_breach_classification() {
        assert!(RelayError::MalformedMessage("x".into()).is_upstream_contract_breach());
        assert!(RelayError::MissingBlockTime { event_type: "credit".into() }.is_upstream_contract_breach());
        assert!(!RelayError::Upstream("reset".into()).is_upstream_contract_breach());
        assert!(!RelayError::Analytics("503".into()).is_upstream_contract_breach());
    }

    #[test]
    fn test_missing_block_time_message_names_event() {
        let err = RelayError::MissingBlockTime { event_type: "debit".into() };
        assert!(err.to_string().contains("'debit'"));
    }
}
