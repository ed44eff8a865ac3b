use payroll_stream::ContractError;
use thiserror::Error;

use crate::types::StreamId;

/// Result type for payroll client operations
pub type PayrollResult<T> = Result<T, PayrollError>;

/// Errors surfaced by the controller, the estimator set and ledger adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayrollError {
    /// Malformed input caught before any ledger call.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Stream {0} not found")]
    StreamNotFound(StreamId),

    #[error("Stream {0} is not active")]
    StreamNotActive(StreamId),

    #[error("Stream {0} is paused")]
    StreamPaused(StreamId),

    #[error("Nothing to claim on stream {0}")]
    NothingToClaim(StreamId),

    #[error("Invalid amount: {0}")]
    InvalidAmount(i128),

    /// A mutation for the same stream is still awaiting the ledger.
    #[error("Another operation on stream {0} is still in flight")]
    OperationInFlight(StreamId),

    /// Network or invocation failure; opaque to the core.
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PayrollError {
    /// Map a ledger contract error for `stream_id` onto the client taxonomy.
    pub fn from_contract(error: ContractError, stream_id: StreamId, amount: i128) -> Self {
        match error {
            ContractError::StreamNotFound => PayrollError::StreamNotFound(stream_id),
            ContractError::InvalidParameters => {
                PayrollError::InvalidParameters("rejected by ledger".to_string())
            }
            ContractError::StreamNotActive => PayrollError::StreamNotActive(stream_id),
            ContractError::StreamPaused => PayrollError::StreamPaused(stream_id),
            ContractError::NothingToClaim => PayrollError::NothingToClaim(stream_id),
            ContractError::InvalidAmount => PayrollError::InvalidAmount(amount),
        }
    }

    /// Whether the failure says nothing about the stream itself.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PayrollError::LedgerUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_errors_keep_their_meaning() {
        let id = StreamId(3);
        assert_eq!(
            PayrollError::from_contract(ContractError::StreamPaused, id, 0),
            PayrollError::StreamPaused(id)
        );
        assert_eq!(
            PayrollError::from_contract(ContractError::InvalidAmount, id, -4),
            PayrollError::InvalidAmount(-4)
        );
        assert_eq!(
            PayrollError::from_contract(ContractError::NothingToClaim, id, 0).to_string(),
            "Nothing to claim on stream 3"
        );
    }

    #[test]
    fn only_transport_failures_are_unavailable() {
        assert!(PayrollError::LedgerUnavailable("timeout".into()).is_unavailable());
        assert!(!PayrollError::StreamNotActive(StreamId(1)).is_unavailable());
    }
}
