use crate::deal::Currency;
use crate::marker::Disposition;
use sled::transaction::TransactionError;

/// Faults raised by the storage layer itself.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record under key {key:?}: {reason}")]
    Decode { key: String, reason: String },
    #[error("failed to mint identifier: {0}")]
    Identifier(String),
}

/// Every rejection a deal operation can produce. Each variant renders a
/// distinct reason the transport layer can show verbatim.
#[derive(thiserror::Error, Debug)]
pub enum DealError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{subject} was already {disposition}")]
    AlreadyProcessed {
        subject: String,
        disposition: Disposition,
    },
    #[error("a deal is already open or being opened for trigger {trigger}")]
    AlreadyActive { trigger: String },
    #[error("deal of {amount} {currency} exceeds the limit of {limit} for moderator {moderator}")]
    LimitExceeded {
        moderator: String,
        amount: u64,
        limit: u64,
        currency: Currency,
    },
    #[error("only the opening moderator {moderator} may settle this deal, not {requester}")]
    Forbidden { requester: String, moderator: String },
    #[error("no active deal found for {deal_ref}")]
    NotFound { deal_ref: String },
    #[error("claim on trigger {trigger} expired before the deal was stored")]
    ClaimExpired { trigger: String },
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(#[from] sled::Error),
    #[error("ledger record is corrupt: {0}")]
    Corrupt(String),
}

impl DealError {
    /// Whether repeating the same call may succeed later without any other
    /// party changing the ledger first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DealError::StoreUnavailable(_) | DealError::ClaimExpired { .. }
        )
    }
}

impl From<LedgerError> for DealError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Storage(err) => DealError::StoreUnavailable(err),
            other => DealError::Corrupt(other.to_string()),
        }
    }
}

impl From<TransactionError<DealError>> for DealError {
    fn from(value: TransactionError<DealError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => DealError::StoreUnavailable(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        let busy = DealError::StoreUnavailable(sled::Error::Unsupported("offline".into()));
        assert!(busy.is_retryable());
        assert!(
            DealError::ClaimExpired {
                trigger: "t".into()
            }
            .is_retryable()
        );
        assert!(
            !DealError::Forbidden {
                requester: "a".into(),
                moderator: "b".into()
            }
            .is_retryable()
        );
        assert!(
            !DealError::AlreadyProcessed {
                subject: "deal".into(),
                disposition: Disposition::Completed
            }
            .is_retryable()
        );
    }

    #[test]
    fn transaction_abort_unwraps_to_inner_error() {
        let err: DealError = TransactionError::Abort(DealError::NotFound {
            deal_ref: "deal_1".into(),
        })
        .into();
        assert!(matches!(err, DealError::NotFound { .. }));
    }
}
