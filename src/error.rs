use thiserror::Error;

use crate::value::FieldValue;

/// Errors returned by the behaviors, their repositories and the stores.
#[derive(Debug, Error)]
pub enum BehaviorError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unexpected value: {0}")]
    UnexpectedValue(String),

    #[error("object [{0}] is not managed by this session")]
    NotManaged(FieldValue),

    #[error("tree is locked: {0}")]
    TreeLocked(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("behavior invariant violation: {0}")]
    Invariant(String),

    #[error("transaction failed: {source}")]
    TransactionFailed {
        #[source]
        source: Box<BehaviorError>,
    },
}

impl BehaviorError {
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration(detail.into())
    }

    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::InvalidArgument(detail.into())
    }

    pub fn unexpected(detail: impl Into<String>) -> Self {
        Self::UnexpectedValue(detail.into())
    }

    pub fn store(detail: impl Into<String>) -> Self {
        Self::Store(detail.into())
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }

    pub fn transaction_failed(source: BehaviorError) -> Self {
        match source {
            already @ BehaviorError::TransactionFailed { .. } => already,
            other => Self::TransactionFailed {
                source: Box::new(other),
            },
        }
    }

    /// Whether the failure came from the backing store rather than from a
    /// rejected argument or configuration.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            BehaviorError::Database(_) | BehaviorError::Store(_) | BehaviorError::Serialization(_)
        )
    }
}
