//! SNGP error taxonomy
//!
//! Domain errors (not found, invalid state, invalid input) are surfaced to the
//! caller as-is. Storage and upstream failures abort the unit of work they
//! occurred in and are safe to retry: no partial state is ever committed.

use thiserror::Error;

use crate::storage::StorageError;
use crate::types::{PoolId, RecordId, RunId, RunStatus, UserId};

/// Result alias used across the crate
pub type SngpResult<T> = Result<T, SngpError>;

/// Coarse classification used by callers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InvalidInput,
    Transactional,
    Upstream,
}

#[derive(Debug, Error)]
pub enum SngpError {
    #[error("pool {0} not found")]
    PoolNotFound(PoolId),

    #[error("distribution run {0} not found")]
    RunNotFound(RunId),

    #[error("participation record {record} not found in pool {pool}")]
    ParticipationNotFound { pool: PoolId, record: RecordId },

    #[error("no {token} wallet found for {user}")]
    WalletNotFound { user: UserId, token: String },

    #[error("reward token configuration is not set")]
    RewardConfigMissing,

    #[error("distribution run {0} is already completed")]
    RunAlreadyCompleted(RunId),

    #[error("distribution run {run} cannot move from {from} to {to}")]
    InvalidRunTransition {
        run: RunId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("pool {0} has no participants to distribute to")]
    NoParticipants(PoolId),

    #[error("pool {0} has already been distributed")]
    PoolAlreadyDistributed(PoolId),

    #[error("points must be greater than zero")]
    ZeroPoints,

    #[error("invalid pool definition: {0}")]
    InvalidPool(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("participants of distribution run {0} kept changing, retry the draw")]
    DistributionContended(RunId),

    #[error("{gateway} gateway failed: {source}")]
    Upstream {
        gateway: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SngpError {
    pub fn upstream(gateway: &'static str, source: anyhow::Error) -> Self {
        SngpError::Upstream { gateway, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SngpError::PoolNotFound(_)
            | SngpError::RunNotFound(_)
            | SngpError::ParticipationNotFound { .. }
            | SngpError::WalletNotFound { .. }
            | SngpError::RewardConfigMissing => ErrorKind::NotFound,
            SngpError::RunAlreadyCompleted(_)
            | SngpError::InvalidRunTransition { .. }
            | SngpError::NoParticipants(_)
            | SngpError::PoolAlreadyDistributed(_) => ErrorKind::InvalidState,
            SngpError::ZeroPoints | SngpError::InvalidPool(_) | SngpError::InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
            SngpError::Upstream { .. } => ErrorKind::Upstream,
            SngpError::DistributionContended(_) | SngpError::Storage(_) => ErrorKind::Transactional,
        }
    }

    /// Infrastructure failures may be retried; the whole operation is idempotent
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transactional | ErrorKind::Upstream)
    }
}
