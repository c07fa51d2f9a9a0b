use thiserror::Error;

use crate::money::Money;
use crate::store::StoreError;

/// Canonical error taxonomy for every public billing-core operation (spec §7).
///
/// `Validation` and `NotFound` are surfaced directly to the caller.
/// `Conflict`/`Transient` are retried by whichever layer can usefully retry
/// them (the store abstraction for `Transient`, the distributor for
/// `Conflict`) and only escape as `PaymentConflict`/`BillConflict`/
/// `Transient` after retries are exhausted. `Permanent` is never retried and
/// always means an invariant was about to be violated.
#[derive(Error, Debug)]
pub enum BillingError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("optimistic concurrency conflict on {path}")]
    Conflict { path: String },

    #[error("payment could not be committed after retries on unit {unit_id}")]
    PaymentConflict { unit_id: String },

    #[error("bill generation could not be committed after retries for period {period_id}")]
    BillConflict { period_id: String },

    #[error("transaction {transaction_id} was already reversed")]
    AlreadyReversed { transaction_id: String },

    #[error("store unavailable: {message}")]
    Transient { message: String },

    #[error("operation failed; contact support")]
    Permanent { message: String },

    #[error("{0} scheduler tasks failed during the nightly run")]
    PartialFailure(usize),
}

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation { message: message.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        BillingError::NotFound { what: what.into() }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        BillingError::Permanent { message: message.into() }
    }

    /// `true` for the two kinds the error-handling design treats as invisible
    /// to callers once retried successfully (spec §7 propagation policy).
    pub fn is_retryable_internally(&self) -> bool {
        matches!(self, BillingError::Conflict { .. } | BillingError::Transient { .. })
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { path } => BillingError::NotFound { what: path },
            StoreError::Conflict { path } => BillingError::Conflict { path },
            StoreError::Transient { message } => BillingError::Transient { message },
            StoreError::Permanent { message } => BillingError::Permanent { message },
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("allocation invariant violated: allocations sum to {allocated} but transaction amount is {amount}")]
pub struct AllocationMismatch {
    pub allocated: Money,
    pub amount: Money,
}

pub type Result<T> = std::result::Result<T, BillingError>;
