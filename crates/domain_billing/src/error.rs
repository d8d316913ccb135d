//! Billing domain errors

use thiserror::Error;

use core_kernel::{BillingEntityId, CoreError, PortError, TemporalError};
use domain_documents::DocumentError;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed input, rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// Some ids were no longer eligible; nothing was changed
    #[error("Conflict: {eligible} of {requested} rows still eligible for locking")]
    Conflict {
        requested: usize,
        eligible: usize,
    },

    /// The entity has no accounting target
    #[error("Billing entity {0} has no bill target")]
    NotBillable(BillingEntityId),

    /// Period error
    #[error(transparent)]
    Temporal(#[from] TemporalError),

    /// Failure reported by a store or external port
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Document queue error: {0}")]
    Documents(#[from] DocumentError),
}

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    /// Returns true for lock conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, BillingError::Conflict { .. })
    }
}

impl From<CoreError> for BillingError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Temporal(e) => BillingError::Temporal(e),
            other => BillingError::Validation(other.to_string()),
        }
    }
}
