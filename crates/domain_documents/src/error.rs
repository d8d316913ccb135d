//! Document domain errors

use thiserror::Error;

use core_kernel::{DocumentJobId, PortError, TemporalError};

/// Errors raised while queueing or processing document jobs
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// The stored payload no longer decodes
    #[error("Payload decode error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Document store error: {0}")]
    Storage(#[source] PortError),

    #[error("Accounting gateway error: {0}")]
    Gateway(#[source] PortError),

    #[error("Job queue error: {0}")]
    Queue(#[source] PortError),

    #[error("Job {0} not found or not failed")]
    JobNotFound(DocumentJobId),

    #[error(transparent)]
    Temporal(#[from] TemporalError),
}

impl DocumentError {
    pub fn validation(message: impl Into<String>) -> Self {
        DocumentError::Validation(message.into())
    }

    pub fn render(message: impl Into<String>) -> Self {
        DocumentError::Render(message.into())
    }

    /// Returns true when a retry may succeed without operator action
    pub fn is_transient(&self) -> bool {
        match self {
            DocumentError::Storage(e) | DocumentError::Gateway(e) | DocumentError::Queue(e) => {
                e.is_transient()
            }
            _ => false,
        }
    }
}
