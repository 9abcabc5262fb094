//! Controller-specific error types.
//!
//! Provider errors are always wrapped with the operation that was attempted so
//! the failure condition written to a resource names what went wrong.

use cloud_client::CloudError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the infrastructure controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cloud provider call failed
    #[error("{operation}: {source}")]
    Cloud {
        operation: String,
        #[source]
        source: CloudError,
    },

    /// Stale write to the object store (resourceVersion mismatch or already exists)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A referenced object or provider resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Object (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ControllerError {
    /// Stale-write conflicts are retried quickly from a fresh read
    pub fn is_conflict(&self) -> bool {
        match self {
            ControllerError::Conflict(_) => true,
            ControllerError::Kube(KubeError::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }
}

/// Attach the attempted operation to a provider result.
pub trait CloudResultExt<T> {
    /// Wrap the error with a fixed operation description
    fn op(self, operation: &str) -> Result<T, ControllerError>;

    /// Wrap the error with a lazily built operation description
    fn with_op<F: FnOnce() -> String>(self, operation: F) -> Result<T, ControllerError>;
}

impl<T> CloudResultExt<T> for Result<T, CloudError> {
    fn op(self, operation: &str) -> Result<T, ControllerError> {
        self.map_err(|source| ControllerError::Cloud {
            operation: operation.to_string(),
            source,
        })
    }

    fn with_op<F: FnOnce() -> String>(self, operation: F) -> Result<T, ControllerError> {
        self.map_err(|source| ControllerError::Cloud {
            operation: operation(),
            source,
        })
    }
}
