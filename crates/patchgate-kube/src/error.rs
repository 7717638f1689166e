//! Error types for patchgate-kube

use thiserror::Error;

/// Result type for patchgate-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors from cluster access, schema refresh and patch dispatch
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The OpenAPI document could not be fetched
    #[error("cannot fetch OpenAPI document: {0}")]
    SchemaFetch(String),

    /// The OpenAPI document is unusable, or a patch could not be applied
    #[error(transparent)]
    Core(#[from] patchgate_core::CoreError),
}
