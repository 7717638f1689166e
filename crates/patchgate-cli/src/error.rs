//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use miette::Diagnostic;
use patchgate_core::CoreError;
use patchgate_engine::EngineError;
use patchgate_kube::KubeError;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// The patch directive failed to render
    #[error("Template error: {message}")]
    #[diagnostic(code(patchgate::cli::template))]
    Template {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The rendered patch could not be applied
    #[error("Patch error: {message}")]
    #[diagnostic(code(patchgate::cli::patch))]
    Patch {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Input file content is unusable
    #[error("Invalid input: {message}")]
    #[diagnostic(code(patchgate::cli::input))]
    Input { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(patchgate::cli::io))]
    Io { message: String },

    /// Cluster configuration, schema fetch or API failure
    #[error("Cluster error: {message}")]
    #[diagnostic(code(patchgate::cli::cluster))]
    Cluster { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(patchgate::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Template { .. } => exit_codes::TEMPLATE_ERROR,
            CliError::Patch { .. } => exit_codes::PATCH_ERROR,
            CliError::Input { .. } => exit_codes::USAGE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an input error (user provided invalid input)
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    /// Create a cluster error
    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Parse(e) | EngineError::Eval(e) => CliError::Template {
                message: e.message,
                help: e.suggestion,
            },
            EngineError::PatchType(e) => CliError::Patch {
                message: e.to_string(),
                help: Some(format!(
                    "Use one of: {}",
                    patchgate_core::PatchType::ALL
                        .iter()
                        .map(|t| t.media_type())
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            },
            other => CliError::Template {
                message: other.to_string(),
                help: None,
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let help = match &err {
            CoreError::TypeNotFound { .. } => {
                Some("Pass the cluster's OpenAPI document with --schema".to_string())
            }
            _ => None,
        };
        CliError::Patch {
            message: err.to_string(),
            help,
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Core(e) => e.into(),
            other => CliError::cluster(other.to_string()),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
