//! Core error types

use thiserror::Error;

use crate::annotations::PatchType;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unsupported patch type: {0}")]
    UnsupportedPatchType(String),

    #[error("malformed {patch_type} document: {message}")]
    MalformedPatch {
        patch_type: PatchType,
        message: String,
    },

    #[error("{patch_type} could not be applied: {message}")]
    PatchRejected {
        patch_type: PatchType,
        message: String,
    },

    #[error("original object is not a valid JSON document: {0}")]
    InvalidObject(#[source] serde_json::Error),

    #[error("type not found in OpenAPI models: {key} (model name {model_name})")]
    TypeNotFound { key: String, model_name: String },

    #[error("invalid OpenAPI document: {message}")]
    InvalidSchemaDocument { message: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn malformed(patch_type: PatchType, message: impl Into<String>) -> Self {
        Self::MalformedPatch {
            patch_type,
            message: message.into(),
        }
    }

    pub(crate) fn rejected(patch_type: PatchType, message: impl Into<String>) -> Self {
        Self::PatchRejected {
            patch_type,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
