//! Annotations that form the admission contract on patched objects
//!
//! An object opts into create-time patching by carrying [`PATCH`]. The value is a
//! template that renders to the patch body. [`PATCH_TYPE`] optionally selects the
//! patch algebra; it defaults to strategic merge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Patch directive template
pub const PATCH: &str = "redhat-cop.redhat.io/patch";

/// Patch type, one of the media types accepted by [`PatchType::from_str`]
pub const PATCH_TYPE: &str = "redhat-cop.redhat.io/patch-type";

/// Patch algebra used to merge the rendered directive into the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PatchType {
    /// RFC 6902 operation list
    #[serde(rename = "application/json-patch+json")]
    JsonPatch,
    /// RFC 7386 merge document
    #[serde(rename = "application/merge-patch+json")]
    MergePatch,
    /// Schema-aware merge with keyed lists
    #[default]
    #[serde(rename = "application/strategic-merge-patch+json")]
    StrategicMergePatch,
}

impl PatchType {
    pub const ALL: [PatchType; 3] = [
        PatchType::JsonPatch,
        PatchType::MergePatch,
        PatchType::StrategicMergePatch,
    ];

    /// Media type used on the wire
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::JsonPatch => "application/json-patch+json",
            Self::MergePatch => "application/merge-patch+json",
            Self::StrategicMergePatch => "application/strategic-merge-patch+json",
        }
    }

    /// Read the patch type from an object's annotations.
    ///
    /// Absence yields the default; an unknown value is an error, never a fallback.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self, CoreError> {
        match annotations.get(PATCH_TYPE) {
            Some(value) => value.parse(),
            None => Ok(Self::default()),
        }
    }
}

impl FromStr for PatchType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.media_type() == s)
            .ok_or_else(|| CoreError::UnsupportedPatchType(s.to_string()))
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.media_type())
    }
}

/// Get the patch directive template, if the object carries one
pub fn patch_directive(annotations: &BTreeMap<String, String>) -> Option<&str> {
    annotations.get(PATCH).map(String::as_str)
}
