//! Resource type identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Model-name prefix for the core ("") API group
pub const CORE_GROUP_MODEL_PREFIX: &str = "io.k8s.api.core";

/// Prefix for built-in groups without a domain (e.g. `apps`, `batch`)
pub const BUILTIN_GROUP_MODEL_PREFIX: &str = "io.k8s.api";

/// Version assumed when none is given
pub const DEFAULT_VERSION: &str = "v1";

/// Group, version and kind of a resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ResourceTypeKey {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    pub kind: String,
}

impl ResourceTypeKey {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Build from an `apiVersion` string (`v1`, `apps/v1`) and a kind
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    /// Version with the baseline default applied
    pub fn version_or_default(&self) -> &str {
        if self.version.is_empty() {
            DEFAULT_VERSION
        } else {
            &self.version
        }
    }

    /// Key with defaults applied, as used for index lookups
    pub fn normalized(&self) -> Self {
        Self::new(self.group.clone(), self.version_or_default(), self.kind.clone())
    }

    /// `apiVersion` string for this type
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version_or_default().to_string()
        } else {
            format!("{}/{}", self.group, self.version_or_default())
        }
    }

    /// OpenAPI model name: `<group>.<version>.<kind>`
    ///
    /// The empty group maps to `io.k8s.api.core` and a group without dots to
    /// `io.k8s.api.<group>`. Dotted groups are used verbatim.
    pub fn model_name(&self) -> String {
        let group = if self.group.is_empty() {
            CORE_GROUP_MODEL_PREFIX.to_string()
        } else if !self.group.contains('.') {
            format!("{}.{}", BUILTIN_GROUP_MODEL_PREFIX, self.group)
        } else {
            self.group.clone()
        };

        format!("{}.{}.{}", group, self.version_or_default(), self.kind)
    }
}

impl fmt::Display for ResourceTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}, Kind={}", self.version_or_default(), self.kind)
        } else {
            write!(f, "{}/{}, Kind={}", self.group, self.version_or_default(), self.kind)
        }
    }
}
