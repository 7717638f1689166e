//! Requesting identity for impersonated template lookups

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The caller on whose behalf a directive is evaluated
///
/// Built from the admission request's user info and scoped to that single request.
/// Anything that talks to the cluster while rendering a directive does so with
/// exactly these credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImpersonationContext {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl ImpersonationContext {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.extra.insert(key.into(), values);
        self
    }

    /// An identity with no username cannot be impersonated
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}
