//! Cluster lookups on behalf of the requesting caller
//!
//! A directive may read cluster state through `lookup(apiVersion, kind, namespace,
//! name)`. The engine never holds credentials of its own: a [`LookupProvider`] turns
//! the request's [`ImpersonationContext`] into a [`ResourceLookup`] that acts as that
//! caller, and the resulting capability lives only for one render.

use patchgate_core::ImpersonationContext;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LookupError {
    #[error("cannot act as {username:?}: {message}")]
    Identity { username: String, message: String },

    #[error("unknown resource type {api_version}/{kind}")]
    UnknownType { api_version: String, kind: String },

    #[error("lookup of {kind} {namespace}/{name} failed: {message}")]
    Failed {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },

    #[error("lookup cancelled")]
    Cancelled,
}

/// One resource lookup scoped to a single caller
///
/// Implementations return the object when found, `{"items": [...]}` when `name` is
/// empty, and `{}` when nothing matches. Errors are reserved for the cluster
/// refusing or failing the call.
pub trait ResourceLookup: Send + Sync {
    fn lookup(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<JsonValue, LookupError>;
}

/// Builds a caller-scoped [`ResourceLookup`] for each request
pub trait LookupProvider: Send + Sync {
    fn for_identity(
        &self,
        identity: &ImpersonationContext,
    ) -> Result<Arc<dyn ResourceLookup>, LookupError>;
}

/// Lookups disabled: every call returns `{}`
///
/// Used for offline rendering, where there is no cluster to ask.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookups;

impl ResourceLookup for NoLookups {
    fn lookup(&self, _: &str, _: &str, _: &str, _: &str) -> Result<JsonValue, LookupError> {
        Ok(JsonValue::Object(Default::default()))
    }
}

impl LookupProvider for NoLookups {
    fn for_identity(&self, _: &ImpersonationContext) -> Result<Arc<dyn ResourceLookup>, LookupError> {
        Ok(Arc::new(NoLookups))
    }
}

type ObjectKey = (String, String, String, String);
type StoredObjects = HashMap<ObjectKey, (JsonValue, Option<Vec<String>>)>;

/// In-memory lookups for tests and dry runs
///
/// Objects can be restricted to a set of usernames, which makes privilege scoping
/// observable: a caller outside the set sees `{}`. Every identity handed out is
/// recorded.
#[derive(Debug, Default)]
pub struct StaticLookup {
    objects: Arc<StoredObjects>,
    identities: Mutex<Vec<ImpersonationContext>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object visible to everyone
    pub fn with_object(mut self, object: JsonValue) -> Self {
        let key = Self::key_of(&object);
        Arc::make_mut(&mut self.objects).insert(key, (object, None));
        self
    }

    /// Add an object visible only to the listed usernames
    pub fn with_private_object<I, S>(mut self, object: JsonValue, readers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = Self::key_of(&object);
        let readers = readers.into_iter().map(Into::into).collect();
        Arc::make_mut(&mut self.objects).insert(key, (object, Some(readers)));
        self
    }

    /// Identities lookups were requested for, in order
    pub fn identities(&self) -> Vec<ImpersonationContext> {
        self.identities
            .lock()
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    fn key_of(object: &JsonValue) -> ObjectKey {
        let field = |v: Option<&JsonValue>| {
            v.and_then(JsonValue::as_str).unwrap_or_default().to_string()
        };
        (
            field(object.get("apiVersion")),
            field(object.get("kind")),
            field(object.pointer("/metadata/namespace")),
            field(object.pointer("/metadata/name")),
        )
    }
}

impl LookupProvider for StaticLookup {
    fn for_identity(
        &self,
        identity: &ImpersonationContext,
    ) -> Result<Arc<dyn ResourceLookup>, LookupError> {
        if let Ok(mut ids) = self.identities.lock() {
            ids.push(identity.clone());
        }
        Ok(Arc::new(ScopedStaticLookup {
            objects: Arc::clone(&self.objects),
            username: identity.username.clone(),
        }))
    }
}

struct ScopedStaticLookup {
    objects: Arc<StoredObjects>,
    username: String,
}

impl ResourceLookup for ScopedStaticLookup {
    fn lookup(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<JsonValue, LookupError> {
        let visible = |readers: &Option<Vec<String>>| {
            readers
                .as_ref()
                .is_none_or(|r| r.iter().any(|u| *u == self.username))
        };

        if name.is_empty() {
            let items: Vec<JsonValue> = self
                .objects
                .iter()
                .filter(|((a, k, ns, _), (_, readers))| {
                    a == api_version
                        && k == kind
                        && (namespace.is_empty() || ns == namespace)
                        && visible(readers)
                })
                .map(|(_, (object, _))| object.clone())
                .collect();
            return Ok(serde_json::json!({ "items": items }));
        }

        let key = (
            api_version.to_string(),
            kind.to_string(),
            namespace.to_string(),
            name.to_string(),
        );
        match self.objects.get(&key) {
            Some((object, readers)) if visible(readers) => Ok(object.clone()),
            _ => Ok(JsonValue::Object(Default::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Arc<StaticLookup> {
        Arc::new(
            StaticLookup::new()
                .with_object(json!({
                    "apiVersion": "v1", "kind": "ConfigMap",
                    "metadata": {"name": "cfg", "namespace": "team-a"},
                    "data": {"tier": "gold"}
                }))
                .with_private_object(
                    json!({
                        "apiVersion": "v1", "kind": "Secret",
                        "metadata": {"name": "token", "namespace": "team-a"}
                    }),
                    ["alice"],
                ),
        )
    }

    #[test]
    fn test_lookup_found_and_missing() {
        let store = store();
        let lookup = store.for_identity(&ImpersonationContext::new("bob")).unwrap();

        let cm = lookup.lookup("v1", "ConfigMap", "team-a", "cfg").unwrap();
        assert_eq!(cm["data"]["tier"], "gold");

        let missing = lookup.lookup("v1", "ConfigMap", "team-a", "nope").unwrap();
        assert_eq!(missing, json!({}));
    }

    #[test]
    fn test_lookup_is_scoped_to_identity() {
        let store = store();
        let alice = store.for_identity(&ImpersonationContext::new("alice")).unwrap();
        let bob = store.for_identity(&ImpersonationContext::new("bob")).unwrap();

        assert_eq!(alice.lookup("v1", "Secret", "team-a", "token").unwrap()["kind"], "Secret");
        assert_eq!(bob.lookup("v1", "Secret", "team-a", "token").unwrap(), json!({}));

        let names: Vec<String> = store.identities().into_iter().map(|i| i.username).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn test_list_with_empty_name() {
        let store = store();
        let lookup = store.for_identity(&ImpersonationContext::new("bob")).unwrap();
        let list = lookup.lookup("v1", "ConfigMap", "", "").unwrap();
        assert_eq!(list["items"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_no_lookups() {
        let lookup = NoLookups.for_identity(&ImpersonationContext::new("x")).unwrap();
        assert_eq!(lookup.lookup("v1", "Secret", "a", "b").unwrap(), json!({}));
    }
}
