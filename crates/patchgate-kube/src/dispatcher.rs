//! Patch dispatcher bound to the live schema cache

use patchgate_core::{PatchOutcome, PatchType, ResourceTypeKey, apply_patch};
use std::sync::Arc;

use crate::cache::SchemaCache;
use crate::error::Result;

/// Applies rendered patches, taking merge metadata from the current schema snapshot
#[derive(Clone)]
pub struct PatchDispatcher {
    cache: Arc<SchemaCache>,
}

impl PatchDispatcher {
    pub fn new(cache: Arc<SchemaCache>) -> Self {
        Self { cache }
    }

    /// Apply `patch` to `original` and return the result with its JSON-patch diff.
    ///
    /// The snapshot is loaded once; a refresh landing mid-call does not affect it.
    pub fn apply(
        &self,
        original: &[u8],
        patch: &[u8],
        patch_type: PatchType,
        key: &ResourceTypeKey,
    ) -> Result<PatchOutcome> {
        let models = self.cache.current();
        Ok(apply_patch(original, patch, patch_type, key, &models)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KubeError;
    use crate::source::StaticSchemaSource;
    use patchgate_core::CoreError;
    use serde_json::json;

    fn widget_schema() -> Vec<u8> {
        serde_json::to_vec(&json!({"definitions": {
            "com.example.v1.Widget": {
                "x-kubernetes-group-version-kind": [
                    {"group": "example.com", "version": "v1", "kind": "Widget"}
                ],
                "properties": {
                    "spec": {"properties": {"parts": {
                        "type": "array",
                        "x-kubernetes-patch-merge-key": "id",
                        "x-kubernetes-patch-strategy": "merge",
                        "items": {"type": "object"}
                    }}}
                }
            }
        }}))
        .unwrap()
    }

    #[tokio::test]
    async fn test_strategic_merge_uses_current_snapshot() {
        let cache = Arc::new(SchemaCache::new(Arc::new(StaticSchemaSource::new(widget_schema()))));
        let dispatcher = PatchDispatcher::new(Arc::clone(&cache));
        let key = ResourceTypeKey::new("example.com", "v1", "Widget");
        let original = br#"{"spec": {"parts": [{"id": "a", "size": 1}]}}"#;
        let patch = br#"{"spec": {"parts": [{"id": "b", "size": 2}]}}"#;

        // nothing loaded yet
        let err = dispatcher
            .apply(original, patch, PatchType::StrategicMergePatch, &key)
            .unwrap_err();
        assert!(matches!(err, KubeError::Core(CoreError::TypeNotFound { .. })));

        cache.refresh().await.unwrap();
        let outcome = dispatcher
            .apply(original, patch, PatchType::StrategicMergePatch, &key)
            .unwrap();
        assert_eq!(
            outcome.patched,
            json!({"spec": {"parts": [{"id": "a", "size": 1}, {"id": "b", "size": 2}]}})
        );
    }

    #[test]
    fn test_merge_patch_needs_no_schema() {
        let cache = Arc::new(SchemaCache::new(Arc::new(StaticSchemaSource::new(widget_schema()))));
        let dispatcher = PatchDispatcher::new(cache);
        let outcome = dispatcher
            .apply(
                br#"{"a": 1}"#,
                br#"{"b": 2}"#,
                PatchType::MergePatch,
                &ResourceTypeKey::new("", "v1", "ConfigMap"),
            )
            .unwrap();
        assert_eq!(outcome.patched, json!({"a": 1, "b": 2}));
    }
}
