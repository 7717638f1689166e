//! Patch dispatch: choose the algebra, apply it, and diff the result

use serde_json::Value as JsonValue;

use crate::annotations::PatchType;
use crate::error::{CoreError, Result};
use crate::gvk::ResourceTypeKey;
use crate::patch;
use crate::schema::SchemaModels;

/// Result of a successful patch application
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// The final object
    pub patched: JsonValue,
    /// Operations that turn the original into `patched`
    pub diff: json_patch::Patch,
}

impl PatchOutcome {
    /// Serialized final object
    pub fn patched_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.patched)?)
    }

    /// Serialized diff, as carried in an admission response
    pub fn diff_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.diff)?)
    }

    /// Whether the patch changed anything
    pub fn is_noop(&self) -> bool {
        self.diff.0.is_empty()
    }
}

/// Apply `patch` to `original` with the given algebra.
///
/// Strategic merge resolves the merge metadata of `key` in `models` and fails with
/// [`CoreError::TypeNotFound`] when the type is missing; it never falls back to merge
/// patch semantics. The other two algebras ignore `models`.
pub fn apply_patch(
    original: &[u8],
    patch: &[u8],
    patch_type: PatchType,
    key: &ResourceTypeKey,
    models: &SchemaModels,
) -> Result<PatchOutcome> {
    let original: JsonValue = serde_json::from_slice(original).map_err(CoreError::InvalidObject)?;

    let patched = match patch_type {
        PatchType::JsonPatch => patch::json::apply(&original, patch)?,
        PatchType::MergePatch => patch::merge::apply(&original, patch)?,
        PatchType::StrategicMergePatch => {
            let meta = models.patch_meta(key)?;
            patch::strategic::apply(&original, patch, meta)?
        }
    };

    let diff = json_patch::diff(&original, &patched);
    tracing::debug!(
        kind = %key,
        patch_type = %patch_type,
        operations = diff.0.len(),
        "patch applied"
    );

    Ok(PatchOutcome { patched, diff })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::sample_models;
    use serde_json::json;

    fn widget() -> ResourceTypeKey {
        ResourceTypeKey::new("example.com", "v1", "Widget")
    }

    fn original() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w", "labels": {"a": "1"}},
            "spec": {"items": [{"id": 1, "v": "a"}, {"id": 2, "v": "b"}], "tags": ["x"]}
        }))
        .unwrap()
    }

    /// The diff applied to the original must reproduce the patched object
    fn assert_diff_reproduces(outcome: &PatchOutcome, original: &[u8]) {
        let mut replayed: JsonValue = serde_json::from_slice(original).unwrap();
        json_patch::patch(&mut replayed, &outcome.diff).unwrap();
        assert_eq!(replayed, outcome.patched);

        let bytes: JsonValue = serde_json::from_slice(&outcome.patched_bytes().unwrap()).unwrap();
        assert_eq!(bytes, outcome.patched);
    }

    #[test]
    fn test_diff_reproduces_final_object_for_every_type() {
        let models = sample_models();
        let patches: [(PatchType, &[u8]); 3] = [
            (
                PatchType::JsonPatch,
                br#"[{"op": "add", "path": "/metadata/labels/b", "value": "2"}]"#,
            ),
            (
                PatchType::MergePatch,
                br#"{"metadata": {"labels": {"a": null}}, "spec": {"tags": ["y", "z"]}}"#,
            ),
            (
                PatchType::StrategicMergePatch,
                br#"{"spec": {"items": [{"id": 2, "v": "c"}, {"id": 3, "v": "d"}]}}"#,
            ),
        ];

        for (patch_type, patch) in patches {
            let outcome = apply_patch(&original(), patch, patch_type, &widget(), &models).unwrap();
            assert!(!outcome.is_noop(), "{} produced no change", patch_type);
            assert_diff_reproduces(&outcome, &original());
        }
    }

    #[test]
    fn test_strategic_merge_keyed_list() {
        let models = sample_models();
        let outcome = apply_patch(
            &original(),
            br#"{"spec": {"items": [{"id": 2, "v": "c"}, {"id": 3, "v": "d"}]}}"#,
            PatchType::StrategicMergePatch,
            &widget(),
            &models,
        )
        .unwrap();

        assert_eq!(
            outcome.patched["spec"]["items"],
            json!([{"id": 1, "v": "a"}, {"id": 2, "v": "c"}, {"id": 3, "v": "d"}])
        );
    }

    #[test]
    fn test_strategic_merge_unknown_type_never_falls_back() {
        let models = sample_models();
        let key = ResourceTypeKey::new("example.com", "v1", "Gadget");
        let err = apply_patch(
            &original(),
            br#"{"spec": {"tags": ["y"]}}"#,
            PatchType::StrategicMergePatch,
            &key,
            &models,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::TypeNotFound { .. }));

        // the same patch as a merge patch needs no schema
        assert!(apply_patch(&original(), br#"{"spec": {"tags": ["y"]}}"#, PatchType::MergePatch, &key, &models).is_ok());
    }

    #[test]
    fn test_failed_json_patch_produces_nothing() {
        let err = apply_patch(
            br#"{"a": 1}"#,
            br#"[{"op": "test", "path": "/a", "value": 2}]"#,
            PatchType::JsonPatch,
            &widget(),
            &SchemaModels::empty(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::PatchRejected { .. }));
    }

    #[test]
    fn test_invalid_original() {
        let err = apply_patch(b"{", b"{}", PatchType::MergePatch, &widget(), &SchemaModels::empty())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidObject(_)));
    }

    #[test]
    fn test_empty_patch_is_noop() {
        let outcome = apply_patch(
            &original(),
            b"{}",
            PatchType::MergePatch,
            &widget(),
            &SchemaModels::empty(),
        )
        .unwrap();
        assert!(outcome.is_noop());
        assert_eq!(outcome.diff_bytes().unwrap(), b"[]");
    }
}
