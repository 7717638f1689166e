//! RFC 7386 JSON Merge Patch

use serde_json::Value as JsonValue;

use crate::annotations::PatchType;
use crate::error::{CoreError, Result};

/// Merge a document into the original.
///
/// Objects merge recursively, `null` removes a key, and arrays are replaced
/// wholesale. The merge document must itself be an object: a bare scalar or array
/// would replace the whole resource.
pub fn apply(original: &JsonValue, patch: &[u8]) -> Result<JsonValue> {
    let patch: JsonValue = serde_json::from_slice(patch)
        .map_err(|e| CoreError::malformed(PatchType::MergePatch, e.to_string()))?;

    if !patch.is_object() {
        return Err(CoreError::malformed(
            PatchType::MergePatch,
            "merge document must be an object",
        ));
    }

    let mut document = original.clone();
    json_patch::merge(&mut document, &patch);
    Ok(document)
}
