//! RFC 6902 JSON Patch

use serde_json::Value as JsonValue;

use crate::annotations::PatchType;
use crate::error::{CoreError, Result};

/// Apply an operation list to a document.
///
/// Operations run in order against a copy; the first failing operation (missing
/// path, failed `test`) fails the whole patch and nothing is returned.
pub fn apply(original: &JsonValue, patch: &[u8]) -> Result<JsonValue> {
    let operations: json_patch::Patch = serde_json::from_slice(patch)
        .map_err(|e| CoreError::malformed(PatchType::JsonPatch, e.to_string()))?;

    let mut document = original.clone();
    json_patch::patch(&mut document, &operations)
        .map_err(|e| CoreError::rejected(PatchType::JsonPatch, e.to_string()))?;

    Ok(document)
}
