//! Schema-aware strategic merge patch
//!
//! Works like a merge patch, except that lists whose schema declares a merge key
//! are merged element by element. Supported directives:
//!
//! - `$patch: replace | delete | merge` on maps and on keyed list elements
//! - a `{"$patch": "replace"}` element, which replaces the whole list
//! - `$retainKeys: [..]` to drop every key not listed
//! - `$deleteFromPrimitiveList/<field>: [..]` to remove scalar values from a list
//! - `$setElementOrder/<field>: [..]` to order the elements of a keyed list
//!
//! Directive keys never reach the merged document.

use serde_json::{Map, Value as JsonValue};

use crate::annotations::PatchType;
use crate::error::{CoreError, Result};
use crate::schema::{FieldMeta, PatchMeta};

const PATCH_DIRECTIVE: &str = "$patch";
const RETAIN_KEYS_DIRECTIVE: &str = "$retainKeys";
const DELETE_FROM_PRIMITIVE_LIST_PREFIX: &str = "$deleteFromPrimitiveList/";
const SET_ELEMENT_ORDER_PREFIX: &str = "$setElementOrder/";

/// Value of a `$patch` directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Merge,
    Replace,
    Delete,
}

/// Whether a merged map survives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Keep,
    Delete,
}

fn malformed(message: impl Into<String>) -> CoreError {
    CoreError::malformed(PatchType::StrategicMergePatch, message)
}

/// Apply a strategic merge patch using the merge metadata of the object's type
pub fn apply(original: &JsonValue, patch: &[u8], meta: PatchMeta<'_>) -> Result<JsonValue> {
    let patch: JsonValue = serde_json::from_slice(patch).map_err(|e| malformed(e.to_string()))?;
    let JsonValue::Object(patch) = patch else {
        return Err(malformed("strategic merge patch must be an object"));
    };
    let JsonValue::Object(mut document) = original.clone() else {
        return Err(CoreError::rejected(
            PatchType::StrategicMergePatch,
            "original object is not a map",
        ));
    };

    match merge_map(&mut document, &patch, meta)? {
        Outcome::Keep => Ok(JsonValue::Object(document)),
        Outcome::Delete => Err(CoreError::rejected(
            PatchType::StrategicMergePatch,
            "patch deletes the whole object",
        )),
    }
}

fn directive(patch: &Map<String, JsonValue>) -> Result<Directive> {
    match patch.get(PATCH_DIRECTIVE) {
        None => Ok(Directive::Merge),
        Some(JsonValue::String(s)) => match s.as_str() {
            "merge" => Ok(Directive::Merge),
            "replace" => Ok(Directive::Replace),
            "delete" => Ok(Directive::Delete),
            other => Err(malformed(format!("unknown $patch directive `{}`", other))),
        },
        Some(other) => Err(malformed(format!("$patch must be a string, got {}", other))),
    }
}

fn string_list(value: &JsonValue, directive: &str) -> Result<Vec<String>> {
    let JsonValue::Array(items) = value else {
        return Err(malformed(format!("{} must be a list", directive)));
    };
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed(format!("{} must only contain strings", directive)))
        })
        .collect()
}

fn merge_map(
    original: &mut Map<String, JsonValue>,
    patch: &Map<String, JsonValue>,
    meta: PatchMeta<'_>,
) -> Result<Outcome> {
    match directive(patch)? {
        Directive::Delete => return Ok(Outcome::Delete),
        Directive::Replace => original.clear(),
        Directive::Merge => {}
    }

    let retain_keys = patch
        .get(RETAIN_KEYS_DIRECTIVE)
        .map(|v| string_list(v, RETAIN_KEYS_DIRECTIVE))
        .transpose()?;

    for (key, value) in patch {
        if let Some(field) = key.strip_prefix(DELETE_FROM_PRIMITIVE_LIST_PREFIX) {
            let JsonValue::Array(remove) = value else {
                return Err(malformed(format!("{} must be a list", key)));
            };
            if let Some(JsonValue::Array(list)) = original.get_mut(field) {
                list.retain(|v| !remove.contains(v));
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }

        let field = meta.field(key);
        let order = patch.get(&format!("{}{}", SET_ELEMENT_ORDER_PREFIX, key));
        let existing = original.remove(key);

        if let Some(merged) = merge_value(existing, value, &field, order)? {
            original.insert(key.clone(), merged);
        }
    }

    if let Some(keys) = retain_keys {
        original.retain(|k, _| keys.contains(k));
    }

    Ok(Outcome::Keep)
}

/// Merge one field; `None` means the field is removed
fn merge_value(
    existing: Option<JsonValue>,
    patch: &JsonValue,
    field: &FieldMeta<'_>,
    order: Option<&JsonValue>,
) -> Result<Option<JsonValue>> {
    match (existing, patch) {
        (_, JsonValue::Null) => Ok(None),
        (Some(JsonValue::Object(mut original)), JsonValue::Object(patch)) => {
            match merge_map(&mut original, patch, field.meta)? {
                Outcome::Keep => Ok(Some(JsonValue::Object(original))),
                Outcome::Delete => Ok(None),
            }
        }
        (Some(JsonValue::Array(mut original)), JsonValue::Array(patch)) => {
            merge_list(&mut original, patch, field, order)?;
            Ok(Some(JsonValue::Array(original)))
        }
        (_, JsonValue::Object(patch)) => {
            let mut fresh = Map::new();
            match merge_map(&mut fresh, patch, field.meta)? {
                Outcome::Keep => Ok(Some(JsonValue::Object(fresh))),
                Outcome::Delete => Ok(None),
            }
        }
        (_, JsonValue::Array(patch)) => {
            let mut fresh = Vec::new();
            merge_list(&mut fresh, patch, field, order)?;
            Ok(Some(JsonValue::Array(fresh)))
        }
        (_, scalar) => Ok(Some(scalar.clone())),
    }
}

fn is_replace_marker(value: &JsonValue) -> bool {
    value
        .as_object()
        .is_some_and(|m| m.len() == 1 && m.get(PATCH_DIRECTIVE).and_then(JsonValue::as_str) == Some("replace"))
}

fn merge_list(
    original: &mut Vec<JsonValue>,
    patch: &[JsonValue],
    field: &FieldMeta<'_>,
    order: Option<&JsonValue>,
) -> Result<()> {
    let element = field.element();

    if patch.iter().any(is_replace_marker) {
        original.clear();
        for value in patch.iter().filter(|v| !is_replace_marker(v)) {
            if let Some(v) = merge_value(None, value, &element, None)? {
                original.push(v);
            }
        }
        return Ok(());
    }

    let Some(merge_key) = field.list_merge_key() else {
        original.clear();
        for value in patch {
            if let Some(v) = merge_value(None, value, &element, None)? {
                original.push(v);
            }
        }
        return Ok(());
    };

    for value in patch {
        let JsonValue::Object(patch_element) = value else {
            return Err(malformed(format!(
                "element {} of a list merged on `{}` is not a map",
                value, merge_key
            )));
        };
        let Some(id) = patch_element.get(merge_key) else {
            return Err(malformed(format!(
                "list element does not contain the merge key `{}`",
                merge_key
            )));
        };

        if directive(patch_element)? == Directive::Delete {
            original.retain(|e| e.get(merge_key) != Some(id));
            continue;
        }

        match original.iter().position(|e| e.get(merge_key) == Some(id)) {
            Some(index) => {
                let existing = std::mem::take(&mut original[index]);
                match merge_value(Some(existing), value, &element, None)? {
                    Some(merged) => original[index] = merged,
                    None => {
                        original.remove(index);
                    }
                }
            }
            None => {
                if let Some(v) = merge_value(None, value, &element, None)? {
                    original.push(v);
                }
            }
        }
    }

    if let Some(JsonValue::Array(order)) = order {
        let rank = |e: &JsonValue| {
            let id = e.get(merge_key);
            order
                .iter()
                .position(|o| id.is_some() && o.get(merge_key) == id)
                .unwrap_or(usize::MAX)
        };
        original.sort_by_key(rank);
    }

    Ok(())
}
