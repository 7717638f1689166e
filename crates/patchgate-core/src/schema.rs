//! OpenAPI model set and the merge metadata derived from it
//!
//! A [`SchemaModels`] value is one complete, immutable snapshot of the cluster's
//! OpenAPI (v2) definitions. It is never edited after construction; a refresh builds
//! a new one and swaps it in wholesale.
//!
//! Strategic merge only needs a small part of each model: for every field, whether it
//! is a list that merges by key, which key, and which strategy applies. [`PatchMeta`]
//! walks the raw definitions lazily to answer exactly those questions.

use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::gvk::ResourceTypeKey;

const REF_PREFIX: &str = "#/definitions/";
const GVK_EXTENSION: &str = "x-kubernetes-group-version-kind";
const PATCH_STRATEGY_EXTENSION: &str = "x-kubernetes-patch-strategy";
const PATCH_MERGE_KEY_EXTENSION: &str = "x-kubernetes-patch-merge-key";

/// Limit on `$ref` chains, guards against cyclic definitions
const MAX_REF_DEPTH: usize = 32;

/// Immutable snapshot of all OpenAPI models known to the cluster
#[derive(Debug, Clone, Default)]
pub struct SchemaModels {
    /// Model name -> definition
    definitions: HashMap<String, JsonValue>,
    /// GVK (from `x-kubernetes-group-version-kind`) -> model name
    by_gvk: HashMap<ResourceTypeKey, String>,
}

impl SchemaModels {
    /// An empty snapshot; every lookup misses
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a raw OpenAPI v2 document
    pub fn from_document(document: &[u8]) -> Result<Self> {
        let value: JsonValue =
            serde_json::from_slice(document).map_err(|e| CoreError::InvalidSchemaDocument {
                message: e.to_string(),
            })?;
        Self::from_value(value)
    }

    /// Build from an already-decoded OpenAPI v2 document
    pub fn from_value(document: JsonValue) -> Result<Self> {
        let JsonValue::Object(mut root) = document else {
            return Err(CoreError::InvalidSchemaDocument {
                message: "document root is not an object".to_string(),
            });
        };

        let definitions = match root.remove("definitions") {
            Some(JsonValue::Object(defs)) => defs,
            Some(_) => {
                return Err(CoreError::InvalidSchemaDocument {
                    message: "`definitions` is not an object".to_string(),
                });
            }
            None => {
                return Err(CoreError::InvalidSchemaDocument {
                    message: "missing `definitions`".to_string(),
                });
            }
        };

        let mut by_gvk = HashMap::new();
        for (name, definition) in &definitions {
            let Some(gvks) = definition.get(GVK_EXTENSION).and_then(JsonValue::as_array) else {
                continue;
            };
            for gvk in gvks {
                if let Ok(key) = serde_json::from_value::<ResourceTypeKey>(gvk.clone()) {
                    by_gvk.entry(key.normalized()).or_insert_with(|| name.clone());
                }
            }
        }

        Ok(Self {
            definitions: definitions.into_iter().collect(),
            by_gvk,
        })
    }

    /// Number of models in the snapshot
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Get a model by its definition name
    pub fn model(&self, name: &str) -> Option<&JsonValue> {
        self.definitions.get(name)
    }

    /// Iterate over all model names
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Find the model name for a resource type.
    ///
    /// The computed `<group>.<version>.<kind>` name is tried first, then the
    /// group-version-kind index.
    pub fn resolve_name(&self, key: &ResourceTypeKey) -> Option<&str> {
        let computed = key.model_name();
        if let Some((name, _)) = self.definitions.get_key_value(&computed) {
            return Some(name.as_str());
        }
        self.by_gvk.get(&key.normalized()).map(String::as_str)
    }

    /// Whether the snapshot knows this resource type
    pub fn contains(&self, key: &ResourceTypeKey) -> bool {
        self.resolve_name(key).is_some()
    }

    /// Merge metadata for the root of a resource type
    pub fn patch_meta(&self, key: &ResourceTypeKey) -> Result<PatchMeta<'_>> {
        let name = self.resolve_name(key).ok_or_else(|| CoreError::TypeNotFound {
            key: key.to_string(),
            model_name: key.model_name(),
        })?;

        Ok(PatchMeta {
            models: self,
            schema: self.definitions.get(name).map(|s| self.resolve(s)),
        })
    }

    /// Follow `$ref` (and single-entry `allOf` wrappers) to the concrete schema
    fn resolve<'a>(&'a self, mut schema: &'a JsonValue) -> &'a JsonValue {
        for _ in 0..MAX_REF_DEPTH {
            if let Some(target) = schema
                .get("$ref")
                .and_then(JsonValue::as_str)
                .and_then(|r| r.strip_prefix(REF_PREFIX))
                .and_then(|name| self.definitions.get(name))
            {
                schema = target;
                continue;
            }

            match schema.get("allOf").and_then(JsonValue::as_array) {
                Some(all_of) if all_of.len() == 1 => schema = &all_of[0],
                _ => return schema,
            }
        }
        schema
    }
}

/// Patch strategy flags from `x-kubernetes-patch-strategy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchStrategy {
    pub merge: bool,
    pub retain_keys: bool,
    pub replace: bool,
}

impl PatchStrategy {
    /// Parse a comma separated strategy list, e.g. `merge,retainKeys`
    pub fn parse(value: &str) -> Self {
        let mut strategy = Self::default();
        for part in value.split(',').map(str::trim) {
            match part {
                "merge" => strategy.merge = true,
                "retainKeys" => strategy.retain_keys = true,
                "replace" => strategy.replace = true,
                _ => {}
            }
        }
        strategy
    }
}

/// Merge metadata for one node of a resource type's schema
///
/// A node with no schema is "unknown": its maps still merge recursively, but its
/// lists are replaced wholesale because no merge key can be known.
#[derive(Debug, Clone, Copy)]
pub struct PatchMeta<'a> {
    models: &'a SchemaModels,
    schema: Option<&'a JsonValue>,
}

impl<'a> PatchMeta<'a> {
    /// Metadata that knows nothing about any field
    pub fn unknown(models: &'a SchemaModels) -> Self {
        Self {
            models,
            schema: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.schema.is_some()
    }

    /// Metadata for a named field of this (object) node
    pub fn field(&self, name: &str) -> FieldMeta<'a> {
        let raw = self.schema.and_then(|schema| {
            schema
                .get("properties")
                .and_then(|p| p.get(name))
                .or_else(|| schema.get("additionalProperties").filter(|a| a.is_object()))
        });

        let Some(raw) = raw else {
            return FieldMeta::unknown(self.models);
        };

        FieldMeta {
            meta: PatchMeta {
                models: self.models,
                schema: Some(self.models.resolve(raw)),
            },
            strategy: raw
                .get(PATCH_STRATEGY_EXTENSION)
                .and_then(JsonValue::as_str)
                .map(PatchStrategy::parse)
                .unwrap_or_default(),
            merge_key: raw.get(PATCH_MERGE_KEY_EXTENSION).and_then(JsonValue::as_str),
        }
    }

    /// Metadata for the elements of this (array) node
    pub fn items(&self) -> PatchMeta<'a> {
        PatchMeta {
            models: self.models,
            schema: self
                .schema
                .and_then(|s| s.get("items"))
                .map(|items| self.models.resolve(items)),
        }
    }
}

/// Merge metadata for a field, as seen from its parent
#[derive(Debug, Clone, Copy)]
pub struct FieldMeta<'a> {
    /// Metadata of the field's own value
    pub meta: PatchMeta<'a>,
    pub strategy: PatchStrategy,
    pub merge_key: Option<&'a str>,
}

impl<'a> FieldMeta<'a> {
    fn unknown(models: &'a SchemaModels) -> Self {
        Self {
            meta: PatchMeta::unknown(models),
            strategy: PatchStrategy::default(),
            merge_key: None,
        }
    }

    /// Metadata for one element of this list field
    pub fn element(&self) -> FieldMeta<'a> {
        FieldMeta {
            meta: self.meta.items(),
            strategy: PatchStrategy::default(),
            merge_key: None,
        }
    }

    /// The key to merge list elements on, if this list merges element-wise
    pub fn list_merge_key(&self) -> Option<&'a str> {
        if self.strategy.replace {
            return None;
        }
        self.merge_key
    }
}
