//! Directive renderer based on MiniJinja

use minijinja::Environment;
use patchgate_core::{ImpersonationContext, PatchType, patch_directive};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;
use crate::functions;
use crate::lookup::{LookupProvider, NoLookups, ResourceLookup};

/// Name the directive template is registered under; shows up in diagnostics
const DIRECTIVE_TEMPLATE_NAME: &str = "patch";

/// A rendered directive, ready for the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDirective {
    /// Canonical JSON encoding of the rendered patch
    pub patch: Vec<u8>,
    pub patch_type: PatchType,
}

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
    lookups: Arc<dyn LookupProvider>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            strict_mode: true,
            lookups: Arc::new(NoLookups),
        }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Source of caller-scoped `lookup` capabilities
    pub fn lookups(mut self, lookups: Arc<dyn LookupProvider>) -> Self {
        self.lookups = lookups;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            strict_mode: self.strict_mode,
            lookups: self.lookups,
        }
    }
}

/// The directive renderer
///
/// Holds no per-request state. Every render builds a fresh MiniJinja environment
/// whose `lookup` function is bound to the caller's identity, so nothing rendered
/// for one caller can observe another caller's capabilities.
pub struct Engine {
    strict_mode: bool,
    lookups: Arc<dyn LookupProvider>,
}

impl Engine {
    /// Engine without cluster lookups
    pub fn new(strict_mode: bool) -> Self {
        EngineBuilder::new().strict(strict_mode).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create a MiniJinja environment bound to one caller's lookups
    fn create_environment(&self, lookup: Arc<dyn ResourceLookup>) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        }

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("fromyaml", filters::fromyaml);
        env.add_filter("fromjson", filters::fromjson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("empty", filters::empty);
        env.add_filter("haskey", filters::haskey);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);

        env.add_function("fail", functions::fail);
        env.add_function("dict", functions::dict);
        env.add_function("list", functions::list);
        env.add_function("get", functions::get);
        env.add_function("dig", functions::dig);
        env.add_function("coalesce", functions::coalesce);
        env.add_function("ternary", functions::ternary);
        env.add_function("tostring", functions::tostring);
        env.add_function("toint", functions::toint);
        env.add_function("now", functions::now);
        env.add_function("printf", functions::printf);

        // Usage: {{ lookup("v1", "ConfigMap", metadata.namespace, "settings") }}
        env.add_function(
            "lookup",
            move |api_version: String, kind: String, namespace: String, name: String| {
                lookup
                    .lookup(&api_version, &kind, &namespace, &name)
                    .map(minijinja::Value::from_serialize)
                    .map_err(|e| {
                        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string())
                    })
            },
        );

        env
    }

    /// Render the patch directive carried by `object`, acting as `identity`.
    ///
    /// Returns `Ok(None)` when the object has no directive. The patch type is read
    /// from its sibling annotation; an unknown value fails before anything renders.
    pub fn render(
        &self,
        object: &JsonValue,
        identity: &ImpersonationContext,
    ) -> Result<Option<RenderedDirective>> {
        let annotations: BTreeMap<String, String> = object
            .pointer("/metadata/annotations")
            .and_then(|a| serde_json::from_value(a.clone()).ok())
            .unwrap_or_default();

        let Some(template) = patch_directive(&annotations) else {
            return Ok(None);
        };
        let patch_type = PatchType::from_annotations(&annotations).map_err(EngineError::PatchType)?;

        let lookup = self.lookups.for_identity(identity)?;
        let rendered = self.render_string(template, object, lookup)?;
        let patch = normalize(&rendered)?;

        tracing::debug!(
            user = %identity.username,
            patch_type = %patch_type,
            bytes = patch.len(),
            "directive rendered"
        );

        Ok(Some(RenderedDirective { patch, patch_type }))
    }

    /// Render a template string against an object
    ///
    /// The object's top-level fields (`metadata`, `spec`, ...) are variables, and the
    /// whole object is also available as `object`.
    pub fn render_string(
        &self,
        template: &str,
        object: &JsonValue,
        lookup: Arc<dyn ResourceLookup>,
    ) -> Result<String> {
        let JsonValue::Object(fields) = object else {
            return Err(EngineError::InvalidObject);
        };
        let mut context = fields.clone();
        context.insert("object".to_string(), object.clone());
        let context = JsonValue::Object(context);

        let mut env = self.create_environment(lookup);
        env.add_template_owned(DIRECTIVE_TEMPLATE_NAME, template.to_string())
            .map_err(|e| {
                EngineError::Parse(TemplateError::from_minijinja(
                    e,
                    DIRECTIVE_TEMPLATE_NAME,
                    template,
                    None,
                ))
            })?;

        let tmpl = env.get_template(DIRECTIVE_TEMPLATE_NAME).map_err(|e| {
            EngineError::Parse(TemplateError::from_minijinja(
                e,
                DIRECTIVE_TEMPLATE_NAME,
                template,
                None,
            ))
        })?;

        tmpl.render(&context).map_err(|e| {
            EngineError::Eval(TemplateError::from_minijinja(
                e,
                DIRECTIVE_TEMPLATE_NAME,
                template,
                Some(&context),
            ))
        })
    }
}

/// Turn rendered YAML (or JSON, which is YAML) into canonical JSON bytes
pub fn normalize(rendered: &str) -> Result<Vec<u8>> {
    let value: JsonValue =
        serde_yaml::from_str(rendered).map_err(|e| EngineError::Normalization {
            message: e.to_string(),
        })?;

    if value.is_null() {
        return Err(EngineError::Normalization {
            message: "directive rendered to an empty document".to_string(),
        });
    }

    serde_json::to_vec(&value).map_err(|e| EngineError::Normalization {
        message: e.to_string(),
    })
}
