//! Patchgate Engine - patch directive rendering
//!
//! This crate turns the patch directive annotation of an admitted object into
//! canonical patch bytes:
//! - MiniJinja templates with Kubernetes-flavoured filters (toyaml, fromyaml, b64encode, ...)
//! - a `lookup` function bound per request to the caller's identity
//! - human-readable template errors with suggestions
//! - YAML to JSON normalization of the rendered output

pub mod engine;
pub mod error;
pub mod filters;
pub mod functions;
pub mod lookup;
pub mod suggestions;

pub use engine::{Engine, EngineBuilder, RenderedDirective, normalize};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use lookup::{LookupError, LookupProvider, NoLookups, ResourceLookup, StaticLookup};
pub use suggestions::{AVAILABLE_FILTERS, AVAILABLE_FUNCTIONS};
