//! Patchgate Core - data model and patch algebras for admission-time patching
//!
//! This crate has no cluster dependency. It provides:
//! - `ResourceTypeKey`: group/version/kind identity and OpenAPI model naming
//! - `PatchType` and the annotation contract on admitted objects
//! - `ImpersonationContext`: the requesting caller
//! - `SchemaModels` / `PatchMeta`: OpenAPI snapshot and the merge metadata derived from it
//! - `patch`: JSON patch, merge patch and strategic merge patch
//! - `apply_patch`: dispatch to an algebra and diff the result

pub mod annotations;
pub mod dispatch;
pub mod error;
pub mod gvk;
pub mod identity;
pub mod patch;
pub mod schema;

pub use annotations::{PATCH, PATCH_TYPE, PatchType, patch_directive};
pub use dispatch::{PatchOutcome, apply_patch};
pub use error::{CoreError, Result};
pub use gvk::ResourceTypeKey;
pub use identity::ImpersonationContext;
pub use schema::{FieldMeta, PatchMeta, PatchStrategy, SchemaModels};
