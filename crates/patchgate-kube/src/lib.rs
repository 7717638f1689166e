//! Patchgate Kube - cluster side of the admission-time patch engine
//!
//! This crate provides:
//! - **Schema sources**: the API server's OpenAPI v2 document, or a fixed/mock one
//! - **Schema cache**: the current model set, swapped atomically on refresh
//! - **Refresh trigger**: a CRD watcher feeding a coalescing refresh queue
//! - **Impersonated lookups**: cluster reads from templates, made as the caller
//! - **Patch dispatcher**: applies rendered patches against the current snapshot
//! - **Admission boundary**: `AdmissionReview` in, `AdmissionReview` out

pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod injector;
pub mod lookup;
pub mod source;
pub mod trigger;

pub use cache::SchemaCache;
pub use dispatcher::PatchDispatcher;
pub use error::{KubeError, Result};
pub use injector::{AdmissionFailure, PatchInjector};
pub use lookup::{ClusterLookups, ImpersonatedLookup, ImpersonatingLookups, ScopedLookups};
pub use source::{
    FetchCounts, KubeSchemaSource, MockSchemaSource, OPENAPI_V2_PATH, SchemaSource,
    StaticSchemaSource,
};
pub use trigger::{RefreshKey, RefreshQueue, RefreshWorker, forward_events, refresh_queue, watch_crds};
