//! Admission boundary: decode the review, render the directive, apply it
//!
//! Each request runs independently. The only shared state it touches is the schema
//! snapshot, loaded once by the dispatcher. Rendering may block on impersonated
//! lookups, so it runs on the blocking pool; dropping the request future cancels
//! those lookups.

use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use patchgate_core::{CoreError, ImpersonationContext, PatchOutcome, ResourceTypeKey};
use patchgate_engine::{Engine, EngineError, RenderedDirective};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dispatcher::PatchDispatcher;
use crate::error::KubeError;
use crate::lookup::{ScopedLookups, identity_of};

/// Every way a single admission can fail
///
/// All failures are terminal for their request and are returned to the API server as
/// an errored response; nothing is retried here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionFailure {
    #[error("cannot decode admission request: {0}")]
    DecodeError(String),

    #[error("cannot parse patch directive: {0}")]
    TemplateParseError(String),

    #[error("cannot evaluate patch directive: {0}")]
    TemplateEvalError(String),

    #[error("cannot normalize rendered patch: {0}")]
    OutputNormalizationError(String),

    #[error("{0}")]
    UnsupportedPatchType(String),

    #[error("no schema for {0}")]
    SchemaLookupMiss(String),

    #[error("cannot apply patch: {0}")]
    PatchApplyError(String),
}

impl AdmissionFailure {
    /// HTTP status carried in the admission response
    pub fn status_code(&self) -> u16 {
        match self {
            Self::DecodeError(_) => 400,
            _ => 500,
        }
    }

    /// Short name of the failure class
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DecodeError(_) => "DecodeError",
            Self::TemplateParseError(_) => "TemplateParseError",
            Self::TemplateEvalError(_) => "TemplateEvalError",
            Self::OutputNormalizationError(_) => "OutputNormalizationError",
            Self::UnsupportedPatchType(_) => "UnsupportedPatchType",
            Self::SchemaLookupMiss(_) => "SchemaLookupMiss",
            Self::PatchApplyError(_) => "PatchApplyError",
        }
    }

    /// Errored response for `request`
    pub fn into_response(self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let code = self.status_code();
        let mut response = AdmissionResponse::from(request).deny(self.to_string());
        response.result.code = code;
        response.result.reason = self.reason().to_string();
        response
    }
}

impl From<EngineError> for AdmissionFailure {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Parse(e) => Self::TemplateParseError(e.to_string()),
            EngineError::Eval(e) => Self::TemplateEvalError(e.to_string()),
            EngineError::Normalization { message } => Self::OutputNormalizationError(message),
            EngineError::PatchType(e) => Self::UnsupportedPatchType(e.to_string()),
            EngineError::InvalidObject => Self::DecodeError(EngineError::InvalidObject.to_string()),
            EngineError::Lookup(e) => Self::TemplateEvalError(e.to_string()),
        }
    }
}

impl From<KubeError> for AdmissionFailure {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Core(CoreError::TypeNotFound { key, model_name }) => {
                Self::SchemaLookupMiss(format!("{} (model name {})", key, model_name))
            }
            KubeError::Core(e @ CoreError::UnsupportedPatchType(_)) => {
                Self::UnsupportedPatchType(e.to_string())
            }
            other => Self::PatchApplyError(other.to_string()),
        }
    }
}

/// Mutating admission handler for patch directives
#[derive(Clone)]
pub struct PatchInjector {
    dispatcher: PatchDispatcher,
    lookups: Arc<dyn ScopedLookups>,
    strict_templates: bool,
}

impl PatchInjector {
    pub fn new(dispatcher: PatchDispatcher, lookups: Arc<dyn ScopedLookups>) -> Self {
        Self {
            dispatcher,
            lookups,
            strict_templates: true,
        }
    }

    /// Fail on undefined template variables (default: on)
    pub fn strict_templates(mut self, strict: bool) -> Self {
        self.strict_templates = strict;
        self
    }

    /// Handle a raw `AdmissionReview` body and produce the review to send back
    pub async fn review(&self, body: &[u8]) -> AdmissionReview<DynamicObject> {
        let body: JsonValue = match serde_json::from_slice(body) {
            Ok(body) => body,
            Err(e) => return decode_failure(e.to_string()),
        };
        // patches and diffs run against the object exactly as the API server sent it
        let raw_object = body.pointer("/request/object").filter(|o| o.is_object()).cloned();

        let review: AdmissionReview<DynamicObject> = match serde_json::from_value(body) {
            Ok(review) => review,
            Err(e) => return decode_failure(e.to_string()),
        };
        let request: AdmissionRequest<DynamicObject> = match review.try_into() {
            Ok(request) => request,
            Err(e) => return decode_failure(e.to_string()),
        };

        self.respond(&request, raw_object).await.into_review()
    }

    /// Decide one already decoded admission request
    ///
    /// The object is taken from its typed form, which drops fields such as a null
    /// `creationTimestamp`; [`PatchInjector::review`] keeps the object as received.
    pub async fn admit(&self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        self.respond(request, None).await
    }

    async fn respond(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        raw_object: Option<JsonValue>,
    ) -> AdmissionResponse {
        match self.evaluate(request, raw_object).await {
            Ok(None) => AdmissionResponse::from(request),
            Ok(Some(outcome)) if outcome.is_noop() => {
                debug!(uid = %request.uid, "directive produced no changes");
                AdmissionResponse::from(request)
            }
            Ok(Some(outcome)) => {
                let operations = outcome.diff.0.len();
                match AdmissionResponse::from(request).with_patch(outcome.diff) {
                    Ok(response) => {
                        info!(uid = %request.uid, name = %object_name(request), operations, "patch injected");
                        response
                    }
                    Err(e) => AdmissionFailure::PatchApplyError(e.to_string()).into_response(request),
                }
            }
            Err(failure) => {
                error!(
                    uid = %request.uid,
                    name = %object_name(request),
                    namespace = request.namespace.as_deref().unwrap_or_default(),
                    reason = failure.reason(),
                    error = %failure,
                    "admission failed"
                );
                failure.into_response(request)
            }
        }
    }

    /// Decode, render and apply. `Ok(None)` means the object carries no directive.
    async fn evaluate(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        raw_object: Option<JsonValue>,
    ) -> Result<Option<PatchOutcome>, AdmissionFailure> {
        let object = request
            .object
            .as_ref()
            .ok_or_else(|| AdmissionFailure::DecodeError("request has no object".to_string()))?;
        let value = match raw_object {
            Some(value) => value,
            None => serde_json::to_value(object).map_err(|e| AdmissionFailure::DecodeError(e.to_string()))?,
        };
        let raw = serde_json::to_vec(&value).map_err(|e| AdmissionFailure::DecodeError(e.to_string()))?;
        let key = resource_key(request, object);
        let identity = identity_of(&request.user_info);

        let Some(directive) = self.render(value, identity).await? else {
            return Ok(None);
        };

        debug!(kind = %key, patch_type = %directive.patch_type, "applying directive");
        let outcome = self
            .dispatcher
            .apply(&raw, &directive.patch, directive.patch_type, &key)?;
        Ok(Some(outcome))
    }

    /// Render on the blocking pool; lookups stop when this future is dropped
    async fn render(
        &self,
        object: JsonValue,
        identity: ImpersonationContext,
    ) -> Result<Option<RenderedDirective>, AdmissionFailure> {
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let engine = Engine::builder()
            .strict(self.strict_templates)
            .lookups(self.lookups.for_request(&cancel))
            .build();

        let rendered = tokio::task::spawn_blocking(move || engine.render(&object, &identity))
            .await
            .map_err(|e| AdmissionFailure::TemplateEvalError(format!("render task failed: {}", e)))?;

        Ok(rendered?)
    }
}

/// Resource type of the admitted object, from the object itself when it says
fn resource_key(request: &AdmissionRequest<DynamicObject>, object: &DynamicObject) -> ResourceTypeKey {
    match &object.types {
        Some(types) if !types.kind.is_empty() => {
            ResourceTypeKey::from_api_version(&types.api_version, &types.kind)
        }
        _ => ResourceTypeKey::new(
            request.kind.group.clone(),
            request.kind.version.clone(),
            request.kind.kind.clone(),
        ),
    }
}

fn object_name(request: &AdmissionRequest<DynamicObject>) -> String {
    if !request.name.is_empty() {
        return request.name.clone();
    }
    request
        .object
        .as_ref()
        .and_then(|o| o.metadata.generate_name.clone())
        .unwrap_or_default()
}

fn decode_failure(message: String) -> AdmissionReview<DynamicObject> {
    let failure = AdmissionFailure::DecodeError(message);
    error!(reason = failure.reason(), error = %failure, "admission failed");

    let mut response = AdmissionResponse::invalid(failure.to_string());
    response.result.code = failure.status_code();
    response.into_review()
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchgate_engine::TemplateError;

    #[test]
    fn test_status_codes() {
        assert_eq!(AdmissionFailure::DecodeError(String::new()).status_code(), 400);
        for failure in [
            AdmissionFailure::TemplateParseError(String::new()),
            AdmissionFailure::TemplateEvalError(String::new()),
            AdmissionFailure::OutputNormalizationError(String::new()),
            AdmissionFailure::UnsupportedPatchType(String::new()),
            AdmissionFailure::SchemaLookupMiss(String::new()),
            AdmissionFailure::PatchApplyError(String::new()),
        ] {
            assert_eq!(failure.status_code(), 500, "{}", failure.reason());
        }
    }

    #[test]
    fn test_engine_errors_map_to_distinct_failures() {
        let parse = AdmissionFailure::from(EngineError::Parse(TemplateError::simple("bad")));
        let eval = AdmissionFailure::from(EngineError::Eval(TemplateError::simple("bad")));
        let normalize = AdmissionFailure::from(EngineError::Normalization {
            message: "bad".to_string(),
        });
        let patch_type = AdmissionFailure::from(EngineError::PatchType(
            CoreError::UnsupportedPatchType("text/plain".to_string()),
        ));

        assert_eq!(parse.reason(), "TemplateParseError");
        assert_eq!(eval.reason(), "TemplateEvalError");
        assert_eq!(normalize.reason(), "OutputNormalizationError");
        assert_eq!(patch_type.reason(), "UnsupportedPatchType");
    }

    #[test]
    fn test_dispatch_errors() {
        let miss = AdmissionFailure::from(KubeError::Core(CoreError::TypeNotFound {
            key: "apps/v1, Kind=Deployment".to_string(),
            model_name: "io.k8s.api.apps.v1.Deployment".to_string(),
        }));
        assert!(matches!(miss, AdmissionFailure::SchemaLookupMiss(ref m) if m.contains("Deployment")));

        let rejected = AdmissionFailure::from(KubeError::Core(CoreError::InvalidSchemaDocument {
            message: "x".to_string(),
        }));
        assert_eq!(rejected.reason(), "PatchApplyError");
    }
}
