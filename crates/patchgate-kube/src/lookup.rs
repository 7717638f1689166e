//! Cluster lookups performed as the admission caller
//!
//! Every request gets its own client, configured to impersonate the user, groups and
//! extra attributes from the admission request. The engine's service account is only
//! the transport; the API server authorizes each lookup against the caller.

use http::{HeaderName, HeaderValue};
use k8s_openapi::api::authentication::v1::UserInfo;
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::GroupVersionKind;
use kube::discovery::{self, Scope};
use patchgate_core::{ImpersonationContext, ResourceTypeKey};
use patchgate_engine::{LookupError, LookupProvider, ResourceLookup};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde_json::{Value as JsonValue, json};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Header prefix for impersonated extra attributes
const IMPERSONATE_EXTRA_PREFIX: &str = "impersonate-extra-";

/// Bytes of an extra-attribute key that cannot appear in a header name as-is.
/// The API server percent-decodes the key after stripping the prefix.
const EXTRA_KEY_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'(')
    .add(b')')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'{')
    .add(b'}');

/// Hands out a [`LookupProvider`] tied to one request's cancellation
pub trait ScopedLookups: Send + Sync {
    fn for_request(&self, cancel: &CancellationToken) -> Arc<dyn LookupProvider>;
}

/// Providers with nothing to cancel serve every request as-is
impl<P: LookupProvider + 'static> ScopedLookups for Arc<P> {
    fn for_request(&self, _cancel: &CancellationToken) -> Arc<dyn LookupProvider> {
        self.clone()
    }
}

/// Identity of the admission caller
pub(crate) fn identity_of(user: &UserInfo) -> ImpersonationContext {
    ImpersonationContext {
        username: user.username.clone().unwrap_or_default(),
        groups: user.groups.clone().unwrap_or_default(),
        extra: user.extra.clone().unwrap_or_default(),
    }
}

/// Lookups against the live cluster
#[derive(Clone)]
pub struct ClusterLookups {
    config: kube::Config,
    handle: Handle,
}

impl ClusterLookups {
    /// `config` is the engine's own configuration; it is cloned and narrowed to the
    /// caller for every request. `handle` runs the lookups issued from template code.
    pub fn new(config: kube::Config, handle: Handle) -> Self {
        Self { config, handle }
    }
}

impl ScopedLookups for ClusterLookups {
    fn for_request(&self, cancel: &CancellationToken) -> Arc<dyn LookupProvider> {
        Arc::new(ImpersonatingLookups {
            config: self.config.clone(),
            handle: self.handle.clone(),
            cancel: cancel.clone(),
        })
    }
}

/// Binds one request's lookups to its caller
pub struct ImpersonatingLookups {
    config: kube::Config,
    handle: Handle,
    cancel: CancellationToken,
}

impl LookupProvider for ImpersonatingLookups {
    /// Nothing is built or checked until the first lookup
    fn for_identity(
        &self,
        identity: &ImpersonationContext,
    ) -> Result<Arc<dyn ResourceLookup>, LookupError> {
        Ok(Arc::new(ImpersonatedLookup {
            config: self.config.clone(),
            identity: identity.clone(),
            handle: self.handle.clone(),
            cancel: self.cancel.clone(),
            client: OnceLock::new(),
        }))
    }
}

/// Client configuration acting as `identity`
fn impersonated_config(
    base: &kube::Config,
    identity: &ImpersonationContext,
) -> Result<kube::Config, LookupError> {
    // Without a username the request would silently run with our own credentials
    if identity.is_anonymous() {
        return Err(identity_error(identity, "admission request carries no username"));
    }

    let mut config = base.clone();
    config.auth_info.impersonate = Some(identity.username.clone());
    config.auth_info.impersonate_groups =
        (!identity.groups.is_empty()).then(|| identity.groups.clone());

    for (key, values) in &identity.extra {
        let name = extra_header_name(key)
            .map_err(|e| identity_error(identity, format!("extra attribute {key:?}: {e}")))?;
        for value in values {
            let value = HeaderValue::from_str(value)
                .map_err(|e| identity_error(identity, format!("extra attribute {key:?}: {e}")))?;
            config.headers.push((name.clone(), value));
        }
    }

    Ok(config)
}

/// `Impersonate-Extra-<key>`, with the key percent-encoded
fn extra_header_name(key: &str) -> Result<HeaderName, http::header::InvalidHeaderName> {
    let key = utf8_percent_encode(key, EXTRA_KEY_ESCAPES).to_string();
    HeaderName::try_from(format!("{}{}", IMPERSONATE_EXTRA_PREFIX, key).to_ascii_lowercase())
}

/// A lookup capability for a single caller
///
/// The impersonating client is built on the first lookup and reused after that.
/// Must be called from a thread that may block, such as a `spawn_blocking` task.
pub struct ImpersonatedLookup {
    config: kube::Config,
    identity: ImpersonationContext,
    handle: Handle,
    cancel: CancellationToken,
    client: OnceLock<Result<kube::Client, LookupError>>,
}

impl ImpersonatedLookup {
    fn client(&self) -> Result<kube::Client, LookupError> {
        self.client
            .get_or_init(|| {
                let config = impersonated_config(&self.config, &self.identity)?;

                // building the client spawns its service stack onto the runtime
                let _runtime = self.handle.enter();
                let client = kube::Client::try_from(config)
                    .map_err(|e| identity_error(&self.identity, e.to_string()))?;

                debug!(user = %self.identity.username, groups = ?self.identity.groups, "impersonating client ready");
                Ok(client)
            })
            .clone()
    }

    /// Run a cluster call, giving up as soon as the request is cancelled
    fn block_on<T>(&self, call: impl Future<Output = Result<T, LookupError>>) -> Result<T, LookupError> {
        self.handle.block_on(async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(LookupError::Cancelled),
                result = call => result,
            }
        })
    }
}

async fn fetch(
    client: &kube::Client,
    api_version: &str,
    kind: &str,
    namespace: &str,
    name: &str,
) -> Result<JsonValue, LookupError> {
    let key = ResourceTypeKey::from_api_version(api_version, kind);
    let gvk = GroupVersionKind::gvk(&key.group, key.version_or_default(), &key.kind);
    let failed = |message: String| LookupError::Failed {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        message,
    };

    let (resource, capabilities) = discovery::pinned_kind(client, &gvk)
        .await
        .map_err(|_| LookupError::UnknownType {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        })?;

    let api: Api<DynamicObject> = if capabilities.scope == Scope::Namespaced && !namespace.is_empty() {
        Api::namespaced_with(client.clone(), namespace, &resource)
    } else {
        Api::all_with(client.clone(), &resource)
    };

    if name.is_empty() {
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| failed(e.to_string()))?;
        let items = list
            .items
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| failed(e.to_string()))?;
        return Ok(json!({ "items": items }));
    }

    match api.get_opt(name).await.map_err(|e| failed(e.to_string()))? {
        Some(object) => serde_json::to_value(object).map_err(|e| failed(e.to_string())),
        None => Ok(json!({})),
    }
}

impl ResourceLookup for ImpersonatedLookup {
    fn lookup(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<JsonValue, LookupError> {
        if self.cancel.is_cancelled() {
            return Err(LookupError::Cancelled);
        }
        let client = self.client()?;
        self.block_on(fetch(&client, api_version, kind, namespace, name))
    }
}

fn identity_error(identity: &ImpersonationContext, message: impl Into<String>) -> LookupError {
    LookupError::Identity {
        username: identity.username.clone(),
        message: message.into(),
    }
}
