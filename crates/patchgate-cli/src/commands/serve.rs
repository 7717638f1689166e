//! Serve command - run the mutating admission webhook

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use clap::Args;
use kube::api::DynamicObject;
use kube::core::admission::AdmissionReview;
use patchgate_kube::{
    ClusterLookups, KubeSchemaSource, PatchDispatcher, PatchInjector, SchemaCache, refresh_queue,
    watch_crds,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{CliError, Result};

/// How long in-flight admissions get to finish after shutdown starts
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:9443", env = "PATCHGATE_BIND")]
    pub bind: SocketAddr,

    /// TLS certificate (PEM); without it the server speaks plain HTTP
    #[arg(long, env = "PATCHGATE_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, env = "PATCHGATE_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Refresh the schema cache when CustomResourceDefinitions change
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "PATCHGATE_WATCH_CRDS")]
    pub watch_crds: bool,

    /// Fail directives that reference undefined variables
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "PATCHGATE_STRICT_TEMPLATES")]
    pub strict_templates: bool,
}

#[derive(Clone)]
pub struct AppState {
    injector: PatchInjector,
    cache: Arc<SchemaCache>,
}

/// Build the webhook routes
pub fn router(injector: PatchInjector, cache: Arc<SchemaCache>) -> Router {
    Router::new()
        .route("/mutate", post(mutate))
        .route("/healthz", get(healthz))
        .with_state(AppState { injector, cache })
}

async fn mutate(State(state): State<AppState>, body: Bytes) -> Json<AdmissionReview<DynamicObject>> {
    Json(state.injector.review(&body).await)
}

async fn healthz(State(state): State<AppState>) -> StatusCode {
    if state.cache.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = kube::Config::infer()
        .await
        .map_err(|e| CliError::cluster(e.to_string()))?;
    let client = kube::Client::try_from(config.clone()).map_err(|e| CliError::cluster(e.to_string()))?;

    let cache = Arc::new(SchemaCache::new(Arc::new(KubeSchemaSource::new(client.clone()))));
    // without an initial snapshot no strategic merge can succeed
    cache.refresh().await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    if args.watch_crds {
        let (queue, worker) = refresh_queue();
        tokio::spawn(worker.run(Arc::clone(&cache), shutdown.clone()));
        tokio::spawn(watch_crds(client, queue, shutdown.clone()));
    } else {
        warn!("CRD watch disabled, schema cache will not refresh");
    }

    let lookups = ClusterLookups::new(config, Handle::current());
    let injector = PatchInjector::new(PatchDispatcher::new(Arc::clone(&cache)), Arc::new(lookups))
        .strict_templates(args.strict_templates);
    let app = router(injector, cache);

    match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => serve_tls(app, args.bind, cert, key, shutdown).await,
        _ => serve_plain(app, args.bind, shutdown).await,
    }
}

async fn serve_tls(
    app: Router,
    bind: SocketAddr,
    cert: &Path,
    key: &Path,
    shutdown: CancellationToken,
) -> Result<()> {
    // both rustls backends may be linked in; pick one for the whole process
    let _ = rustls::crypto::ring::default_provider().install_default();

    let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await?;
    let handle = axum_server::Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown.cancelled().await;
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        }
    });

    info!(%bind, "serving admission webhook over HTTPS");
    axum_server::bind_rustls(bind, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

async fn serve_plain(app: Router, bind: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    warn!(%bind, "serving admission webhook over plain HTTP");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutting down");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchgate_engine::NoLookups;
    use patchgate_kube::StaticSchemaSource;

    fn state() -> AppState {
        let source = StaticSchemaSource::new(br#"{"definitions": {}}"#.to_vec());
        let cache = Arc::new(SchemaCache::new(Arc::new(source)));
        let injector = PatchInjector::new(
            PatchDispatcher::new(Arc::clone(&cache)),
            Arc::new(Arc::new(NoLookups)),
        );
        AppState { injector, cache }
    }

    #[tokio::test]
    async fn test_healthz_waits_for_first_refresh() {
        let state = state();
        assert_eq!(healthz(State(state.clone())).await, StatusCode::SERVICE_UNAVAILABLE);

        state.cache.refresh().await.unwrap();
        assert_eq!(healthz(State(state)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mutate_answers_garbage_with_a_review() {
        let Json(review) = mutate(State(state()), Bytes::from_static(b"not a review")).await;
        let response = review.response.unwrap();
        assert!(!response.allowed);
        assert_eq!(response.result.code, 400);
    }
}
