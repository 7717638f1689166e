//! Refresh trigger: CRD changes drive schema cache refreshes
//!
//! Every event on any CustomResourceDefinition maps to the same [`RefreshKey::GLOBAL`].
//! The queue between the watcher and the refresh worker holds at most one pending
//! key, so a burst of N definition changes collapses into at most two refreshes:
//! the one in progress and the one queued behind it.

use futures::{Stream, StreamExt};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::Api;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::SchemaCache;

/// Work item identity for schema refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefreshKey(&'static str);

impl RefreshKey {
    /// The one key every definition change maps to
    pub const GLOBAL: RefreshKey = RefreshKey("openapi-schema");
}

impl fmt::Display for RefreshKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Map a watch event to its refresh key; the changed object is irrelevant
pub fn refresh_key<K>(_event: &Event<K>) -> RefreshKey {
    RefreshKey::GLOBAL
}

/// Producer side of the refresh queue
#[derive(Clone)]
pub struct RefreshQueue {
    tx: mpsc::Sender<RefreshKey>,
}

impl RefreshQueue {
    /// Request a refresh. Returns `false` when one is already pending.
    pub fn enqueue(&self, key: RefreshKey) -> bool {
        match self.tx.try_send(key) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(%key, "refresh already pending");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(%key, "refresh worker has stopped");
                false
            }
        }
    }
}

/// Consumer side of the refresh queue
pub struct RefreshWorker {
    rx: mpsc::Receiver<RefreshKey>,
}

/// Create a coalescing refresh queue
pub fn refresh_queue() -> (RefreshQueue, RefreshWorker) {
    let (tx, rx) = mpsc::channel(1);
    (RefreshQueue { tx }, RefreshWorker { rx })
}

impl RefreshWorker {
    /// Refresh the cache once per dequeued key until shutdown or until every
    /// producer is gone. Failures are logged; the previous snapshot stays current.
    pub async fn run(mut self, cache: Arc<SchemaCache>, shutdown: CancellationToken) {
        loop {
            let key = tokio::select! {
                _ = shutdown.cancelled() => break,
                key = self.rx.recv() => match key {
                    Some(key) => key,
                    None => break,
                },
            };

            match cache.refresh().await {
                Ok(()) => debug!(%key, generation = cache.generation(), "refresh done"),
                Err(e) => error!(%key, error = %e, "schema refresh failed, keeping previous snapshot"),
            }
        }
        info!("refresh worker stopped");
    }
}

/// Forward every event of a watch stream to the queue
///
/// Stream errors are logged and skipped. Returns when the stream ends or on shutdown.
pub async fn forward_events<S, K, E>(stream: S, queue: &RefreshQueue, shutdown: &CancellationToken)
where
    S: Stream<Item = Result<Event<K>, E>>,
    E: fmt::Display,
{
    futures::pin_mut!(stream);
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                queue.enqueue(refresh_key(&event));
            }
            Some(Err(e)) => warn!(error = %e, "CRD watch error"),
            None => {
                warn!("CRD watch stream ended");
                return;
            }
        }
    }
}

/// Watch all CustomResourceDefinitions and request a refresh on every change
pub async fn watch_crds(client: kube::Client, queue: RefreshQueue, shutdown: CancellationToken) {
    let api: Api<CustomResourceDefinition> = Api::all(client);
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    info!("CRD watcher started");
    forward_events(stream, &queue, &shutdown).await;
}
