//! Schema cache: the cluster's OpenAPI models as an atomically swapped snapshot
//!
//! Readers take an `Arc` to the current snapshot and keep using it for the rest of
//! their request, so a refresh never changes what an in-flight admission sees.
//! The fetch and parse happen outside the swap; the swap itself is a single
//! pointer store.

use arc_swap::ArcSwap;
use patchgate_core::SchemaModels;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Result;
use crate::source::SchemaSource;

/// Holds the current [`SchemaModels`] snapshot and knows how to refresh it
pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    snapshot: ArcSwap<SchemaModels>,
    /// Number of successful refreshes so far
    generation: watch::Sender<u64>,
}

impl SchemaCache {
    /// A cache holding an empty snapshot until the first refresh
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            source,
            snapshot: ArcSwap::from_pointee(SchemaModels::empty()),
            generation,
        }
    }

    /// Fetch the document and replace the snapshot.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<()> {
        let document = self.source.fetch().await?;
        let models = SchemaModels::from_document(&document)?;
        let count = models.len();

        self.snapshot.store(Arc::new(models));
        self.generation.send_modify(|g| *g += 1);

        tracing::info!(models = count, generation = self.generation(), "schema cache refreshed");
        Ok(())
    }

    /// The latest snapshot
    pub fn current(&self) -> Arc<SchemaModels> {
        self.snapshot.load_full()
    }

    /// Number of successful refreshes
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Whether at least one refresh has succeeded
    pub fn is_ready(&self) -> bool {
        self.generation() > 0
    }

    /// Subscribe to generation changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
