//! Where OpenAPI documents come from
//!
//! - **Cluster**: `GET /openapi/v2` on the API server (production)
//! - **Static**: a document held in memory (offline rendering)
//! - **Mock**: scripted responses with call counts (tests)

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{KubeError, Result};

/// Path of the aggregated OpenAPI v2 document
pub const OPENAPI_V2_PATH: &str = "/openapi/v2";

/// Source of the raw OpenAPI v2 document
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Fetch the complete document, fresh on every call
    async fn fetch(&self) -> Result<Vec<u8>>;
}

/// Fetches the document from the API server with the engine's own credentials
#[derive(Clone)]
pub struct KubeSchemaSource {
    client: kube::Client,
}

impl KubeSchemaSource {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SchemaSource for KubeSchemaSource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        let request = http::Request::get(OPENAPI_V2_PATH)
            .header(http::header::ACCEPT, "application/json")
            .body(Vec::new())
            .map_err(|e| KubeError::SchemaFetch(e.to_string()))?;

        let text = self.client.request_text(request).await?;
        Ok(text.into_bytes())
    }
}

/// A fixed document
#[derive(Debug, Clone)]
pub struct StaticSchemaSource {
    document: Arc<Vec<u8>>,
}

impl StaticSchemaSource {
    pub fn new(document: impl Into<Vec<u8>>) -> Self {
        Self {
            document: Arc::new(document.into()),
        }
    }
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        Ok(self.document.as_ref().clone())
    }
}

/// Counts of fetches performed, for test assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchCounts {
    pub fetches: usize,
    pub failures: usize,
}

/// Scripted source for tests
///
/// Responses are served in order; once only one is left it is repeated.
#[derive(Clone, Default)]
pub struct MockSchemaSource {
    responses: Arc<Mutex<VecDeque<std::result::Result<Vec<u8>, String>>>>,
    counts: Arc<Mutex<FetchCounts>>,
}

impl MockSchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response
    pub fn push_document(&self, document: impl Into<Vec<u8>>) -> &Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(document.into()));
        }
        self
    }

    /// Queue a failed response
    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(message.into()));
        }
        self
    }

    pub fn counts(&self) -> FetchCounts {
        self.counts.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SchemaSource for MockSchemaSource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        let next = {
            let mut queue = self
                .responses
                .lock()
                .map_err(|_| KubeError::SchemaFetch("mock source poisoned".to_string()))?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };

        let outcome = next.unwrap_or_else(|| Err("no response queued".to_string()));
        if let Ok(mut counts) = self.counts.lock() {
            counts.fetches += 1;
            if outcome.is_err() {
                counts.failures += 1;
            }
        }
        outcome.map_err(KubeError::SchemaFetch)
    }
}
