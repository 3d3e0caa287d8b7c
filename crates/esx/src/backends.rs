//! 🔌 Backends: where the real I/O happens.
//!
//! 🎭 This module is the casting agency. Need a real Elasticsearch cluster on the
//! other end of an HTTP connection? Need an engine that lives in a `Vec` and never
//! pages anyone at 3am? We've got a backend for that.
//!
//! # Knowledge Graph 🧠
//! - Pattern: trait (`SearchClient`) → concrete impls (`ElasticsearchClient`,
//!   `InMemoryEngine`) → dispatcher enum (`EngineBackend`) → `from_config`.
//! - Everything above this module talks to `Arc<dyn SearchClient>` and never
//!   learns which one it got.
//! - These four calls are the only places the library suspends on I/O.

use async_trait::async_trait;

use crate::app_config::EngineConfig;
use crate::bulk::{BulkRequest, BulkResponse};
use crate::common::{KeepAlive, ScrollToken, SearchResponse};
use crate::errors::EsxError;
use crate::query::SearchRequest;

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchClient, ElasticsearchConfig};
pub use in_mem::{CallLog, InMemoryEngine, InMemoryEngineConfig};

/// 📡 The black-box RPC boundary to a search engine.
///
/// # Contract 📜
/// - `search` runs one search. With `request.keep_alive` set it also opens a scroll.
/// - `scroll` continues a scroll. Unknown or expired tokens come back as
///   `SearchExecution` errors, untouched and unretried.
/// - `clear_scroll` releases cursors. Best effort from the caller's side.
/// - `bulk` submits one bulk request and returns the per-item answer as-is.
#[async_trait]
pub trait SearchClient: std::fmt::Debug + Send + Sync {
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse, EsxError>;

    async fn scroll(&self, token: &ScrollToken, keep_alive: &KeepAlive) -> Result<SearchResponse, EsxError>;

    async fn clear_scroll(&self, tokens: &[ScrollToken]) -> Result<(), EsxError>;

    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse, EsxError>;
}

/// 🎭 The many faces of an engine. Dispatches via match, resolved from config.
#[derive(Debug)]
pub enum EngineBackend {
    Elasticsearch(ElasticsearchClient),
    InMemory(InMemoryEngine),
}

impl EngineBackend {
    /// 🔧 Build the backend the config asks for. The Elasticsearch one pings on the way up.
    pub async fn from_config(config: &EngineConfig) -> Result<Self, EsxError> {
        match config {
            EngineConfig::Elasticsearch(es) => Ok(Self::Elasticsearch(ElasticsearchClient::new(es.clone()).await?)),
            EngineConfig::InMemory(mem) => Ok(Self::InMemory(InMemoryEngine::new(mem.clone()))),
        }
    }
}

#[async_trait]
impl SearchClient for EngineBackend {
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse, EsxError> {
        match self {
            Self::Elasticsearch(es) => es.search(index, request).await,
            Self::InMemory(mem) => mem.search(index, request).await,
        }
    }

    async fn scroll(&self, token: &ScrollToken, keep_alive: &KeepAlive) -> Result<SearchResponse, EsxError> {
        match self {
            Self::Elasticsearch(es) => es.scroll(token, keep_alive).await,
            Self::InMemory(mem) => mem.scroll(token, keep_alive).await,
        }
    }

    async fn clear_scroll(&self, tokens: &[ScrollToken]) -> Result<(), EsxError> {
        match self {
            Self::Elasticsearch(es) => es.clear_scroll(tokens).await,
            Self::InMemory(mem) => mem.clear_scroll(tokens).await,
        }
    }

    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse, EsxError> {
        match self {
            Self::Elasticsearch(es) => es.bulk(request).await,
            Self::InMemory(mem) => mem.bulk(request).await,
        }
    }
}
