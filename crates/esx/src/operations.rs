//! 🎛️ SearchOperations: the front door.
//!
//! Holds one shared `SearchClient` plus the configured defaults, and wires the
//! lower layers together so callers never build a `PageFetcher` by hand.
//!
//! ```text
//! search_for_stream ──▶ PageFetcher ──▶ SearchHitStream (opened eagerly)
//! search_page ────────▶ PageFetcher::fetch_page
//! bulk / bulk_index ──▶ BulkBatcher::submit ──▶ BulkFailureAggregator::check ──▶ write-back
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::app_config::{AppConfig, ScrollConfig};
use crate::backends::{EngineBackend, SearchClient};
use crate::bulk::{
    BulkBatcher, BulkFailureAggregator, BulkItemResult, BulkOperation, BulkOptions, DeleteOperation,
};
use crate::common::{RawHit, SearchHit, SearchPage};
use crate::document::{self, Document, IndexedObjectInformation};
use crate::errors::EsxError;
use crate::query::{Pagination, Query};
use crate::scroll::{PageFetcher, SearchHitStream};

/// 🎛️ High-level search and bulk entry points over one engine.
#[derive(Debug, Clone)]
pub struct SearchOperations {
    client: Arc<dyn SearchClient>,
    scroll: ScrollConfig,
    batcher: BulkBatcher,
}

impl SearchOperations {
    pub fn new(client: Arc<dyn SearchClient>, scroll: ScrollConfig) -> Self {
        Self {
            batcher: BulkBatcher::new(client.clone()),
            client,
            scroll,
        }
    }

    /// 🔧 Build the configured backend (pinging it, for Elasticsearch) and wrap it.
    pub async fn from_config(config: &AppConfig) -> Result<Self, EsxError> {
        let backend = EngineBackend::from_config(&config.engine).await?;
        Ok(Self::new(Arc::new(backend), config.scroll.clone()))
    }

    pub fn client(&self) -> &Arc<dyn SearchClient> {
        &self.client
    }

    pub fn scroll_config(&self) -> &ScrollConfig {
        &self.scroll
    }

    /// 🌊 Open a scroll with a custom hit mapper.
    ///
    /// `Unpaged` queries get the configured default page size. The opening search runs
    /// before this returns; the caller owns the stream from then on and must `close()` it.
    pub async fn search_for_stream_with<T>(
        &self,
        index: &str,
        query: Query,
        mapper: impl Fn(RawHit) -> Result<T, EsxError> + Send + Sync + 'static,
    ) -> Result<SearchHitStream<T>, EsxError> {
        let query = self.scrollable(query);
        let fetcher = PageFetcher::new(self.client.clone(), index, self.scroll.keep_alive.clone(), mapper);
        SearchHitStream::open(fetcher, query).await
    }

    /// 🌊 Open a scroll whose hits decode `_source` into `D`.
    pub async fn search_for_stream<D>(
        &self,
        index: &str,
        query: Query,
    ) -> Result<SearchHitStream<SearchHit<D>>, EsxError>
    where
        D: DeserializeOwned + 'static,
    {
        self.search_for_stream_with(index, query, SearchHit::<D>::from_raw).await
    }

    /// 📄 One `from`/`size` page, no cursor involved.
    pub async fn search_page<D>(&self, index: &str, query: &Query) -> Result<SearchPage<SearchHit<D>>, EsxError>
    where
        D: DeserializeOwned + 'static,
    {
        let fetcher = PageFetcher::new(
            self.client.clone(),
            index,
            self.scroll.keep_alive.clone(),
            SearchHit::<D>::from_raw,
        );
        Ok(fetcher.fetch_page(query).await?.into())
    }

    /// 📦 Submit operations in one bulk call. Any failed item turns the whole answer into
    /// a `BulkFailure`, which still carries every item result.
    pub async fn bulk(
        &self,
        operations: Vec<BulkOperation>,
        options: &BulkOptions,
    ) -> Result<Vec<BulkItemResult>, EsxError> {
        let results = self.batcher.submit(operations, options).await?;
        BulkFailureAggregator::check(results)
    }

    /// ✍️ Index every entity, then hand each one what the engine assigned.
    ///
    /// Entities are only touched when the whole bulk succeeded.
    pub async fn bulk_index<D: Document>(
        &self,
        documents: &mut [D],
        index: &str,
        options: &BulkOptions,
    ) -> Result<Vec<IndexedObjectInformation>, EsxError> {
        let operations = documents
            .iter()
            .map(|doc| document::index_operation(index, doc).map(BulkOperation::from))
            .collect::<Result<Vec<_>, EsxError>>()?;
        let results = self.bulk(operations, options).await?;
        document::write_back(documents, &results)
    }

    /// 🗑️ Delete by id. Ids that were already gone come back as `not_found` successes.
    pub async fn bulk_delete<S: AsRef<str>>(
        &self,
        index: &str,
        ids: &[S],
        options: &BulkOptions,
    ) -> Result<Vec<BulkItemResult>, EsxError> {
        let operations = ids
            .iter()
            .map(|id| BulkOperation::from(DeleteOperation::new(index, id.as_ref())))
            .collect();
        self.bulk(operations, options).await
    }

    fn scrollable(&self, query: Query) -> Query {
        match query.pagination {
            Pagination::Unpaged => {
                debug!(
                    "📏 unpaged query opening a scroll, using the default page size {}",
                    self.scroll.default_page_size
                );
                query.with_pagination(Pagination::paged(0, self.scroll.default_page_size))
            }
            _ => query,
        }
    }
}
