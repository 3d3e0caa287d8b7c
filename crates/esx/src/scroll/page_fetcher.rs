//! 📄 PageFetcher: one request in, one round trip, one `Batch` out.
//!
//! No state, no buffering, no retries. It renders the request, calls the
//! [`SearchClient`], and maps every raw hit through the injected mapper closure.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::backends::SearchClient;
use crate::common::{Batch, KeepAlive, RawHit, ScrollToken, SearchResponse};
use crate::errors::EsxError;
use crate::query::Query;

/// 🧬 Turns one raw hit into whatever the caller wants to iterate over.
pub type HitMapper<T> = Arc<dyn Fn(RawHit) -> Result<T, EsxError> + Send + Sync>;

/// 📄 Issues single paged searches and scroll continuations against one index.
pub struct PageFetcher<T> {
    client: Arc<dyn SearchClient>,
    index: String,
    keep_alive: KeepAlive,
    mapper: HitMapper<T>,
}

impl<T> fmt::Debug for PageFetcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFetcher")
            .field("client", &self.client)
            .field("index", &self.index)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

impl<T> PageFetcher<T> {
    pub fn new(
        client: Arc<dyn SearchClient>,
        index: impl Into<String>,
        keep_alive: KeepAlive,
        mapper: impl Fn(RawHit) -> Result<T, EsxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            client,
            index: index.into(),
            keep_alive,
            mapper: Arc::new(mapper),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }

    /// 🎟️ Open a scroll. The query must be paged or limiting, see [`Query::render_scroll`].
    ///
    /// Zero hits is a valid answer. When the hits fail to map, the cursor the engine just
    /// opened is released before the error is returned, since nobody else will ever see it.
    pub async fn fetch_first(&self, query: &Query) -> Result<Batch<T>, EsxError> {
        let request = query.render_scroll(&self.keep_alive)?;
        debug!(
            "🎟️ opening scroll on '{}' (page size {}, keep-alive {})",
            self.index,
            request.size(),
            self.keep_alive
        );
        let response = self.client.search(&self.index, &request).await?;
        let token = response.scroll_token();
        match self.to_batch(response) {
            Ok(batch) => Ok(batch),
            Err(err) => {
                if let Some(token) = token {
                    // best effort: the mapping error is the one worth reporting
                    if let Err(clear_err) = self.clear(token).await {
                        warn!("🧹 could not release a cursor after a mapping failure: {}", clear_err);
                    }
                }
                Err(err)
            }
        }
    }

    /// ➡️ Continue a scroll. Expired or unknown tokens surface as the engine reported them.
    pub async fn fetch_next(&self, token: &ScrollToken) -> Result<Batch<T>, EsxError> {
        trace!("➡️ continuing {:?} on '{}'", token, self.index);
        let response = self.client.scroll(token, &self.keep_alive).await?;
        self.to_batch(response)
    }

    /// 📄 One non-scrolling page, `from`/`size` style.
    pub async fn fetch_page(&self, query: &Query) -> Result<Batch<T>, EsxError> {
        let request = query.render_page();
        debug!(
            "📄 fetching page from {} size {} on '{}'",
            request.from(),
            request.size(),
            self.index
        );
        let response = self.client.search(&self.index, &request).await?;
        self.to_batch(response)
    }

    /// 🧹 Release a cursor on the engine side.
    pub async fn clear(&self, token: ScrollToken) -> Result<(), EsxError> {
        debug!("🧹 clearing {:?}", token);
        self.client.clear_scroll(&[token]).await
    }

    fn to_batch(&self, response: SearchResponse) -> Result<Batch<T>, EsxError> {
        let token = response.scroll_token();
        let hits = response
            .hits
            .hits
            .into_iter()
            .map(|raw| (self.mapper)(raw))
            .collect::<Result<Vec<T>, EsxError>>()?;
        trace!("📦 mapped a batch of {} hit(s)", hits.len());
        Ok(Batch {
            hits,
            token,
            total_hits: response.hits.total,
            max_score: response.hits.max_score,
            aggregations: response.aggregations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::InMemoryEngine;
    use crate::query::Pagination;
    use serde_json::{Value, json};

    fn source_of(raw: RawHit) -> Result<Value, EsxError> {
        Ok(raw.source.unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn the_one_where_the_first_page_brings_a_token_and_a_total() -> Result<(), EsxError> {
        let engine = InMemoryEngine::default();
        for n in 0..3 {
            engine.put_document("books", &n.to_string(), json!({ "n": n })).await;
        }
        let fetcher = PageFetcher::new(Arc::new(engine.clone()), "books", KeepAlive::default(), source_of);

        let first = fetcher
            .fetch_first(&Query::match_all().with_pagination(Pagination::paged(0, 2)))
            .await?;
        assert_eq!(first.hits, vec![json!({ "n": 0 }), json!({ "n": 1 })]);
        assert_eq!(first.total_hits.map(|t| t.value), Some(3));
        let token = first.token.ok_or(EsxError::NoSuchElement)?;

        let next = fetcher.fetch_next(&token).await?;
        assert_eq!(next.hits, vec![json!({ "n": 2 })]);
        assert!(next.token.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_unpaged_never_reaches_the_engine() {
        let engine = InMemoryEngine::default();
        let fetcher = PageFetcher::new(Arc::new(engine.clone()), "books", KeepAlive::default(), source_of);

        let err = fetcher.fetch_first(&Query::match_all()).await.err();
        assert!(matches!(err, Some(EsxError::InvalidQuery(_))));
        assert_eq!(engine.calls().await.search, 0);
    }

    #[tokio::test]
    async fn the_one_where_a_mapping_failure_still_releases_the_fresh_cursor() {
        let engine = InMemoryEngine::default();
        for n in 0..4 {
            engine.put_document("books", &n.to_string(), json!({ "n": n })).await;
        }
        let fetcher = PageFetcher::new(Arc::new(engine.clone()), "books", KeepAlive::default(), |_raw: RawHit| {
            Err::<Value, _>(EsxError::Mapping("nope".into()))
        });

        let err = fetcher
            .fetch_first(&Query::match_all().with_pagination(Pagination::paged(0, 2)))
            .await
            .err();
        assert!(matches!(err, Some(EsxError::Mapping(_))));
        assert_eq!(engine.calls().await.clear_scroll, 1);
        assert_eq!(engine.open_scroll_contexts().await, 0);
    }
}
