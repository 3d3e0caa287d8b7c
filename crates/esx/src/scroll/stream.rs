//! 🌊 SearchHitStream: a forward-only, pull-based view over a whole scroll.
//!
//! 🎬 *[a result set of unknown size. a caller who only wants the first five. a cursor
//! on the server that will sit there, holding a snapshot, until somebody says goodbye.]*
//!
//! ```text
//!   Fresh ──first fetch──▶ HasBuffered ◀──┐ refill
//!     │                     │    └────────┘
//!     │ empty first page    │ empty refill, or the last page had no token
//!     ▼                     ▼
//!   Exhausted ◀─────────────┘
//!
//!   any state ──close()──▶ Closed   (idempotent)
//! ```
//!
//! 🧠 Knowledge graph:
//! - `has_next()` is the only place that may suspend on I/O (and the only place fetch
//!   errors surface). `next()` is synchronous and only ever fails with `NoSuchElement`.
//! - `close()` releases the cursor unless the scroll already ran dry on its own. It never
//!   errors: a failed clear is logged and swallowed, the keep-alive cleans up after us.
//! - Limiting mode stops handing out hits at `max_results` while the cursor is still live,
//!   so `close()` still has work to do there.
//! - Rust has no async drop. Dropping a stream that still owns a cursor logs a warning and
//!   leaks the cursor until its keep-alive expires. Call `close()`. 🦆

use std::collections::VecDeque;

use futures::Stream;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::common::{Batch, TotalHits};
use crate::errors::EsxError;
use crate::query::Query;
use crate::scroll::cursor::ScrollCursor;
use crate::scroll::page_fetcher::PageFetcher;

/// 🚦 Where a stream is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing fetched yet.
    Fresh,
    /// At least one batch arrived and the scroll has not run dry.
    HasBuffered,
    /// The scroll ran dry. Nothing is held on the server.
    Exhausted,
    /// `close()` was called.
    Closed,
}

/// 🌊 Iterate over every hit of a query, one at a time, across as many scroll pages as it takes.
///
/// ```ignore
/// let mut stream = SearchHitStream::open(fetcher, query).await?;
/// let outcome = async {
///     while let Some(hit) = stream.try_next().await? {
///         handle(hit);
///     }
///     Ok::<_, EsxError>(())
/// }
/// .await;
/// stream.close().await; // on every path
/// outcome?;
/// ```
#[derive(Debug)]
pub struct SearchHitStream<T> {
    cursor: ScrollCursor<T>,
    pending_query: Option<Query>,
    buffer: VecDeque<T>,
    state: StreamState,
    delivered: usize,
    max_results: Option<usize>,
    total_hits: Option<TotalHits>,
    max_score: Option<f64>,
    aggregations: Option<Value>,
}

impl<T> SearchHitStream<T> {
    /// A `Fresh` stream. Nothing goes over the wire until the first `has_next()`.
    pub fn new(fetcher: PageFetcher<T>, query: Query) -> Self {
        Self {
            cursor: ScrollCursor::new(fetcher),
            max_results: query.pagination.max_results(),
            pending_query: Some(query),
            buffer: VecDeque::new(),
            state: StreamState::Fresh,
            delivered: 0,
            total_hits: None,
            max_score: None,
            aggregations: None,
        }
    }

    /// 🎟️ Create the stream and run the opening search right away, so a bad index or
    /// query fails here instead of at the first `has_next()`.
    pub async fn open(fetcher: PageFetcher<T>, query: Query) -> Result<Self, EsxError> {
        let mut stream = Self::new(fetcher, query);
        stream.fetch_first().await?;
        Ok(stream)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// How many elements `next()` has handed out so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// 📊 Total matching documents, as reported with the first page.
    pub fn total_hits(&self) -> Option<TotalHits> {
        self.total_hits
    }

    pub fn max_score(&self) -> Option<f64> {
        self.max_score
    }

    pub fn aggregations(&self) -> Option<&Value> {
        self.aggregations.as_ref()
    }

    fn limit_reached(&self) -> bool {
        self.max_results.is_some_and(|max| self.delivered >= max)
    }

    /// ❓ Is there another element? Fetches the next page when the buffer ran dry.
    ///
    /// Fetch errors come out of here, untouched. The stream stays closable afterwards.
    pub async fn has_next(&mut self) -> Result<bool, EsxError> {
        if self.limit_reached() {
            return Ok(false);
        }
        if !self.buffer.is_empty() {
            return Ok(true);
        }
        match self.state {
            StreamState::Exhausted | StreamState::Closed => Ok(false),
            StreamState::Fresh => self.fetch_first().await,
            StreamState::HasBuffered => {
                if !self.cursor.has_token() {
                    // 🏁 the last page came without a token, so the end is already known
                    self.state = StreamState::Exhausted;
                    return Ok(false);
                }
                let batch = self.cursor.advance().await?;
                Ok(self.refill(batch))
            }
        }
    }

    /// ➡️ The next element. Only valid after `has_next()` said yes.
    pub fn next(&mut self) -> Result<T, EsxError> {
        if self.limit_reached() {
            return Err(EsxError::NoSuchElement);
        }
        let item = self.buffer.pop_front().ok_or(EsxError::NoSuchElement)?;
        self.delivered += 1;
        trace!("➡️ delivered element #{}", self.delivered);
        Ok(item)
    }

    /// `has_next()` then `next()`, folded into one call.
    pub async fn try_next(&mut self) -> Result<Option<T>, EsxError> {
        if self.has_next().await? {
            self.next().map(Some)
        } else {
            Ok(None)
        }
    }

    /// 🧹 Close the stream. Idempotent, never fails.
    ///
    /// Releases the cursor unless the scroll already ran dry by itself.
    pub async fn close(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        let previous = std::mem::replace(&mut self.state, StreamState::Closed);
        self.buffer.clear();
        self.pending_query = None;
        if previous == StreamState::Exhausted {
            debug!("🧹 stream closed after running dry, nothing to release");
            return;
        }
        // the one deliberate swallow: a cursor we failed to clear still expires on its keep-alive
        if let Err(err) = self.cursor.release().await {
            warn!("🧹 could not release the scroll cursor, it will expire on its own: {}", err);
        } else {
            debug!("🧹 stream closed after {} element(s)", self.delivered);
        }
    }

    /// 🔮 Adapt into a `futures::Stream`.
    ///
    /// The adapter closes the cursor itself when the scroll runs dry, when the limit is
    /// reached and after yielding the first error. Dropping it half-way leaks the cursor
    /// until its keep-alive expires, same as dropping the pull stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, EsxError>> {
        futures::stream::unfold(Some(self), |slot| async move {
            let Some(mut stream) = slot else {
                return None;
            };
            match stream.has_next().await {
                Ok(true) => match stream.next() {
                    Ok(item) => Some((Ok(item), Some(stream))),
                    Err(err) => {
                        stream.close().await;
                        Some((Err(err), None))
                    }
                },
                Ok(false) => {
                    stream.close().await;
                    None
                }
                Err(err) => {
                    stream.close().await;
                    Some((Err(err), None))
                }
            }
        })
    }

    async fn fetch_first(&mut self) -> Result<bool, EsxError> {
        let Some(query) = &self.pending_query else {
            return Err(EsxError::IllegalState("the opening search already ran".into()));
        };
        let batch = self.cursor.fetcher().fetch_first(query).await?;
        self.pending_query = None;
        self.total_hits = batch.total_hits;
        self.max_score = batch.max_score;
        self.aggregations = batch.aggregations.clone();
        self.cursor.open(&batch);
        Ok(self.refill(batch))
    }

    fn refill(&mut self, batch: Batch<T>) -> bool {
        if batch.is_empty() {
            self.state = StreamState::Exhausted;
            debug!("🏁 stream exhausted after {} element(s)", self.delivered);
            return false;
        }
        trace!("📦 buffering {} hit(s)", batch.len());
        self.buffer.extend(batch.hits);
        self.state = StreamState::HasBuffered;
        true
    }
}

impl<T> Drop for SearchHitStream<T> {
    fn drop(&mut self) {
        if self.state != StreamState::Closed && self.cursor.has_token() {
            warn!(
                "⚠️ a search stream on '{}' was dropped without close(), its cursor lives on until the keep-alive expires",
                self.cursor.fetcher().index()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SearchClient;
    use crate::backends::in_mem::InMemoryEngine;
    use crate::bulk::{BulkRequest, BulkResponse};
    use crate::common::{HitsEnvelope, KeepAlive, RawHit, ScrollToken, SearchResponse};
    use crate::query::{Pagination, SearchRequest};
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn id_of(raw: RawHit) -> Result<String, EsxError> {
        raw.id.ok_or_else(|| EsxError::Mapping("hit without an id".into()))
    }

    async fn engine_with(docs: usize) -> InMemoryEngine {
        let engine = InMemoryEngine::default();
        for n in 0..docs {
            engine.put_document("books", &format!("{n:02}"), json!({ "n": n })).await;
        }
        engine
    }

    fn stream_over(engine: &InMemoryEngine, pagination: Pagination) -> SearchHitStream<String> {
        let fetcher = PageFetcher::new(Arc::new(engine.clone()), "books", KeepAlive::default(), id_of);
        SearchHitStream::new(fetcher, Query::match_all().with_pagination(pagination))
    }

    async fn drain(stream: &mut SearchHitStream<String>) -> Result<Vec<String>, EsxError> {
        let mut seen = Vec::new();
        while stream.has_next().await? {
            seen.push(stream.next()?);
        }
        Ok(seen)
    }

    // 🎭 replays canned responses, counts what it was asked
    #[derive(Debug, Default)]
    struct ScriptedClient {
        pages: Mutex<VecDeque<SearchResponse>>,
        scrolls: Mutex<usize>,
        clears: Mutex<usize>,
    }

    fn page(ids: &[&str], token: Option<&str>) -> SearchResponse {
        SearchResponse {
            scroll_id: token.map(str::to_string),
            hits: HitsEnvelope {
                total: None,
                max_score: None,
                hits: ids
                    .iter()
                    .map(|id| RawHit {
                        id: Some(id.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            },
            aggregations: None,
        }
    }

    #[async_trait]
    impl SearchClient for ScriptedClient {
        async fn search(&self, _index: &str, _request: &SearchRequest) -> Result<SearchResponse, EsxError> {
            self.pages.lock().await.pop_front().ok_or(EsxError::NoSuchElement)
        }

        async fn scroll(&self, _token: &ScrollToken, _keep_alive: &KeepAlive) -> Result<SearchResponse, EsxError> {
            *self.scrolls.lock().await += 1;
            self.pages.lock().await.pop_front().ok_or(EsxError::NoSuchElement)
        }

        async fn clear_scroll(&self, _tokens: &[ScrollToken]) -> Result<(), EsxError> {
            *self.clears.lock().await += 1;
            Ok(())
        }

        async fn bulk(&self, _request: &BulkRequest) -> Result<BulkResponse, EsxError> {
            Ok(BulkResponse::default())
        }
    }

    #[tokio::test]
    async fn the_one_where_five_docs_in_pages_of_two_take_three_round_trips() -> Result<(), EsxError> {
        let engine = engine_with(5).await;
        let mut stream = stream_over(&engine, Pagination::paged(0, 2));
        assert_eq!(stream.state(), StreamState::Fresh);

        let seen = drain(&mut stream).await?;
        assert_eq!(seen, vec!["00", "01", "02", "03", "04"]);
        assert_eq!(stream.state(), StreamState::Exhausted);

        // 🔁 asking again changes nothing and costs nothing
        assert!(!stream.has_next().await?);
        assert!(!stream.has_next().await?);
        stream.close().await;

        let calls = engine.calls().await;
        assert_eq!((calls.search, calls.scroll, calls.clear_scroll), (1, 2, 0));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_abandoned_stream_clears_exactly_once() -> Result<(), EsxError> {
        let engine = engine_with(30).await;
        let mut stream = stream_over(&engine, Pagination::paged(0, 10));

        for _ in 0..5 {
            assert!(stream.has_next().await?);
            stream.next()?;
        }
        stream.close().await;
        stream.close().await;
        stream.close().await;

        let calls = engine.calls().await;
        assert_eq!(calls.clear_scroll, 1);
        assert_eq!(calls.cleared_tokens.len(), 1);
        assert_eq!(engine.open_scroll_contexts().await, 0);
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(!stream.has_next().await?);
        assert!(matches!(stream.next(), Err(EsxError::NoSuchElement)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_batch_ends_it_even_with_a_token() -> Result<(), EsxError> {
        let client = Arc::new(ScriptedClient::default());
        client.pages.lock().await.extend([
            page(&["a", "b"], Some("T1")),
            page(&["c"], Some("T1")),
            page(&[], Some("T1")),
        ]);
        let fetcher = PageFetcher::new(client.clone(), "books", KeepAlive::default(), id_of);
        let mut stream = SearchHitStream::open(fetcher, Query::match_all().with_pagination(Pagination::paged(0, 2))).await?;

        assert_eq!(drain(&mut stream).await?, vec!["a", "b", "c"]);
        assert!(!stream.has_next().await?);
        stream.close().await;

        assert_eq!(*client.scrolls.lock().await, 2);
        assert_eq!(*client.clears.lock().await, 0, "the engine already let go");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_order_survives_every_page_boundary() -> Result<(), EsxError> {
        let engine = engine_with(7).await;
        let mut stream = stream_over(&engine, Pagination::paged(0, 3));
        let mut seen = Vec::new();
        while let Some(id) = stream.try_next().await? {
            seen.push(id);
        }
        stream.close().await;

        let expected: Vec<String> = (0..7).map(|n| format!("{n:02}")).collect();
        assert_eq!(seen, expected);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_expired_cursor_surfaces_from_has_next_and_close_still_cleans_up() -> Result<(), EsxError> {
        let engine = engine_with(6).await;
        let mut stream = stream_over(&engine, Pagination::paged(0, 2));
        assert!(stream.has_next().await?);
        stream.next()?;
        stream.next()?;

        engine.expire_scroll_contexts().await;
        let err = stream.has_next().await.err();
        assert!(err.as_ref().is_some_and(EsxError::is_search_context_missing), "got {err:?}");

        stream.close().await;
        assert_eq!(engine.calls().await.clear_scroll, 1, "close still tries");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failing_clear_is_swallowed() -> Result<(), EsxError> {
        let engine = engine_with(10).await;
        engine.fail_clear_scroll(true).await;
        let mut stream = stream_over(&engine, Pagination::paged(0, 3));
        assert!(stream.has_next().await?);

        stream.close().await;
        stream.close().await;
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(engine.calls().await.clear_scroll, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_limiting_stops_early_and_close_lets_go_of_the_live_cursor() -> Result<(), EsxError> {
        let engine = engine_with(10).await;
        let mut stream = stream_over(&engine, Pagination::limiting(3, 4));

        let seen = drain(&mut stream).await?;
        assert_eq!(seen, vec!["00", "01", "02", "03"]);
        assert!(!stream.has_next().await?);
        assert!(matches!(stream.next(), Err(EsxError::NoSuchElement)));

        stream.close().await;
        let calls = engine.calls().await;
        assert_eq!((calls.search, calls.scroll, calls.clear_scroll), (1, 1, 1));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_next_without_asking_first_is_refused() -> Result<(), EsxError> {
        let engine = engine_with(1).await;
        let mut stream = stream_over(&engine, Pagination::paged(0, 5));
        assert!(matches!(stream.next(), Err(EsxError::NoSuchElement)));
        assert_eq!(engine.calls().await.search, 0, "next() never touches the network");

        assert!(stream.has_next().await?);
        assert_eq!(stream.next()?, "00");
        assert!(!stream.has_next().await?);
        assert!(matches!(stream.next(), Err(EsxError::NoSuchElement)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_open_reports_the_first_page_metadata() -> Result<(), EsxError> {
        let engine = engine_with(4).await;
        let fetcher = PageFetcher::new(Arc::new(engine.clone()), "books", KeepAlive::default(), id_of);
        let mut stream = SearchHitStream::open(fetcher, Query::match_all().with_pagination(Pagination::paged(0, 2))).await?;

        assert_eq!(stream.state(), StreamState::HasBuffered);
        assert_eq!(stream.total_hits().map(|t| t.value), Some(4));
        assert_eq!(engine.calls().await.search, 1);
        stream.close().await;

        let missing = PageFetcher::new(Arc::new(engine.clone()), "nope", KeepAlive::default(), id_of);
        let err = SearchHitStream::open(missing, Query::match_all().with_pagination(Pagination::paged(0, 2)))
            .await
            .err();
        assert!(matches!(err, Some(EsxError::SearchExecution { status: 404, .. })));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_futures_adapter_closes_up_after_itself() -> Result<(), EsxError> {
        let engine = engine_with(9).await;
        let everything: Vec<String> = stream_over(&engine, Pagination::paged(0, 4))
            .into_stream()
            .try_collect()
            .await?;
        assert_eq!(everything.len(), 9);

        let limited: Vec<String> = stream_over(&engine, Pagination::limiting(4, 5))
            .into_stream()
            .try_collect()
            .await?;
        assert_eq!(limited.len(), 5);

        let calls = engine.calls().await;
        assert_eq!(calls.clear_scroll, 1, "only the limited walk left a cursor behind");
        assert_eq!(engine.open_scroll_contexts().await, 0);
        Ok(())
    }
}
