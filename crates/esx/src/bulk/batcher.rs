//! 🚚 The bulk batcher: N write intents in, one round trip, N results out.
//!
//! It does not buffer across calls, it does not retry, and it does not judge
//! partial failures. Those are data, handed to `BulkFailureAggregator` upstairs.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::backends::SearchClient;
use crate::bulk::operation::{BulkOperation, BulkRequest};
use crate::bulk::options::BulkOptions;
use crate::bulk::response::BulkItemResult;
use crate::errors::EsxError;

/// 🚚 Assembles and submits one `_bulk` request per `submit` call.
#[derive(Debug, Clone)]
pub struct BulkBatcher {
    client: Arc<dyn SearchClient>,
}

impl BulkBatcher {
    pub fn new(client: Arc<dyn SearchClient>) -> Self {
        Self { client }
    }

    /// 🚀 Submit `operations` as a single bulk call.
    ///
    /// An empty list returns an empty list without touching the network.
    /// Otherwise the result has the same length and order as `operations`;
    /// an engine that answers with a different item count is a protocol breach
    /// and surfaces as `Transport`.
    pub async fn submit(
        &self,
        operations: Vec<BulkOperation>,
        options: &BulkOptions,
    ) -> Result<Vec<BulkItemResult>, EsxError> {
        if operations.is_empty() {
            trace!("📦 empty bulk, skipping the round trip");
            return Ok(Vec::new());
        }

        let expected = operations.len();
        let request = BulkRequest::new(operations, options.clone());
        debug!("🚚 submitting bulk of {} operations", expected);
        let response = self.client.bulk(&request).await?;

        if response.items.len() != expected {
            return Err(EsxError::transport(
                "bulk",
                format!(
                    "sent {} operations but the engine answered with {} items, positions no longer line up",
                    expected,
                    response.items.len()
                ),
            ));
        }

        debug!(
            "✅ bulk answered in {}ms, errors flag = {}",
            response.took, response.errors
        );
        Ok(response.items.into_iter().map(BulkItemResult::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::InMemoryEngine;
    use crate::bulk::operation::{DeleteOperation, IndexOperation, UpdateOperation};
    use crate::bulk::options::RefreshPolicy;
    use crate::bulk::response::BulkResponse;
    use crate::common::{KeepAlive, ScrollToken, SearchResponse};
    use crate::query::SearchRequest;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    // 🎭 answers every bulk with whatever it was told to, counts the calls
    #[derive(Debug)]
    struct ScriptedBulk {
        answer: Mutex<Option<Result<BulkResponse, EsxError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedBulk {
        fn answering(answer: Result<BulkResponse, EsxError>) -> Self {
            Self {
                answer: Mutex::new(Some(answer)),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl SearchClient for ScriptedBulk {
        async fn search(&self, _index: &str, _request: &SearchRequest) -> Result<SearchResponse, EsxError> {
            Err(EsxError::IllegalState("search is not scripted".into()))
        }

        async fn scroll(&self, _token: &ScrollToken, _keep_alive: &KeepAlive) -> Result<SearchResponse, EsxError> {
            Err(EsxError::IllegalState("scroll is not scripted".into()))
        }

        async fn clear_scroll(&self, _tokens: &[ScrollToken]) -> Result<(), EsxError> {
            Ok(())
        }

        async fn bulk(&self, _request: &BulkRequest) -> Result<BulkResponse, EsxError> {
            *self.calls.lock().await += 1;
            self.answer
                .lock()
                .await
                .take()
                .unwrap_or_else(|| Err(EsxError::IllegalState("bulk answered twice".into())))
        }
    }

    fn one_index() -> Vec<BulkOperation> {
        vec![IndexOperation::new("books", json!({ "title": "Dune" })).with_id("a").into()]
    }

    #[tokio::test]
    async fn the_one_where_an_empty_bulk_never_leaves_the_house() -> Result<(), EsxError> {
        let engine = InMemoryEngine::default();
        let batcher = BulkBatcher::new(Arc::new(engine.clone()));

        let results = batcher.submit(Vec::new(), &BulkOptions::default()).await?;

        assert!(results.is_empty());
        assert_eq!(engine.calls().await.bulk, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_results_line_up_with_operations() -> Result<(), EsxError> {
        let engine = InMemoryEngine::default();
        engine.put_document("books", "exists", json!({ "title": "old" })).await;
        let batcher = BulkBatcher::new(Arc::new(engine.clone()));

        let operations: Vec<BulkOperation> = vec![
            IndexOperation::new("books", json!({ "title": "new" })).with_id("a").into(),
            UpdateOperation::doc("books", "ghost", json!({ "x": 1 })).into(),
            UpdateOperation::doc("books", "exists", json!({ "title": "newer" })).into(),
            IndexOperation::new("books", json!({ "title": "anon" })).into(),
            DeleteOperation::new("books", "nobody").into(),
        ];
        let options = BulkOptions::default().with_refresh(RefreshPolicy::WaitFor);
        let results = batcher.submit(operations, &options).await?;

        assert_eq!(results.len(), 5);
        assert_eq!(results[0].id(), "a");
        assert!(results[1].is_failure());
        assert_eq!(results[1].id(), "ghost");
        assert_eq!(results[2].as_success().and_then(|s| s.result.as_deref()), Some("updated"));
        assert!(!results[3].id().is_empty(), "the engine hands out an id when we don't");
        assert_eq!(results[4].as_success().and_then(|s| s.result.as_deref()), Some("not_found"));

        let calls = engine.calls().await;
        assert_eq!(calls.bulk, 1);
        assert_eq!(calls.last_bulk_options, Some(options));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_engine_loses_an_item_and_we_refuse_to_guess() {
        let client = Arc::new(ScriptedBulk::answering(Ok(BulkResponse {
            took: 1,
            errors: false,
            items: Vec::new(),
        })));
        let batcher = BulkBatcher::new(client.clone());

        let err = batcher.submit(one_index(), &BulkOptions::default()).await.err();

        assert!(
            matches!(err, Some(EsxError::Transport { operation: "bulk", .. })),
            "got {err:?}"
        );
        assert_eq!(*client.calls.lock().await, 1);
    }

    #[tokio::test]
    async fn the_one_where_a_dead_round_trip_comes_back_untouched() {
        let client = Arc::new(ScriptedBulk::answering(Err(EsxError::transport("bulk", "connection reset"))));
        let batcher = BulkBatcher::new(client.clone());

        match batcher.submit(one_index(), &BulkOptions::default()).await {
            Err(EsxError::Transport { operation, message }) => {
                assert_eq!(operation, "bulk");
                assert!(message.contains("connection reset"), "{message}");
            }
            other => panic!("💀 expected the transport error as-is, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_front_door_passes_transport_errors_through_too() {
        let client = Arc::new(ScriptedBulk::answering(Err(EsxError::transport("bulk", "connection reset"))));
        let ops = crate::operations::SearchOperations::new(client.clone(), crate::app_config::ScrollConfig::default());

        let err = ops.bulk(one_index(), &BulkOptions::default()).await.err();

        assert!(
            matches!(&err, Some(EsxError::Transport { operation: "bulk", message }) if message.contains("connection reset")),
            "got {err:?}"
        );
        assert_eq!(*client.calls.lock().await, 1);
    }
}
