//! # Previously, on ESX...
//!
//! 🎬 The tests needed a cluster. The cluster needed Docker. Docker needed RAM, patience
//! and a network that didn't hate us. So we built an engine that lives entirely in a
//! `HashMap`, gone the moment you blink.
//!
//! `InMemoryEngine` speaks just enough of the search engine dialect to exercise
//! everything above it: scroll contexts with real tokens, expiry on demand, bulk items
//! that conflict, go missing, and upsert like the real thing. Every call is counted in a
//! [`CallLog`] so tests can assert "exactly one clear" instead of hoping.
//!
//! 🧠 Knowledge graph:
//! - Queries: `match_all` and `ids`. Anything fancier gets a 400, same as a typo would.
//! - Hit order: insertion order, or the `sort` clauses when given.
//! - Scroll: snapshot at open time. The page that drains the snapshot comes back
//!   without a `_scroll_id` and the context is dropped on the spot.
//! - seq_no is global and monotonic, primary_term is always 1. One shard, no drama.
//! - `refresh` is accepted and ignored: writes are visible immediately.
//!
//! ⚠️ This is NOT for production. This is for tests and `--engine in-memory` demos.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::backends::SearchClient;
use crate::bulk::{
    BulkItemError, BulkItemStatus, BulkOperation, BulkOptions, BulkRequest, BulkResponse,
    BulkResponseItem, DeleteOperation, IndexOperation, OpType, UpdateBody, UpdateOperation,
};
use crate::common::{
    HitsEnvelope, KeepAlive, RawHit, ScrollToken, SearchResponse, TotalHits, TotalHitsRelation,
};
use crate::errors::EsxError;
use crate::query::SearchRequest;

const PRIMARY_TERM: i64 = 1;

fn default_max_result_window() -> usize {
    10_000
}

/// 🔧 Knobs for the pretend cluster.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct InMemoryEngineConfig {
    /// 🪟 `from + size` may not exceed this on a plain search, nor `size` on a scroll.
    #[serde(default = "default_max_result_window")]
    pub max_result_window: usize,
}

impl Default for InMemoryEngineConfig {
    fn default() -> Self {
        Self {
            max_result_window: default_max_result_window(),
        }
    }
}

/// 📒 How many times each endpoint was hit, and with what.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub search: usize,
    pub scroll: usize,
    pub clear_scroll: usize,
    /// Every token ever passed to `clear_scroll`, in call order.
    pub cleared_tokens: Vec<String>,
    pub bulk: usize,
    pub last_bulk_options: Option<BulkOptions>,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    source: Value,
    version: i64,
    seq_no: i64,
    routing: Option<String>,
}

#[derive(Debug, Default)]
struct IndexState {
    order: Vec<String>,
    docs: HashMap<String, StoredDocument>,
}

impl IndexState {
    fn insert(&mut self, id: &str, doc: StoredDocument) {
        if self.docs.insert(id.to_string(), doc).is_none() {
            self.order.push(id.to_string());
        }
    }

    fn remove(&mut self, id: &str) -> Option<StoredDocument> {
        let removed = self.docs.remove(id);
        if removed.is_some() {
            self.order.retain(|existing| existing != id);
        }
        removed
    }
}

#[derive(Debug)]
struct ScrollContext {
    hits: Vec<RawHit>,
    position: usize,
    page_size: usize,
    total: Option<TotalHits>,
    max_score: Option<f64>,
}

#[derive(Debug, Default)]
struct EngineState {
    indices: HashMap<String, IndexState>,
    scrolls: HashMap<String, ScrollContext>,
    next_scroll: u64,
    next_seq_no: i64,
    next_auto_id: u64,
    fail_clear_scroll: bool,
    calls: CallLog,
}

impl EngineState {
    fn allocate_seq_no(&mut self) -> i64 {
        let seq_no = self.next_seq_no;
        self.next_seq_no += 1;
        seq_no
    }
}

/// 🧪 A search engine that fits in a mutex.
///
/// Clone-able because tests need to peek inside after handing it to the code under
/// test. The `Arc` means every clone shares the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEngine {
    config: InMemoryEngineConfig,
    state: Arc<Mutex<EngineState>>,
}

impl InMemoryEngine {
    pub fn new(config: InMemoryEngineConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    /// 📥 Seed a document directly, bypassing bulk. Creates the index if needed.
    pub async fn put_document(&self, index: &str, id: &str, source: Value) {
        let mut state = self.state.lock().await;
        let seq_no = state.allocate_seq_no();
        let index_state = state.indices.entry(index.to_string()).or_default();
        let version = index_state.docs.get(id).map_or(1, |doc| doc.version + 1);
        index_state.insert(
            id,
            StoredDocument {
                source,
                version,
                seq_no,
                routing: None,
            },
        );
    }

    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state
            .indices
            .get(index)
            .and_then(|idx| idx.docs.get(id))
            .map(|doc| doc.source.clone())
    }

    pub async fn document_count(&self, index: &str) -> usize {
        let state = self.state.lock().await;
        state.indices.get(index).map_or(0, |idx| idx.docs.len())
    }

    pub async fn calls(&self) -> CallLog {
        self.state.lock().await.calls.clone()
    }

    /// How many scroll contexts are currently holding a snapshot.
    pub async fn open_scroll_contexts(&self) -> usize {
        self.state.lock().await.scrolls.len()
    }

    /// 💥 Make every following `clear_scroll` fail with a transport error.
    pub async fn fail_clear_scroll(&self, fail: bool) {
        self.state.lock().await.fail_clear_scroll = fail;
    }

    /// ⏰ Pretend every keep-alive just ran out.
    pub async fn expire_scroll_contexts(&self) {
        let mut state = self.state.lock().await;
        let expired = state.scrolls.len();
        state.scrolls.clear();
        debug!("⏰ expired {} scroll context(s)", expired);
    }

    fn take_page(context: &mut ScrollContext) -> Vec<RawHit> {
        let end = (context.position + context.page_size).min(context.hits.len());
        let page = context.hits[context.position..end].to_vec();
        context.position = end;
        page
    }
}

#[async_trait]
impl SearchClient for InMemoryEngine {
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse, EsxError> {
        let mut state = self.state.lock().await;
        state.calls.search += 1;

        let Some(index_state) = state.indices.get(index) else {
            return Err(EsxError::search_execution(
                "search",
                404,
                "index_not_found_exception",
                format!("no such index [{index}]"),
            ));
        };
        let hits = matching_hits(index, index_state, request)?;
        let total = match request.body.get("track_total_hits") {
            Some(Value::Bool(false)) => None,
            _ => Some(TotalHits {
                value: hits.len() as u64,
                relation: TotalHitsRelation::Eq,
            }),
        };
        let max_score = hits.iter().filter_map(|hit| hit.score).reduce(f64::max);
        let size = request.size();

        let Some(keep_alive) = &request.keep_alive else {
            let from = request.from();
            let window = from.saturating_add(size);
            if window > self.config.max_result_window {
                return Err(EsxError::search_execution(
                    "search",
                    400,
                    "illegal_argument_exception",
                    format!(
                        "Result window is too large, from + size must be less than or equal to: [{}] but was [{}]",
                        self.config.max_result_window,
                        window
                    ),
                ));
            }
            let page: Vec<RawHit> = hits.into_iter().skip(from).take(size).collect();
            return Ok(SearchResponse {
                scroll_id: None,
                hits: HitsEnvelope {
                    total,
                    max_score,
                    hits: page,
                },
                aggregations: None,
            });
        };

        if size > self.config.max_result_window {
            return Err(EsxError::search_execution(
                "search",
                400,
                "illegal_argument_exception",
                format!(
                    "Batch size is too large, size must be less than or equal to: [{}] but was [{}]",
                    self.config.max_result_window, size
                ),
            ));
        }

        let mut context = ScrollContext {
            hits,
            position: 0,
            page_size: size,
            total,
            max_score,
        };
        let page = Self::take_page(&mut context);
        let drained = context.position >= context.hits.len();

        let scroll_id = if drained {
            None
        } else {
            state.next_scroll += 1;
            let id = format!("scroll-{}", state.next_scroll);
            trace!("🎟️ opened {} on '{}' with keep-alive {}", id, index, keep_alive);
            state.scrolls.insert(id.clone(), context);
            Some(id)
        };

        Ok(SearchResponse {
            scroll_id,
            hits: HitsEnvelope {
                total,
                max_score,
                hits: page,
            },
            aggregations: None,
        })
    }

    async fn scroll(&self, token: &ScrollToken, _keep_alive: &KeepAlive) -> Result<SearchResponse, EsxError> {
        let mut state = self.state.lock().await;
        state.calls.scroll += 1;

        let Some(context) = state.scrolls.get_mut(token.as_str()) else {
            return Err(EsxError::search_execution(
                "scroll",
                404,
                "search_context_missing_exception",
                format!("No search context found for id [{}]", token.as_str()),
            ));
        };
        let page = Self::take_page(context);
        let total = context.total;
        let max_score = context.max_score;
        let drained = context.position >= context.hits.len();

        let scroll_id = if drained {
            state.scrolls.remove(token.as_str());
            trace!("🏁 {:?} drained, context released", token);
            None
        } else {
            Some(token.as_str().to_string())
        };

        Ok(SearchResponse {
            scroll_id,
            hits: HitsEnvelope {
                total,
                max_score,
                hits: page,
            },
            aggregations: None,
        })
    }

    async fn clear_scroll(&self, tokens: &[ScrollToken]) -> Result<(), EsxError> {
        let mut state = self.state.lock().await;
        state.calls.clear_scroll += 1;
        state
            .calls
            .cleared_tokens
            .extend(tokens.iter().map(|t| t.as_str().to_string()));

        if state.fail_clear_scroll {
            return Err(EsxError::transport(
                "clear_scroll",
                "connection reset by peer (simulated)",
            ));
        }
        for token in tokens {
            state.scrolls.remove(token.as_str());
        }
        Ok(())
    }

    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse, EsxError> {
        let mut state = self.state.lock().await;
        state.calls.bulk += 1;
        state.calls.last_bulk_options = Some(request.options.clone());

        let items: Vec<BulkResponseItem> = request
            .operations
            .iter()
            .map(|operation| match operation {
                BulkOperation::Index(op) => apply_index(&mut state, op),
                BulkOperation::Update(op) => BulkResponseItem::Update(apply_update(&mut state, op)),
                BulkOperation::Delete(op) => BulkResponseItem::Delete(apply_delete(&mut state, op)),
            })
            .collect();
        let errors = items.iter().any(|item| item.status().error.is_some());
        debug!("📦 in-memory bulk applied {} item(s), errors = {}", items.len(), errors);

        Ok(BulkResponse { took: 0, errors, items })
    }
}

// ============================================================
//  🔍 search internals
// ============================================================

fn matching_hits(index: &str, index_state: &IndexState, request: &SearchRequest) -> Result<Vec<RawHit>, EsxError> {
    let ids = match request.body.get("query") {
        None => None,
        Some(query) if query.get("match_all").is_some() => None,
        Some(query) => match query.get("ids").and_then(|ids| ids.get("values")).and_then(Value::as_array) {
            Some(values) => Some(values.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>()),
            None => {
                return Err(EsxError::search_execution(
                    "search",
                    400,
                    "parsing_exception",
                    format!("the in-memory engine understands match_all and ids, not {query}"),
                ));
            }
        },
    };

    let sort = sort_clauses(request);
    let with_version = request.flag("version");
    let with_seq_no = request.flag("seq_no_primary_term");
    let source_filter = request.body.get("_source");

    let mut hits: Vec<RawHit> = index_state
        .order
        .iter()
        .filter(|id| ids.as_ref().is_none_or(|wanted| wanted.contains(*id)))
        .filter_map(|id| index_state.docs.get(id).map(|doc| (id, doc)))
        .map(|(id, doc)| RawHit {
            index: index.to_string(),
            id: Some(id.clone()),
            score: if sort.is_empty() { Some(1.0) } else { None },
            source: filter_source(&doc.source, source_filter),
            version: with_version.then_some(doc.version),
            seq_no: with_seq_no.then_some(doc.seq_no),
            primary_term: with_seq_no.then_some(PRIMARY_TERM),
            routing: doc.routing.clone(),
            sort: sort
                .iter()
                .map(|(field, _)| doc.source.get(field).cloned().unwrap_or(Value::Null))
                .collect(),
        })
        .collect();

    if !sort.is_empty() {
        hits.sort_by(|a, b| {
            a.sort
                .iter()
                .zip(&b.sort)
                .zip(&sort)
                .map(|((left, right), (_, descending))| match (left.is_null(), right.is_null()) {
                    // 🧠 missing values sort last either way, like the engine's default `missing: _last`
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) if *descending => compare_values(left, right).reverse(),
                    (false, false) => compare_values(left, right),
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }
    Ok(hits)
}

// ↕️ [(field, descending)]
fn sort_clauses(request: &SearchRequest) -> Vec<(String, bool)> {
    request
        .body
        .get("sort")
        .and_then(Value::as_array)
        .map(|clauses| {
            clauses
                .iter()
                .filter_map(Value::as_object)
                .flat_map(|clause| clause.iter())
                .map(|(field, order)| {
                    let descending = order.get("order").and_then(Value::as_str) == Some("desc");
                    (field.clone(), descending)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

fn filter_source(source: &Value, filter: Option<&Value>) -> Option<Value> {
    let Some(filter) = filter else {
        return Some(source.clone());
    };
    if filter == &Value::Bool(false) {
        return None;
    }
    let Value::Object(fields) = source else {
        return Some(source.clone());
    };
    let names = |key: &str| -> Vec<String> {
        filter
            .get(key)
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };
    let includes = names("includes");
    let excludes = names("excludes");
    let kept: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| includes.is_empty() || includes.contains(*key))
        .filter(|(key, _)| !excludes.contains(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Some(Value::Object(kept))
}

// ============================================================
//  📦 bulk internals
// ============================================================

fn item_error(index: &str, id: &str, status: u16, error_type: &str, reason: String) -> BulkItemStatus {
    BulkItemStatus {
        index: index.to_string(),
        id: Some(id.to_string()),
        status,
        error: Some(BulkItemError {
            error_type: error_type.to_string(),
            reason: Some(reason),
        }),
        ..Default::default()
    }
}

fn item_ok(index: &str, id: &str, doc: &StoredDocument, result: &str, status: u16) -> BulkItemStatus {
    BulkItemStatus {
        index: index.to_string(),
        id: Some(id.to_string()),
        version: Some(doc.version),
        seq_no: Some(doc.seq_no),
        primary_term: Some(PRIMARY_TERM),
        result: Some(result.to_string()),
        status,
        error: None,
    }
}

/// 🔒 `if_seq_no` / `if_primary_term` check. `Some(reason)` means conflict.
fn seq_no_conflict(
    id: &str,
    existing: Option<&StoredDocument>,
    if_seq_no: Option<i64>,
    if_primary_term: Option<i64>,
) -> Option<String> {
    let (Some(seq_no), Some(primary_term)) = (if_seq_no, if_primary_term) else {
        return None;
    };
    match existing {
        None => Some(format!(
            "[{id}]: version conflict, required seqNo [{seq_no}], primary term [{primary_term}] but no document was found"
        )),
        Some(doc) if doc.seq_no != seq_no || primary_term != PRIMARY_TERM => Some(format!(
            "[{id}]: version conflict, required seqNo [{seq_no}], primary term [{primary_term}]. current document has seqNo [{}] and primary term [{PRIMARY_TERM}]",
            doc.seq_no
        )),
        Some(_) => None,
    }
}

/// 🔢 External versioning: the provided version must be strictly higher.
fn external_version_conflict(id: &str, existing: Option<&StoredDocument>, version: Option<i64>) -> Option<String> {
    match (existing, version) {
        (Some(doc), Some(provided)) if provided <= doc.version => Some(format!(
            "[{id}]: version conflict, current version [{}] is higher or equal to the one provided [{provided}]",
            doc.version
        )),
        _ => None,
    }
}

fn apply_index(state: &mut EngineState, op: &IndexOperation) -> BulkResponseItem {
    let wrap = |status: BulkItemStatus| match op.op_type {
        OpType::Index => BulkResponseItem::Index(status),
        OpType::Create => BulkResponseItem::Create(status),
    };

    let id = match &op.id {
        Some(id) => id.clone(),
        None => {
            state.next_auto_id += 1;
            format!("mem-{:08}", state.next_auto_id)
        }
    };
    let existing = state.indices.get(&op.index).and_then(|idx| idx.docs.get(&id)).cloned();

    if let (OpType::Create, Some(doc)) = (op.op_type, &existing) {
        return wrap(item_error(
            &op.index,
            &id,
            409,
            "version_conflict_engine_exception",
            format!("[{id}]: version conflict, document already exists (current version [{}])", doc.version),
        ));
    }
    let conflict = seq_no_conflict(&id, existing.as_ref(), op.if_seq_no, op.if_primary_term)
        .or_else(|| external_version_conflict(&id, existing.as_ref(), op.version));
    if let Some(reason) = conflict {
        return wrap(item_error(&op.index, &id, 409, "version_conflict_engine_exception", reason));
    }

    let doc = StoredDocument {
        source: op.source.clone(),
        version: op
            .version
            .unwrap_or_else(|| existing.as_ref().map_or(1, |doc| doc.version + 1)),
        seq_no: state.allocate_seq_no(),
        routing: op.routing.clone(),
    };
    let (result, status) = if existing.is_some() { ("updated", 200) } else { ("created", 201) };
    let item = item_ok(&op.index, &id, &doc, result, status);
    state.indices.entry(op.index.clone()).or_default().insert(&id, doc);
    wrap(item)
}

fn apply_update(state: &mut EngineState, op: &UpdateOperation) -> BulkItemStatus {
    let UpdateBody::Doc(partial) = &op.body else {
        return item_error(
            &op.index,
            &op.id,
            400,
            "illegal_argument_exception",
            "the in-memory engine does not run scripts".to_string(),
        );
    };
    let existing = state.indices.get(&op.index).and_then(|idx| idx.docs.get(&op.id)).cloned();
    if let Some(reason) = seq_no_conflict(&op.id, existing.as_ref(), op.if_seq_no, op.if_primary_term) {
        return item_error(&op.index, &op.id, 409, "version_conflict_engine_exception", reason);
    }

    let (doc, result, status) = match existing {
        None if !op.upsert => {
            return item_error(
                &op.index,
                &op.id,
                404,
                "document_missing_exception",
                format!("[{}]: document missing", op.id),
            );
        }
        None => (
            StoredDocument {
                source: partial.clone(),
                version: 1,
                seq_no: state.allocate_seq_no(),
                routing: op.routing.clone(),
            },
            "created",
            201,
        ),
        Some(current) => {
            let mut merged = current.source.clone();
            deep_merge(&mut merged, partial);
            if merged == current.source {
                return item_ok(&op.index, &op.id, &current, "noop", 200);
            }
            (
                StoredDocument {
                    source: merged,
                    version: current.version + 1,
                    seq_no: state.allocate_seq_no(),
                    routing: op.routing.clone().or(current.routing),
                },
                "updated",
                200,
            )
        }
    };
    let item = item_ok(&op.index, &op.id, &doc, result, status);
    state.indices.entry(op.index.clone()).or_default().insert(&op.id, doc);
    item
}

fn apply_delete(state: &mut EngineState, op: &DeleteOperation) -> BulkItemStatus {
    let existing = state.indices.get(&op.index).and_then(|idx| idx.docs.get(&op.id)).cloned();
    let conflict = seq_no_conflict(&op.id, existing.as_ref(), op.if_seq_no, op.if_primary_term)
        .or_else(|| external_version_conflict(&op.id, existing.as_ref(), op.version));
    if let Some(reason) = conflict {
        return item_error(&op.index, &op.id, 409, "version_conflict_engine_exception", reason);
    }

    let Some(current) = existing else {
        // 🤷 deleting nothing is not an error, just a 404 with a shrug
        return BulkItemStatus {
            index: op.index.clone(),
            id: Some(op.id.clone()),
            result: Some("not_found".to_string()),
            status: 404,
            ..Default::default()
        };
    };
    let tombstone = StoredDocument {
        source: Value::Null,
        version: op.version.unwrap_or(current.version + 1),
        seq_no: state.allocate_seq_no(),
        routing: current.routing,
    };
    if let Some(index_state) = state.indices.get_mut(&op.index) {
        index_state.remove(&op.id);
    }
    item_ok(&op.index, &op.id, &tombstone, "deleted", 200)
}

fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                match target.get_mut(key) {
                    Some(existing) if nested => deep_merge(existing, value),
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
