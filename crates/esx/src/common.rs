//! 📦 Common data structures: the building blocks every other module passes around.
//!
//! 🎬 COLD OPEN: INT. SEARCH CLUSTER, 3:47 AM
//!
//! A `_search` response arrives. It carries hits, a total, maybe some aggregations,
//! and a `_scroll_id` that looks like someone base64-encoded a sneeze. We do not parse
//! the sneeze. We hand it back to the engine next time and hope it remembers us.
//!
//! 🧠 Knowledge graph:
//! - `ScrollToken`: opaque cursor handle. Never parsed, never inspected, only passed back.
//! - `KeepAlive`: the cursor TTL in engine time-unit syntax (`"1m"`, `"30s"`, `"500ms"`).
//! - `SearchResponse` / `RawHit`: the wire shape of a search or scroll answer.
//! - `Batch<T>`: one page of mapped hits plus the next token. Empty batch = the end.
//! - `SearchHit<D>`: the stock mapping target, a typed document plus its metadata.
//! - `SearchPage<T>`: a single non-scrolling page. 🦆

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::EsxError;

// ============================================================
//  🎟️ ScrollToken
// ============================================================

/// 🎟️ An opaque handle to server-side cursor state.
///
/// We compare it, clone it, and send it back. We do not look inside.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ScrollToken(String);

impl ScrollToken {
    /// 🏗️ Wrap a raw token. Empty strings mean "no cursor" and come back as `None`.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() { None } else { Some(Self(raw)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ScrollToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 🔒 scroll ids run to kilobytes on big clusters, nobody wants that in a log line
        let shown: String = self.0.chars().take(16).collect();
        if shown.len() < self.0.len() {
            write!(f, "ScrollToken({shown}…)")
        } else {
            write!(f, "ScrollToken({shown})")
        }
    }
}

// ============================================================
//  ⏳ KeepAlive
// ============================================================

/// ⏳ How long the engine should keep a scroll context alive between continuations.
///
/// Sent on the opening search and again on every continuation. Each continuation asks
/// for the full duration again; whether that resets the server-side clock is the
/// engine's business (Elasticsearch: it does).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct KeepAlive(String);

const KEEP_ALIVE_UNITS: &[&str] = &["nanos", "micros", "ms", "s", "m", "h", "d"];

impl KeepAlive {
    /// 🔧 Parse `"<number><unit>"` where unit is one of nanos, micros, ms, s, m, h, d.
    pub fn parse(raw: &str) -> Result<Self, EsxError> {
        let raw = raw.trim();
        let split_at = raw
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(raw.len());
        let (digits, unit) = raw.split_at(split_at);
        if digits.is_empty() || !KEEP_ALIVE_UNITS.contains(&unit) {
            return Err(EsxError::InvalidQuery(format!(
                "keep-alive '{raw}' is not a time value like '1m', '30s' or '500ms'"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// ⏱️ Milliseconds precision is plenty for a cursor TTL.
    pub fn from_duration(duration: Duration) -> Self {
        Self(format!("{}ms", duration.as_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self("1m".to_string())
    }
}

impl TryFrom<String> for KeepAlive {
    type Error = EsxError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl fmt::Display for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================
//  📡 Wire shapes
// ============================================================

/// 📊 Is `value` exact, or a lower bound because tracking stopped counting?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TotalHitsRelation {
    #[default]
    Eq,
    Gte,
}

/// 📊 The total number of matching documents reported with the first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "TotalHitsWire")]
pub struct TotalHits {
    pub value: u64,
    pub relation: TotalHitsRelation,
}

// 🕰️ 6.x clusters send a bare number, 7.x+ send an object. We take both.
#[derive(Deserialize)]
#[serde(untagged)]
enum TotalHitsWire {
    Legacy(u64),
    Object {
        value: u64,
        #[serde(default)]
        relation: TotalHitsRelation,
    },
}

impl From<TotalHitsWire> for TotalHits {
    fn from(wire: TotalHitsWire) -> Self {
        match wire {
            TotalHitsWire::Legacy(value) => Self {
                value,
                relation: TotalHitsRelation::Eq,
            },
            TotalHitsWire::Object { value, relation } => Self { value, relation },
        }
    }
}

/// 🎯 One hit exactly as the engine sent it.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct RawHit {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Option<Value>,
    #[serde(rename = "_version", default)]
    pub version: Option<i64>,
    #[serde(rename = "_seq_no", default)]
    pub seq_no: Option<i64>,
    #[serde(rename = "_primary_term", default)]
    pub primary_term: Option<i64>,
    #[serde(rename = "_routing", default)]
    pub routing: Option<String>,
    #[serde(default)]
    pub sort: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct HitsEnvelope {
    #[serde(default)]
    pub total: Option<TotalHits>,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub hits: Vec<RawHit>,
}

/// 📡 The answer to a `_search` or `_search/scroll` call.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: Option<String>,
    #[serde(default)]
    pub hits: HitsEnvelope,
    #[serde(default)]
    pub aggregations: Option<Value>,
}

impl SearchResponse {
    /// 🎟️ The continuation token, with empty strings treated as absent.
    pub fn scroll_token(&self) -> Option<ScrollToken> {
        self.scroll_id.clone().and_then(ScrollToken::new)
    }
}

// ============================================================
//  📦 Batch / SearchHit / SearchPage
// ============================================================

/// 📦 One page of mapped hits and, maybe, the token for the next one.
///
/// An empty batch means the result set is done, whatever the token says.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub hits: Vec<T>,
    pub token: Option<ScrollToken>,
    pub total_hits: Option<TotalHits>,
    pub max_score: Option<f64>,
    pub aggregations: Option<Value>,
}

impl<T> Batch<T> {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

/// 🎯 A typed document plus everything the engine told us about it.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<D> {
    pub index: String,
    pub id: Option<String>,
    pub score: Option<f64>,
    pub version: Option<i64>,
    pub seq_no: Option<i64>,
    pub primary_term: Option<i64>,
    pub routing: Option<String>,
    pub sort_values: Vec<Value>,
    pub content: D,
}

impl<D: DeserializeOwned> SearchHit<D> {
    /// 🧬 Decode `_source` into `D`. A missing `_source` is offered to `D` as `null`,
    /// so `Option<_>` and `Value` targets survive source-less hits.
    pub fn from_raw(raw: RawHit) -> Result<Self, EsxError> {
        let source = raw.source.unwrap_or(Value::Null);
        let content = serde_json::from_value(source).map_err(|err| {
            EsxError::Mapping(format!(
                "hit '{}' in index '{}' did not fit the target type: {err}",
                raw.id.as_deref().unwrap_or(""),
                raw.index
            ))
        })?;
        Ok(Self {
            index: raw.index,
            id: raw.id,
            score: raw.score,
            version: raw.version,
            seq_no: raw.seq_no,
            primary_term: raw.primary_term,
            routing: raw.routing,
            sort_values: raw.sort,
            content,
        })
    }
}

/// 📄 A single non-scrolling page of results.
#[derive(Debug, Clone)]
pub struct SearchPage<T> {
    pub hits: Vec<T>,
    pub total_hits: Option<TotalHits>,
    pub max_score: Option<f64>,
    pub aggregations: Option<Value>,
}

impl<T> From<Batch<T>> for SearchPage<T> {
    fn from(batch: Batch<T>) -> Self {
        Self {
            hits: batch.hits,
            total_hits: batch.total_hits,
            max_score: batch.max_score,
            aggregations: batch.aggregations,
        }
    }
}
