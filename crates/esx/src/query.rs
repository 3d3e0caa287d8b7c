//! 🔍 Query: the minimum a search needs to know before it hits the wire.
//!
//! Query DSL construction is somebody else's job. By the time a `Query` reaches us
//! its `query` clause is already engine-native JSON. What we own is everything
//! around it: how big a page is, whether there is a cap on results, how to sort,
//! which `_source` fields come back, and whether the total gets counted.
//!
//! ```text
//! Query ──render_scroll()──▶ SearchRequest { body, keep_alive: Some(..) }  (opens a cursor)
//! Query ──render_page()────▶ SearchRequest { body, keep_alive: None }      (one page, from/size)
//! ```

use serde_json::{Map, Value, json};

use crate::common::KeepAlive;
use crate::errors::EsxError;

/// 📏 How a query wants its results sliced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pagination {
    /// 🌊 No explicit paging. Cannot open a scroll until someone picks a page size.
    #[default]
    Unpaged,
    /// 📄 Classic page number + page size.
    Paged { page: usize, size: usize },
    /// ✂️ Fetch in pages of `size`, stop after `max_results` elements in total.
    Limiting { size: usize, max_results: usize },
}

impl Pagination {
    pub fn paged(page: usize, size: usize) -> Self {
        Self::Paged { page, size }
    }

    pub fn limiting(size: usize, max_results: usize) -> Self {
        Self::Limiting { size, max_results }
    }

    /// The explicit page size, if there is one.
    pub fn page_size(&self) -> Option<usize> {
        match self {
            Self::Unpaged => None,
            Self::Paged { size, .. } | Self::Limiting { size, .. } => Some(*size),
        }
    }

    /// The overall cap on delivered elements, for limiting mode.
    pub fn max_results(&self) -> Option<usize> {
        match self {
            Self::Limiting { max_results, .. } => Some(*max_results),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// ↕️ One sort clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }

    /// 🔧 `"field"`, `"field:asc"` or `"field:desc"`.
    pub fn parse(raw: &str) -> Result<Self, EsxError> {
        match raw.rsplit_once(':') {
            None if !raw.is_empty() => Ok(Self::asc(raw)),
            Some((field, "asc")) if !field.is_empty() => Ok(Self::asc(field)),
            Some((field, "desc")) if !field.is_empty() => Ok(Self::desc(field)),
            _ => Err(EsxError::InvalidQuery(format!(
                "sort '{raw}' should look like 'field', 'field:asc' or 'field:desc'"
            ))),
        }
    }
}

/// 🧺 Which `_source` fields come back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceFilter {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

/// 🔍 A query ready to be paged through.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Engine-native query clause. `match_all` unless told otherwise.
    pub query: Value,
    pub pagination: Pagination,
    pub sort: Vec<SortField>,
    pub source_filter: Option<SourceFilter>,
    pub track_total_hits: Option<bool>,
    pub seq_no_primary_term: bool,
    pub version: bool,
}

impl Default for Query {
    fn default() -> Self {
        Self::match_all()
    }
}

impl Query {
    pub fn match_all() -> Self {
        Self::native(json!({ "match_all": {} }))
    }

    pub fn native(query: Value) -> Self {
        Self {
            query,
            pagination: Pagination::Unpaged,
            sort: Vec::new(),
            source_filter: None,
            track_total_hits: None,
            seq_no_primary_term: false,
            version: false,
        }
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_sort(mut self, sort: SortField) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn with_source_filter(mut self, filter: SourceFilter) -> Self {
        self.source_filter = Some(filter);
        self
    }

    pub fn with_track_total_hits(mut self, track: bool) -> Self {
        self.track_total_hits = Some(track);
        self
    }

    /// 🔢 Ask for `_seq_no`/`_primary_term` and `_version` on every hit.
    pub fn with_concurrency_metadata(mut self) -> Self {
        self.seq_no_primary_term = true;
        self.version = true;
        self
    }

    /// 🎟️ Render the opening request of a scroll.
    ///
    /// Unpaged queries are rejected: a cursor needs an explicit page size.
    /// `from` is never sent because scroll contexts do not allow it.
    pub fn render_scroll(&self, keep_alive: &KeepAlive) -> Result<SearchRequest, EsxError> {
        let size = match self.pagination {
            Pagination::Unpaged => {
                return Err(EsxError::InvalidQuery(
                    "an unpaged query cannot open a scroll, give it a page size first".into(),
                ));
            }
            Pagination::Paged { size, .. } => size,
            Pagination::Limiting { size, max_results } => size.min(max_results.max(1)),
        };
        if size == 0 {
            return Err(EsxError::InvalidQuery("a scroll page size of 0 would never end".into()));
        }
        let mut body = self.base_body();
        body.insert("size".into(), json!(size));
        Ok(SearchRequest {
            body: Value::Object(body),
            keep_alive: Some(keep_alive.clone()),
        })
    }

    /// 📄 Render a single, non-scrolling page.
    pub fn render_page(&self) -> SearchRequest {
        let mut body = self.base_body();
        match self.pagination {
            Pagination::Unpaged => {}
            Pagination::Paged { page, size } => {
                body.insert("from".into(), json!(page.saturating_mul(size)));
                body.insert("size".into(), json!(size));
            }
            Pagination::Limiting { size, max_results } => {
                body.insert("from".into(), json!(0));
                body.insert("size".into(), json!(size.min(max_results)));
            }
        }
        SearchRequest {
            body: Value::Object(body),
            keep_alive: None,
        }
    }

    fn base_body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("query".into(), self.query.clone());
        if !self.sort.is_empty() {
            let sort: Vec<Value> = self
                .sort
                .iter()
                .map(|s| {
                    let mut clause = Map::new();
                    clause.insert(s.field.clone(), json!({ "order": s.order.as_str() }));
                    Value::Object(clause)
                })
                .collect();
            body.insert("sort".into(), Value::Array(sort));
        }
        if let Some(filter) = &self.source_filter {
            body.insert(
                "_source".into(),
                json!({ "includes": filter.includes, "excludes": filter.excludes }),
            );
        }
        if let Some(track) = self.track_total_hits {
            body.insert("track_total_hits".into(), json!(track));
        }
        if self.seq_no_primary_term {
            body.insert("seq_no_primary_term".into(), json!(true));
        }
        if self.version {
            body.insert("version".into(), json!(true));
        }
        body
    }
}

/// 📡 An engine-ready search request: a JSON body and, when it opens a cursor, a TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub body: Value,
    pub keep_alive: Option<KeepAlive>,
}

impl SearchRequest {
    /// Requested page size, defaulting to the engine's own default of 10.
    pub fn size(&self) -> usize {
        self.body
            .get("size")
            .and_then(Value::as_u64)
            .map(|s| s as usize)
            .unwrap_or(10)
    }

    pub fn from(&self) -> usize {
        self.body
            .get("from")
            .and_then(Value::as_u64)
            .map(|s| s as usize)
            .unwrap_or(0)
    }

    /// Whether a boolean request flag such as `version` is switched on.
    pub fn flag(&self, name: &str) -> bool {
        self.body.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}
