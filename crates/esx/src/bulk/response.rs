//! 📬 Bulk responses: what came back, item by item, in the order we asked.

use serde::Deserialize;

/// 🏷️ Which action an item result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Index,
    Create,
    Update,
    Delete,
}

/// 💥 The engine's explanation for a failed item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct BulkItemError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// 📬 One item of a `_bulk` answer, as the engine phrased it.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct BulkItemStatus {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(rename = "_version", default)]
    pub version: Option<i64>,
    #[serde(rename = "_seq_no", default)]
    pub seq_no: Option<i64>,
    #[serde(rename = "_primary_term", default)]
    pub primary_term: Option<i64>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub error: Option<BulkItemError>,
}

/// 📬 `{"index": {...}}`, `{"update": {...}}` and friends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkResponseItem {
    Index(BulkItemStatus),
    Create(BulkItemStatus),
    Update(BulkItemStatus),
    Delete(BulkItemStatus),
}

impl BulkResponseItem {
    pub fn action(&self) -> BulkAction {
        match self {
            Self::Index(_) => BulkAction::Index,
            Self::Create(_) => BulkAction::Create,
            Self::Update(_) => BulkAction::Update,
            Self::Delete(_) => BulkAction::Delete,
        }
    }

    pub fn status(&self) -> &BulkItemStatus {
        match self {
            Self::Index(s) | Self::Create(s) | Self::Update(s) | Self::Delete(s) => s,
        }
    }
}

/// 📬 The whole `_bulk` answer.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BulkResponseItem>,
}

/// ✅ A write that landed.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemSuccess {
    pub action: BulkAction,
    pub index: String,
    pub id: String,
    pub version: Option<i64>,
    pub seq_no: Option<i64>,
    pub primary_term: Option<i64>,
    /// `created`, `updated`, `deleted`, `noop` or `not_found`.
    pub result: Option<String>,
    pub status: u16,
}

/// ❌ A write that did not. The id may be empty when the engine never assigned one.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemFailure {
    pub action: BulkAction,
    pub index: String,
    pub id: String,
    pub status: u16,
    pub error_type: String,
    pub reason: String,
}

impl BulkItemFailure {
    /// `"[type] reason"`, the shape kept in failure maps.
    pub fn message(&self) -> String {
        format!("[{}] {}", self.error_type, self.reason)
    }
}

/// 📬 One per submitted operation, same position as the operation.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkItemResult {
    Success(BulkItemSuccess),
    Failure(BulkItemFailure),
}

impl BulkItemResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Success(s) => &s.id,
            Self::Failure(f) => &f.id,
        }
    }

    pub fn as_success(&self) -> Option<&BulkItemSuccess> {
        match self {
            Self::Success(s) => Some(s),
            Self::Failure(_) => None,
        }
    }

    pub fn as_failure(&self) -> Option<&BulkItemFailure> {
        match self {
            Self::Failure(f) => Some(f),
            Self::Success(_) => None,
        }
    }
}

impl From<BulkResponseItem> for BulkItemResult {
    fn from(item: BulkResponseItem) -> Self {
        let action = item.action();
        let status = match item {
            BulkResponseItem::Index(s)
            | BulkResponseItem::Create(s)
            | BulkResponseItem::Update(s)
            | BulkResponseItem::Delete(s) => s,
        };
        // 🧠 a 404 delete comes back as result "not_found" with no error object: that's a success
        match status.error {
            Some(error) => Self::Failure(BulkItemFailure {
                action,
                index: status.index,
                id: status.id.unwrap_or_default(),
                status: status.status,
                reason: error.reason.unwrap_or_else(|| "no reason given".to_string()),
                error_type: error.error_type,
            }),
            None => Self::Success(BulkItemSuccess {
                action,
                index: status.index,
                id: status.id.unwrap_or_default(),
                version: status.version,
                seq_no: status.seq_no,
                primary_term: status.primary_term,
                result: status.result,
                status: status.status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_a_mixed_response_keeps_its_order() -> Result<(), serde_json::Error> {
        let response: BulkResponse = serde_json::from_value(json!({
            "took": 30,
            "errors": true,
            "items": [
                { "index": { "_index": "books", "_id": "1", "_version": 1, "_seq_no": 0,
                             "_primary_term": 1, "result": "created", "status": 201 } },
                { "update": { "_index": "books", "_id": "2", "status": 404,
                              "error": { "type": "document_missing_exception",
                                         "reason": "[2]: document missing" } } },
                { "delete": { "_index": "books", "_id": "3", "_version": 1,
                              "result": "not_found", "status": 404 } },
                { "create": { "_index": "books", "status": 400,
                              "error": { "type": "mapper_parsing_exception" } } }
            ]
        }))?;
        assert!(response.errors);

        let results: Vec<BulkItemResult> = response.items.into_iter().map(Into::into).collect();
        assert_eq!(results.len(), 4);

        let created = results[0].as_success().map(|s| (s.id.as_str(), s.seq_no, s.result.as_deref()));
        assert_eq!(created, Some(("1", Some(0), Some("created"))));

        let missing = results[1].as_failure().map(|f| f.message());
        assert_eq!(missing.as_deref(), Some("[document_missing_exception] [2]: document missing"));

        assert!(!results[2].is_failure(), "not_found deletes are not failures");

        let anonymous = results[3].as_failure().map(|f| (f.id.as_str(), f.action, f.reason.as_str()));
        assert_eq!(anonymous, Some(("", BulkAction::Create, "no reason given")));
        Ok(())
    }
}
