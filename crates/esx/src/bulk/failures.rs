//! 🚨 Bulk failure aggregation: "the request worked, some of your documents did not."
//!
//! A `_bulk` call answers 200 even when half its items bounced. This module turns that
//! quiet partial failure into one loud error, carrying every failed id and why it failed.
//! Successful items in the same call are not rolled back (the engine does not do
//! batch atomicity and neither do we). They stay reachable through `BulkFailure::items`.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use crate::bulk::response::BulkItemResult;
use crate::errors::EsxError;

/// 📋 Every failed item of one bulk call, plus the full ordered result list.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("💀 bulk request finished but {} of {} items failed: {:?}", .failed.len(), .items.len(), .failed)]
pub struct BulkFailure {
    failed: BTreeMap<String, String>,
    items: Vec<BulkItemResult>,
}

impl BulkFailure {
    /// document id -> `"[type] reason"`. Keys may be empty strings.
    pub fn failed_documents(&self) -> &BTreeMap<String, String> {
        &self.failed
    }

    /// Every item result of the call, in submission order, successes included.
    pub fn items(&self) -> &[BulkItemResult] {
        &self.items
    }

    pub fn into_items(self) -> Vec<BulkItemResult> {
        self.items
    }
}

/// 🚨 Scans item results and raises once if anything failed.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkFailureAggregator;

impl BulkFailureAggregator {
    /// ✅ Pass-through when every item succeeded (an empty list included).
    /// 💀 `EsxError::BulkFailure` with the id -> message map otherwise.
    ///
    /// Two failures sharing an id (the empty one, usually) keep the later message.
    pub fn check(results: Vec<BulkItemResult>) -> Result<Vec<BulkItemResult>, EsxError> {
        let failed: BTreeMap<String, String> = results
            .iter()
            .filter_map(BulkItemResult::as_failure)
            .map(|failure| (failure.id.clone(), failure.message()))
            .collect();

        if failed.is_empty() {
            return Ok(results);
        }

        let failure_count = results.iter().filter(|r| r.is_failure()).count();
        warn!(
            "🚨 bulk request had {} failed items out of {}",
            failure_count,
            results.len()
        );
        // 🔍 the first few are usually enough to spot the mapping mistake
        for (id, message) in failed.iter().take(5) {
            warn!("🚨 doc id '{}': {}", id, message);
        }

        Err(EsxError::BulkFailure(BulkFailure {
            failed,
            items: results,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::response::{BulkAction, BulkItemFailure, BulkItemSuccess};

    fn ok(id: &str) -> BulkItemResult {
        BulkItemResult::Success(BulkItemSuccess {
            action: BulkAction::Index,
            index: "books".into(),
            id: id.into(),
            version: Some(1),
            seq_no: Some(0),
            primary_term: Some(1),
            result: Some("created".into()),
            status: 201,
        })
    }

    fn failed(id: &str, reason: &str) -> BulkItemResult {
        BulkItemResult::Failure(BulkItemFailure {
            action: BulkAction::Index,
            index: "books".into(),
            id: id.into(),
            status: 400,
            error_type: "mapper_parsing_exception".into(),
            reason: reason.into(),
        })
    }

    #[test]
    fn the_one_where_nothing_failed_and_nothing_is_raised() -> Result<(), EsxError> {
        let results = vec![ok("1"), ok("2")];
        assert_eq!(BulkFailureAggregator::check(results.clone())?, results);
        assert!(BulkFailureAggregator::check(Vec::new())?.is_empty());
        Ok(())
    }

    #[test]
    fn the_one_where_two_of_five_fail_and_the_map_has_two_entries() {
        let results = vec![
            ok("0"),
            failed("1", "bad date"),
            ok("2"),
            failed("3", "bad number"),
            ok("4"),
        ];
        let err = BulkFailureAggregator::check(results).err();
        let Some(EsxError::BulkFailure(failure)) = err else {
            panic!("💀 expected a BulkFailure, got {err:?}");
        };
        assert_eq!(failure.failed_documents().len(), 2);
        assert_eq!(
            failure.failed_documents().get("1").map(String::as_str),
            Some("[mapper_parsing_exception] bad date")
        );
        assert!(failure.failed_documents().contains_key("3"));
        assert_eq!(failure.items().len(), 5);
        assert_eq!(failure.items().iter().filter(|r| !r.is_failure()).count(), 3);
        assert_eq!(failure.items()[2].id(), "2");
    }

    #[test]
    fn the_one_where_a_failure_without_an_id_is_still_counted() {
        let err = BulkFailureAggregator::check(vec![failed("", "no id ever assigned")]).err();
        let failure = err.as_ref().and_then(EsxError::as_bulk_failure);
        assert_eq!(
            failure.and_then(|f| f.failed_documents().get("")).map(String::as_str),
            Some("[mapper_parsing_exception] no id ever assigned")
        );
    }
}
