//! 🪪 Documents: entities that know their own id, and want to hear back what the engine assigned.

use serde::Serialize;

use crate::bulk::{BulkItemResult, BulkItemSuccess, IndexOperation};
use crate::errors::EsxError;

/// 📬 What the engine said about one successfully written document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedObjectInformation {
    pub id: String,
    pub index: String,
    pub seq_no: Option<i64>,
    pub primary_term: Option<i64>,
    pub version: Option<i64>,
}

impl From<&BulkItemSuccess> for IndexedObjectInformation {
    fn from(success: &BulkItemSuccess) -> Self {
        Self {
            id: success.id.clone(),
            index: success.index.clone(),
            seq_no: success.seq_no,
            primary_term: success.primary_term,
            version: success.version,
        }
    }
}

/// 🪪 An entity that can be bulk-indexed.
///
/// `id()` returning `None` lets the engine pick one; `apply_write_back` is where it
/// arrives. A `version()` is sent as an external version.
pub trait Document: Serialize {
    fn id(&self) -> Option<String>;

    fn version(&self) -> Option<i64> {
        None
    }

    /// Called once per entity after a fully successful bulk index. Default: ignore it.
    fn apply_write_back(&mut self, info: &IndexedObjectInformation) {
        let _ = info;
    }
}

/// ✍️ Serialize an entity into an index operation against `index`.
pub fn index_operation<D: Document>(index: &str, document: &D) -> Result<IndexOperation, EsxError> {
    let source = serde_json::to_value(document)
        .map_err(|err| EsxError::Mapping(format!("entity for index '{index}' would not serialize: {err}")))?;
    let mut operation = IndexOperation::new(index, source);
    operation.id = document.id();
    operation.version = document.version();
    Ok(operation)
}

/// 🔁 Hand every entity its item result, by position.
///
/// Expects results that already passed `BulkFailureAggregator::check`; a failure or a
/// length mismatch here is a caller bug.
pub fn write_back<D: Document>(
    documents: &mut [D],
    results: &[BulkItemResult],
) -> Result<Vec<IndexedObjectInformation>, EsxError> {
    if documents.len() != results.len() {
        return Err(EsxError::IllegalState(format!(
            "{} entities but {} bulk results, positions no longer line up",
            documents.len(),
            results.len()
        )));
    }
    let infos = results
        .iter()
        .map(|result| {
            result.as_success().map(IndexedObjectInformation::from).ok_or_else(|| {
                EsxError::IllegalState(format!("write-back reached a failed item '{}'", result.id()))
            })
        })
        .collect::<Result<Vec<_>, EsxError>>()?;
    for (document, info) in documents.iter_mut().zip(&infos) {
        document.apply_write_back(info);
    }
    Ok(infos)
}
