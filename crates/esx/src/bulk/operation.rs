//! ✍️ Bulk operations and their NDJSON rendering.
//!
//! 🎬 The bulk API has rules. Rule 1: an action line first, always. Rule 2: a source
//! line after it, except for deletes, which travel light. Rule 3: the body ends with
//! a newline. It MATTERS. Three engineers lost weekends to this one.
//!
//! ```text
//! {"index":{"_index":"books","_id":"1"}}
//! {"title":"Dune"}
//! {"update":{"_index":"books","_id":"2","retry_on_conflict":3}}
//! {"doc":{"read":true},"doc_as_upsert":true}
//! {"delete":{"_index":"books","_id":"3"}}
//! ```
//!
//! 🧠 Knowledge graph:
//! - `BulkOperation` is a closed sum type. Rendering is one exhaustive `match`,
//!   so a new variant cannot sneak past the serializer.
//! - Versions given on an operation are external versions (`version_type: external`).
//! - `if_seq_no` + `if_primary_term` carry optimistic concurrency control.
//! - Position in the request is the only thing linking an operation to its result.

use serde_json::{Map, Value, json};

use crate::bulk::options::BulkOptions;
use crate::errors::EsxError;

/// 🆕 Whether an index operation may overwrite an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpType {
    /// Create or replace.
    #[default]
    Index,
    /// Create only. An existing id is a conflict.
    Create,
}

/// 📄 Index (or create) a whole document.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOperation {
    pub index: String,
    pub id: Option<String>,
    pub source: Value,
    pub version: Option<i64>,
    pub op_type: OpType,
    pub routing: Option<String>,
    pub if_seq_no: Option<i64>,
    pub if_primary_term: Option<i64>,
}

impl IndexOperation {
    pub fn new(index: impl Into<String>, source: Value) -> Self {
        Self {
            index: index.into(),
            id: None,
            source,
            version: None,
            op_type: OpType::Index,
            routing: None,
            if_seq_no: None,
            if_primary_term: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_op_type(mut self, op_type: OpType) -> Self {
        self.op_type = op_type;
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn with_seq_no_primary_term(mut self, seq_no: i64, primary_term: i64) -> Self {
        self.if_seq_no = Some(seq_no);
        self.if_primary_term = Some(primary_term);
        self
    }
}

/// 🩹 What an update applies: a partial document or a script.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateBody {
    Doc(Value),
    Script {
        source: String,
        lang: Option<String>,
        params: Option<Value>,
    },
}

/// 🩹 Partially update a document, optionally creating it when missing.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    pub index: String,
    pub id: String,
    pub body: UpdateBody,
    pub upsert: bool,
    pub retry_on_conflict: Option<u32>,
    pub routing: Option<String>,
    pub if_seq_no: Option<i64>,
    pub if_primary_term: Option<i64>,
}

impl UpdateOperation {
    pub fn doc(index: impl Into<String>, id: impl Into<String>, partial: Value) -> Self {
        Self::with_body(index, id, UpdateBody::Doc(partial))
    }

    pub fn script(index: impl Into<String>, id: impl Into<String>, source: impl Into<String>) -> Self {
        Self::with_body(
            index,
            id,
            UpdateBody::Script {
                source: source.into(),
                lang: None,
                params: None,
            },
        )
    }

    fn with_body(index: impl Into<String>, id: impl Into<String>, body: UpdateBody) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
            body,
            upsert: false,
            retry_on_conflict: None,
            routing: None,
            if_seq_no: None,
            if_primary_term: None,
        }
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn with_retry_on_conflict(mut self, retries: u32) -> Self {
        self.retry_on_conflict = Some(retries);
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn with_seq_no_primary_term(mut self, seq_no: i64, primary_term: i64) -> Self {
        self.if_seq_no = Some(seq_no);
        self.if_primary_term = Some(primary_term);
        self
    }
}

/// 🗑️ Delete a document by id.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOperation {
    pub index: String,
    pub id: String,
    pub version: Option<i64>,
    pub routing: Option<String>,
    pub if_seq_no: Option<i64>,
    pub if_primary_term: Option<i64>,
}

impl DeleteOperation {
    pub fn new(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
            version: None,
            routing: None,
            if_seq_no: None,
            if_primary_term: None,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }
}

/// ✍️ One write intent inside a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    Index(IndexOperation),
    Update(UpdateOperation),
    Delete(DeleteOperation),
}

impl From<IndexOperation> for BulkOperation {
    fn from(op: IndexOperation) -> Self {
        Self::Index(op)
    }
}

impl From<UpdateOperation> for BulkOperation {
    fn from(op: UpdateOperation) -> Self {
        Self::Update(op)
    }
}

impl From<DeleteOperation> for BulkOperation {
    fn from(op: DeleteOperation) -> Self {
        Self::Delete(op)
    }
}

impl BulkOperation {
    pub fn index_name(&self) -> &str {
        match self {
            Self::Index(op) => &op.index,
            Self::Update(op) => &op.index,
            Self::Delete(op) => &op.index,
        }
    }

    /// The id the caller asked for, if any. Index operations may leave it to the engine.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Index(op) => op.id.as_deref(),
            Self::Update(op) => Some(&op.id),
            Self::Delete(op) => Some(&op.id),
        }
    }

    /// 📝 Append this operation's NDJSON lines to `body`.
    pub fn render_into(&self, body: &mut String) -> Result<(), EsxError> {
        match self {
            Self::Index(op) => {
                let action = match op.op_type {
                    OpType::Index => "index",
                    OpType::Create => "create",
                };
                let mut meta = target_metadata(&op.index, op.id.as_deref(), op.routing.as_deref());
                external_version(&mut meta, op.version);
                concurrency_guard(&mut meta, op.if_seq_no, op.if_primary_term);
                push_line(body, &json!({ action: meta }))?;
                push_line(body, &op.source)?;
            }
            Self::Update(op) => {
                let mut meta = target_metadata(&op.index, Some(&op.id), op.routing.as_deref());
                if let Some(retries) = op.retry_on_conflict {
                    meta.insert("retry_on_conflict".into(), json!(retries));
                }
                concurrency_guard(&mut meta, op.if_seq_no, op.if_primary_term);
                push_line(body, &json!({ "update": meta }))?;

                let partial = match &op.body {
                    UpdateBody::Doc(doc) if op.upsert => json!({ "doc": doc, "doc_as_upsert": true }),
                    UpdateBody::Doc(doc) => json!({ "doc": doc }),
                    UpdateBody::Script { source, lang, params } => {
                        let mut script = Map::new();
                        script.insert("source".into(), json!(source));
                        if let Some(lang) = lang {
                            script.insert("lang".into(), json!(lang));
                        }
                        if let Some(params) = params {
                            script.insert("params".into(), params.clone());
                        }
                        if op.upsert {
                            json!({ "script": script, "scripted_upsert": true, "upsert": {} })
                        } else {
                            json!({ "script": script })
                        }
                    }
                };
                push_line(body, &partial)?;
            }
            Self::Delete(op) => {
                let mut meta = target_metadata(&op.index, Some(&op.id), op.routing.as_deref());
                external_version(&mut meta, op.version);
                concurrency_guard(&mut meta, op.if_seq_no, op.if_primary_term);
                push_line(body, &json!({ "delete": meta }))?;
            }
        }
        Ok(())
    }
}

// 📡 _index, _id and routing: the address label on every parcel
fn target_metadata(index: &str, id: Option<&str>, routing: Option<&str>) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("_index".into(), json!(index));
    if let Some(id) = id {
        meta.insert("_id".into(), json!(id));
    }
    if let Some(routing) = routing {
        meta.insert("routing".into(), json!(routing));
    }
    meta
}

fn external_version(meta: &mut Map<String, Value>, version: Option<i64>) {
    if let Some(version) = version {
        meta.insert("version".into(), json!(version));
        meta.insert("version_type".into(), json!("external"));
    }
}

fn concurrency_guard(meta: &mut Map<String, Value>, seq_no: Option<i64>, primary_term: Option<i64>) {
    if let (Some(seq_no), Some(primary_term)) = (seq_no, primary_term) {
        meta.insert("if_seq_no".into(), json!(seq_no));
        meta.insert("if_primary_term".into(), json!(primary_term));
    }
}

fn push_line(body: &mut String, line: &Value) -> Result<(), EsxError> {
    let rendered = serde_json::to_string(line).map_err(|err| {
        EsxError::Mapping(format!(
            "the JSON that describes JSON failed to become JSON: {err}"
        ))
    })?;
    body.push_str(&rendered);
    body.push('\n');
    Ok(())
}

/// 📦 An ordered list of operations plus the options they share.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkRequest {
    pub operations: Vec<BulkOperation>,
    pub options: BulkOptions,
}

impl BulkRequest {
    pub fn new(operations: Vec<BulkOperation>, options: BulkOptions) -> Self {
        Self { operations, options }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// 📝 The full `_bulk` body, trailing newline included.
    pub fn to_ndjson(&self) -> Result<String, EsxError> {
        let mut body = String::with_capacity(self.operations.len() * 128);
        for operation in &self.operations {
            operation.render_into(&mut body)?;
        }
        Ok(body)
    }
}
