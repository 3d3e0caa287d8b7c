//! 🔍 esx: scroll streams and bulk batching for Elasticsearch-style engines.
//!
//! Two halves, one shared `SearchClient`:
//! - 🌊 [`scroll`]: a pull iterator over every hit of a query, backed by one
//!   server-side cursor that is released exactly once.
//! - 📦 [`bulk`]: many write intents in one round trip, with partial failures
//!   folded into a single [`BulkFailure`](bulk::BulkFailure).
//!
//! [`SearchOperations`] is the front door for both. 🦆

pub mod app_config;
pub mod backends;
pub mod bulk;
pub mod common;
pub mod document;
pub mod errors;
pub mod operations;
pub mod query;
pub mod scroll;

pub use app_config::{AppConfig, load_config};
pub use backends::{EngineBackend, SearchClient};
pub use document::{Document, IndexedObjectInformation};
pub use errors::EsxError;
pub use operations::SearchOperations;
pub use query::{Pagination, Query};
pub use scroll::SearchHitStream;
