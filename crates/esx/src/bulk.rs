//! 📦 Bulk writes: operations, options, the batcher that ships them, and the
//! aggregator that turns partial failures into one honest error.
//!
//! ```text
//! Vec<BulkOperation> ──BulkBatcher::submit──▶ Vec<BulkItemResult> ──BulkFailureAggregator::check──▶ Ok | BulkFailure
//! ```

pub mod batcher;
pub mod failures;
pub mod operation;
pub mod options;
pub mod response;

pub use batcher::BulkBatcher;
pub use failures::{BulkFailure, BulkFailureAggregator};
pub use operation::{
    BulkOperation, BulkRequest, DeleteOperation, IndexOperation, OpType, UpdateBody, UpdateOperation,
};
pub use options::{ActiveShardCount, BulkOptions, RefreshPolicy};
pub use response::{
    BulkAction, BulkItemError, BulkItemFailure, BulkItemResult, BulkItemStatus, BulkItemSuccess,
    BulkResponse, BulkResponseItem,
};
