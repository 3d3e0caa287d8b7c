//! 🌊 Scroll iteration: page fetching, cursor ownership, and the pull stream on top.
//!
//! ```text
//! SearchHitStream ──has_next──▶ ScrollCursor ──advance──▶ PageFetcher ──scroll──▶ SearchClient
//!                 ──close─────▶              ──release──▶             ──clear───▶
//! ```

pub mod cursor;
pub mod page_fetcher;
pub mod stream;

pub use cursor::ScrollCursor;
pub use page_fetcher::{HitMapper, PageFetcher};
pub use stream::{SearchHitStream, StreamState};
