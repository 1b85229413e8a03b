//! Persistent diagram cache with rank-based eviction
//!
//! Keeps a fixed number of rendered diagrams on disk, one file per numbered
//! slot, with a JSON index of the records. When full, the record with the
//! lowest recency-weighted access count is replaced.

mod cache;
pub mod codec;
mod error;
pub mod rank;
mod renderer;
mod store;
mod types;
mod write_back;

pub use cache::DiagramCache;
pub use error::{CacheError, GenerationError, Result};
pub use rank::{rank, RANK_WINDOW_SECS};
pub use renderer::Renderer;
pub use store::{Admission, Lookup, SlotStore};
pub use write_back::DEFAULT_WRITE_BACK_QUEUE;
pub use types::{ellipsis, CacheRecord, CacheStats, DiagramType, Fetched, RecordSnapshot};
