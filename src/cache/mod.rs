//! Local persistence layer
//!
//! `LocalCacheStore` keeps blobs and the message log on disk so content survives
//! remote outages and restarts. `ContentMemo` keeps recently read remote content
//! in memory.

pub mod clock;
pub mod memo;
pub mod records;
pub mod store;

pub use clock::{Clock, SystemClock};
#[cfg(test)]
pub use clock::ManualClock;
pub use memo::{ContentMemo, MemoStats};
pub use records::{CacheStats, ContentRecord, MessageRecord, Origin, Role};
pub use store::LocalCacheStore;
