//! Heap topology traversal
//!
//! All walkers read through a `MemorySource` without freezing the target, so
//! every list can change under them. Reads are re-validated where an
//! invariant exists (slot accounting, bucket ordering) and a broken chain
//! costs at most the current record or cycle.

mod buckets;
mod superpages;
mod thread_cache;

pub use buckets::{walk_buckets, BucketStats, SlotSpanSummary, SpanList};
pub use superpages::{
    inspect_super_page, walk_extents, PartitionPageInfo, SlotSpanInfo,
};
pub use thread_cache::{walk_thread_caches, ThreadCacheWalk};

/// Upper bound on the length of any remote linked list (0 = unbounded)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListLimit(usize);

impl ListLimit {
    pub const UNBOUNDED: ListLimit = ListLimit(0);

    pub const fn new(max: usize) -> Self {
        ListLimit(max)
    }

    pub fn reached(&self, visited: usize) -> bool {
        self.0 != 0 && visited >= self.0
    }
}
