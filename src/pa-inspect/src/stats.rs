//! Live statistics
//!
//! Aggregates one cycle's walks into what the live display shows: a summary
//! per thread, thread cache occupancy per bucket, root bucket usage and the
//! allocator's global counters.

use crate::layout::{PartitionRoot, ThreadCacheStats, THREAD_CACHE_BUCKET_COUNT};
use crate::view::ThreadCacheSnapshot;
use crate::walker::{BucketStats, ThreadCacheWalk};

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThreadSummary {
    /// `None` for the all-threads line
    pub thread_id: Option<i32>,
    pub cached_memory: u64,
    pub should_purge: bool,
    pub stats: ThreadCacheStats,
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

impl ThreadSummary {
    pub fn from_cache(cache: &ThreadCacheSnapshot) -> Self {
        ThreadSummary {
            thread_id: Some(cache.thread_id),
            cached_memory: cache.cached_memory(),
            should_purge: cache.should_purge != 0,
            stats: cache.stats,
        }
    }

    pub fn hit_rate(&self) -> f64 {
        ratio(self.stats.alloc_hits, self.stats.alloc_count)
    }

    pub fn too_large_rate(&self) -> f64 {
        ratio(self.stats.alloc_miss_too_large, self.stats.alloc_count)
    }

    pub fn empty_rate(&self) -> f64 {
        ratio(self.stats.alloc_miss_empty, self.stats.alloc_count)
    }

    pub fn alloc_count(&self) -> u64 {
        self.stats.alloc_count
    }
}

/// Thread cache occupancy of one bucket, summed over threads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheBucketRow {
    pub index: usize,
    pub slot_size: u16,
    pub per_thread_limit: u8,
    pub count: u64,
}

impl CacheBucketRow {
    pub fn cached_memory(&self) -> u64 {
        self.count * u64::from(self.slot_size)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalTotals {
    pub syscall_count: u64,
    pub syscall_total_time_ns: u64,
    pub total_size_of_committed_pages: u64,
    pub max_size_of_committed_pages: u64,
    pub virtual_size: u64,
    pub total_size_of_allocated_bytes: u64,
    pub max_size_of_allocated_bytes: u64,
    pub empty_slot_spans_dirty_bytes: u64,
}

impl GlobalTotals {
    pub fn from_root(root: &PartitionRoot) -> Self {
        GlobalTotals {
            syscall_count: root.syscall_count,
            syscall_total_time_ns: root.syscall_total_time_ns,
            total_size_of_committed_pages: root.total_size_of_committed_pages,
            max_size_of_committed_pages: root.max_size_of_committed_pages,
            virtual_size: root.virtual_size(),
            total_size_of_allocated_bytes: root.total_size_of_allocated_bytes,
            max_size_of_allocated_bytes: root.max_size_of_allocated_bytes,
            empty_slot_spans_dirty_bytes: root.empty_slot_spans_dirty_bytes,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveStats {
    pub threads: Vec<ThreadSummary>,
    pub all_threads: ThreadSummary,
    pub cache_buckets: Vec<CacheBucketRow>,
    pub largest_active_bucket_index: usize,
    pub buckets: Vec<BucketStats>,
    /// Absent when no allocator root could be resolved
    pub totals: Option<GlobalTotals>,
}

/// Per-bucket thread cache rows. The slot size and limit come from the first
/// thread that has the bucket configured.
pub fn cache_bucket_rows(caches: &[ThreadCacheSnapshot]) -> Vec<CacheBucketRow> {
    (0..THREAD_CACHE_BUCKET_COUNT)
        .map(|index| {
            let mut row = CacheBucketRow {
                index,
                ..CacheBucketRow::default()
            };
            for cache in caches {
                let bucket = &cache.buckets[index];
                if row.slot_size == 0 {
                    row.slot_size = bucket.slot_size;
                    row.per_thread_limit = bucket.limit;
                }
                row.count += u64::from(bucket.count);
            }
            row
        })
        .collect()
}

/// Combine one cycle's walks. `root` and `buckets` are absent together.
pub fn aggregate(
    walk: &ThreadCacheWalk,
    root: Option<&PartitionRoot>,
    buckets: Vec<BucketStats>,
) -> LiveStats {
    let threads: Vec<ThreadSummary> = walk.caches.iter().map(ThreadSummary::from_cache).collect();

    let mut all_threads = ThreadSummary::default();
    for thread in &threads {
        all_threads.cached_memory += thread.cached_memory;
        all_threads.should_purge |= thread.should_purge;
        all_threads.stats.accumulate(&thread.stats);
    }

    LiveStats {
        threads,
        all_threads,
        cache_buckets: cache_bucket_rows(&walk.caches),
        largest_active_bucket_index: usize::from(walk.registry.largest_active_bucket_index),
        buckets,
        totals: root.map(GlobalTotals::from_root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::RemoteAddr;
    use crate::layout::{ThreadCache, ThreadCacheRegistry};
    use crate::view::RemoteStructView;
    use bytemuck::Zeroable;

    fn snapshot(tid: i32, configure: impl FnOnce(&mut ThreadCache)) -> ThreadCacheSnapshot {
        let mut cache = ThreadCache::zeroed();
        cache.thread_id = tid;
        configure(&mut cache);
        RemoteStructView::from_bytes(RemoteAddr::new(0x1000), bytemuck::bytes_of(&cache)).unwrap()
    }

    fn walk(caches: Vec<ThreadCacheSnapshot>, largest: u8) -> ThreadCacheWalk {
        let mut registry = ThreadCacheRegistry::zeroed();
        registry.largest_active_bucket_index = largest;
        ThreadCacheWalk {
            registry: RemoteStructView::from_bytes(
                RemoteAddr::new(0x2000),
                bytemuck::bytes_of(&registry),
            )
            .unwrap(),
            caches,
            truncated: false,
        }
    }

    #[test]
    fn test_cache_rows_sum_over_threads() {
        let a = snapshot(1, |c| {
            c.buckets[3].slot_size = 64;
            c.buckets[3].limit = 128;
            c.buckets[3].count = 5;
        });
        let b = snapshot(2, |c| {
            c.buckets[3].slot_size = 64;
            c.buckets[3].count = 2;
        });

        let rows = cache_bucket_rows(&[a, b]);
        assert_eq!(rows.len(), THREAD_CACHE_BUCKET_COUNT);
        assert_eq!(
            rows[3],
            CacheBucketRow {
                index: 3,
                slot_size: 64,
                per_thread_limit: 128,
                count: 7
            }
        );
        assert_eq!(rows[3].cached_memory(), 448);
        assert_eq!(rows[4].count, 0);
    }

    #[test]
    fn test_thread_summary_rates() {
        let cache = snapshot(9, |c| {
            c.should_purge = 1;
            c.stats.alloc_count = 200;
            c.stats.alloc_hits = 150;
            c.stats.alloc_miss_too_large = 20;
            c.stats.alloc_miss_empty = 30;
            c.buckets[0].slot_size = 16;
            c.buckets[0].count = 10;
        });
        let summary = ThreadSummary::from_cache(&cache);

        assert_eq!(summary.thread_id, Some(9));
        assert!(summary.should_purge);
        assert_eq!(summary.cached_memory, 160);
        assert!((summary.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!((summary.too_large_rate() - 0.1).abs() < f64::EPSILON);
        assert!((summary.empty_rate() - 0.15).abs() < f64::EPSILON);
        assert_eq!(ThreadSummary::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_aggregate_all_threads_and_totals() {
        let a = snapshot(1, |c| {
            c.stats.alloc_count = 10;
            c.buckets[1].slot_size = 32;
            c.buckets[1].count = 1;
        });
        let b = snapshot(2, |c| {
            c.stats.alloc_count = 5;
            c.buckets[1].slot_size = 32;
            c.buckets[1].count = 3;
        });
        let mut root = PartitionRoot::zeroed();
        root.syscall_count = 12;
        root.total_size_of_super_pages = 4 << 20;
        root.total_size_of_direct_mapped_pages = 1 << 20;

        let stats = aggregate(&walk(vec![a, b], 17), Some(&root), vec![]);
        assert_eq!(stats.threads.len(), 2);
        assert_eq!(stats.all_threads.thread_id, None);
        assert_eq!(stats.all_threads.alloc_count(), 15);
        assert_eq!(stats.all_threads.cached_memory, 128);
        assert_eq!(stats.largest_active_bucket_index, 17);

        let totals = stats.totals.unwrap();
        assert_eq!(totals.syscall_count, 12);
        assert_eq!(totals.virtual_size, 5 << 20);
    }

    #[test]
    fn test_aggregate_without_root() {
        let stats = aggregate(&walk(vec![], 0), None, vec![]);
        assert!(stats.totals.is_none());
        assert!(stats.threads.is_empty());
    }
}
