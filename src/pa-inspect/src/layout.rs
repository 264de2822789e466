//! PartitionAlloc Memory Layout
//!
//! Local mirrors of the allocator structures read out of the target, plus the
//! heap geometry constants. These must match the target build bit for bit
//! (same architecture, same field order, same packing). Nothing at runtime can
//! check that, so a mismatched target produces garbage rather than an error.
//!
//! Every struct is `#[repr(C)]` plain old data with explicit padding so it can
//! be copied out of a byte buffer with `bytemuck`. Pointer fields are
//! `RemoteAddr`s, never local pointers.

use crate::addr::RemoteAddr;
use crate::error::{Error, Result};

use bytemuck::{Pod, Zeroable};
use serde::Serialize;

// -- Needle --
// The allocator compiles a small array into its initialised data segment:
//
// uintptr_t kNeedleArray[] = {
//   kNeedle1,
//   &g_thread_cache_registry,   // slot 1
//   kNeedle2,
// };
//
// Builds that export more globals widen the array; the length and the slots
// are scan parameters.

/// First sentinel word of the needle array
pub const NEEDLE_1: u64 = 0x0e69_e32f_3ad9_ea63;

/// Last sentinel word of the needle array
pub const NEEDLE_2: u64 = 0x9615_ee1c_5eb1_4caf;

/// Words in the needle array, sentinels included
pub const NEEDLE_ARRAY_LEN: usize = 3;

/// Needle slot holding the thread cache registry address
pub const REGISTRY_SLOT: usize = 1;

// -- Buckets --

/// Number of buckets in `PartitionRoot::buckets`
pub const ROOT_BUCKET_COUNT: usize = 128;

/// Number of buckets in `ThreadCache::buckets`
pub const THREAD_CACHE_BUCKET_COUNT: usize = 48;

/// Slot size marking a bucket that is not in use
pub const INVALID_BUCKET_SIZE: u32 = 1;

/// Largest slot size covered by the live bucket statistics
pub const MAX_SMALL_SLOT_SIZE: u32 = 4096;

// -- Geometry --

pub const SYSTEM_PAGE_SIZE: usize = 4096;
pub const PARTITION_PAGE_SIZE: usize = 4 * SYSTEM_PAGE_SIZE;
pub const SUPER_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// `SlotSpanMetadata::flags` bits
pub mod span_flags {
    pub const MARKED_FULL: u16 = 1 << 0;
    pub const FREELIST_IS_SORTED: u16 = 1 << 1;
}

/// Per-bucket entry of a thread cache (16 bytes)
///
/// struct Bucket {
///   EncodedNextFreelistEntry* freelist_head;  // +0x00
///   uint8_t count;                            // +0x08
///   uint8_t limit;                            // +0x09
///   uint16_t slot_size;                       // +0x0A
/// };
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CacheBucket {
    pub freelist_head: RemoteAddr,
    pub count: u8,
    pub limit: u8,
    pub slot_size: u16,
    _pad: u32,
}

/// Counter block of a thread cache
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize)]
pub struct ThreadCacheStats {
    pub alloc_count: u64,
    pub alloc_hits: u64,
    pub alloc_misses: u64,
    pub alloc_miss_empty: u64,
    pub alloc_miss_too_large: u64,
    pub cache_fill_count: u64,
    pub cache_fill_hits: u64,
    pub cache_fill_misses: u64,
    pub batch_fill_count: u64,
    pub bucket_total_memory: u64,
    pub metadata_overhead: u64,
}

impl ThreadCacheStats {
    /// Field-wise sum, used to build the all-threads line.
    /// Counters read from a racing target can be garbage; sums saturate.
    pub fn accumulate(&mut self, other: &ThreadCacheStats) {
        self.alloc_count = self.alloc_count.saturating_add(other.alloc_count);
        self.alloc_hits = self.alloc_hits.saturating_add(other.alloc_hits);
        self.alloc_misses = self.alloc_misses.saturating_add(other.alloc_misses);
        self.alloc_miss_empty = self.alloc_miss_empty.saturating_add(other.alloc_miss_empty);
        self.alloc_miss_too_large = self
            .alloc_miss_too_large
            .saturating_add(other.alloc_miss_too_large);
        self.cache_fill_count = self.cache_fill_count.saturating_add(other.cache_fill_count);
        self.cache_fill_hits = self.cache_fill_hits.saturating_add(other.cache_fill_hits);
        self.cache_fill_misses = self.cache_fill_misses.saturating_add(other.cache_fill_misses);
        self.batch_fill_count = self.batch_fill_count.saturating_add(other.batch_fill_count);
        self.bucket_total_memory = self
            .bucket_total_memory
            .saturating_add(other.bucket_total_memory);
        self.metadata_overhead = self.metadata_overhead.saturating_add(other.metadata_overhead);
    }
}

/// One thread's cache
///
/// class ThreadCache {
///   bool should_purge_;                 // +0x000
///   PlatformThreadId thread_id_;        // +0x004
///   ThreadCacheStats stats_;            // +0x008 (0x58)
///   Bucket buckets_[48];                // +0x060 (0x300)
///   PartitionRoot* root_;               // +0x360
///   ThreadCache* next_;                 // +0x368
///   ThreadCache* prev_;                 // +0x370
/// };
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ThreadCache {
    pub should_purge: u8,
    _pad: [u8; 3],
    pub thread_id: i32,
    pub stats: ThreadCacheStats,
    pub buckets: [CacheBucket; THREAD_CACHE_BUCKET_COUNT],
    pub root: RemoteAddr,
    pub next: RemoteAddr,
    pub prev: RemoteAddr,
}

impl ThreadCache {
    /// Bytes currently held in this cache's freelists.
    pub fn cached_memory(&self) -> u64 {
        self.buckets
            .iter()
            .map(|b| u64::from(b.count) * u64::from(b.slot_size))
            .sum()
    }
}

/// Global list of thread caches
///
/// class ThreadCacheRegistry {
///   Lock lock_;                                  // +0x00
///   ThreadCache* list_head_;                     // +0x08
///   int64_t periodic_purge_next_interval_ns_;    // +0x10
///   uint8_t largest_active_bucket_index_;        // +0x18
/// };
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ThreadCacheRegistry {
    pub lock: u64,
    pub list_head: RemoteAddr,
    pub periodic_purge_next_interval_ns: u64,
    pub largest_active_bucket_index: u8,
    _pad: [u8; 7],
}

/// Size class of the allocator (40 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PartitionBucket {
    pub active_slot_spans_head: RemoteAddr,
    pub empty_slot_spans_head: RemoteAddr,
    pub decommitted_slot_spans_head: RemoteAddr,
    pub slot_size: u32,
    pub num_system_pages_per_slot_span: u16,
    pub num_full_slot_spans: u16,
    pub slot_size_reciprocal: u64,
}

impl PartitionBucket {
    /// Sentinel buckets and never-initialised (zero-sized) buckets.
    pub fn is_in_use(&self) -> bool {
        self.slot_size != INVALID_BUCKET_SIZE && self.slot_size != 0
    }

    pub fn slots_per_span(&self, geometry: &HeapGeometry) -> usize {
        if self.slot_size == 0 {
            return 0;
        }
        usize::from(self.num_system_pages_per_slot_span) * geometry.system_page_size
            / self.slot_size as usize
    }

    /// Partition pages covered by one slot span of this bucket.
    pub fn partition_pages_per_slot_span(&self, geometry: &HeapGeometry) -> usize {
        let per_partition_page = geometry.system_pages_per_partition_page();
        usize::from(self.num_system_pages_per_slot_span).div_ceil(per_partition_page)
    }
}

/// Slot span metadata (32 bytes)
///
/// `num_allocated_slots` is negated while a full span is being moved off the
/// active list, so only its magnitude is a slot count.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SlotSpanMetadata {
    pub freelist_head: RemoteAddr,
    pub next_slot_span: RemoteAddr,
    pub bucket: RemoteAddr,
    pub num_allocated_slots: i16,
    pub num_unprovisioned_slots: u16,
    pub flags: u16,
    pub empty_cache_index: u16,
}

impl SlotSpanMetadata {
    pub fn allocated_slots(&self) -> u16 {
        self.num_allocated_slots.unsigned_abs()
    }

    pub fn is_marked_full(&self) -> bool {
        self.num_allocated_slots < 0 || self.flags & span_flags::MARKED_FULL != 0
    }

    pub fn freelist_is_sorted(&self) -> bool {
        self.flags & span_flags::FREELIST_IS_SORTED != 0
    }

    pub fn is_full(&self, slots_per_span: usize) -> bool {
        self.num_allocated_slots < 0 || usize::from(self.allocated_slots()) == slots_per_span
    }

    pub fn is_active(&self, slots_per_span: usize) -> bool {
        self.num_allocated_slots > 0
            && !self.is_full(slots_per_span)
            && (!self.freelist_head.is_null() || self.num_unprovisioned_slots > 0)
    }

    pub fn is_empty(&self) -> bool {
        self.num_allocated_slots == 0 && !self.freelist_head.is_null()
    }

    pub fn is_decommitted(&self) -> bool {
        self.num_allocated_slots == 0 && self.freelist_head.is_null()
    }
}

/// Per-partition-page metadata entry in a superpage's metadata area (40 bytes)
///
/// The slot span metadata sits at offset 0. `slot_span_metadata_offset` is
/// the page's distance (in partition pages) from the first page of its span.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PartitionPageMetadata {
    pub slot_span: SlotSpanMetadata,
    pub slot_span_metadata_offset: u16,
    _pad: [u16; 3],
}

/// Superpage extent entry (24 bytes), stored at the start of the metadata
/// area of the first superpage it describes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SuperPageExtentEntry {
    pub root: RemoteAddr,
    pub number_of_consecutive_super_pages: u16,
    pub number_of_nonempty_slot_spans: u16,
    _pad: u32,
    pub next: RemoteAddr,
}

/// Allocator root
///
/// class PartitionRoot {
///   uint64_t flags;                                  // +0x000
///   Lock lock_;                                      // +0x008
///   size_t total_size_of_committed_pages;            // +0x010
///   size_t max_size_of_committed_pages;              // +0x018
///   size_t total_size_of_super_pages;                // +0x020
///   size_t total_size_of_direct_mapped_pages;        // +0x028
///   size_t total_size_of_allocated_bytes;            // +0x030
///   size_t max_size_of_allocated_bytes;              // +0x038
///   uint64_t syscall_count;                          // +0x040
///   uint64_t syscall_total_time_ns;                  // +0x048
///   size_t empty_slot_spans_dirty_bytes;             // +0x050
///   SuperPageExtentEntry* first_extent;              // +0x058
///   SuperPageExtentEntry* current_extent;            // +0x060
///   Bucket buckets[128];                             // +0x068
///   Bucket sentinel_bucket;
/// };
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PartitionRoot {
    pub flags: u64,
    pub lock: u64,
    pub total_size_of_committed_pages: u64,
    pub max_size_of_committed_pages: u64,
    pub total_size_of_super_pages: u64,
    pub total_size_of_direct_mapped_pages: u64,
    pub total_size_of_allocated_bytes: u64,
    pub max_size_of_allocated_bytes: u64,
    pub syscall_count: u64,
    pub syscall_total_time_ns: u64,
    pub empty_slot_spans_dirty_bytes: u64,
    pub first_extent: RemoteAddr,
    pub current_extent: RemoteAddr,
    pub buckets: [PartitionBucket; ROOT_BUCKET_COUNT],
    pub sentinel_bucket: PartitionBucket,
}

impl PartitionRoot {
    pub fn virtual_size(&self) -> u64 {
        self.total_size_of_super_pages + self.total_size_of_direct_mapped_pages
    }

    /// Remote address of `buckets[index]` for a root living at `root_address`.
    pub fn bucket_address(root_address: RemoteAddr, index: usize) -> RemoteAddr {
        root_address.offset(
            std::mem::offset_of!(PartitionRoot, buckets)
                + index * std::mem::size_of::<PartitionBucket>(),
        )
    }
}

/// Classification of a partition page within its superpage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionPageKind {
    Metadata,
    Guard,
    Payload,
}

/// Heap geometry of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapGeometry {
    pub system_page_size: usize,
    pub partition_page_size: usize,
    pub super_page_size: usize,
}

impl Default for HeapGeometry {
    fn default() -> Self {
        HeapGeometry {
            system_page_size: SYSTEM_PAGE_SIZE,
            partition_page_size: PARTITION_PAGE_SIZE,
            super_page_size: SUPER_PAGE_SIZE,
        }
    }
}

impl HeapGeometry {
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("system page", self.system_page_size),
            ("partition page", self.partition_page_size),
            ("superpage", self.super_page_size),
        ];
        for (name, size) in sizes {
            if !size.is_power_of_two() {
                return Err(Error::InvalidLayout(format!(
                    "{} size {:#x} is not a power of two",
                    name, size
                )));
            }
        }
        if self.partition_page_size < self.system_page_size {
            return Err(Error::InvalidLayout(
                "partition page smaller than a system page".to_string(),
            ));
        }
        // Metadata page, guard page and at least one payload page.
        if self.super_page_size / self.partition_page_size < 3 {
            return Err(Error::InvalidLayout(format!(
                "superpage of {:#x} bytes holds fewer than 3 partition pages",
                self.super_page_size
            )));
        }
        Ok(())
    }

    pub fn system_pages_per_partition_page(&self) -> usize {
        self.partition_page_size / self.system_page_size
    }

    pub fn partition_pages_per_super_page(&self) -> usize {
        self.super_page_size / self.partition_page_size
    }

    pub fn super_page_base(&self, address: RemoteAddr) -> RemoteAddr {
        address.align_down(self.super_page_size)
    }

    pub fn classify(&self, partition_page_index: usize) -> PartitionPageKind {
        if partition_page_index == 0 {
            PartitionPageKind::Metadata
        } else if partition_page_index == self.partition_pages_per_super_page() - 1 {
            PartitionPageKind::Guard
        } else {
            PartitionPageKind::Payload
        }
    }

    /// Start of the metadata area: the first system page of a superpage is a
    /// guard page, metadata follows it.
    pub fn metadata_area(&self, super_page: RemoteAddr) -> RemoteAddr {
        super_page.offset(self.system_page_size)
    }

    pub fn partition_page_metadata(&self, super_page: RemoteAddr, index: usize) -> RemoteAddr {
        self.metadata_area(super_page)
            .offset(index * std::mem::size_of::<PartitionPageMetadata>())
    }

    pub fn partition_page(&self, super_page: RemoteAddr, index: usize) -> RemoteAddr {
        super_page.offset(index * self.partition_page_size)
    }
}
