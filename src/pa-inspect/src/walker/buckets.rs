//! Bucket and slot span traversal
//!
//! Per bucket the three slot span lists are followed from the copy of the
//! root. Full spans sit on no list, so they are only counted through
//! `num_full_slot_spans`.

use super::ListLimit;
use crate::addr::RemoteAddr;
use crate::error::{Error, Result};
use crate::layout::{HeapGeometry, PartitionBucket, PartitionRoot, SlotSpanMetadata};
use crate::source::MemorySource;
use crate::view::RemoteStructView;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanList {
    Active,
    Empty,
    Decommitted,
}

/// One slot span as read this cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSpanSummary {
    pub address: RemoteAddr,
    pub allocated_slots: usize,
    pub unprovisioned_slots: usize,
    pub freelist_size: usize,
    pub freelist_head: RemoteAddr,
}

/// Statistics of one in-use bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub index: usize,
    pub slot_size: u32,
    pub slots_per_span: usize,
    pub num_system_pages_per_slot_span: u16,
    /// Slots handed out on active and full spans
    pub allocated_slots: usize,
    /// Slots free on the active spans
    pub freelist_size: usize,
    pub full_spans: usize,
    /// Freelist size of each active span, in list order
    pub freelist_sizes: Vec<usize>,
    pub active_slot_spans: Vec<SlotSpanSummary>,
    pub empty_slot_spans: Vec<SlotSpanSummary>,
    pub decommitted_slot_spans: Vec<SlotSpanSummary>,
}

impl BucketStats {
    pub fn active_span_count(&self) -> usize {
        self.active_slot_spans.len()
    }

    pub fn empty_span_count(&self) -> usize {
        self.empty_slot_spans.len()
    }

    pub fn decommitted_span_count(&self) -> usize {
        self.decommitted_slot_spans.len()
    }

    fn spans_mut(&mut self, list: SpanList) -> &mut Vec<SlotSpanSummary> {
        match list {
            SpanList::Active => &mut self.active_slot_spans,
            SpanList::Empty => &mut self.empty_slot_spans,
            SpanList::Decommitted => &mut self.decommitted_slot_spans,
        }
    }
}

/// Per-span slot accounting. On an active span `allocated + unprovisioned`
/// may never exceed the span's capacity; when it does the reads were torn.
/// Spans on the other lists are listed as read.
fn summarize_span(
    address: RemoteAddr,
    span: &SlotSpanMetadata,
    list: SpanList,
    slots_per_span: usize,
) -> Result<SlotSpanSummary> {
    let allocated = usize::from(span.allocated_slots());
    let unprovisioned = usize::from(span.num_unprovisioned_slots);

    let used = allocated + unprovisioned;
    if list == SpanList::Active && used > slots_per_span {
        return Err(Error::InconsistentSnapshot(format!(
            "slot span at {} has {} allocated + {} unprovisioned slots but holds {}",
            address, allocated, unprovisioned, slots_per_span
        )));
    }

    let freelist_size = match list {
        SpanList::Decommitted => 0,
        SpanList::Active | SpanList::Empty => slots_per_span.saturating_sub(used),
    };

    Ok(SlotSpanSummary {
        address,
        allocated_slots: allocated,
        unprovisioned_slots: unprovisioned,
        freelist_size,
        freelist_head: span.freelist_head,
    })
}

/// Walk one bucket. `Ok(None)` means a span could not be read and the bucket
/// is left out of this cycle.
fn walk_bucket(
    source: &dyn MemorySource,
    index: usize,
    bucket: &PartitionBucket,
    geometry: &HeapGeometry,
    limit: ListLimit,
) -> Result<Option<BucketStats>> {
    let slots_per_span = bucket.slots_per_span(geometry);
    let full_spans = usize::from(bucket.num_full_slot_spans);

    let mut stats = BucketStats {
        index,
        slot_size: bucket.slot_size,
        slots_per_span,
        num_system_pages_per_slot_span: bucket.num_system_pages_per_slot_span,
        allocated_slots: full_spans * slots_per_span,
        full_spans,
        ..BucketStats::default()
    };

    let lists = [
        (SpanList::Active, bucket.active_slot_spans_head),
        (SpanList::Empty, bucket.empty_slot_spans_head),
        (SpanList::Decommitted, bucket.decommitted_slot_spans_head),
    ];

    for (list, head) in lists {
        let mut next = head;
        while !next.is_null() {
            if limit.reached(stats.spans_mut(list).len()) {
                tracing::warn!("Bucket {}: {:?} span list truncated", index, list);
                break;
            }
            let span = match RemoteStructView::<SlotSpanMetadata>::read(source, next) {
                Ok(span) => span,
                Err(e) => {
                    tracing::debug!("Bucket {}: skipping this cycle: {}", index, e);
                    return Ok(None);
                }
            };

            let summary = summarize_span(next, &span, list, slots_per_span)?;
            if list == SpanList::Active {
                stats.allocated_slots += summary.allocated_slots;
                stats.freelist_size += summary.freelist_size;
                stats.freelist_sizes.push(summary.freelist_size);
            }
            stats.spans_mut(list).push(summary);
            next = span.next_slot_span;
        }
    }

    Ok(Some(stats))
}

/// Walk the in-use buckets of `root` up to the first one whose slots are
/// larger than `max_slot_size`.
///
/// Fails with `InconsistentSnapshot` when any active span breaks the slot
/// accounting or the slot sizes are not ordered.
pub fn walk_buckets(
    source: &dyn MemorySource,
    root: &PartitionRoot,
    geometry: &HeapGeometry,
    limit: ListLimit,
    max_slot_size: u32,
) -> Result<Vec<BucketStats>> {
    let mut result = Vec::new();
    let mut previous_size = 0u32;

    for (index, bucket) in root.buckets.iter().enumerate() {
        if !bucket.is_in_use() {
            continue;
        }
        if bucket.slot_size < previous_size {
            return Err(Error::InconsistentSnapshot(format!(
                "bucket {} slot size {} below previous bucket's {}",
                index, bucket.slot_size, previous_size
            )));
        }
        previous_size = bucket.slot_size;
        if bucket.slot_size > max_slot_size {
            break;
        }

        if let Some(stats) = walk_bucket(source, index, bucket, geometry, limit)? {
            result.push(stats);
        }
    }

    Ok(result)
}
