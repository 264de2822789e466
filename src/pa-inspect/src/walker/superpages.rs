//! Superpage extent traversal and partition page inspection
//!
//! Superpages are described by a chain of extent entries hanging off the
//! root. Each superpage carries its own metadata area in partition page 0,
//! one `PartitionPageMetadata` per partition page. Inspection works on a
//! shadow copy of the whole superpage, so freelists can be chased in place.

use super::ListLimit;
use crate::addr::RemoteAddr;
use crate::error::{Error, Result};
use crate::layout::{
    HeapGeometry, PartitionBucket, PartitionPageKind, PartitionPageMetadata, PartitionRoot,
    SuperPageExtentEntry, ROOT_BUCKET_COUNT,
};
use crate::shadow::ShadowMapping;
use crate::source::MemorySource;
use crate::view::RemoteStructView;

use serde::Serialize;
use std::mem::size_of;

/// Base address of every superpage reachable from `root`, in extent order.
pub fn walk_extents(
    source: &dyn MemorySource,
    root: &PartitionRoot,
    geometry: &HeapGeometry,
    limit: ListLimit,
) -> Result<Vec<RemoteAddr>> {
    let mut super_pages = Vec::new();
    let mut extents = 0usize;
    let mut next = root.first_extent;

    while !next.is_null() {
        if limit.reached(extents) {
            tracing::warn!("Extent list longer than {} entries, stopping", extents);
            break;
        }
        let extent = RemoteStructView::<SuperPageExtentEntry>::read(source, next)?;
        let first = geometry.super_page_base(next);
        if geometry.metadata_area(first) != next {
            return Err(Error::InconsistentSnapshot(format!(
                "extent entry at {} is not at the start of a metadata area",
                next
            )));
        }

        for i in 0..usize::from(extent.number_of_consecutive_super_pages) {
            super_pages.push(first.offset(i * geometry.super_page_size));
        }
        extents += 1;
        next = extent.next;
    }

    tracing::debug!(
        "{} extents cover {} superpages",
        extents,
        super_pages.len()
    );
    Ok(super_pages)
}

/// Slot span details of a payload partition page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSpanInfo {
    pub slot_span_address: RemoteAddr,
    /// Partition pages between this page and the first page of its span
    pub page_index_in_span: usize,
    pub bucket_index: Option<usize>,
    pub slot_size: u32,
    pub slots_per_span: usize,
    pub partition_pages_per_span: usize,
    pub num_allocated_slots: i16,
    pub num_unprovisioned_slots: u16,
    pub is_active: bool,
    pub is_full: bool,
    pub is_empty: bool,
    pub is_decommitted: bool,
    /// Entries on the span's freelist, `None` if the chain left the
    /// superpage or ran longer than the span can hold
    pub freelist_length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionPageInfo {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: PartitionPageKind,
    pub all_zeros: bool,
    #[serde(flatten)]
    pub slot_span: Option<SlotSpanInfo>,
}

/// Index of the root bucket a slot span points at.
fn bucket_index(root_address: RemoteAddr, bucket: RemoteAddr) -> Option<usize> {
    let offset = bucket.distance_from(PartitionRoot::bucket_address(root_address, 0))?;
    let stride = size_of::<PartitionBucket>();
    let index = offset / stride;
    (offset % stride == 0 && index < ROOT_BUCKET_COUNT).then_some(index)
}

/// Count freelist entries by chasing them inside the shadow copy.
fn freelist_length(shadow: &ShadowMapping, head: RemoteAddr, bound: usize) -> Option<usize> {
    let mut length = 0usize;
    let mut next = head;
    while !next.is_null() {
        if length >= bound {
            return None;
        }
        next = shadow.read::<RemoteAddr>(next).ok()?;
        length += 1;
    }
    Some(length)
}

fn inspect_slot_span(
    shadow: &ShadowMapping,
    super_page: RemoteAddr,
    index: usize,
    root: &RemoteStructView<PartitionRoot>,
    geometry: &HeapGeometry,
) -> Option<SlotSpanInfo> {
    let entry: PartitionPageMetadata = shadow
        .read(geometry.partition_page_metadata(super_page, index))
        .ok()?;
    let page_index_in_span = usize::from(entry.slot_span_metadata_offset);
    // Entry 0 describes the metadata page itself, never a slot span.
    let first_index = index
        .checked_sub(page_index_in_span)
        .filter(|&first| first != 0)?;

    let span_address = geometry.partition_page_metadata(super_page, first_index);
    let span: PartitionPageMetadata = shadow.read(span_address).ok()?;
    let span = span.slot_span;
    if span.bucket.is_null() {
        return None;
    }

    let bucket_index = bucket_index(root.address(), span.bucket);
    let bucket = bucket_index.map(|i| root.buckets[i]);
    let slot_size = bucket.map_or(0, |b| b.slot_size);
    let slots_per_span = bucket.map_or(0, |b| b.slots_per_span(geometry));
    let partition_pages_per_span = bucket.map_or(0, |b| b.partition_pages_per_slot_span(geometry));

    Some(SlotSpanInfo {
        slot_span_address: span_address,
        page_index_in_span,
        bucket_index,
        slot_size,
        slots_per_span,
        partition_pages_per_span,
        num_allocated_slots: span.num_allocated_slots,
        num_unprovisioned_slots: span.num_unprovisioned_slots,
        is_active: span.is_active(slots_per_span),
        is_full: span.is_full(slots_per_span),
        is_empty: span.is_empty(),
        is_decommitted: span.is_decommitted(),
        freelist_length: freelist_length(shadow, span.freelist_head, slots_per_span),
    })
}

/// Classify every partition page of the shadowed superpage and decode the
/// slot span of each payload page.
pub fn inspect_super_page(
    shadow: &ShadowMapping,
    root: &RemoteStructView<PartitionRoot>,
    geometry: &HeapGeometry,
) -> Vec<PartitionPageInfo> {
    let super_page = shadow.remote();

    (0..geometry.partition_pages_per_super_page())
        .map(|index| {
            let kind = geometry.classify(index);
            let all_zeros = shadow
                .bytes(
                    geometry.partition_page(super_page, index),
                    geometry.partition_page_size,
                )
                .map_or(true, |bytes| bytes.iter().all(|&b| b == 0));
            let slot_span = match kind {
                PartitionPageKind::Payload => {
                    inspect_slot_span(shadow, super_page, index, root, geometry)
                }
                PartitionPageKind::Metadata | PartitionPageKind::Guard => None,
            };
            PartitionPageInfo {
                index,
                kind,
                all_zeros,
                slot_span,
            }
        })
        .collect()
}
