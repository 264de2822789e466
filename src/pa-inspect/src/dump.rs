//! Heap dump
//!
//! Produces one record per superpage: the partition pages with their slot
//! spans, and per system page how large it is and how well it would compress.
//! Capture (copying the root and every superpage) is split from building the
//! records so the caller can keep the target frozen for the copy only.

use crate::addr::RemoteAddr;
use crate::error::{Error, Result};
use crate::layout::{HeapGeometry, PartitionRoot};
use crate::pagemap::{PageMap, PageMapEntry};
use crate::shadow::ShadowMapping;
use crate::source::MemorySource;
use crate::view::RemoteStructView;
use crate::walker::{inspect_super_page, walk_extents, ListLimit, PartitionPageInfo};

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HeapDump {
    pub superpages: Vec<SuperPageRecord>,
    pub buckets: Vec<BucketRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketRecord {
    pub index: usize,
    pub slot_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuperPageRecord {
    pub address: RemoteAddr,
    pub partition_pages: Vec<PartitionPageInfo>,
    pub page_sizes: Vec<PageSizeRecord>,
}

/// Sizes of one system page; both zero when the page is not reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageSizeRecord {
    pub uncompressed: usize,
    pub compressed: usize,
}

/// Size of `page` after LZ4 block compression, standing in for what a fast
/// compressor would make of it.
pub fn compressed_size(page: &[u8]) -> usize {
    lz4_flex::block::compress(page).len()
}

/// Whether a page counts as holding data. Pagemap decides when available;
/// otherwise any non-zero byte does.
fn should_report(page: &[u8], residency: Option<PageMapEntry>) -> bool {
    match residency {
        Some(entry) => entry.is_resident(),
        None => page.iter().any(|&b| b != 0),
    }
}

struct CapturedSuperPage {
    shadow: ShadowMapping,
    residency: Option<Vec<PageMapEntry>>,
}

/// Root and superpages copied out of the target
pub struct HeapCapture {
    root: RemoteStructView<PartitionRoot>,
    super_pages: Vec<CapturedSuperPage>,
    /// Superpages listed by the extents but not copied
    pub skipped: usize,
}

impl HeapCapture {
    pub fn root(&self) -> &RemoteStructView<PartitionRoot> {
        &self.root
    }

    pub fn super_page_count(&self) -> usize {
        self.super_pages.len()
    }
}

pub struct HeapDumper<'a> {
    source: &'a dyn MemorySource,
    pagemap: Option<&'a dyn PageMap>,
    geometry: HeapGeometry,
    limit: ListLimit,
}

impl<'a> HeapDumper<'a> {
    pub fn new(source: &'a dyn MemorySource, geometry: HeapGeometry) -> Self {
        HeapDumper {
            source,
            pagemap: None,
            geometry,
            limit: ListLimit::UNBOUNDED,
        }
    }

    pub fn with_pagemap(mut self, pagemap: Option<&'a dyn PageMap>) -> Self {
        self.pagemap = pagemap;
        self
    }

    pub fn with_limit(mut self, limit: ListLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Copy the root at `root_address` and every superpage it owns. A
    /// superpage that cannot be shadowed is skipped; failing to read the root
    /// or the extent list, or skipping every superpage, fails the capture.
    pub fn capture(&self, root_address: RemoteAddr) -> Result<HeapCapture> {
        let root = RemoteStructView::<PartitionRoot>::read(self.source, root_address)?;
        let addresses = walk_extents(self.source, &root, &self.geometry, self.limit)?;
        tracing::info!("Found {} superpages", addresses.len());

        let pages_per_super_page = self.geometry.super_page_size / self.geometry.system_page_size;
        let mut super_pages = Vec::with_capacity(addresses.len());
        let mut skipped = 0;

        for address in addresses {
            let shadow = match ShadowMapping::map_partial_at(
                self.source,
                address,
                self.geometry.super_page_size,
            ) {
                Ok(shadow) => shadow,
                Err(e) => {
                    tracing::warn!("Cannot copy superpage {}: {}", address, e);
                    skipped += 1;
                    continue;
                }
            };

            let residency = self.pagemap.and_then(|pagemap| {
                pagemap
                    .entries(address, pages_per_super_page)
                    .map_err(|e| tracing::debug!("No residency for {}: {}", address, e))
                    .ok()
            });

            super_pages.push(CapturedSuperPage { shadow, residency });
        }

        if super_pages.is_empty() && skipped > 0 {
            return Err(Error::InconsistentSnapshot(format!(
                "none of {} superpages could be copied",
                skipped
            )));
        }

        Ok(HeapCapture {
            root,
            super_pages,
            skipped,
        })
    }

    /// Build the dump from a capture. Reads nothing from the target.
    pub fn build(&self, capture: &HeapCapture) -> HeapDump {
        let superpages = capture
            .super_pages
            .iter()
            .map(|captured| self.super_page_record(captured, &capture.root))
            .collect();

        let buckets = capture
            .root
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| bucket.is_in_use())
            .map(|(index, bucket)| BucketRecord {
                index,
                slot_size: bucket.slot_size,
            })
            .collect();

        HeapDump {
            superpages,
            buckets,
        }
    }

    pub fn dump(&self, root_address: RemoteAddr) -> Result<HeapDump> {
        let capture = self.capture(root_address)?;
        Ok(self.build(&capture))
    }

    fn super_page_record(
        &self,
        captured: &CapturedSuperPage,
        root: &RemoteStructView<PartitionRoot>,
    ) -> SuperPageRecord {
        let shadow = &captured.shadow;
        let page_size = self.geometry.system_page_size;
        let readable = shadow.readable();
        let granule = shadow.size() / readable.len().max(1);

        let page_sizes = shadow
            .as_slice()
            .chunks(page_size)
            .enumerate()
            .map(|(i, page)| {
                let offset = i * page_size;
                let copied = readable.get(offset / granule.max(1)).copied().unwrap_or(false);
                let residency = captured
                    .residency
                    .as_ref()
                    .and_then(|entries| entries.get(i).copied());

                if copied && should_report(page, residency) {
                    PageSizeRecord {
                        uncompressed: page.len(),
                        compressed: compressed_size(page),
                    }
                } else {
                    PageSizeRecord::default()
                }
            })
            .collect();

        SuperPageRecord {
            address: shadow.remote(),
            partition_pages: inspect_super_page(shadow, root, &self.geometry),
            page_sizes,
        }
    }
}
