//! Mock Memory Source
//!
//! A simulated target for testing discovery and traversal. Memory is a set of
//! byte segments at arbitrary virtual addresses; unreadable ranges model guard
//! pages.

#![cfg(test)]

use super::{MemoryRegion, MemorySource, Permissions};
use crate::addr::RemoteAddr;
use crate::error::{Error, Result};

use bytemuck::Pod;
use std::collections::BTreeMap;

pub const MOCK_PAGE_SIZE: usize = 4096;

/// A mock memory source for testing
#[derive(Default)]
pub struct MockMemorySource {
    /// Segment start -> bytes
    segments: BTreeMap<u64, Vec<u8>>,
    /// Regions reported by `regions()`
    regions: Vec<MemoryRegion>,
    /// `[start, end)` ranges that fail to read
    unreadable: Vec<(u64, u64)>,
}

impl MockMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single `rw-p` region backed by `path`, like an initialised data segment.
    pub fn with_data_region(data: Vec<u8>, base: u64, path: &str) -> Self {
        let end = base + data.len() as u64;
        let mut mock = Self::new().with_segment(base, data);
        mock.regions.push(MemoryRegion {
            start: RemoteAddr::new(base),
            end: RemoteAddr::new(end),
            perms: Permissions::parse("rw-p"),
            offset: 0,
            path: Some(path.to_string()),
        });
        mock
    }

    pub fn with_segment(mut self, base: u64, data: Vec<u8>) -> Self {
        self.segments.insert(base, data);
        self
    }

    pub fn with_region(mut self, region: MemoryRegion) -> Self {
        self.regions.push(region);
        self
    }

    pub fn with_unreadable(mut self, start: u64, len: u64) -> Self {
        self.unreadable.push((start, start + len));
        self
    }

    /// Store a plain-old-data value at `address` in its own segment.
    pub fn with_value<T: Pod>(self, address: RemoteAddr, value: &T) -> Self {
        self.with_segment(address.get(), bytemuck::bytes_of(value).to_vec())
    }

    /// Overwrite bytes inside an existing segment.
    pub fn write_bytes(&mut self, address: RemoteAddr, bytes: &[u8]) {
        let (base, segment) = self
            .segments
            .range_mut(..=address.get())
            .next_back()
            .expect("no segment below address");
        let offset = (address.get() - base) as usize;
        segment[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_value<T: Pod>(&mut self, address: RemoteAddr, value: &T) {
        self.write_bytes(address, bytemuck::bytes_of(value));
    }
}

impl MemorySource for MockMemorySource {
    fn read_into(&self, address: RemoteAddr, buf: &mut [u8]) -> Result<()> {
        let start = address.get();
        let end = start + buf.len() as u64;

        if self
            .unreadable
            .iter()
            .any(|&(lo, hi)| start < hi && end > lo)
        {
            return Err(Error::read(address, buf.len(), "range is unreadable"));
        }

        let Some((base, segment)) = self.segments.range(..=start).next_back() else {
            return Err(Error::read(address, buf.len(), "below every segment"));
        };
        let offset = (start - base) as usize;
        if offset + buf.len() > segment.len() {
            return Err(Error::read(
                address,
                buf.len(),
                format!("exceeds segment of {} bytes at {:#x}", segment.len(), base),
            ));
        }

        buf.copy_from_slice(&segment[offset..offset + buf.len()]);
        Ok(())
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        Ok(self.regions.clone())
    }

    fn is_live(&self) -> bool {
        false
    }

    fn page_size(&self) -> usize {
        MOCK_PAGE_SIZE
    }
}
