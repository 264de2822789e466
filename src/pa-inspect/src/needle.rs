//! Needle Discovery
//!
//! The allocator keeps a small array in its initialised data segment, framed
//! by two fixed 64-bit sentinels. Finding that array in a file-backed `rw-p`
//! mapping yields the addresses of the allocator globals without symbols.

use crate::addr::RemoteAddr;
use crate::error::{Error, Result};
use crate::layout::{NEEDLE_1, NEEDLE_2, NEEDLE_ARRAY_LEN};
use crate::pattern::WordPattern;
use crate::source::{MemoryRegion, MemorySource};

use byteorder::{ByteOrder, LE};

/// Regions larger than this are not data segments worth scanning
pub const DEFAULT_MAX_REGION_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub max_region_size: usize,
    /// Words in the needle array, sentinels included
    pub array_len: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            max_region_size: DEFAULT_MAX_REGION_SIZE,
            array_len: NEEDLE_ARRAY_LEN,
        }
    }
}

/// A located needle array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedleArray {
    pub address: RemoteAddr,
    pub words: Vec<u64>,
}

impl NeedleArray {
    /// Payload word at `slot`. Slots 0 and `len - 1` are the sentinels.
    pub fn slot(&self, slot: usize) -> Result<RemoteAddr> {
        if slot == 0 || slot + 1 >= self.words.len() {
            return Err(Error::InvalidLayout(format!(
                "needle slot {} outside payload of a {}-word array",
                slot,
                self.words.len()
            )));
        }
        Ok(RemoteAddr::new(self.words[slot]))
    }
}

/// Find the first needle array in `data`, a copy of memory starting at `base`.
pub fn find_in(data: &[u8], base: RemoteAddr, array_len: usize) -> Option<NeedleArray> {
    let pattern = WordPattern::framed(NEEDLE_1, NEEDLE_2, array_len);
    let at = pattern.find_first(data)?;
    let words = data[at..at + pattern.len_bytes()]
        .chunks_exact(8)
        .map(LE::read_u64)
        .collect();
    Some(NeedleArray {
        address: base.offset(at),
        words,
    })
}

pub struct NeedleLocator<'a> {
    source: &'a dyn MemorySource,
    options: ScanOptions,
}

impl<'a> NeedleLocator<'a> {
    pub fn new(source: &'a dyn MemorySource, options: ScanOptions) -> Self {
        NeedleLocator { source, options }
    }

    /// File-backed `rw-p` regions under the size ceiling, in address order.
    pub fn candidate_regions(&self) -> Result<Vec<MemoryRegion>> {
        let mut regions: Vec<MemoryRegion> = self
            .source
            .regions()?
            .into_iter()
            .filter(|r| {
                r.perms.is_private_data()
                    && r.size() < self.options.max_region_size
                    && r.has_backing_path()
            })
            .collect();
        regions.sort_by_key(|r| r.start);
        Ok(regions)
    }

    /// Scan candidate regions and return the first needle array found.
    pub fn locate_array(&self) -> Result<NeedleArray> {
        if self.options.array_len < 3 {
            return Err(Error::InvalidLayout(format!(
                "needle array of {} words has no payload",
                self.options.array_len
            )));
        }

        let regions = self.candidate_regions()?;
        tracing::debug!("Scanning {} candidate regions for the needle", regions.len());

        for region in &regions {
            let data = match self.source.read_partial(region.start, region.size()) {
                Ok(partial) => partial.data,
                Err(e) => {
                    tracing::debug!("Skipping region {}: {}", region.start, e);
                    continue;
                }
            };

            if let Some(array) = find_in(&data, region.start, self.options.array_len) {
                tracing::info!(
                    "Found needle at {} in {}",
                    array.address,
                    region.path.as_deref().unwrap_or("?")
                );
                return Ok(array);
            }
        }

        Err(Error::NotFound {
            regions_scanned: regions.len(),
        })
    }

    /// Address stored in needle `slot`.
    pub fn locate(&self, slot: usize) -> Result<RemoteAddr> {
        self.locate_array()?.slot(slot)
    }
}
