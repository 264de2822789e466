//! Memory Source Trait
//!
//! Core abstraction for reading another process's memory.

use super::MemoryRegion;
use crate::addr::RemoteAddr;
use crate::error::{Error, Result};

use byteorder::{ByteOrder, LE};

/// Result of a page-by-page read. Unreadable pages are zero-filled.
#[derive(Debug, Clone)]
pub struct PartialRead {
    pub data: Vec<u8>,
    /// One entry per page touched by the request, in address order
    pub readable: Vec<bool>,
}

impl PartialRead {
    pub fn pages_requested(&self) -> usize {
        self.readable.len()
    }

    pub fn pages_read(&self) -> usize {
        self.readable.iter().filter(|&&ok| ok).count()
    }

    pub fn is_complete(&self) -> bool {
        self.readable.iter().all(|&ok| ok)
    }
}

/// Trait for reading memory of a target process (live or simulated)
pub trait MemorySource: Send + Sync {
    /// Fill `buf` with the bytes at `address`. Anything short of the whole
    /// buffer is a `ReadError`.
    fn read_into(&self, address: RemoteAddr, buf: &mut [u8]) -> Result<()>;

    /// Enumerate the target's memory regions. Recomputed on every call.
    fn regions(&self) -> Result<Vec<MemoryRegion>>;

    /// Whether this reads a live process
    fn is_live(&self) -> bool;

    /// Page granularity of the target
    fn page_size(&self) -> usize {
        page_size::get()
    }

    /// Read bytes from a virtual address
    fn read_bytes(&self, address: RemoteAddr, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        self.read_into(address, &mut buffer)?;
        Ok(buffer)
    }

    /// Read a u64 from memory
    fn read_u64(&self, address: RemoteAddr) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.read_into(address, &mut bytes)?;
        Ok(LE::read_u64(&bytes))
    }

    /// Read a pointer-sized word as a remote address
    fn read_addr(&self, address: RemoteAddr) -> Result<RemoteAddr> {
        self.read_u64(address).map(RemoteAddr::new)
    }

    /// Read a range that may contain unreadable pages (guard pages next to
    /// payload). Tries one bulk read first, then falls back to page-by-page
    /// and succeeds as long as at least one page came back.
    fn read_partial(&self, address: RemoteAddr, size: usize) -> Result<PartialRead> {
        let page = self.page_size() as u64;
        let pages_touched = |start: u64, len: u64| -> usize {
            if len == 0 {
                return 0;
            }
            ((start + len - 1) / page - start / page + 1) as usize
        };

        let mut data = vec![0u8; size];
        if self.read_into(address, &mut data).is_ok() {
            let pages = pages_touched(address.get(), size as u64);
            return Ok(PartialRead {
                data,
                readable: vec![true; pages],
            });
        }

        let mut readable = Vec::new();
        let mut offset = 0usize;
        while offset < size {
            let current = address.get() + offset as u64;
            let next_boundary = (current / page + 1) * page;
            let end = size.min((next_boundary - address.get()) as usize);
            let chunk = &mut data[offset..end];
            let ok = self.read_into(RemoteAddr::new(current), chunk).is_ok();
            if !ok {
                chunk.fill(0);
            }
            readable.push(ok);
            offset = end;
        }

        if !readable.iter().any(|&ok| ok) {
            return Err(Error::read(address, size, "no page of the range is readable"));
        }

        tracing::debug!(
            "Partial read at {}: {}/{} pages",
            address,
            readable.iter().filter(|&&ok| ok).count(),
            readable.len()
        );
        Ok(PartialRead { data, readable })
    }
}
