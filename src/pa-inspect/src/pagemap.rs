//! Page residency
//!
//! `/proc/<pid>/pagemap` holds one 64-bit entry per virtual page:
//!
//! bit  63     page present in RAM
//! bit  62     page swapped
//! bit  61     file-backed or shared anonymous
//! bit  56     exclusively mapped
//! bit  55     soft-dirty
//! bits 0-54   page frame number (zeroed without CAP_SYS_ADMIN)

use crate::addr::RemoteAddr;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageMapEntry(pub u64);

impl PageMapEntry {
    const PRESENT: u64 = 1 << 63;
    const SWAPPED: u64 = 1 << 62;
    const FILE_OR_SHARED: u64 = 1 << 61;
    const EXCLUSIVE: u64 = 1 << 56;
    const SOFT_DIRTY: u64 = 1 << 55;
    const PFN_MASK: u64 = (1 << 55) - 1;

    pub fn is_present(&self) -> bool {
        self.0 & Self::PRESENT != 0
    }

    pub fn is_swapped(&self) -> bool {
        self.0 & Self::SWAPPED != 0
    }

    pub fn is_file_or_shared(&self) -> bool {
        self.0 & Self::FILE_OR_SHARED != 0
    }

    pub fn is_exclusive(&self) -> bool {
        self.0 & Self::EXCLUSIVE != 0
    }

    pub fn is_soft_dirty(&self) -> bool {
        self.0 & Self::SOFT_DIRTY != 0
    }

    pub fn pfn(&self) -> u64 {
        self.0 & Self::PFN_MASK
    }

    /// Backed by memory or swap, as opposed to never touched
    pub fn is_resident(&self) -> bool {
        self.is_present() || self.is_swapped()
    }
}

/// Residency lookup for the target's pages
pub trait PageMap: Send + Sync {
    /// Entries for `count` consecutive pages starting at the page holding
    /// `address`.
    fn entries(&self, address: RemoteAddr, count: usize) -> Result<Vec<PageMapEntry>>;
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux::ProcPageMap;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux {
    use super::*;
    use crate::error::Error;

    use byteorder::{ByteOrder, LE};
    use std::fs::File;
    use std::os::unix::fs::FileExt;

    pub struct ProcPageMap {
        file: File,
        page_size: usize,
    }

    impl ProcPageMap {
        pub fn open(pid: u32) -> Result<Self> {
            let path = format!("/proc/{}/pagemap", pid);
            let file = File::open(&path).map_err(|e| Error::NoAccess {
                pid,
                reason: format!("{}: {}", path, e),
            })?;
            Ok(ProcPageMap {
                file,
                page_size: page_size::get(),
            })
        }
    }

    impl PageMap for ProcPageMap {
        fn entries(&self, address: RemoteAddr, count: usize) -> Result<Vec<PageMapEntry>> {
            let page = address.get() / self.page_size as u64;
            let mut bytes = vec![0u8; count * 8];
            self.file.read_exact_at(&mut bytes, page * 8).map_err(|e| {
                Error::read(address, count * self.page_size, format!("pagemap: {}", e))
            })?;
            Ok(bytes.chunks_exact(8).map(|c| PageMapEntry(LE::read_u64(c))).collect())
        }
    }
}
