//! Shadow mappings
//!
//! A shadow mapping is a local anonymous mapping placed at the *same* virtual
//! address as a remote range, filled with a copy of the remote bytes. Pointers
//! stored inside the range stay valid locally, so intrusive lists (freelists,
//! span chains) can be chased in place without translating every address.
//!
//! Placement uses the address as a hint only; `MAP_FIXED` would silently
//! replace whatever this process already has there. If the kernel puts the
//! mapping elsewhere the attempt fails with `MapConflict`.

use crate::addr::RemoteAddr;
use crate::error::{Error, Result};
use crate::source::MemorySource;

use bytemuck::Pod;
use libc::{mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};
use std::mem::size_of;
use std::ptr;

pub struct ShadowMapping {
    /// Local mapping base, page aligned
    base: *mut u8,
    /// Local mapping length, page rounded
    len: usize,
    /// Start of the shadowed remote range
    remote: RemoteAddr,
    /// Length of the shadowed remote range
    size: usize,
    /// Per remote page: whether the copy came back
    readable: Vec<bool>,
}

// SAFETY: the mapping is owned exclusively by this value and only handed out
// as shared slices.
unsafe impl Send for ShadowMapping {}

impl ShadowMapping {
    /// Reserve zeroed local memory covering `[address, address + size)` at the
    /// same addresses.
    pub fn reserve_at(address: RemoteAddr, size: usize) -> Result<Self> {
        let conflict = |reason: String| Error::MapConflict {
            address,
            size,
            reason,
        };

        if address.is_null() || size == 0 {
            return Err(conflict("empty or null range".to_string()));
        }

        let page = page_size::get();
        let aligned = address.align_down(page);
        let lead = (address.get() - aligned.get()) as usize;
        let len = (lead + size).div_ceil(page) * page;

        // SAFETY: no MAP_FIXED, so the kernel never replaces an existing
        // mapping; the result is checked before use.
        let ptr = unsafe {
            mmap(
                aligned.get() as *mut libc::c_void,
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == MAP_FAILED {
            return Err(conflict(format!(
                "mmap: {}",
                std::io::Error::last_os_error()
            )));
        }
        if ptr as u64 != aligned.get() {
            // SAFETY: `ptr`/`len` is exactly the mapping just created.
            unsafe {
                munmap(ptr, len);
            }
            return Err(conflict(format!("kernel placed it at {:p}", ptr)));
        }

        Ok(ShadowMapping {
            base: ptr.cast(),
            len,
            remote: address,
            size,
            readable: Vec::new(),
        })
    }

    /// Shadow a range that must be readable in full.
    pub fn map_at(source: &dyn MemorySource, address: RemoteAddr, size: usize) -> Result<Self> {
        let mut mapping = Self::reserve_at(address, size)?;
        source.read_into(address, mapping.as_mut_slice())?;
        let page = source.page_size();
        mapping.readable = vec![true; pages_touched(address, size, page)];
        Ok(mapping)
    }

    /// Shadow a range that may contain unreadable (guard) pages. Those stay
    /// zero-filled and are marked in `readable()`.
    pub fn map_partial_at(
        source: &dyn MemorySource,
        address: RemoteAddr,
        size: usize,
    ) -> Result<Self> {
        let mut mapping = Self::reserve_at(address, size)?;
        let partial = source.read_partial(address, size)?;
        mapping.as_mut_slice().copy_from_slice(&partial.data);
        mapping.readable = partial.readable;
        Ok(mapping)
    }

    pub fn remote(&self) -> RemoteAddr {
        self.remote
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// One entry per remote page of the range.
    pub fn readable(&self) -> &[bool] {
        &self.readable
    }

    pub fn as_slice(&self) -> &[u8] {
        let lead = (self.remote.get() - self.base as u64) as usize;
        // SAFETY: `[lead, lead + size)` lies inside the live mapping.
        unsafe { std::slice::from_raw_parts(self.base.add(lead), self.size) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        let lead = (self.remote.get() - self.base as u64) as usize;
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.base.add(lead), self.size) }
    }

    pub fn contains(&self, address: RemoteAddr, len: usize) -> bool {
        match address.distance_from(self.remote) {
            Some(offset) => offset
                .checked_add(len)
                .is_some_and(|end| end <= self.size),
            None => false,
        }
    }

    pub fn bytes(&self, address: RemoteAddr, len: usize) -> Option<&[u8]> {
        if !self.contains(address, len) {
            return None;
        }
        let offset = address.get() as usize - self.remote.get() as usize;
        Some(&self.as_slice()[offset..offset + len])
    }

    /// Dereference a remote pointer locally. Only addresses inside the
    /// shadowed range are accepted.
    pub fn read<T: Pod>(&self, address: RemoteAddr) -> Result<T> {
        if !self.contains(address, size_of::<T>()) {
            return Err(Error::read(
                address,
                size_of::<T>(),
                format!("outside shadow of {} at {}", self.size, self.remote),
            ));
        }
        // SAFETY: the range check above keeps the read inside the mapping,
        // which sits at the same numeric address; any bit pattern is a valid
        // `T` because `T: Pod`.
        Ok(unsafe { ptr::read_unaligned(address.get() as *const T) })
    }
}

impl Drop for ShadowMapping {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` is the page-aligned mapping created in
        // `reserve_at`, unmapped exactly once here.
        unsafe {
            munmap(self.base.cast(), self.len);
        }
    }
}

fn pages_touched(address: RemoteAddr, size: usize, page: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let first = address.get() / page as u64;
    let last = (address.get() + size as u64 - 1) / page as u64;
    (last - first + 1) as usize
}
