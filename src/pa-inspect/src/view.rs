//! Typed views of remote structures
//!
//! A `RemoteStructView<T>` is a local copy of `size_of::<T>()` bytes read from
//! the target, reinterpreted as `T`. The copy is taken once and never
//! refreshed; re-read to observe changes.

use crate::addr::RemoteAddr;
use crate::error::{Error, Result};
use crate::layout::ThreadCache;
use crate::source::MemorySource;

use bytemuck::Pod;
use std::mem::size_of;
use std::ops::Deref;

#[derive(Debug, Clone, Copy)]
pub struct RemoteStructView<T: Pod> {
    address: RemoteAddr,
    value: T,
}

/// A thread cache as read in one cycle
pub type ThreadCacheSnapshot = RemoteStructView<ThreadCache>;

impl<T: Pod> RemoteStructView<T> {
    pub fn read(source: &dyn MemorySource, address: RemoteAddr) -> Result<Self> {
        if address.is_null() {
            return Err(Error::read(address, size_of::<T>(), "null pointer"));
        }
        let bytes = source.read_bytes(address, size_of::<T>())?;
        Self::from_bytes(address, &bytes)
    }

    /// Build a view from bytes already copied out of the target.
    pub fn from_bytes(address: RemoteAddr, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < size_of::<T>() {
            return Err(Error::read(
                address,
                size_of::<T>(),
                format!("only {} bytes available", bytes.len()),
            ));
        }
        let value = bytemuck::pod_read_unaligned(&bytes[..size_of::<T>()]);
        Ok(RemoteStructView { address, value })
    }

    pub fn address(&self) -> RemoteAddr {
        self.address
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Pod> Deref for RemoteStructView<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{SlotSpanMetadata, ThreadCacheRegistry};
    use crate::source::MockMemorySource;
    use bytemuck::Zeroable;

    #[test]
    fn test_view_round_trip_through_mock() {
        let mut span = SlotSpanMetadata::zeroed();
        span.freelist_head = RemoteAddr::new(0x7f00_0001_0040);
        span.num_allocated_slots = -12;
        span.num_unprovisioned_slots = 3;
        let address = RemoteAddr::new(0x7f00_0000_1000);
        let source = MockMemorySource::new().with_value(address, &span);

        let view = RemoteStructView::<SlotSpanMetadata>::read(&source, address).unwrap();
        assert_eq!(view.address(), address);
        assert_eq!(*view.get(), span);
        assert_eq!(view.allocated_slots(), 12);
        assert_eq!(view.into_inner(), span);
    }

    #[test]
    fn test_view_from_unaligned_bytes() {
        let mut registry = ThreadCacheRegistry::zeroed();
        registry.list_head = RemoteAddr::new(0xdead_b000);
        let mut bytes = vec![0u8; 1];
        bytes.extend_from_slice(bytemuck::bytes_of(&registry));

        let view =
            RemoteStructView::<ThreadCacheRegistry>::from_bytes(RemoteAddr::new(0x1), &bytes[1..])
                .unwrap();
        assert_eq!(view.list_head, RemoteAddr::new(0xdead_b000));
    }

    #[test]
    fn test_view_short_buffer_is_read_error() {
        let err = RemoteStructView::<ThreadCacheRegistry>::from_bytes(RemoteAddr::new(0x10), &[0; 8])
            .err()
            .unwrap();
        assert!(matches!(err, Error::ReadError { .. }));
    }

    #[test]
    fn test_view_of_null_is_read_error() {
        let source = MockMemorySource::new();
        assert!(RemoteStructView::<ThreadCacheRegistry>::read(&source, RemoteAddr::NULL).is_err());
    }
}
