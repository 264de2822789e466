//! Remote addresses
//!
//! Every pointer read out of the target is a `RemoteAddr`. It is only a number
//! in another address space: resolve it through a `MemorySource` or, inside a
//! shadow mapping, through `ShadowMapping::read`.

use bytemuck::{Pod, Zeroable};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct RemoteAddr(pub u64);

impl RemoteAddr {
    pub const NULL: RemoteAddr = RemoteAddr(0);

    pub const fn new(address: u64) -> Self {
        RemoteAddr(address)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn offset(self, bytes: usize) -> Self {
        RemoteAddr(self.0.wrapping_add(bytes as u64))
    }

    pub fn align_down(self, alignment: usize) -> Self {
        debug_assert!(alignment.is_power_of_two());
        RemoteAddr(self.0 & !(alignment as u64 - 1))
    }

    /// Distance from `base`, or `None` when `self` lies below it.
    pub fn distance_from(self, base: RemoteAddr) -> Option<usize> {
        self.0.checked_sub(base.0).map(|d| d as usize)
    }
}

impl fmt::Debug for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteAddr({:#x})", self.0)
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Serialize for RemoteAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses `0x`-prefixed hex or plain decimal.
impl FromStr for RemoteAddr {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16)?,
            None => s.parse::<u64>()?,
        };
        Ok(RemoteAddr(value))
    }
}
