//! Memory Source Abstraction
//!
//! Core abstractions for reading the target's memory:
//! - Live process attachment via `RemoteProcess` (`/proc/<pid>/mem` on Linux,
//!   Mach task ports on macOS)
//! - Mock sources for testing

mod mock;
#[cfg(any(target_os = "linux", target_os = "android"))]
mod process;
#[cfg(target_os = "macos")]
mod macos;
mod region;
mod traits;

#[cfg(test)]
pub use mock::{MockMemorySource, MOCK_PAGE_SIZE};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use process::RemoteProcess;
#[cfg(target_os = "macos")]
pub use macos::RemoteProcess;
pub use region::{parse_maps, MemoryRegion, Permissions};
pub use traits::{MemorySource, PartialRead};
