//! # pa-inspect
//!
//! Out-of-process inspection of a PartitionAlloc-style heap.
//!
//! This library provides functionality to:
//! - Read another process's memory (`/proc/<pid>/mem` on Linux, Mach task
//!   ports on macOS)
//! - Find the allocator globals without symbols by scanning for a needle
//! - Walk thread caches, buckets, slot spans and superpages
//! - Aggregate live statistics or produce a page-by-page heap dump
//!
//! ## Example
//!
//! ```no_run
//! use pa_inspect::{InspectOptions, Inspector, Target};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let target = Target::attach(12345)?;
//! let mut inspector = Inspector::new(target, InspectOptions::default())?;
//!
//! let snapshot = inspector.run_cycle()?;
//! for bucket in &snapshot.stats.buckets {
//!     println!(
//!         "{:>6} bytes: {} allocated, {} free",
//!         bucket.slot_size, bucket.allocated_slots, bucket.freelist_size
//!     );
//! }
//! # Ok(())
//! # }
//! ```

pub mod addr;
pub mod dump;
pub mod error;
pub mod freeze;
pub mod layout;
pub mod needle;
pub mod pagemap;
pub mod pattern;
pub mod session;
pub mod shadow;
pub mod source;
pub mod stats;
pub mod view;
pub mod walker;

#[doc(inline)]
pub use addr::RemoteAddr;
#[doc(inline)]
pub use dump::{HeapDump, HeapDumper, PageSizeRecord, SuperPageRecord};
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use freeze::{FreezeGuard, KillSignals, SignalSender};
#[doc(inline)]
pub use layout::HeapGeometry;
#[doc(inline)]
pub use needle::{NeedleLocator, ScanOptions, DEFAULT_MAX_REGION_SIZE};
#[doc(inline)]
pub use session::{CycleSnapshot, Discovered, InspectOptions, Inspector, Target};
#[doc(inline)]
pub use shadow::ShadowMapping;
#[doc(inline)]
pub use source::{MemoryRegion, MemorySource};
#[doc(inline)]
pub use stats::{CacheBucketRow, GlobalTotals, LiveStats, ThreadSummary};
#[doc(inline)]
pub use view::{RemoteStructView, ThreadCacheSnapshot};
#[doc(inline)]
pub use walker::{BucketStats, ListLimit, SlotSpanSummary};
