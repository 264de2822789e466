//! Inspection sessions
//!
//! A `Target` bundles everything needed to look at one process. The
//! `Inspector` keeps what survives between cycles (the discovered addresses)
//! and drives discovery, live cycles and heap dumps.

use crate::addr::RemoteAddr;
use crate::dump::{HeapDump, HeapDumper};
use crate::error::{Error, Result};
use crate::freeze::{FreezeGuard, KillSignals, SignalSender};
use crate::layout::{HeapGeometry, PartitionRoot, MAX_SMALL_SLOT_SIZE, REGISTRY_SLOT};
use crate::needle::{NeedleLocator, ScanOptions};
use crate::pagemap::PageMap;
use crate::source::MemorySource;
use crate::stats::{aggregate, LiveStats};
use crate::view::RemoteStructView;
use crate::walker::{walk_buckets, walk_thread_caches, ListLimit};

use std::time::{Duration, Instant};

/// An attached process
pub struct Target {
    pid: u32,
    memory: Box<dyn MemorySource>,
    signals: Box<dyn SignalSender>,
    pagemap: Option<Box<dyn PageMap>>,
}

impl Target {
    pub fn new(pid: u32, memory: Box<dyn MemorySource>, signals: Box<dyn SignalSender>) -> Self {
        Target {
            pid,
            memory,
            signals,
            pagemap: None,
        }
    }

    pub fn with_pagemap(mut self, pagemap: Box<dyn PageMap>) -> Self {
        self.pagemap = Some(pagemap);
        self
    }

    /// Open the live process `pid`. Fails with `NoAccess` when the platform
    /// refuses access.
    pub fn attach(pid: u32) -> Result<Self> {
        let memory = crate::source::RemoteProcess::open(pid)?;
        let target = Target::new(pid, Box::new(memory), Box::new(KillSignals));

        #[cfg(any(target_os = "linux", target_os = "android"))]
        let target = match crate::pagemap::ProcPageMap::open(pid) {
            Ok(pagemap) => target.with_pagemap(Box::new(pagemap)),
            Err(e) => {
                tracing::warn!("Page residency unavailable: {}", e);
                target
            }
        };

        Ok(target)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn memory(&self) -> &dyn MemorySource {
        self.memory.as_ref()
    }

    fn freeze(&self) -> Result<FreezeGuard<'_>> {
        FreezeGuard::new(self.pid, self.signals.as_ref())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InspectOptions {
    pub scan: ScanOptions,
    pub registry_slot: usize,
    /// Needle slot holding the allocator root. Unset, the root is taken from
    /// the first thread cache.
    pub root_slot: Option<usize>,
    pub list_limit: ListLimit,
    /// Buckets past the first one larger than this are not walked
    pub max_bucket_slot_size: u32,
    pub geometry: HeapGeometry,
}

impl Default for InspectOptions {
    fn default() -> Self {
        InspectOptions {
            scan: ScanOptions::default(),
            registry_slot: REGISTRY_SLOT,
            root_slot: None,
            list_limit: ListLimit::UNBOUNDED,
            max_bucket_slot_size: MAX_SMALL_SLOT_SIZE,
            geometry: HeapGeometry::default(),
        }
    }
}

/// Addresses of the allocator globals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovered {
    pub registry: RemoteAddr,
    /// Null unless a needle root slot is configured; taken from a thread
    /// cache then
    pub root: RemoteAddr,
}

/// Result of one live cycle
#[derive(Debug, Clone)]
pub struct CycleSnapshot {
    pub cycle: u64,
    pub gather_time: Duration,
    pub stats: LiveStats,
    /// The thread cache list was not read to its end
    pub truncated: bool,
}

pub struct Inspector {
    target: Target,
    options: InspectOptions,
    registry_override: Option<RemoteAddr>,
    discovered: Option<Discovered>,
    cycles: u64,
}

impl Inspector {
    pub fn new(target: Target, options: InspectOptions) -> Result<Self> {
        options.geometry.validate()?;
        Ok(Inspector {
            target,
            options,
            registry_override: None,
            discovered: None,
            cycles: 0,
        })
    }

    /// Use `registry` instead of scanning for the needle.
    pub fn with_registry_override(mut self, registry: RemoteAddr) -> Self {
        self.registry_override = Some(registry);
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Resolve the allocator globals, scanning for the needle with the target
    /// stopped. Cached until a read through the result fails.
    pub fn discover(&mut self) -> Result<Discovered> {
        if let Some(discovered) = self.discovered {
            return Ok(discovered);
        }

        let discovered = match self.registry_override {
            Some(registry) => {
                tracing::info!("Using registry address {}", registry);
                Discovered {
                    registry,
                    root: RemoteAddr::NULL,
                }
            }
            None => {
                let _frozen = self.target.freeze()?;
                let locator = NeedleLocator::new(self.target.memory(), self.options.scan);
                let array = locator.locate_array()?;
                let registry = array.slot(self.options.registry_slot)?;
                let root = match self.options.root_slot {
                    Some(slot) => array.slot(slot)?,
                    None => RemoteAddr::NULL,
                };
                tracing::info!("Registry at {}, root at {}", registry, root);
                Discovered { registry, root }
            }
        };

        self.discovered = Some(discovered);
        Ok(discovered)
    }

    /// Forget discovered addresses so the next cycle resolves them again.
    /// An explicit registry address is kept.
    pub fn invalidate(&mut self) {
        if self.discovered.take().is_some() && self.registry_override.is_none() {
            tracing::info!("Discarding discovered addresses");
        }
    }

    /// Read the target once and aggregate live statistics. The target keeps
    /// running during the walk.
    ///
    /// A root that cannot be read leaves the snapshot with thread data only;
    /// a root found through the needle is looked up again next cycle.
    pub fn run_cycle(&mut self) -> Result<CycleSnapshot> {
        let discovered = self.discover()?;
        let started = Instant::now();
        self.cycles += 1;

        let walk = match walk_thread_caches(
            self.target.memory(),
            discovered.registry,
            self.options.list_limit,
        ) {
            Ok(walk) => walk,
            Err(e) => {
                self.invalidate();
                return Err(e);
            }
        };

        let root_address = if discovered.root.is_null() {
            walk.root_from_caches()
        } else {
            Some(discovered.root)
        };

        let root = match root_address {
            Some(address) => match RemoteStructView::<PartitionRoot>::read(
                self.target.memory(),
                address,
            ) {
                Ok(root) => Some(root),
                Err(e) => {
                    tracing::warn!("Allocator root unreadable, no bucket stats: {}", e);
                    if !discovered.root.is_null() {
                        self.invalidate();
                    }
                    None
                }
            },
            None => {
                tracing::debug!("No allocator root known yet");
                None
            }
        };

        let buckets = match &root {
            Some(root) => walk_buckets(
                self.target.memory(),
                root,
                &self.options.geometry,
                self.options.list_limit,
                self.options.max_bucket_slot_size,
            )?,
            None => Vec::new(),
        };

        let stats = aggregate(&walk, root.as_ref().map(|r| r.get()), buckets);
        Ok(CycleSnapshot {
            cycle: self.cycles,
            gather_time: started.elapsed(),
            stats,
            truncated: walk.truncated,
        })
    }

    /// Dump every superpage of the allocator root. The target is stopped
    /// while the root and the superpages are copied.
    pub fn dump_heap(&mut self) -> Result<HeapDump> {
        let discovered = self.discover()?;
        let memory = self.target.memory();

        let root_address = if discovered.root.is_null() {
            walk_thread_caches(memory, discovered.registry, self.options.list_limit)?
                .root_from_caches()
                .ok_or_else(|| {
                    Error::InconsistentSnapshot("no thread cache points at a root".to_string())
                })?
        } else {
            discovered.root
        };

        let dumper = HeapDumper::new(memory, self.options.geometry)
            .with_pagemap(self.target.pagemap.as_deref())
            .with_limit(self.options.list_limit);

        let capture = {
            let _frozen = self.target.freeze()?;
            dumper.capture(root_address)?
        };
        if capture.skipped > 0 {
            tracing::warn!("{} superpages could not be copied", capture.skipped);
        }
        Ok(dumper.build(&capture))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freeze::tests::{RecordingSignals, Signal};
    use crate::layout::{ThreadCache, ThreadCacheRegistry, NEEDLE_1, NEEDLE_2};
    use crate::layout::{SlotSpanMetadata, INVALID_BUCKET_SIZE};
    use crate::source::MockMemorySource;
    use bytemuck::Zeroable;
    use std::sync::Arc;

    const PID: u32 = 4242;
    const DATA: u64 = 0x5500_0000_0000;
    const REGISTRY: RemoteAddr = RemoteAddr::new(0x5600_0000_0000);
    const ROOT: RemoteAddr = RemoteAddr::new(0x5600_0001_0000);
    const CACHE: RemoteAddr = RemoteAddr::new(0x7f00_0000_0000);
    const SPAN: RemoteAddr = RemoteAddr::new(0x7e00_0000_1028);

    /// Forwards to a shared recorder so the test can inspect it after the
    /// target took ownership.
    struct SharedSignals(Arc<RecordingSignals>);

    impl SignalSender for SharedSignals {
        fn stop(&self, pid: u32) -> Result<()> {
            self.0.stop(pid)
        }

        fn resume(&self, pid: u32) -> Result<()> {
            self.0.resume(pid)
        }
    }

    fn data_segment(words: &[u64]) -> Vec<u8> {
        let bytes: &[u8] = bytemuck::cast_slice(words);
        let mut data = vec![0u8; 0x1000];
        data[0x200..0x200 + bytes.len()].copy_from_slice(bytes);
        data
    }

    /// Options for a needle that also carries the root in slot 2.
    fn root_slot_options() -> InspectOptions {
        InspectOptions {
            scan: ScanOptions {
                array_len: 4,
                ..ScanOptions::default()
            },
            root_slot: Some(2),
            ..InspectOptions::default()
        }
    }

    /// One thread, bucket 3 caching five 64-byte slots; root bucket 3 with a
    /// single active span holding ten of its sixteen slots.
    fn heap(needle: &[u64]) -> MockMemorySource {
        let mut registry = ThreadCacheRegistry::zeroed();
        registry.list_head = CACHE;
        registry.largest_active_bucket_index = 3;

        let mut cache = ThreadCache::zeroed();
        cache.thread_id = 1234;
        cache.root = ROOT;
        cache.buckets[3].slot_size = 64;
        cache.buckets[3].count = 5;
        cache.buckets[3].limit = 128;

        let mut root = PartitionRoot::zeroed();
        for bucket in root.buckets.iter_mut() {
            bucket.slot_size = INVALID_BUCKET_SIZE;
        }
        root.buckets[3].slot_size = 256;
        root.buckets[3].num_system_pages_per_slot_span = 1;
        root.buckets[3].active_slot_spans_head = SPAN;
        root.syscall_count = 3;

        let mut span = SlotSpanMetadata::zeroed();
        span.num_allocated_slots = 10;
        span.freelist_head = RemoteAddr::new(0x7e00_0000_4000);

        MockMemorySource::with_data_region(data_segment(needle), DATA, "/opt/chrome/chrome")
            .with_value(REGISTRY, &registry)
            .with_value(CACHE, &cache)
            .with_value(ROOT, &root)
            .with_value(SPAN, &span)
    }

    fn default_heap() -> MockMemorySource {
        heap(&[NEEDLE_1, REGISTRY.get(), NEEDLE_2])
    }

    fn inspector_with(
        source: MockMemorySource,
        options: InspectOptions,
    ) -> (Inspector, Arc<RecordingSignals>) {
        let signals = Arc::new(RecordingSignals::default());
        let target = Target::new(
            PID,
            Box::new(source),
            Box::new(SharedSignals(Arc::clone(&signals))),
        );
        let inspector = Inspector::new(target, options).unwrap();
        (inspector, signals)
    }

    fn inspector(source: MockMemorySource) -> (Inspector, Arc<RecordingSignals>) {
        inspector_with(source, InspectOptions::default())
    }

    #[test]
    fn test_end_to_end_cycle() {
        let (mut inspector, signals) = inspector(default_heap());

        let snapshot = inspector.run_cycle().unwrap();
        assert_eq!(snapshot.cycle, 1);
        assert!(!snapshot.truncated);

        let row = snapshot.stats.cache_buckets[3];
        assert_eq!(row.slot_size, 64);
        assert_eq!(row.count, 5);
        assert_eq!(snapshot.stats.largest_active_bucket_index, 3);

        assert_eq!(snapshot.stats.buckets.len(), 1);
        let bucket = &snapshot.stats.buckets[0];
        assert_eq!(bucket.slot_size, 256);
        assert_eq!(bucket.allocated_slots, 10);
        assert_eq!(bucket.freelist_size, 6);
        assert_eq!(bucket.active_span_count(), 1);
        assert_eq!(snapshot.stats.totals.unwrap().syscall_count, 3);

        // Discovery froze the target exactly once; the walk did not.
        assert_eq!(signals.sent(), vec![Signal::Stop(PID), Signal::Resume(PID)]);

        inspector.run_cycle().unwrap();
        assert_eq!(signals.sent().len(), 2);
    }

    #[test]
    fn test_three_word_needle_yields_registry_and_cache_root() {
        let (mut inspector, _) = inspector(default_heap());

        let discovered = inspector.discover().unwrap();
        assert_eq!(discovered.registry, REGISTRY);
        assert!(discovered.root.is_null());

        let snapshot = inspector.run_cycle().unwrap();
        assert_eq!(snapshot.stats.buckets[0].allocated_slots, 10);
    }

    #[test]
    fn test_configured_root_slot() {
        let source = heap(&[NEEDLE_1, REGISTRY.get(), ROOT.get(), NEEDLE_2]);
        let (mut inspector, _) = inspector_with(source, root_slot_options());

        let discovered = inspector.discover().unwrap();
        assert_eq!(discovered.root, ROOT);
        assert_eq!(inspector.run_cycle().unwrap().stats.buckets.len(), 1);
    }

    #[test]
    fn test_unreadable_needle_root_keeps_thread_data() {
        let source = heap(&[NEEDLE_1, REGISTRY.get(), 0x10, NEEDLE_2]);
        let (mut inspector, signals) = inspector_with(source, root_slot_options());

        let snapshot = inspector.run_cycle().unwrap();
        assert_eq!(snapshot.stats.threads.len(), 1);
        assert_eq!(snapshot.stats.cache_buckets[3].count, 5);
        assert!(snapshot.stats.totals.is_none());
        assert!(snapshot.stats.buckets.is_empty());

        // The root is looked up again on the next cycle.
        assert!(inspector.discovered.is_none());
        inspector.run_cycle().unwrap();
        assert_eq!(signals.sent().len(), 4);
    }

    #[test]
    fn test_unreadable_cache_root_keeps_addresses() {
        let mut source = default_heap();
        let mut cache = ThreadCache::zeroed();
        cache.thread_id = 1234;
        cache.root = RemoteAddr::new(0x10);
        source.write_value(CACHE, &cache);
        let (mut inspector, _) = inspector(source);

        let snapshot = inspector.run_cycle().unwrap();
        assert_eq!(snapshot.stats.threads[0].thread_id, Some(1234));
        assert!(snapshot.stats.totals.is_none());
        assert!(inspector.discovered.is_some());
    }

    #[test]
    fn test_registry_override_skips_scan_and_freeze() {
        let source = default_heap();
        let signals = Arc::new(RecordingSignals::default());
        let target = Target::new(PID, Box::new(source), Box::new(SharedSignals(signals.clone())));
        let mut inspector = Inspector::new(target, InspectOptions::default())
            .unwrap()
            .with_registry_override(REGISTRY);

        let snapshot = inspector.run_cycle().unwrap();
        assert_eq!(snapshot.stats.threads[0].thread_id, Some(1234));
        assert!(signals.sent().is_empty());
    }

    #[test]
    fn test_missing_needle_is_fatal() {
        let source = MockMemorySource::with_data_region(vec![0; 0x1000], DATA, "/opt/chrome/chrome");
        let (mut inspector, signals) = inspector(source);

        let err = inspector.run_cycle().err().unwrap();
        assert!(err.is_fatal());
        assert_eq!(signals.sent(), vec![Signal::Stop(PID), Signal::Resume(PID)]);
    }

    #[test]
    fn test_registry_failure_forces_rediscovery() {
        let mut source = default_heap();
        // Needle points at an unreadable registry.
        let words = [NEEDLE_1, 0x10, NEEDLE_2];
        source.write_bytes(RemoteAddr::new(DATA + 0x200), bytemuck::cast_slice(&words));
        let (mut inspector, signals) = inspector(source);

        assert!(inspector.run_cycle().err().unwrap().is_soft());
        assert!(inspector.run_cycle().is_err());
        // Each failed cycle scanned again under its own freeze.
        assert_eq!(signals.sent().len(), 4);
    }

    #[test]
    fn test_inconsistent_span_fails_cycle_only() {
        let mut source = default_heap();
        let mut span = SlotSpanMetadata::zeroed();
        span.num_allocated_slots = 15;
        span.num_unprovisioned_slots = 4;
        source.write_value(SPAN, &span);
        let (mut inspector, _) = inspector(source);

        let err = inspector.run_cycle().err().unwrap();
        assert!(matches!(err, Error::InconsistentSnapshot(_)));
        // Addresses are still trusted.
        assert!(inspector.discovered.is_some());
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let target = Target::new(
            PID,
            Box::new(MockMemorySource::new()),
            Box::new(RecordingSignals::default()),
        );
        let options = InspectOptions {
            geometry: HeapGeometry {
                system_page_size: 3000,
                ..HeapGeometry::default()
            },
            ..InspectOptions::default()
        };
        assert!(matches!(
            Inspector::new(target, options),
            Err(Error::InvalidLayout(_))
        ));
    }
}
