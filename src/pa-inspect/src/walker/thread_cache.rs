//! Thread cache list traversal

use super::ListLimit;
use crate::addr::RemoteAddr;
use crate::error::Result;
use crate::layout::ThreadCacheRegistry;
use crate::source::MemorySource;
use crate::view::{RemoteStructView, ThreadCacheSnapshot};

#[derive(Debug, Clone)]
pub struct ThreadCacheWalk {
    pub registry: RemoteStructView<ThreadCacheRegistry>,
    pub caches: Vec<ThreadCacheSnapshot>,
    /// The walk stopped before reaching the end of the list
    pub truncated: bool,
}

impl ThreadCacheWalk {
    /// Allocator root as seen by the first thread cache
    pub fn root_from_caches(&self) -> Option<RemoteAddr> {
        self.caches
            .iter()
            .map(|cache| cache.root)
            .find(|root| !root.is_null())
    }
}

/// Read the registry at `registry_address`, then every thread cache from its
/// `list_head` following `next`. A failure on the registry is returned; a
/// failure part-way along the list keeps what was read so far.
pub fn walk_thread_caches(
    source: &dyn MemorySource,
    registry_address: RemoteAddr,
    limit: ListLimit,
) -> Result<ThreadCacheWalk> {
    let registry = RemoteStructView::<ThreadCacheRegistry>::read(source, registry_address)?;

    let mut caches = Vec::new();
    let mut truncated = false;
    let mut next = registry.list_head;

    while !next.is_null() {
        if limit.reached(caches.len()) {
            tracing::warn!(
                "Thread cache list longer than {} entries, stopping",
                caches.len()
            );
            truncated = true;
            break;
        }
        match ThreadCacheSnapshot::read(source, next) {
            Ok(cache) => {
                next = cache.next;
                caches.push(cache);
            }
            Err(e) => {
                tracing::warn!("Thread cache list cut short: {}", e);
                truncated = true;
                break;
            }
        }
    }

    tracing::debug!("Read {} thread caches", caches.len());
    Ok(ThreadCacheWalk {
        registry,
        caches,
        truncated,
    })
}
