//! Live Process Memory Source (Linux)
//!
//! Positioned reads on `/proc/<pid>/mem`. Opening the file is subject to the
//! ptrace access mode check, so a failed open means the operator lacks the
//! permission (see `/proc/sys/kernel/yama/ptrace_scope`).

use super::{parse_maps, MemoryRegion, MemorySource};
use crate::addr::RemoteAddr;
use crate::error::{Error, Result};

use std::fs::{self, File};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;

/// Read handle on a running process
pub struct RemoteProcess {
    pid: u32,
    mem: File,
}

impl RemoteProcess {
    /// Open the target's memory. Fails with `NoAccess` when the platform
    /// policy forbids it or the process does not exist.
    pub fn open(pid: u32) -> Result<Self> {
        let path = format!("/proc/{}/mem", pid);
        let mem = File::open(&path).map_err(|e| Error::NoAccess {
            pid,
            reason: format!("{}: {}. Check ptrace_scope or run as the same user", path, e),
        })?;

        tracing::debug!("Opened {}", path);
        Ok(RemoteProcess { pid, mem })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl MemorySource for RemoteProcess {
    fn read_into(&self, address: RemoteAddr, buf: &mut [u8]) -> Result<()> {
        loop {
            match self.mem.read_at(buf, address.get()) {
                Ok(n) if n == buf.len() => return Ok(()),
                Ok(n) => {
                    return Err(Error::read(
                        address,
                        buf.len(),
                        format!("short read ({} bytes)", n),
                    ))
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::read(address, buf.len(), e)),
            }
        }
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        let path = format!("/proc/{}/maps", self.pid);
        let contents = fs::read_to_string(&path).map_err(|e| Error::NoAccess {
            pid: self.pid,
            reason: format!("{}: {}", path, e),
        })?;
        Ok(parse_maps(&contents))
    }

    fn is_live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ThreadCacheRegistry, NEEDLE_1};
    use crate::view::RemoteStructView;
    use bytemuck::Zeroable;

    fn open_self() -> RemoteProcess {
        RemoteProcess::open(std::process::id()).unwrap()
    }

    #[test]
    fn test_open_missing_process_is_no_access() {
        // PIDs are capped well below this on every Linux configuration.
        let err = RemoteProcess::open(u32::MAX - 1).err().unwrap();
        assert!(matches!(err, Error::NoAccess { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_read_own_memory() {
        let process = open_self();
        let value: Box<u64> = Box::new(NEEDLE_1);
        let address = RemoteAddr::new(&*value as *const u64 as u64);

        assert_eq!(process.read_u64(address).unwrap(), NEEDLE_1);
        assert!(process.is_live());
        assert_eq!(process.pid(), std::process::id());
    }

    #[test]
    fn test_struct_view_loopback_is_bit_identical() {
        let process = open_self();
        let mut registry = Box::new(ThreadCacheRegistry::zeroed());
        registry.list_head = RemoteAddr::new(0x7f12_3456_7000);
        registry.largest_active_bucket_index = 17;
        registry.periodic_purge_next_interval_ns = 1_000_000_000;
        let address = RemoteAddr::new(&*registry as *const ThreadCacheRegistry as u64);

        let view = RemoteStructView::<ThreadCacheRegistry>::read(&process, address).unwrap();
        assert_eq!(
            bytemuck::bytes_of(view.get()),
            bytemuck::bytes_of(&*registry)
        );
        assert_eq!(view.list_head, registry.list_head);
        assert_eq!(view.largest_active_bucket_index, 17);
    }

    #[test]
    fn test_read_unmapped_is_read_error() {
        let process = open_self();
        let err = process.read_u64(RemoteAddr::new(0x8)).err().unwrap();
        assert!(matches!(err, Error::ReadError { .. }));
        assert!(err.is_soft());
    }

    #[test]
    fn test_regions_include_own_stack_and_binary() {
        let process = open_self();
        let regions = process.regions().unwrap();
        assert!(!regions.is_empty());

        let local = 0u64;
        let address = RemoteAddr::new(&local as *const u64 as u64);
        assert!(regions.iter().any(|r| r.contains(address)));
        assert!(regions.iter().any(|r| r.has_backing_path()));
    }
}
