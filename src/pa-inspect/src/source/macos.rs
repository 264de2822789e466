//! Live Process Memory Source (macOS)
//!
//! Task-port based reads. `task_for_pid` requires the binary to be signed with
//! the debugger entitlement (or root with SIP relaxed). Bulk reads that cross
//! an unreadable guard page fail as a whole, so `read_partial` falls back to
//! page-by-page reads through the trait's default implementation.

use super::{MemoryRegion, MemorySource, Permissions};
use crate::addr::RemoteAddr;
use crate::error::{Error, Result};

use libc::{c_int, c_void};

type MachPort = u32;
type KernReturn = c_int;

const KERN_SUCCESS: KernReturn = 0;
const VM_PROT_READ: c_int = 0x1;
const VM_PROT_WRITE: c_int = 0x2;
const VM_PROT_EXECUTE: c_int = 0x4;
const VM_REGION_BASIC_INFO_64: c_int = 9;
const PROC_PIDPATHINFO_MAXSIZE: usize = 4096;

/// `vm_region_basic_info_data_64_t`, declared under `#pragma pack(4)`
#[repr(C, packed(4))]
#[derive(Default)]
struct VmRegionBasicInfo64 {
    protection: c_int,
    max_protection: c_int,
    inheritance: u32,
    shared: u32,
    reserved: u32,
    offset: u64,
    behavior: c_int,
    user_wired_count: u16,
}

const VM_REGION_BASIC_INFO_COUNT_64: u32 =
    (std::mem::size_of::<VmRegionBasicInfo64>() / std::mem::size_of::<c_int>()) as u32;

extern "C" {
    static mach_task_self_: MachPort;

    fn task_for_pid(target_tport: MachPort, pid: c_int, task: *mut MachPort) -> KernReturn;

    fn mach_port_deallocate(task: MachPort, name: MachPort) -> KernReturn;

    fn mach_vm_read_overwrite(
        target_task: MachPort,
        address: u64,
        size: u64,
        data: u64,
        out_size: *mut u64,
    ) -> KernReturn;

    fn mach_vm_region(
        target_task: MachPort,
        address: *mut u64,
        size: *mut u64,
        flavor: c_int,
        info: *mut c_int,
        info_count: *mut u32,
        object_name: *mut MachPort,
    ) -> KernReturn;

    fn proc_regionfilename(pid: c_int, address: u64, buffer: *mut c_void, size: u32) -> c_int;
}

fn task_self() -> MachPort {
    // SAFETY: `mach_task_self_` is initialised by libSystem before main.
    unsafe { mach_task_self_ }
}

/// Read handle on a running process
pub struct RemoteProcess {
    pid: u32,
    task: MachPort,
}

impl RemoteProcess {
    pub fn open(pid: u32) -> Result<Self> {
        let mut task: MachPort = 0;
        // SAFETY: `task` is a valid out-pointer for the duration of the call.
        let kr = unsafe { task_for_pid(task_self(), pid as c_int, &mut task) };
        if kr != KERN_SUCCESS {
            return Err(Error::NoAccess {
                pid,
                reason: format!(
                    "task_for_pid failed (kern_return_t {}). Is the tool signed with the \
                     debugger entitlement?",
                    kr
                ),
            });
        }

        tracing::debug!("Acquired task port {} for PID {}", task, pid);
        Ok(RemoteProcess { pid, task })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn region_path(&self, address: u64) -> Option<String> {
        let mut buffer = vec![0u8; PROC_PIDPATHINFO_MAXSIZE];
        // SAFETY: the buffer is writable for the advertised size.
        let len = unsafe {
            proc_regionfilename(
                self.pid as c_int,
                address,
                buffer.as_mut_ptr().cast(),
                buffer.len() as u32,
            )
        };
        if len <= 0 {
            return None;
        }
        buffer.truncate(len as usize);
        Some(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Drop for RemoteProcess {
    fn drop(&mut self) {
        // SAFETY: the port was obtained from task_for_pid and is released once.
        unsafe {
            mach_port_deallocate(task_self(), self.task);
        }
    }
}

impl MemorySource for RemoteProcess {
    fn read_into(&self, address: RemoteAddr, buf: &mut [u8]) -> Result<()> {
        let mut out_size: u64 = 0;
        // SAFETY: the kernel writes at most `buf.len()` bytes into `buf`.
        let kr = unsafe {
            mach_vm_read_overwrite(
                self.task,
                address.get(),
                buf.len() as u64,
                buf.as_mut_ptr() as u64,
                &mut out_size,
            )
        };
        if kr != KERN_SUCCESS {
            return Err(Error::read(
                address,
                buf.len(),
                format!("mach_vm_read_overwrite returned {}", kr),
            ));
        }
        if out_size as usize != buf.len() {
            return Err(Error::read(
                address,
                buf.len(),
                format!("short read ({} bytes)", out_size),
            ));
        }
        Ok(())
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        let mut regions = Vec::new();
        let mut address: u64 = 0;

        loop {
            let mut size: u64 = 0;
            let mut info = VmRegionBasicInfo64::default();
            let mut count = VM_REGION_BASIC_INFO_COUNT_64;
            let mut object_name: MachPort = 0;

            // SAFETY: every out-pointer refers to a live local of the right type.
            let kr = unsafe {
                mach_vm_region(
                    self.task,
                    &mut address,
                    &mut size,
                    VM_REGION_BASIC_INFO_64,
                    (&mut info as *mut VmRegionBasicInfo64).cast(),
                    &mut count,
                    &mut object_name,
                )
            };
            if kr != KERN_SUCCESS {
                // KERN_INVALID_ADDRESS past the last region.
                break;
            }

            let protection = info.protection;
            let shared = info.shared;
            let offset = info.offset;
            regions.push(MemoryRegion {
                start: RemoteAddr::new(address),
                end: RemoteAddr::new(address + size),
                perms: Permissions {
                    read: protection & VM_PROT_READ != 0,
                    write: protection & VM_PROT_WRITE != 0,
                    execute: protection & VM_PROT_EXECUTE != 0,
                    shared: shared != 0,
                },
                offset,
                path: self.region_path(address),
            });

            address += size;
        }

        if regions.is_empty() {
            return Err(Error::NoAccess {
                pid: self.pid,
                reason: "mach_vm_region returned no regions".to_string(),
            });
        }
        Ok(regions)
    }

    fn is_live(&self) -> bool {
        true
    }
}
