//! Memory Region Types
//!
//! Regions of the target's address space, parsed from `/proc/<pid>/maps`
//! on Linux or built from `mach_vm_region` on macOS.
//!
//! Maps line format:
//! address           perms offset  dev   inode   pathname
//! 00400000-00452000 rw-p 00000000 08:02 173521  /usr/bin/chrome

use crate::addr::RemoteAddr;

/// Region protection and sharing flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub shared: bool,
}

impl Permissions {
    /// Parse the `rwxp` column of a maps line.
    pub fn parse(perms: &str) -> Self {
        let bytes = perms.as_bytes();
        Permissions {
            read: bytes.first() == Some(&b'r'),
            write: bytes.get(1) == Some(&b'w'),
            execute: bytes.get(2) == Some(&b'x'),
            shared: bytes.get(3) == Some(&b's'),
        }
    }

    /// Exactly `rw-p`: where initialised, copy-on-write data lives.
    pub fn is_private_data(&self) -> bool {
        self.read && self.write && !self.execute && !self.shared
    }
}

/// A contiguous `[start, end)` range of the target's address space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: RemoteAddr,
    pub end: RemoteAddr,
    pub perms: Permissions,
    pub offset: u64,
    pub path: Option<String>,
}

impl MemoryRegion {
    pub fn size(&self) -> usize {
        self.end.get().saturating_sub(self.start.get()) as usize
    }

    pub fn is_readable(&self) -> bool {
        self.perms.read
    }

    pub fn is_writable(&self) -> bool {
        self.perms.write
    }

    pub fn is_executable(&self) -> bool {
        self.perms.execute
    }

    /// Backed by a file. Rules out anonymous and bss-style mappings as well
    /// as kernel pseudo-paths such as `[stack]` and `[heap]`.
    pub fn has_backing_path(&self) -> bool {
        self.path
            .as_deref()
            .is_some_and(|p| !p.is_empty() && !p.starts_with('['))
    }

    pub fn contains(&self, address: RemoteAddr) -> bool {
        address >= self.start && address < self.end
    }
}

/// Parse one line of `/proc/<pid>/maps`.
fn parse_maps_line(line: &str) -> Option<MemoryRegion> {
    let mut fields = line.splitn(6, char::is_whitespace).filter(|s| !s.is_empty());

    let (start, end) = fields.next()?.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let perms = Permissions::parse(fields.next()?);
    let offset = fields
        .next()
        .and_then(|s| u64::from_str_radix(s, 16).ok())
        .unwrap_or(0);
    let _device = fields.next();
    let _inode = fields.next();
    let path = fields
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    Some(MemoryRegion {
        start: RemoteAddr::new(start),
        end: RemoteAddr::new(end),
        perms,
        offset,
        path,
    })
}

/// Parse the full contents of a maps file, skipping malformed lines.
pub fn parse_maps(contents: &str) -> Vec<MemoryRegion> {
    contents.lines().filter_map(parse_maps_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MAPS: &str = "\
55d0c0a00000-55d0c0a21000 r--p 00000000 08:02 173521                     /opt/chrome/chrome
55d0c0a21000-55d0c4a00000 r-xp 00021000 08:02 173521                     /opt/chrome/chrome
55d0c8a00000-55d0c8b00000 rw-p 08000000 08:02 173521                     /opt/chrome/chrome
55d0c8b00000-55d0c8c00000 rw-p 00000000 00:00 0
7f1200000000-7f1200200000 rw-s 00000000 00:05 1234                       /dev/shm/.org.chromium (deleted)
7ffd1e000000-7ffd1e021000 rw-p 00000000 00:00 0                          [stack]
";

    #[test]
    fn test_parse_maps_fields() {
        let regions = parse_maps(SAMPLE_MAPS);
        assert_eq!(regions.len(), 6);

        let data = &regions[2];
        assert_eq!(data.start, RemoteAddr::new(0x55d0c8a00000));
        assert_eq!(data.end, RemoteAddr::new(0x55d0c8b00000));
        assert_eq!(data.offset, 0x08000000);
        assert_eq!(data.path.as_deref(), Some("/opt/chrome/chrome"));
        assert_eq!(data.size(), 0x100000);
        assert!(data.perms.is_private_data());
    }

    #[test]
    fn test_parse_maps_anonymous_and_paths_with_spaces() {
        let regions = parse_maps(SAMPLE_MAPS);

        assert!(!regions[3].has_backing_path());
        assert!(!regions[5].has_backing_path());
        assert!(regions[2].has_backing_path());
        assert_eq!(
            regions[4].path.as_deref(),
            Some("/dev/shm/.org.chromium (deleted)")
        );
        assert!(regions[4].perms.shared);
        assert!(!regions[4].perms.is_private_data());
    }

    #[test]
    fn test_parse_maps_skips_garbage() {
        let regions = parse_maps("not a maps line\n\n0-zz r--p\n1000-2000 r--p 0 00:00 0\n");
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start, RemoteAddr::new(0x1000));
    }

    #[test]
    fn test_permissions() {
        let exec = Permissions::parse("r-xp");
        assert!(exec.read && exec.execute && !exec.write);
        assert!(!exec.is_private_data());

        let rw = Permissions::parse("rw-p");
        assert!(rw.is_private_data());

        let rwx = Permissions::parse("rwxp");
        assert!(!rwx.is_private_data());
    }

    #[test]
    fn test_region_contains() {
        let region = MemoryRegion {
            start: RemoteAddr::new(0x1000),
            end: RemoteAddr::new(0x2000),
            perms: Permissions::parse("rw-p"),
            offset: 0,
            path: None,
        };
        assert!(region.contains(RemoteAddr::new(0x1000)));
        assert!(region.contains(RemoteAddr::new(0x1fff)));
        assert!(!region.contains(RemoteAddr::new(0x2000)));
        assert!(region.is_readable() && region.is_writable() && !region.is_executable());
    }
}
