//! Thread names of the target
//!
//! Thread caches record thread IDs as seen from inside the target's PID
//! namespace (sandboxed renderers have their own). `/proc/<pid>/task/*/status`
//! carries the chain of namespaced IDs in `NSpid`; the last one is what the
//! target sees.

use std::collections::HashMap;
use std::fs;

pub struct ThreadNames {
    pid: u32,
    names: HashMap<i32, String>,
}

/// Command name from a `stat` line: the text between the first `(` and the
/// last `)`, which may itself contain parentheses and spaces.
fn parse_comm(stat: &str) -> Option<&str> {
    let start = stat.find('(')?;
    let end = stat.rfind(')')?;
    (start < end).then(|| &stat[start + 1..end])
}

/// Innermost namespaced ID from a `status` file.
fn parse_nspid(status: &str) -> Option<i32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("NSpid:"))
        .and_then(|ids| ids.split_whitespace().last())
        .and_then(|id| id.parse().ok())
}

impl ThreadNames {
    pub fn new(pid: u32) -> Self {
        ThreadNames {
            pid,
            names: HashMap::new(),
        }
    }

    /// Re-read every task of the target.
    pub fn refresh(&mut self) {
        let task_dir = format!("/proc/{}/task", self.pid);
        let entries = match fs::read_dir(&task_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot list {}: {}", task_dir, e);
                return;
            }
        };

        self.names.clear();
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(stat) = fs::read_to_string(path.join("stat")) else {
                tracing::debug!("Invalid file: {}", path.join("stat").display());
                continue;
            };
            let Some(name) = parse_comm(&stat) else {
                continue;
            };

            let tid = fs::read_to_string(path.join("status"))
                .ok()
                .and_then(|status| parse_nspid(&status))
                .or_else(|| entry.file_name().to_str().and_then(|s| s.parse().ok()));

            if let Some(tid) = tid {
                self.names.insert(tid, name.to_string());
            }
        }
        tracing::debug!("Resolved {} thread names", self.names.len());
    }

    /// Refresh once if any of `tids` is not known yet.
    pub fn resolve(&mut self, tids: impl IntoIterator<Item = i32>) {
        if tids.into_iter().any(|tid| !self.names.contains_key(&tid)) {
            self.refresh();
        }
    }

    pub fn name(&self, tid: i32) -> Option<&str> {
        self.names.get(&tid).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comm() {
        assert_eq!(
            parse_comm("1234 (Chrome_IOThread) S 1 1234 0"),
            Some("Chrome_IOThread")
        );
        assert_eq!(
            parse_comm("99 (weird (name) x) R 1 99"),
            Some("weird (name) x")
        );
        assert_eq!(parse_comm("garbage"), None);
    }

    #[test]
    fn test_parse_nspid_takes_innermost() {
        let status = "Name:\tchrome\nTgid:\t5000\nNSpid:\t5012\t12\nPPid:\t1\n";
        assert_eq!(parse_nspid(status), Some(12));
        assert_eq!(parse_nspid("NSpid:\t777\n"), Some(777));
        assert_eq!(parse_nspid("Name:\tx\n"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_threads_resolve() {
        let pid = std::process::id();
        let mut names = ThreadNames::new(pid);
        names.resolve([pid as i32]);

        assert!(names.name(pid as i32).is_some());
        assert!(names.name(-1).is_none());
    }
}
