//! Command implementations

pub mod dump;
pub mod live;

use anyhow::{Context, Result};
use pa_inspect::{Inspector, RemoteAddr, Target};
use serde::Serialize;
use std::fs;
use std::path::Path;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::config::Config;

/// Name and resident size of `pid`, if the process exists.
pub fn describe_process(pid: u32) -> Option<(String, u64)> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    system
        .process(pid)
        .map(|process| (process.name().to_string_lossy().into_owned(), process.memory()))
}

/// Attach to `pid` and set up an inspector with the configured options.
pub fn attach(pid: u32, registry: Option<RemoteAddr>, config: &Config) -> Result<Inspector> {
    match describe_process(pid) {
        Some((name, memory)) => tracing::info!(
            "PID = {} ({}, {} MB resident)",
            pid,
            name,
            memory / 1_000_000
        ),
        None => tracing::warn!("PID = {} (not found in the process table)", pid),
    }

    let target =
        Target::attach(pid).with_context(|| format!("Failed to attach to process {}", pid))?;
    let inspector = Inspector::new(target, config.inspect_options())?;

    Ok(match registry {
        Some(address) => inspector.with_registry_override(address),
        None => inspector,
    })
}

/// Write `value` as pretty JSON, replacing `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_json_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        fs::write(&path, "x".repeat(4096)).unwrap();

        write_json(&path, &serde_json::json!({ "buckets": [1, 2] })).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["buckets"][1], 2);
    }

    #[test]
    fn test_write_json_bad_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("out.json");
        assert!(write_json(&path, &1u32).is_err());
    }

    #[test]
    fn test_describe_own_process() {
        assert!(describe_process(std::process::id()).is_some());
    }
}
