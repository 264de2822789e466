//! CLI argument definitions for pa-inspect

use clap::Parser;
use pa_inspect::RemoteAddr;
use std::path::PathBuf;

/// Shown when no target process is given. The address only follows a
/// positional PID.
pub const USAGE: &str = concat!(
    "Usage: pa-inspect <PID> [ADDRESS] [--json=<FILENAME>]\n",
    "       pa-inspect --pid=<PID> [--json=<FILENAME>]"
);

#[derive(Parser, Debug)]
#[command(name = "pa-inspect")]
#[command(about = "Inspect the PartitionAlloc heap of a running process", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Target process ID (alternative to --pid)
    #[arg(value_name = "PID", conflicts_with = "pid_flag")]
    pub pid: Option<u32>,

    /// Thread cache registry address (hex 0x... or decimal), skips the needle scan
    #[arg(value_name = "ADDRESS")]
    pub address: Option<RemoteAddr>,

    /// Target process ID
    #[arg(long = "pid", value_name = "PID")]
    pub pid_flag: Option<u32>,

    /// Dump the heap as JSON to this path and exit
    #[arg(long, value_name = "PATH", conflicts_with = "stats_json")]
    pub json: Option<PathBuf>,

    /// Write one cycle of bucket statistics as JSON to this path and exit
    #[arg(long, value_name = "PATH")]
    pub stats_json: Option<PathBuf>,

    /// Polling period of the live display
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Stop after this many cycles (0 = run until interrupted)
    #[arg(long, default_value = "0")]
    pub cycles: u64,

    /// Skip regions at least this large when scanning for the needle
    #[arg(long, value_name = "BYTES")]
    pub max_scan_region_size: Option<usize>,

    /// Words in the needle array, sentinels included
    #[arg(long, value_name = "WORDS")]
    pub needle_array_len: Option<usize>,

    /// Needle slot holding the thread cache registry
    #[arg(long, value_name = "SLOT")]
    pub registry_slot: Option<usize>,

    /// Needle slot holding the allocator root (default: taken from a thread cache)
    #[arg(long, value_name = "SLOT")]
    pub root_slot: Option<usize>,

    /// Stop following any remote list after this many entries (0 = no limit)
    #[arg(long, value_name = "N")]
    pub max_list_length: Option<usize>,

    /// Walk root buckets only up to this slot size
    #[arg(long, value_name = "BYTES")]
    pub max_bucket_slot_size: Option<u32>,

    /// Config file (defaults to <config dir>/pa-inspect/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write the effective settings to the config file and exit
    #[arg(long)]
    pub save_config: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// The PID from either the flag or the positional argument.
    pub fn target_pid(&self) -> Option<u32> {
        self.pid_flag.or(self.pid)
    }
}
