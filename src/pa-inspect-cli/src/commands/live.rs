//! Live thread cache and bucket display

use anyhow::Result;
use pa_inspect::{BucketStats, CycleSnapshot, GlobalTotals, Inspector};
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use std::thread;

use crate::commands::write_json;
use crate::config::Config;
use crate::display::{render_snapshot, CLEAR_SCREEN};
use crate::threads::ThreadNames;

/// Bucket statistics of one cycle as written by `--stats-json`
#[derive(Debug, Serialize)]
pub struct StatsDump<'a> {
    pub buckets: &'a [BucketStats],
    pub totals: &'a GlobalTotals,
}

impl<'a> StatsDump<'a> {
    /// `None` until a cycle has resolved the allocator root.
    pub fn from_snapshot(snapshot: &'a CycleSnapshot) -> Option<Self> {
        snapshot.stats.totals.as_ref().map(|totals| StatsDump {
            buckets: &snapshot.stats.buckets,
            totals,
        })
    }
}

/// Refresh the display every interval. Stops after `cycles` attempts
/// (0 = never) or once the stats JSON is written.
pub fn run(
    inspector: &mut Inspector,
    config: &Config,
    cycles: u64,
    stats_json: Option<&Path>,
) -> Result<()> {
    let mut names = ThreadNames::new(inspector.target().pid());
    let mut shown: u64 = 0;
    let mut attempts: u64 = 0;

    loop {
        if cycles != 0 && attempts >= cycles {
            return Ok(());
        }
        attempts += 1;

        let snapshot = match inspector.run_cycle() {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_soft() => {
                tracing::warn!("Cycle failed, retrying: {}", e);
                thread::sleep(config.interval());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        names.resolve(
            snapshot
                .stats
                .threads
                .iter()
                .filter_map(|thread| thread.thread_id),
        );

        let mut stdout = io::stdout().lock();
        write!(stdout, "{}", CLEAR_SCREEN)?;
        write!(stdout, "{}", render_snapshot(&snapshot, &names, shown))?;

        if let (Some(path), Some(dump)) = (stats_json, StatsDump::from_snapshot(&snapshot)) {
            return match write_json(path, &dump) {
                Ok(()) => {
                    writeln!(stdout, "\n\nDumped JSON to {}", path.display())?;
                    Ok(())
                }
                Err(e) => {
                    writeln!(stdout, "\n\nFailed to dump JSON to {}", path.display())?;
                    Err(e)
                }
            };
        }

        writeln!(stdout)?;
        stdout.flush()?;
        drop(stdout);

        shown += 1;
        thread::sleep(config.interval());
    }
}
