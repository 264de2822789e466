//! One-shot heap dump

use anyhow::{Context, Result};
use pa_inspect::Inspector;
use std::path::Path;

use crate::commands::write_json;

pub fn run(inspector: &mut Inspector, path: &Path) -> Result<()> {
    let dump = inspector.dump_heap().context("Heap dump failed")?;
    tracing::info!(
        "Captured {} superpages across {} buckets",
        dump.superpages.len(),
        dump.buckets.len()
    );

    write_json(path, &dump)?;
    println!("Dumped JSON to {}", path.display());
    Ok(())
}
