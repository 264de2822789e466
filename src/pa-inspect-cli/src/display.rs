//! Text rendering of live statistics

use pa_inspect::{BucketStats, CacheBucketRow, CycleSnapshot, GlobalTotals, LiveStats, ThreadSummary};
use std::fmt::{self, Write};

use crate::threads::ThreadNames;

pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[1;1H";

const RULE_WIDTH: usize = 80;
const THREAD_NAME_WIDTH: usize = 20;
/// A new bucket gets the detailed freelist view every this many cycles.
const DETAIL_ROTATION: u64 = 50;

/// A number with a leading space, right-aligned in `width` columns.
struct Spaced(u64, usize);

impl fmt::Display for Spaced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = format!(" {}", self.0);
        write!(f, "{:>width$}", text, width = self.1)
    }
}

/// Widened so counters near `u64::MAX` neither wrap nor lose precision.
fn percent(part: u64, total: u64) -> u64 {
    if total == 0 {
        0
    } else {
        u64::try_from(u128::from(part) * 100 / u128::from(total)).unwrap_or(u64::MAX)
    }
}

fn kib(bytes: u64) -> u64 {
    bytes / 1024
}

fn write_rates(out: &mut impl Write, summary: &ThreadSummary) -> fmt::Result {
    let stats = &summary.stats;
    let count = stats.alloc_count;
    write!(
        out,
        "\tHit Rate = {}%\tToo Large = {}%\tEmpty = {}%\t Count = {}k",
        percent(stats.alloc_hits, count),
        percent(stats.alloc_miss_too_large, count),
        percent(stats.alloc_miss_empty, count),
        count / 1000
    )
}

fn write_threads(out: &mut impl Write, stats: &LiveStats, names: &ThreadNames) -> fmt::Result {
    writeln!(
        out,
        "Found {} caches, total cached memory = {}kiB",
        stats.threads.len(),
        kib(stats.all_threads.cached_memory)
    )?;
    writeln!(out, "Per thread:")?;
    writeln!(out, "Thread Name         Size\tPurge")?;
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;

    for thread in &stats.threads {
        let name = thread
            .thread_id
            .and_then(|tid| names.name(tid))
            .unwrap_or("");
        write!(
            out,
            "{:<width$}{}kiB\t{}",
            name,
            kib(thread.cached_memory),
            if thread.should_purge { 'X' } else { ' ' },
            width = THREAD_NAME_WIDTH
        )?;
        write_rates(out, thread)?;
        writeln!(out)?;
    }

    write!(
        out,
        "\nALL THREADS:        {}kiB\t",
        kib(stats.all_threads.cached_memory)
    )?;
    write_rates(out, &stats.all_threads)?;
    writeln!(out)
}

fn write_cache_bucket(out: &mut impl Write, row: &CacheBucketRow, is_limit: bool) -> fmt::Result {
    write!(
        out,
        "{}{}\t{}\t{}\t{}kiB",
        if is_limit { '*' } else { ' ' },
        Spaced(u64::from(row.slot_size), 4),
        Spaced(u64::from(row.per_thread_limit), 4),
        Spaced(row.count, 4),
        Spaced(kib(row.cached_memory()), 4)
    )
}

fn write_cache_buckets(out: &mut impl Write, stats: &LiveStats) -> fmt::Result {
    writeln!(out, "Per-bucket stats (All Threads):")?;
    writeln!(out, "Size\tLimit\tCount\tMemory\t| Size\t\tLimit\tCount\tMemory")?;
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;

    let rows = &stats.cache_buckets;
    let half = rows.len() / 2;
    for (left, right) in rows[..half].iter().zip(&rows[half..]) {
        write_cache_bucket(out, left, left.index == stats.largest_active_bucket_index)?;
        write!(out, "\t| ")?;
        write_cache_bucket(out, right, right.index == stats.largest_active_bucket_index)?;
        writeln!(out)?;
    }

    let total: u64 = rows.iter().map(CacheBucketRow::cached_memory).sum();
    writeln!(out, "\nALL THREADS TOTAL: {}kiB", kib(total))
}

fn write_root_buckets(
    out: &mut impl Write,
    buckets: &[BucketStats],
    detailed: usize,
) -> fmt::Result {
    writeln!(
        out,
        "Per-bucket size / allocated slots / free slots / slot span count:"
    )?;
    for (i, bucket) in buckets.iter().enumerate() {
        write!(
            out,
            "|{} {} {} {}|",
            Spaced(u64::from(bucket.slot_size), 5),
            Spaced(bucket.allocated_slots as u64, 6),
            Spaced(bucket.freelist_size as u64, 6),
            Spaced(bucket.active_span_count() as u64, 4)
        )?;
        if i % 4 == 3 {
            writeln!(out)?;
        } else {
            write!(out, "\t")?;
        }
    }

    if let Some(bucket) = buckets.get(detailed) {
        writeln!(
            out,
            "\nFreelist size for active buckets of size = {}",
            bucket.slot_size
        )?;
        for size in &bucket.freelist_sizes {
            write!(out, "{} ", size)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn write_totals(out: &mut impl Write, totals: &GlobalTotals) -> fmt::Result {
    write!(
        out,
        "\n\nSyscall count = {}\tTotal duration = {}ms\n",
        totals.syscall_count,
        totals.syscall_total_time_ns / 1_000_000
    )?;
    writeln!(
        out,
        "Max committed size = {}kiB",
        kib(totals.max_size_of_committed_pages)
    )?;
    writeln!(
        out,
        "Allocated/Committed/Virtual = {} / {} / {} kiB",
        kib(totals.total_size_of_allocated_bytes),
        kib(totals.total_size_of_committed_pages),
        kib(totals.virtual_size)
    )?;
    write!(
        out,
        "\nEmpty Slot Spans Dirty Size = {}kiB",
        kib(totals.empty_slot_spans_dirty_bytes)
    )
}

/// Index of the bucket whose per-span freelists are listed on `cycle`.
pub fn detailed_bucket(cycle: u64, bucket_count: usize) -> usize {
    if bucket_count == 0 {
        0
    } else {
        ((cycle / DETAIL_ROTATION) % bucket_count as u64) as usize
    }
}

/// One screenful. `cycle` counts from zero.
pub fn write_snapshot(
    out: &mut impl Write,
    snapshot: &CycleSnapshot,
    names: &ThreadNames,
    cycle: u64,
) -> fmt::Result {
    let stats = &snapshot.stats;

    writeln!(
        out,
        "Time to gather data = {}ms",
        snapshot.gather_time.as_millis()
    )?;
    write_threads(out, stats, names)?;

    write!(out, "\n\n")?;
    write_cache_buckets(out, stats)?;

    if let Some(totals) = &stats.totals {
        write!(out, "\n\n")?;
        write_root_buckets(
            out,
            &stats.buckets,
            detailed_bucket(cycle, stats.buckets.len()),
        )?;
        write_totals(out, totals)?;
    }

    if snapshot.truncated {
        write!(out, "\n\n(thread cache list truncated)")?;
    }
    Ok(())
}

pub fn render_snapshot(snapshot: &CycleSnapshot, names: &ThreadNames, cycle: u64) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_snapshot(&mut out, snapshot, names, cycle);
    out
}
