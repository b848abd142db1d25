//! Unix resource accounting via `getrusage(RUSAGE_CHILDREN)`.
//!
//! `RUSAGE_CHILDREN` is cumulative across every child the calling process
//! has ever reaped, not just the one we care about. We snapshot it
//! immediately before spawning and diff it against a fresh snapshot taken
//! once the child has been reaped, mirroring the approach used by process
//! pool workers that need per-task accounting from a shared reaper.

use nix::sys::resource::{getrusage, Usage, UsageWho};

use crate::result::ResourceUsage;

#[derive(Debug, Clone, Copy)]
pub struct RusageSnapshot {
    user_micros: i64,
    system_micros: i64,
    max_rss: i64,
    inblock: i64,
    oublock: i64,
    nvcsw: i64,
    nivcsw: i64,
}

pub fn snapshot_children_rusage() -> RusageSnapshot {
    read(getrusage(UsageWho::RUSAGE_CHILDREN))
}

fn read(usage: nix::Result<Usage>) -> RusageSnapshot {
    let Ok(usage) = usage else {
        return RusageSnapshot {
            user_micros: 0,
            system_micros: 0,
            max_rss: 0,
            inblock: 0,
            oublock: 0,
            nvcsw: 0,
            nivcsw: 0,
        };
    };
    RusageSnapshot {
        user_micros: to_micros(usage.user_time()),
        system_micros: to_micros(usage.system_time()),
        max_rss: usage.max_rss(),
        inblock: usage.block_reads(),
        oublock: usage.block_writes(),
        nvcsw: usage.voluntary_context_switches(),
        nivcsw: usage.involuntary_context_switches(),
    }
}

fn to_micros(tv: nix::sys::time::TimeVal) -> i64 {
    use nix::sys::time::TimeValLike;
    tv.num_microseconds()
}

/// Normalize `ru_maxrss` to bytes. Linux and most other Unixes report
/// kilobytes; macOS (and other Darwin-derived rusage implementations)
/// report bytes directly.
fn max_rss_bytes(raw: i64) -> u64 {
    let raw = raw.max(0) as u64;
    if cfg!(target_os = "macos") || cfg!(target_os = "ios") {
        raw
    } else {
        raw * 1024
    }
}

/// Block size assumed for `ru_inblock`/`ru_oublock`, which POSIX defines in
/// units of 512-byte blocks.
const BLOCK_SIZE: u64 = 512;

pub fn diff_children_rusage(before: RusageSnapshot) -> ResourceUsage {
    let after = snapshot_children_rusage();

    let user_micros = (after.user_micros - before.user_micros).max(0) as u64;
    let system_micros = (after.system_micros - before.system_micros).max(0) as u64;
    let inblock = (after.inblock - before.inblock).max(0) as u64;
    let oublock = (after.oublock - before.oublock).max(0) as u64;
    let nvcsw = (after.nvcsw - before.nvcsw).max(0) as u64;
    let nivcsw = (after.nivcsw - before.nivcsw).max(0) as u64;

    ResourceUsage {
        user_cpu_time: Some(std::time::Duration::from_micros(user_micros)),
        kernel_cpu_time: Some(std::time::Duration::from_micros(system_micros)),
        // max_rss is a high-water mark across all reaped children, not a
        // delta; report the most recent snapshot's value as a best effort.
        peak_rss_bytes: Some(max_rss_bytes(after.max_rss)),
        block_bytes_read: Some(inblock * BLOCK_SIZE),
        block_bytes_written: Some(oublock * BLOCK_SIZE),
        voluntary_context_switches: Some(nvcsw),
        involuntary_context_switches: Some(nivcsw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_rss_bytes_linux_scales_kb() {
        if cfg!(target_os = "macos") || cfg!(target_os = "ios") {
            return;
        }
        assert_eq!(max_rss_bytes(1024), 1024 * 1024);
    }

    #[test]
    fn test_snapshot_and_diff_are_non_negative() {
        let before = snapshot_children_rusage();
        let usage = diff_children_rusage(before);
        assert!(usage.user_cpu_time.is_some());
        assert!(usage.block_bytes_read.unwrap_or(0) < u64::MAX);
    }
}
