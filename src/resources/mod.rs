//! Resource Accountant (C3): given a completed child process, return a
//! [`ResourceUsage`] or signal unavailability. Implementations are
//! platform-specialized at compile time; they agree on the shared
//! [`ResourceUsage`] shape from [`crate::result`].
//!
//! The accounting flow is snapshot/diff on Unix (rusage for terminated
//! children is only available in aggregate, so we snapshot
//! `RUSAGE_CHILDREN` before spawning and diff after reaping) and a direct
//! query on Windows (job-object accounting is already per-job cumulative).

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use crate::result::ResourceUsage;

/// Baseline taken before spawning, consumed by [`finish`] after the child
/// has been reaped.
#[derive(Debug, Clone, Copy)]
pub enum Baseline {
    #[cfg(unix)]
    Unix(unix::RusageSnapshot),
    #[cfg(windows)]
    /// Windows accounting is read directly from the job object; no
    /// pre-spawn snapshot is needed.
    Windows,
    Unsupported,
}

/// Take a baseline snapshot immediately before spawning the child.
pub fn baseline() -> Baseline {
    #[cfg(unix)]
    {
        Baseline::Unix(unix::snapshot_children_rusage())
    }
    #[cfg(windows)]
    {
        Baseline::Windows
    }
    #[cfg(not(any(unix, windows)))]
    {
        Baseline::Unsupported
    }
}

/// A Windows job-object handle, used by [`finish`] to pull cumulative
/// accounting once the process inside it has exited.
#[cfg(windows)]
pub use windows::JobHandle;

/// Resolve a [`ResourceUsage`] after the child has been reaped, using the
/// `RUSAGE_CHILDREN` delta between `baseline` and now.
#[cfg(not(windows))]
pub fn finish(snapshot: Baseline) -> Option<ResourceUsage> {
    match snapshot {
        #[cfg(unix)]
        Baseline::Unix(before) => Some(unix::diff_children_rusage(before)),
        Baseline::Unsupported => None,
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// Resolve a [`ResourceUsage`] after the child has been reaped. `job` must
/// be the job object the process ran inside (the Direct Executor creates
/// one purely for accounting; the Limit Enforcer's job-object variant
/// reuses its own limiting job); `None` if no job was available.
#[cfg(windows)]
pub fn finish(snapshot: Baseline, job: Option<&JobHandle>) -> Option<ResourceUsage> {
    match snapshot {
        Baseline::Windows => job.and_then(windows::collect_job_usage),
        Baseline::Unsupported => None,
        #[allow(unreachable_patterns)]
        _ => None,
    }
}
