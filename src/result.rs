//! Execution outcome types: [`ExecutionResult`] and [`ResourceUsage`].

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::IsolationMode;

/// Per-platform resource accounting for a completed process. Every field is
/// independently optional: a backend reports what it was able to collect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub user_cpu_time: Option<Duration>,
    pub kernel_cpu_time: Option<Duration>,
    pub peak_rss_bytes: Option<u64>,
    pub block_bytes_read: Option<u64>,
    pub block_bytes_written: Option<u64>,
    pub voluntary_context_switches: Option<u64>,
    pub involuntary_context_switches: Option<u64>,
}

/// Outcome of running a [`crate::command::Command`].
///
/// Invariants:
/// - `success == true` implies `error.is_none()`.
/// - `killed == true` implies `kill_reason.is_some()`.
/// - `truncated == true` implies `discarded_bytes > 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True iff infrastructure succeeded (the program ran or was killed
    /// under our own policy) — this is distinct from the program's exit
    /// code being zero.
    pub success: bool,
    /// Exit code, or -1 if unavailable (killed, or never observed).
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Best-effort interleaved merge of stdout and stderr, in arrival order.
    pub merged: Vec<u8>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub duration: Duration,
    pub killed: bool,
    pub kill_reason: Option<String>,
    pub truncated: bool,
    pub discarded_bytes: u64,
    pub usage: Option<ResourceUsage>,
    pub error: Option<String>,
    pub isolation_used: IsolationMode,
    pub request_id: Uuid,
}

impl ExecutionResult {
    /// `true` iff the program ran to completion and exited zero.
    pub fn succeeded_cleanly(&self) -> bool {
        self.success && !self.killed && self.exit_code == 0
    }

    /// Check the invariants documented on this type. Used by tests and by
    /// callers assembling a `ExecutionResult` by hand (e.g. in a new
    /// backend) to catch programming errors early.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.success && self.error.is_some() {
            return Err("success=true but error is set".to_string());
        }
        if self.killed && self.kill_reason.is_none() {
            return Err("killed=true but kill_reason is unset".to_string());
        }
        if self.truncated && self.discarded_bytes == 0 {
            return Err("truncated=true but discarded_bytes is zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_result() -> ExecutionResult {
        let now = SystemTime::now();
        ExecutionResult {
            success: true,
            exit_code: 0,
            stdout: vec![],
            stderr: vec![],
            merged: vec![],
            started_at: now,
            finished_at: now,
            duration: Duration::ZERO,
            killed: false,
            kill_reason: None,
            truncated: false,
            discarded_bytes: 0,
            usage: None,
            error: None,
            isolation_used: IsolationMode::None,
            request_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_invariant_success_implies_no_error() {
        let mut r = base_result();
        r.error = Some("boom".to_string());
        assert!(r.check_invariants().is_err());
    }

    #[test]
    fn test_invariant_killed_implies_reason() {
        let mut r = base_result();
        r.killed = true;
        assert!(r.check_invariants().is_err());
        r.kill_reason = Some("timeout after 1s".to_string());
        assert!(r.check_invariants().is_ok());
    }

    #[test]
    fn test_invariant_truncated_implies_discarded() {
        let mut r = base_result();
        r.truncated = true;
        assert!(r.check_invariants().is_err());
        r.discarded_bytes = 5;
        assert!(r.check_invariants().is_ok());
    }

    #[test]
    fn test_succeeded_cleanly() {
        let mut r = base_result();
        assert!(r.succeeded_cleanly());
        r.exit_code = 1;
        assert!(!r.succeeded_cleanly());
    }
}
