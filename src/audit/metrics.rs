//! Rolling metrics aggregator: a pure [`AuditSink`] that keeps running
//! counters per program and per session, with derived rates computed at
//! snapshot time rather than maintained incrementally.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};

#[derive(Debug, Default, Clone, Serialize)]
pub struct ProgramCounters {
    pub started: u64,
    pub completed: u64,
    pub succeeded: u64,
    pub nonzero_exit: u64,
    pub killed: u64,
    pub errors: u64,
    pub blocked: u64,
    pub total_duration: Duration,
    pub total_cpu_time: Duration,
    pub total_memory_bytes: u64,
}

#[derive(Debug, Default)]
struct Inner {
    total: ProgramCounters,
    by_program: HashMap<String, ProgramCounters>,
    by_session: HashMap<Uuid, ProgramCounters>,
}

/// Thread-safe rolling metrics, updated synchronously as events arrive.
/// Every event carries its own program name and session id, so no
/// correlation state is needed between `start` and its terminal event.
#[derive(Default)]
pub struct MetricsAggregator {
    inner: Mutex<Inner>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgramCounters {
        self.inner.lock().unwrap().total.clone()
    }

    pub fn snapshot_for_program(&self, program: &str) -> ProgramCounters {
        self.inner
            .lock()
            .unwrap()
            .by_program
            .get(program)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot_for_session(&self, session_id: Uuid) -> ProgramCounters {
        self.inner
            .lock()
            .unwrap()
            .by_session
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// `completed / started` across every program seen so far, or `1.0`
    /// if nothing has started yet (no evidence of failure).
    pub fn completion_rate(&self) -> f64 {
        let totals = self.snapshot();
        if totals.started == 0 {
            1.0
        } else {
            totals.completed as f64 / totals.started as f64
        }
    }
}

impl AuditSink for MetricsAggregator {
    fn on_event(&self, event: &AuditEvent) {
        let mut inner = self.inner.lock().unwrap();
        let program = event.program().to_string();
        let session_id = event.session_id();

        match event {
            AuditEvent::Started { .. } => {
                inner.total.started += 1;
                inner.by_program.entry(program).or_default().started += 1;
                inner.by_session.entry(session_id).or_default().started += 1;
            }
            AuditEvent::Completed { result, .. } => {
                let cpu_time = result
                    .usage
                    .as_ref()
                    .and_then(|u| u.user_cpu_time)
                    .unwrap_or_default();
                let memory = result
                    .usage
                    .as_ref()
                    .and_then(|u| u.peak_rss_bytes)
                    .unwrap_or(0);

                inner.total.completed += 1;
                inner.total.total_duration += result.duration;
                inner.total.total_cpu_time += cpu_time;
                inner.total.total_memory_bytes += memory;
                if result.exit_code == 0 {
                    inner.total.succeeded += 1;
                } else {
                    inner.total.nonzero_exit += 1;
                }

                for counters in [
                    inner.by_program.entry(program).or_default(),
                    inner.by_session.entry(session_id).or_default(),
                ] {
                    counters.completed += 1;
                    counters.total_duration += result.duration;
                    counters.total_cpu_time += cpu_time;
                    counters.total_memory_bytes += memory;
                    if result.exit_code == 0 {
                        counters.succeeded += 1;
                    } else {
                        counters.nonzero_exit += 1;
                    }
                }
            }
            AuditEvent::Killed { result, .. } => {
                inner.total.completed += 1;
                inner.total.killed += 1;
                inner.total.total_duration += result.duration;
                for counters in [
                    inner.by_program.entry(program).or_default(),
                    inner.by_session.entry(session_id).or_default(),
                ] {
                    counters.completed += 1;
                    counters.killed += 1;
                    counters.total_duration += result.duration;
                }
            }
            AuditEvent::Error { .. } => {
                inner.total.errors += 1;
                inner.by_program.entry(program).or_default().errors += 1;
                inner.by_session.entry(session_id).or_default().errors += 1;
            }
            AuditEvent::Blocked { .. } => {
                inner.total.blocked += 1;
                inner.by_program.entry(program).or_default().blocked += 1;
                inner.by_session.entry(session_id).or_default().blocked += 1;
            }
            AuditEvent::Sandboxed { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, IsolationMode};
    use crate::result::ExecutionResult;
    use std::time::SystemTime;

    fn dummy_result(request_id: Uuid, exit_code: i32) -> ExecutionResult {
        ExecutionResult {
            success: true,
            exit_code,
            stdout: vec![],
            stderr: vec![],
            merged: vec![],
            started_at: SystemTime::now(),
            finished_at: SystemTime::now(),
            duration: Duration::ZERO,
            killed: false,
            kill_reason: None,
            truncated: false,
            discarded_bytes: 0,
            usage: None,
            error: None,
            isolation_used: IsolationMode::None,
            request_id,
        }
    }

    #[test]
    fn test_tracks_started_and_completed() {
        let metrics = MetricsAggregator::new();
        let cmd = Command::new("echo", vec![]);
        metrics.on_event(&AuditEvent::started(&cmd));
        metrics.on_event(&AuditEvent::terminal(&cmd, dummy_result(cmd.request_id, 0)));

        let snap = metrics.snapshot();
        assert_eq!(snap.started, 1);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.succeeded, 1);
        assert_eq!(metrics.completion_rate(), 1.0);
    }

    #[test]
    fn test_nonzero_exit_is_tallied() {
        let metrics = MetricsAggregator::new();
        let cmd = Command::new("false", vec![]);
        metrics.on_event(&AuditEvent::started(&cmd));
        metrics.on_event(&AuditEvent::terminal(&cmd, dummy_result(cmd.request_id, 1)));
        assert_eq!(metrics.snapshot().nonzero_exit, 1);
    }

    #[test]
    fn test_killed_is_tallied_separately_from_completed() {
        let metrics = MetricsAggregator::new();
        let cmd = Command::new("sleep", vec!["10".to_string()]);
        let mut result = dummy_result(cmd.request_id, -1);
        result.killed = true;
        result.kill_reason = Some("timeout after 1s".to_string());
        metrics.on_event(&AuditEvent::started(&cmd));
        metrics.on_event(&AuditEvent::terminal(&cmd, result));
        let snap = metrics.snapshot();
        assert_eq!(snap.killed, 1);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.succeeded, 0);
    }

    #[test]
    fn test_blocked_is_tallied_per_program_and_session() {
        let metrics = MetricsAggregator::new();
        let cmd = Command::new("rm", vec!["-rf".to_string(), "/".to_string()]);
        metrics.on_event(&AuditEvent::blocked(&cmd, "denied by policy"));
        assert_eq!(metrics.snapshot().blocked, 1);
        assert_eq!(metrics.snapshot_for_program("rm").blocked, 1);
        assert_eq!(metrics.snapshot_for_session(cmd.session_id).blocked, 1);
    }

    #[test]
    fn test_total_duration_accumulates_across_completions() {
        let metrics = MetricsAggregator::new();
        let cmd = Command::new("echo", vec![]);
        let mut result = dummy_result(cmd.request_id, 0);
        result.duration = Duration::from_millis(250);
        metrics.on_event(&AuditEvent::terminal(&cmd, result));
        assert_eq!(metrics.snapshot().total_duration, Duration::from_millis(250));
    }
}
