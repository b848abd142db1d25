//! Derived audit facts: flat, serializable predicate records distilled
//! from an [`crate::audit::AuditEvent`] stream, meant for an external
//! reasoner to consume without having to re-derive exit-code/kill-state
//! semantics itself.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::command::IsolationMode;
use crate::result::ExecutionResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "predicate", rename_all = "snake_case")]
pub enum AuditFact {
    ExecutionStarted {
        request_id: Uuid,
        session_id: Uuid,
    },
    ExecutionCommand {
        request_id: Uuid,
        program: String,
        display_form: String,
        isolation: IsolationMode,
    },
    ExecutionCompleted {
        request_id: Uuid,
    },
    ExecutionOutput {
        request_id: Uuid,
        stdout_bytes: usize,
        stderr_bytes: usize,
        truncated: bool,
    },
    ExecutionSuccess {
        request_id: Uuid,
    },
    ExecutionNonzero {
        request_id: Uuid,
        exit_code: i32,
    },
    ExecutionFailure {
        request_id: Uuid,
        reason: String,
    },
    ExecutionTag {
        request_id: Uuid,
        key: String,
        value: String,
    },
    ExecutionUsage {
        request_id: Uuid,
        user_cpu_ms: Option<u128>,
        peak_rss_bytes: Option<u64>,
    },
    ExecutionSandboxed {
        request_id: Uuid,
        isolation: IsolationMode,
    },
}

/// Derive every fact implied by a [`AuditEvent::Started`].
pub fn facts_for_started(
    request_id: Uuid,
    session_id: Uuid,
    program: &str,
    display_form: &str,
    isolation: IsolationMode,
) -> Vec<AuditFact> {
    let mut facts = vec![
        AuditFact::ExecutionStarted {
            request_id,
            session_id,
        },
        AuditFact::ExecutionCommand {
            request_id,
            program: program.to_string(),
            display_form: display_form.to_string(),
            isolation,
        },
    ];
    if isolation != IsolationMode::None {
        facts.push(AuditFact::ExecutionSandboxed {
            request_id,
            isolation,
        });
    }
    facts
}

/// Derive every fact implied by an [`AuditEvent::Completed`].
pub fn facts_for_completed(request_id: Uuid, result: &ExecutionResult) -> Vec<AuditFact> {
    let mut facts = vec![
        AuditFact::ExecutionCompleted { request_id },
        AuditFact::ExecutionOutput {
            request_id,
            stdout_bytes: result.stdout.len(),
            stderr_bytes: result.stderr.len(),
            truncated: result.truncated,
        },
    ];

    if result.killed {
        facts.push(AuditFact::ExecutionFailure {
            request_id,
            reason: result
                .kill_reason
                .clone()
                .unwrap_or_else(|| "killed".to_string()),
        });
    } else if let Some(err) = &result.error {
        facts.push(AuditFact::ExecutionFailure {
            request_id,
            reason: err.clone(),
        });
    } else if result.exit_code == 0 {
        facts.push(AuditFact::ExecutionSuccess { request_id });
    } else {
        facts.push(AuditFact::ExecutionNonzero {
            request_id,
            exit_code: result.exit_code,
        });
    }

    if let Some(usage) = &result.usage {
        facts.push(AuditFact::ExecutionUsage {
            request_id,
            user_cpu_ms: usage.user_cpu_time.map(|d| d.as_millis()),
            peak_rss_bytes: usage.peak_rss_bytes,
        });
    }

    facts
}

/// Derive facts for any [`AuditEvent`], dispatching by variant.
pub fn facts_for_event(event: &AuditEvent) -> Vec<AuditFact> {
    match event {
        AuditEvent::Started {
            request_id,
            session_id,
            program,
            display_form,
            isolation,
            ..
        } => facts_for_started(*request_id, *session_id, program, display_form, *isolation),
        AuditEvent::Completed { request_id, result, .. } => facts_for_completed(*request_id, result),
        AuditEvent::Killed { request_id, result, .. } => facts_for_completed(*request_id, result),
        AuditEvent::Blocked { request_id, reason, .. } => vec![AuditFact::ExecutionFailure {
            request_id: *request_id,
            reason: reason.clone(),
        }],
        AuditEvent::Error { request_id, message, .. } => vec![AuditFact::ExecutionFailure {
            request_id: *request_id,
            reason: message.clone(),
        }],
        AuditEvent::Sandboxed {
            request_id,
            isolation,
            ..
        } => vec![AuditFact::ExecutionSandboxed {
            request_id: *request_id,
            isolation: *isolation,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn base_result(exit_code: i32) -> ExecutionResult {
        ExecutionResult {
            success: true,
            exit_code,
            stdout: b"hi".to_vec(),
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
            request_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_nonzero_exit_yields_nonzero_fact() {
        let result = base_result(3);
        let facts = facts_for_completed(result.request_id, &result);
        assert!(facts
            .iter()
            .any(|f| matches!(f, AuditFact::ExecutionNonzero { exit_code: 3, .. })));
    }

    #[test]
    fn test_zero_exit_yields_success_fact() {
        let result = base_result(0);
        let facts = facts_for_completed(result.request_id, &result);
        assert!(facts
            .iter()
            .any(|f| matches!(f, AuditFact::ExecutionSuccess { .. })));
    }

    #[test]
    fn test_sandboxed_fact_only_when_isolated() {
        let id = Uuid::new_v4();
        let none_facts = facts_for_started(id, id, "x", "x", IsolationMode::None);
        assert!(!none_facts.iter().any(|f| matches!(f, AuditFact::ExecutionSandboxed { .. })));

        let docker_facts = facts_for_started(id, id, "x", "x", IsolationMode::Docker);
        assert!(docker_facts.iter().any(|f| matches!(f, AuditFact::ExecutionSandboxed { .. })));
    }
}
