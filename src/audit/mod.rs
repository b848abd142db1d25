//! Audit trail (C9): every command execution emits a structured event to
//! zero or more subscribers. Emission is synchronous and in-process — a
//! subscriber slow enough to matter should buffer on its own side (the
//! way [`file_sink::FileAuditSink`] does), not block the executor.
//!
//! Every variant embeds the command it describes (program, display form,
//! session id) and a wall-clock timestamp, so a subscriber never has to
//! correlate a terminal event back to its `start` to know what ran.

pub mod file_sink;
pub mod metrics;
pub mod predicates;

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::{Command, IsolationMode};
use crate::result::ExecutionResult;

/// A point-in-time fact about a command's lifecycle. One of
/// `{start, complete, killed, error, blocked, sandboxed}`; exactly one of
/// `{complete, killed, error}` follows every `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    Started {
        request_id: Uuid,
        session_id: Uuid,
        program: String,
        display_form: String,
        isolation: IsolationMode,
        timestamp: SystemTime,
    },
    Completed {
        request_id: Uuid,
        session_id: Uuid,
        program: String,
        display_form: String,
        result: ExecutionResult,
        timestamp: SystemTime,
    },
    /// The program ran but was terminated for reasons the infrastructure
    /// is responsible for (timeout, external cancel, sandbox limit).
    Killed {
        request_id: Uuid,
        session_id: Uuid,
        program: String,
        display_form: String,
        result: ExecutionResult,
        timestamp: SystemTime,
    },
    /// The command never produced a result: spawn failed, the sandbox
    /// could not be created, or some other infrastructure fault.
    Error {
        request_id: Uuid,
        session_id: Uuid,
        program: String,
        display_form: String,
        message: String,
        timestamp: SystemTime,
    },
    /// Rejected before a `start` was ever emitted (validation failure at
    /// an interception point above the executor itself).
    Blocked {
        request_id: Uuid,
        session_id: Uuid,
        program: String,
        display_form: String,
        reason: String,
        timestamp: SystemTime,
    },
    /// A dispatch was routed to a backend that actually applies
    /// isolation, naming which one. Fired alongside the terminal event
    /// for that dispatch, never on its own.
    Sandboxed {
        request_id: Uuid,
        session_id: Uuid,
        program: String,
        display_form: String,
        backend: String,
        isolation: IsolationMode,
        timestamp: SystemTime,
    },
}

impl AuditEvent {
    pub fn request_id(&self) -> Uuid {
        match self {
            AuditEvent::Started { request_id, .. } => *request_id,
            AuditEvent::Completed { request_id, .. } => *request_id,
            AuditEvent::Killed { request_id, .. } => *request_id,
            AuditEvent::Error { request_id, .. } => *request_id,
            AuditEvent::Blocked { request_id, .. } => *request_id,
            AuditEvent::Sandboxed { request_id, .. } => *request_id,
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            AuditEvent::Started { session_id, .. } => *session_id,
            AuditEvent::Completed { session_id, .. } => *session_id,
            AuditEvent::Killed { session_id, .. } => *session_id,
            AuditEvent::Error { session_id, .. } => *session_id,
            AuditEvent::Blocked { session_id, .. } => *session_id,
            AuditEvent::Sandboxed { session_id, .. } => *session_id,
        }
    }

    pub fn program(&self) -> &str {
        match self {
            AuditEvent::Started { program, .. } => program,
            AuditEvent::Completed { program, .. } => program,
            AuditEvent::Killed { program, .. } => program,
            AuditEvent::Error { program, .. } => program,
            AuditEvent::Blocked { program, .. } => program,
            AuditEvent::Sandboxed { program, .. } => program,
        }
    }

    pub fn started(command: &Command) -> Self {
        AuditEvent::Started {
            request_id: command.request_id,
            session_id: command.session_id,
            program: command.program.clone(),
            display_form: command.display_form(),
            isolation: command.isolation.mode.unwrap_or(IsolationMode::None),
            timestamp: SystemTime::now(),
        }
    }

    /// Classify a finished [`ExecutionResult`] into the right terminal
    /// event: `killed` if the infrastructure terminated it, `error` if it
    /// ran but recorded an infrastructure error, `complete` otherwise.
    pub fn terminal(command: &Command, result: ExecutionResult) -> Self {
        let request_id = command.request_id;
        let session_id = command.session_id;
        let program = command.program.clone();
        let display_form = command.display_form();
        let timestamp = SystemTime::now();
        if result.killed {
            AuditEvent::Killed {
                request_id,
                session_id,
                program,
                display_form,
                result,
                timestamp,
            }
        } else if let Some(message) = result.error.clone() {
            AuditEvent::Error {
                request_id,
                session_id,
                program,
                display_form,
                message,
                timestamp,
            }
        } else {
            AuditEvent::Completed {
                request_id,
                session_id,
                program,
                display_form,
                result,
                timestamp,
            }
        }
    }

    /// An infrastructure error raised before any [`ExecutionResult`]
    /// existed (e.g. the executor itself returned `Err`).
    pub fn error(command: &Command, message: impl Into<String>) -> Self {
        AuditEvent::Error {
            request_id: command.request_id,
            session_id: command.session_id,
            program: command.program.clone(),
            display_form: command.display_form(),
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn blocked(command: &Command, reason: impl Into<String>) -> Self {
        AuditEvent::Blocked {
            request_id: command.request_id,
            session_id: command.session_id,
            program: command.program.clone(),
            display_form: command.display_form(),
            reason: reason.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn sandboxed(command: &Command, backend: impl Into<String>, isolation: IsolationMode) -> Self {
        AuditEvent::Sandboxed {
            request_id: command.request_id,
            session_id: command.session_id,
            program: command.program.clone(),
            display_form: command.display_form(),
            backend: backend.into(),
            isolation,
            timestamp: SystemTime::now(),
        }
    }
}

/// A subscriber to the audit stream. Implementors should not block: the
/// emitter calls every subscriber in-line on the caller's task.
pub trait AuditSink: Send + Sync {
    fn on_event(&self, event: &AuditEvent);
}

/// Fans a single event out to every registered [`AuditSink`].
#[derive(Clone, Default)]
pub struct AuditEmitter {
    sinks: Arc<RwLock<Vec<Arc<dyn AuditSink>>>>,
}

impl AuditEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn AuditSink>) {
        self.sinks.write().unwrap().push(sink);
    }

    pub fn emit(&self, event: AuditEvent) {
        let sinks = self.sinks.read().unwrap();
        for sink in sinks.iter() {
            sink.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(Arc<AtomicUsize>);
    impl AuditSink for CountingSink {
        fn on_event(&self, _event: &AuditEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_emit_fans_out_to_every_sink() {
        let emitter = AuditEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        emitter.register(Arc::new(CountingSink(count.clone())));
        emitter.register(Arc::new(CountingSink(count.clone())));

        let command = Command::new("echo", vec![]);
        emitter.emit(AuditEvent::blocked(&command, "denied"));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    fn base_result(request_id: Uuid) -> crate::result::ExecutionResult {
        let now = std::time::SystemTime::now();
        crate::result::ExecutionResult {
            success: true,
            exit_code: 0,
            stdout: vec![],
            stderr: vec![],
            merged: vec![],
            started_at: now,
            finished_at: now,
            duration: std::time::Duration::ZERO,
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
    fn test_terminal_picks_killed_over_completed() {
        let command = Command::new("sleep", vec!["10".to_string()]);
        let mut result = base_result(command.request_id);
        result.killed = true;
        result.kill_reason = Some("timeout after 1s".to_string());
        let event = AuditEvent::terminal(&command, result);
        assert!(matches!(event, AuditEvent::Killed { .. }));
    }

    #[test]
    fn test_terminal_picks_completed_when_clean() {
        let command = Command::new("echo", vec![]);
        let result = base_result(command.request_id);
        let event = AuditEvent::terminal(&command, result);
        assert!(matches!(event, AuditEvent::Completed { .. }));
    }
}
