//! Audit decorator (C9 wiring): wraps any [`Executor`] and emits the
//! `start`/`complete`/`killed`/`error` pair every dispatch requires, plus
//! `blocked` for a command that never reaches the inner executor and
//! `sandboxed` for one that does and actually ran under isolation.
//!
//! Mirrors [`crate::executor::retry::RetryingExecutor`]: a thin wrapper
//! around `Arc<dyn Executor>` that adds one cross-cutting concern without
//! the wrapped backend knowing it's being observed.

use std::sync::Arc;

use crate::audit::{AuditEmitter, AuditEvent};
use crate::command::{Command, IsolationMode};
use crate::executor::{Executor, ExecutorError, Result};
use crate::result::ExecutionResult;

pub struct AuditingExecutor {
    inner: Arc<dyn Executor>,
    emitter: AuditEmitter,
    backend: String,
}

impl AuditingExecutor {
    pub fn new(inner: Arc<dyn Executor>, emitter: AuditEmitter, backend: impl Into<String>) -> Self {
        Self {
            inner,
            emitter,
            backend: backend.into(),
        }
    }
}

#[async_trait::async_trait]
impl Executor for AuditingExecutor {
    async fn execute(&self, command: &Command) -> Result<ExecutionResult> {
        if let Err(reason) = command.validate() {
            self.emitter.emit(AuditEvent::blocked(command, reason.clone()));
            return Err(ExecutorError::InvalidCommand(reason));
        }

        self.emitter.emit(AuditEvent::started(command));

        match self.inner.execute(command).await {
            Ok(result) => {
                if result.isolation_used != IsolationMode::None {
                    self.emitter
                        .emit(AuditEvent::sandboxed(command, self.backend.clone(), result.isolation_used));
                }
                self.emitter.emit(AuditEvent::terminal(command, result.clone()));
                Ok(result)
            }
            Err(e) => {
                self.emitter.emit(AuditEvent::error(command, e.to_string()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::executor::host::HostExecutor;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<AuditEvent>>);
    impl AuditSink for RecordingSink {
        fn on_event(&self, event: &AuditEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_emits_started_then_completed_for_a_clean_run() {
        let emitter = AuditEmitter::new();
        let recorder = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        emitter.register(recorder.clone());

        let executor = AuditingExecutor::new(Arc::new(HostExecutor), emitter, "host");
        let cmd = Command::new("echo", vec!["hi".to_string()]);
        let result = executor.execute(&cmd).await.unwrap();
        assert!(result.succeeded_cleanly());

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AuditEvent::Started { .. }));
        assert!(matches!(events[1], AuditEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn test_invalid_command_emits_blocked_not_started() {
        let emitter = AuditEmitter::new();
        let recorder = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        emitter.register(recorder.clone());

        let executor = AuditingExecutor::new(Arc::new(HostExecutor), emitter, "host");
        let cmd = Command::new("", vec![]);
        let err = executor.execute(&cmd).await;
        assert!(err.is_err());

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AuditEvent::Blocked { .. }));
    }
}
