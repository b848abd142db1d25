//! Composite Router (C8): dispatches a [`Command`] to the executor
//! registered for its (merged) isolation mode, falling back to a default
//! backend that is always present.
//!
//! When constructed `with_emitter`, the router propagates that audit
//! callback to every registered backend (and the default) by wrapping it
//! in an [`AuditingExecutor`] at dispatch time — a single sink observes
//! every backend regardless of registration order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::AuditEmitter;
use crate::command::{Command, ExecutorDefaults, IsolationMode};
use crate::executor::audited::AuditingExecutor;
use crate::executor::{Executor, Result};

/// Routes commands to per-mode [`Executor`] implementations.
///
/// Construction requires a default executor up front: a router with no
/// fallback is a configuration error waiting to happen, so the type
/// doesn't allow building one.
pub struct CompositeRouter {
    backends: HashMap<IsolationMode, Arc<dyn Executor>>,
    default: Arc<dyn Executor>,
    defaults: ExecutorDefaults,
    emitter: Option<AuditEmitter>,
}

impl CompositeRouter {
    pub fn new(default: Arc<dyn Executor>, defaults: ExecutorDefaults) -> Self {
        Self {
            backends: HashMap::new(),
            default,
            defaults,
            emitter: None,
        }
    }

    pub fn with_backend(mut self, mode: IsolationMode, executor: Arc<dyn Executor>) -> Self {
        self.backends.insert(mode, executor);
        self
    }

    /// Enable audit emission for every dispatch this router makes, past
    /// and future registrations alike.
    pub fn with_emitter(mut self, emitter: AuditEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    fn backend_for(&self, mode: IsolationMode) -> Arc<dyn Executor> {
        let raw = self.backends.get(&mode).cloned().unwrap_or_else(|| self.default.clone());
        match &self.emitter {
            Some(emitter) => Arc::new(AuditingExecutor::new(raw, emitter.clone(), backend_label(mode))),
            None => raw,
        }
    }
}

fn backend_label(mode: IsolationMode) -> &'static str {
    match mode {
        IsolationMode::None => "host",
        IsolationMode::Docker => "docker",
        IsolationMode::LinuxNamespace => "linux-namespace",
        IsolationMode::Firejail => "firejail",
    }
}

#[async_trait::async_trait]
impl Executor for CompositeRouter {
    async fn execute(&self, command: &Command) -> Result<crate::result::ExecutionResult> {
        let merged = command.merge(&self.defaults);
        let mode = merged.isolation.mode.unwrap_or(IsolationMode::None);
        self.backend_for(mode).execute(&merged).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, AuditSink};
    use crate::executor::host::HostExecutor;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_unregistered_mode_falls_back_to_default() {
        let router = CompositeRouter::new(Arc::new(HostExecutor), ExecutorDefaults::default());
        let cmd = Command::new("echo", vec!["hi".to_string()]);
        let result = router.execute(&cmd).await.unwrap();
        assert!(result.succeeded_cleanly());
    }

    struct RecordingSink(Mutex<Vec<AuditEvent>>);
    impl AuditSink for RecordingSink {
        fn on_event(&self, event: &AuditEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_with_emitter_audits_every_dispatch() {
        let emitter = AuditEmitter::new();
        let recorder = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        emitter.register(recorder.clone());

        let router = CompositeRouter::new(Arc::new(HostExecutor), ExecutorDefaults::default())
            .with_emitter(emitter);
        let cmd = Command::new("echo", vec!["hi".to_string()]);
        let result = router.execute(&cmd).await.unwrap();
        assert!(result.succeeded_cleanly());

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AuditEvent::Started { .. }));
        assert!(matches!(events[1], AuditEvent::Completed { .. }));
    }
}
