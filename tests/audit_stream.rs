//! Integration test for the audit trail: a command dispatched through the
//! router's emitter wiring, fanned out to a metrics aggregator and a
//! rotating file sink, then distilled into derived facts.

use std::sync::Arc;

use tactile_exec_core::audit::file_sink::FileAuditSink;
use tactile_exec_core::audit::metrics::MetricsAggregator;
use tactile_exec_core::audit::predicates::{facts_for_event, AuditFact};
use tactile_exec_core::audit::{AuditEmitter, AuditEvent};
use tactile_exec_core::command::{Command, ExecutorDefaults};
use tactile_exec_core::executor::host::HostExecutor;
use tactile_exec_core::executor::router::CompositeRouter;
use tactile_exec_core::executor::Executor;

#[tokio::test]
async fn test_dispatch_emits_started_and_completed_to_every_sink() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");

    let emitter = AuditEmitter::new();
    let metrics = Arc::new(MetricsAggregator::new());
    let file_sink = Arc::new(FileAuditSink::open(&audit_path, 0).unwrap());
    emitter.register(metrics.clone());
    emitter.register(file_sink.clone());

    let router = CompositeRouter::new(Arc::new(HostExecutor), ExecutorDefaults::default())
        .with_emitter(emitter);

    let cmd = Command::new("echo", vec!["audited".to_string()]);
    let result = router.execute(&cmd).await.expect("execute failed");

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.started, 1);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.succeeded, 1);
    assert_eq!(metrics.completion_rate(), 1.0);

    let contents = std::fs::read_to_string(&audit_path).unwrap();
    assert_eq!(contents.lines().count(), 2, "expected one start and one terminal event");

    let completed_event = AuditEvent::terminal(&cmd, result);
    let facts = facts_for_event(&completed_event);
    assert!(facts.iter().any(|f| matches!(f, AuditFact::ExecutionSuccess { .. })));
}

#[tokio::test]
async fn test_invalid_command_emits_blocked_not_started() {
    let emitter = AuditEmitter::new();
    let metrics = Arc::new(MetricsAggregator::new());
    emitter.register(metrics.clone());

    let router = CompositeRouter::new(Arc::new(HostExecutor), ExecutorDefaults::default())
        .with_emitter(emitter);

    let cmd = Command::new("", vec![]);
    let err = router.execute(&cmd).await;
    assert!(err.is_err());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.started, 0);
    assert_eq!(snapshot.blocked, 1);
}
