//! Integration tests for the Direct Executor: echo, non-zero exit,
//! wall-clock timeout, and output capping, run against the real host
//! process the same way a caller would.

use std::time::Duration;

use tactile_exec_core::command::{Command, ResourceBounds};
use tactile_exec_core::executor::host::HostExecutor;
use tactile_exec_core::executor::Executor;

#[tokio::test]
async fn test_echo_roundtrips_stdout() {
    let cmd = Command::new("echo", vec!["integration".to_string()]);
    let result = HostExecutor.execute(&cmd).await.expect("execute failed");
    assert!(result.succeeded_cleanly());
    assert_eq!(result.stdout, b"integration\n");
    assert!(result.usage.is_some(), "expected resource usage to be collected");
}

#[tokio::test]
async fn test_nonzero_exit_is_reported_not_raised_as_error() {
    let cmd = Command::new("sh", vec!["-c".to_string(), "exit 17".to_string()]);
    let result = HostExecutor.execute(&cmd).await.expect("execute failed");
    assert!(result.success, "infra succeeded even though the program exited nonzero");
    assert_eq!(result.exit_code, 17);
    assert!(!result.killed);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_wall_clock_timeout_kills_and_marks_result() {
    let cmd = Command::new("sleep", vec!["10".to_string()]).with_bounds(ResourceBounds {
        wall_clock_timeout: Some(Duration::from_millis(150)),
        ..Default::default()
    });
    let start = std::time::Instant::now();
    let result = HostExecutor.execute(&cmd).await.expect("execute failed");
    assert!(result.killed);
    assert!(result.kill_reason.unwrap().contains("timeout"));
    assert!(start.elapsed() < Duration::from_secs(5), "timeout should cut the sleep short");
}

#[tokio::test]
async fn test_output_cap_truncates_and_reports_discarded_bytes() {
    let cmd = Command::new(
        "sh",
        vec!["-c".to_string(), "head -c 100000 /dev/zero".to_string()],
    )
    .with_bounds(ResourceBounds {
        output_cap_bytes: Some(1024),
        ..Default::default()
    });
    let result = HostExecutor.execute(&cmd).await.expect("execute failed");
    assert!(result.truncated);
    assert!(result.discarded_bytes > 0);
    assert!(result.stdout.len() <= 1024);
}
