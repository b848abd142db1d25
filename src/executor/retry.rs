//! Retry decorator (§7, Open Question: back-off strategy): wraps any
//! [`Executor`] and retries only infrastructure failures — a run that
//! never produced a real exit code (`exit_code == -1` and not killed).
//! A program that ran and returned non-zero, or that we killed ourselves,
//! is never retried: both are legitimate outcomes of the command itself,
//! not something retrying would fix.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::command::Command;
use crate::executor::{Executor, Result};
use crate::result::ExecutionResult;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

fn is_infra_failure(result: &ExecutionResult) -> bool {
    !result.killed && result.exit_code == -1
}

/// Wraps an inner [`Executor`], retrying infra failures with exponential
/// back-off before giving up and returning the last result.
pub struct RetryingExecutor {
    inner: Arc<dyn Executor>,
    policy: RetryPolicy,
}

impl RetryingExecutor {
    pub fn new(inner: Arc<dyn Executor>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl Executor for RetryingExecutor {
    async fn execute(&self, command: &Command) -> Result<ExecutionResult> {
        let mut attempt = 0;
        loop {
            let result = self.inner.execute(command).await?;
            if !is_infra_failure(&result) || attempt + 1 >= self.policy.max_attempts {
                if is_infra_failure(&result) {
                    warn!(
                        request_id = %command.request_id,
                        attempts = attempt + 1,
                        "giving up after repeated infra failures"
                    );
                }
                return Ok(result);
            }
            let delay = self.policy.delay_for(attempt);
            debug!(
                request_id = %command.request_id,
                attempt,
                ?delay,
                "retrying after infra failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::IsolationMode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::SystemTime;

    struct FlakyExecutor {
        calls: AtomicU32,
        succeed_on: u32,
    }

    fn infra_failure_result() -> ExecutionResult {
        ExecutionResult {
            success: false,
            exit_code: -1,
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
            error: Some("connection reset".to_string()),
            isolation_used: IsolationMode::None,
            request_id: uuid::Uuid::new_v4(),
        }
    }

    #[async_trait::async_trait]
    impl Executor for FlakyExecutor {
        async fn execute(&self, _command: &Command) -> Result<ExecutionResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call + 1 >= self.succeed_on {
                let mut r = infra_failure_result();
                r.success = true;
                r.exit_code = 0;
                Ok(r)
            } else {
                Ok(infra_failure_result())
            }
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let inner = Arc::new(FlakyExecutor {
            calls: AtomicU32::new(0),
            succeed_on: 2,
        });
        let retrying = RetryingExecutor::new(
            inner.clone(),
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
            },
        );
        let result = retrying.execute(&Command::new("x", vec![])).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let inner = Arc::new(FlakyExecutor {
            calls: AtomicU32::new(0),
            succeed_on: 100,
        });
        let retrying = RetryingExecutor::new(
            inner.clone(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        );
        let result = retrying.execute(&Command::new("x", vec![])).await.unwrap();
        assert_eq!(result.exit_code, -1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_killed_is_never_retried() {
        let inner = Arc::new(FlakyExecutor {
            calls: AtomicU32::new(0),
            succeed_on: 100,
        });
        // A killed, never-retried result wouldn't come from FlakyExecutor's
        // shape directly; assert the predicate instead of re-plumbing a
        // second fake.
        let mut killed = infra_failure_result();
        killed.killed = true;
        killed.kill_reason = Some("timeout".to_string());
        assert!(!is_infra_failure(&killed));
        let _ = inner; // keep the fixture symmetric with the other tests
    }
}
