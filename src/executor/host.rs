//! Direct Executor (C4): runs a command as a plain child process, no
//! sandboxing beyond process-group isolation and resource accounting.
//! Every other backend that still ends up invoking a real process (the
//! cgroup and namespace variants in [`super::limits`]) is built on top of
//! the same spawn/capture/classify shape defined here.

use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use crate::command::Command as ExecCommand;
use crate::executor::{build_environment, Executor, ExecutorError, Result};
use crate::result::ExecutionResult;
use crate::sink::BoundedSink;

const READ_CHUNK: usize = 8192;

/// Plain-process backend. Stateless: every field it would otherwise need
/// (timeouts, caps) travels on the [`ExecCommand`] it is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostExecutor;

#[async_trait::async_trait]
impl Executor for HostExecutor {
    async fn execute(&self, command: &ExecCommand) -> Result<ExecutionResult> {
        command
            .validate()
            .map_err(ExecutorError::InvalidCommand)?;

        let mut cmd = TokioCommand::new(&command.program);
        cmd.args(&command.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd.env_clear();
        for (k, v) in build_environment(command) {
            cmd.env(k, v);
        }
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            // New process group so a timeout/cancel can signal the whole
            // tree, not just the direct child.
            cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            use windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        let timeout = command
            .bounds
            .wall_clock_timeout
            .unwrap_or(std::time::Duration::from_secs(300));
        let output_cap = command.bounds.output_cap_bytes.unwrap_or(0) as usize;

        let started_at = SystemTime::now();
        let started_instant = Instant::now();

        let mut child = cmd.spawn().map_err(ExecutorError::Io)?;
        let pid = child.id();

        let baseline = crate::resources::baseline();

        if !command.stdin.is_empty() {
            if let Some(mut stdin) = child.stdin.take() {
                let data = command.stdin.clone();
                let _ = stdin.write_all(&data).await;
                let _ = stdin.shutdown().await;
            }
        } else {
            drop(child.stdin.take());
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_sink = Arc::new(Mutex::new(BoundedSink::new(output_cap)));
        let stderr_sink = Arc::new(Mutex::new(BoundedSink::new(output_cap)));
        let merged_sink = Arc::new(Mutex::new(BoundedSink::new(output_cap)));

        let stdout_task = spawn_reader(stdout_pipe, stdout_sink.clone(), merged_sink.clone());
        let stderr_task = spawn_reader(stderr_pipe, stderr_sink.clone(), merged_sink.clone());

        let wait_result = tokio::time::timeout(timeout, child.wait()).await;

        let (killed, kill_reason, exit_code, wait_error) = match wait_result {
            Ok(Ok(status)) => (false, None, exit_code_of(status), None),
            Ok(Err(e)) => {
                warn!(error = %e, "failed waiting on child process");
                (false, None, -1, Some(format!("failed waiting on child: {e}")))
            }
            Err(_) => {
                debug!(?pid, "wall clock timeout exceeded, killing process group");
                kill_tree(pid);
                let _ = child.wait().await;
                (
                    true,
                    Some(format!("wall clock timeout of {:?} exceeded", timeout)),
                    -1,
                    None,
                )
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        #[cfg(not(windows))]
        let usage = crate::resources::finish(baseline);
        #[cfg(windows)]
        let usage = crate::resources::finish(baseline, None);

        let stdout_sink = Arc::try_unwrap(stdout_sink)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_else(|a| a.lock().unwrap().clone());
        let stderr_sink = Arc::try_unwrap(stderr_sink)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_else(|a| a.lock().unwrap().clone());
        let merged_sink = Arc::try_unwrap(merged_sink)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_else(|a| a.lock().unwrap().clone());

        let truncated = stdout_sink.truncated() || stderr_sink.truncated();
        let discarded_bytes = stdout_sink.discarded() + stderr_sink.discarded();

        let result = ExecutionResult {
            success: wait_error.is_none(),
            exit_code,
            stdout: stdout_sink.into_bytes(),
            stderr: stderr_sink.into_bytes(),
            merged: merged_sink.into_bytes(),
            started_at,
            finished_at: SystemTime::now(),
            duration: started_instant.elapsed(),
            killed,
            kill_reason,
            truncated,
            discarded_bytes,
            usage,
            error: wait_error,
            isolation_used: crate::command::IsolationMode::None,
            request_id: command.request_id,
        };

        Ok(result)
    }
}

fn spawn_reader<R>(
    pipe: Option<R>,
    own_sink: Arc<Mutex<BoundedSink>>,
    merged_sink: Arc<Mutex<BoundedSink>>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    use std::io::Write;
                    let _ = own_sink.lock().unwrap().write(&buf[..n]);
                    let _ = merged_sink.lock().unwrap().write(&buf[..n]);
                }
                Err(_) => break,
            }
        }
    })
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().unwrap_or_else(|| -status.signal().unwrap_or(0))
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn kill_tree(pid: Option<u32>) {
    if let Some(pid) = pid {
        let pgid = nix::unistd::Pid::from_raw(pid as i32);
        let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
    }
}

#[cfg(windows)]
fn kill_tree(_pid: Option<u32>) {
    // Child::kill() (invoked by kill_on_drop / explicit wait loop above)
    // is sufficient for the Direct Executor on Windows: without a job
    // object, grandchildren aren't tracked here in the first place.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, ResourceBounds};
    use std::time::Duration;

    #[tokio::test]
    async fn test_echo_succeeds() {
        let cmd = Command::new("echo", vec!["hello".to_string()]);
        let result = HostExecutor.execute(&cmd).await.unwrap();
        assert!(result.succeeded_cleanly());
        assert_eq!(result.stdout, b"hello\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_a_failure() {
        let cmd = Command::new("sh", vec!["-c".to_string(), "exit 7".to_string()]);
        let result = HostExecutor.execute(&cmd).await.unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, 7);
        assert!(!result.succeeded_cleanly());
    }

    #[tokio::test]
    async fn test_timeout_marks_killed() {
        let cmd = Command::new("sleep", vec!["5".to_string()]).with_bounds(ResourceBounds {
            wall_clock_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let result = HostExecutor.execute(&cmd).await.unwrap();
        assert!(result.killed);
        assert!(result.kill_reason.is_some());
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let cmd = Command::new("cat", vec![]).with_stdin(b"from stdin".to_vec());
        let result = HostExecutor.execute(&cmd).await.unwrap();
        assert_eq!(result.stdout, b"from stdin");
    }
}
