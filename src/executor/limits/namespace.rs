//! Linux namespace Limit Enforcer: unshares mount, PID, UTS, and IPC
//! namespaces for the child before it execs, plus the network namespace
//! unless the command's isolation policy explicitly allows network
//! access. Resource bounds (memory/CPU/pids) are layered on top using the
//! same cgroup machinery as [`super::cgroup`], since namespaces isolate
//! visibility, not consumption.

use std::os::unix::process::CommandExt;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use nix::sched::CloneFlags;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use crate::command::{Command as ExecCommand, IsolationMode, NetworkPolicy};
use crate::executor::limits::cgroup::{detect_version, CgroupGuard};
use crate::executor::{build_environment, host::HostExecutor, Executor, ExecutorError, Result};
use crate::result::ExecutionResult;
use crate::sink::BoundedSink;

fn clone_flags_for(command: &ExecCommand) -> CloneFlags {
    let mut flags =
        CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWIPC;
    if command.isolation.network_mode.is_none() && command.bounds.network != NetworkPolicy::Allow {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    flags
}

/// Linux namespace backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NamespaceExecutor;

#[async_trait::async_trait]
impl Executor for NamespaceExecutor {
    async fn execute(&self, command: &ExecCommand) -> Result<ExecutionResult> {
        command
            .validate()
            .map_err(ExecutorError::InvalidCommand)?;

        if !super::namespaces_available() {
            debug!("namespaces unavailable on this host, falling back to direct execution");
            return HostExecutor.execute(command).await;
        }

        // Resource bounds ride on a best-effort cgroup, same as the pure
        // cgroup backend; a command can ask for namespace isolation
        // without cgroup support being present (e.g. inside another
        // container), so failure here does not abort the run.
        let cgroup = detect_version().and_then(|v| CgroupGuard::create(v, &command.bounds).ok());

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
        cmd.process_group(0);

        let flags = clone_flags_for(command);
        let cgroup_path = cgroup.as_ref().map(|g| g.path().to_path_buf());
        unsafe {
            cmd.pre_exec(move || {
                nix::sched::unshare(flags).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                if let Some(path) = &cgroup_path {
                    std::fs::write(path.join("cgroup.procs"), std::process::id().to_string())?;
                }
                Ok(())
            });
        }

        let timeout = command
            .bounds
            .wall_clock_timeout
            .unwrap_or(std::time::Duration::from_secs(300));
        let output_cap = command.bounds.output_cap_bytes.unwrap_or(0) as usize;

        let started_at = SystemTime::now();
        let started_instant = Instant::now();

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "namespace spawn failed, falling back to direct execution");
                if let Some(g) = cgroup {
                    g.teardown();
                }
                return HostExecutor.execute(command).await;
            }
        };
        let pid = child.id();
        if let (Some(pid), Some(g)) = (pid, cgroup.as_ref()) {
            let _ = g.add_pid(pid);
        }

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

        let stdout_task = drain(stdout_pipe, stdout_sink.clone(), merged_sink.clone());
        let stderr_task = drain(stderr_pipe, stderr_sink.clone(), merged_sink.clone());

        let wait_result = tokio::time::timeout(timeout, child.wait()).await;
        let (killed, kill_reason, exit_code) = match wait_result {
            Ok(Ok(status)) => (false, None, status.code().unwrap_or(-1)),
            Ok(Err(_)) => (false, None, -1),
            Err(_) => {
                if let Some(pid) = pid {
                    let pgid = nix::unistd::Pid::from_raw(pid as i32);
                    let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
                }
                let _ = child.wait().await;
                (
                    true,
                    Some(format!("wall clock timeout of {:?} exceeded", timeout)),
                    -1,
                )
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let usage = cgroup.as_ref().and_then(|g| g.read_usage());
        if let Some(g) = cgroup {
            g.teardown();
        }

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

        Ok(ExecutionResult {
            success: true,
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
            error: None,
            isolation_used: IsolationMode::LinuxNamespace,
            request_id: command.request_id,
        })
    }
}

fn drain<R>(
    pipe: Option<R>,
    own_sink: Arc<Mutex<BoundedSink>>,
    merged_sink: Arc<Mutex<BoundedSink>>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut buf = [0u8; 8192];
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[tokio::test]
    async fn test_falls_back_when_namespaces_unavailable() {
        if super::super::namespaces_available() {
            return; // only meaningful on hosts without /proc/self/ns
        }
        let cmd = Command::new("echo", vec!["hi".to_string()]);
        let result = NamespaceExecutor.execute(&cmd).await.unwrap();
        assert!(result.succeeded_cleanly());
    }
}
