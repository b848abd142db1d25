//! Windows Job Object Limit Enforcer: assigns the child to a job with
//! memory/kill-on-close limits set via `SetInformationJobObject`, then
//! reuses the same job handle for accounting via
//! [`crate::resources::windows::collect_job_usage`] once the process
//! exits.

use std::mem;
use std::os::windows::io::AsRawHandle;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;
use windows_sys::Win32::System::JobObjects::{
    SetInformationJobObject, JobObjectExtendedLimitInformation,
    JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JOB_OBJECT_LIMIT_JOB_MEMORY,
    JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
};

use crate::command::{Command as ExecCommand, IsolationMode};
use crate::executor::{build_environment, Executor, ExecutorError, Result};
use crate::resources::{finish, Baseline, JobHandle};
use crate::result::ExecutionResult;
use crate::sink::BoundedSink;

/// Job Object backend, the Windows analogue of the cgroup backend: a
/// process-tree-wide resource limit plus guaranteed cleanup on job close.
#[derive(Debug, Default, Clone, Copy)]
pub struct JobObjectExecutor;

#[async_trait::async_trait]
impl Executor for JobObjectExecutor {
    async fn execute(&self, command: &ExecCommand) -> Result<ExecutionResult> {
        command
            .validate()
            .map_err(ExecutorError::InvalidCommand)?;

        let job = JobHandle::create().ok_or_else(|| {
            ExecutorError::BackendUnavailable("failed to create job object".to_string())
        })?;
        apply_limits(&job, command);

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

        let timeout = command
            .bounds
            .wall_clock_timeout
            .unwrap_or(std::time::Duration::from_secs(300));
        let output_cap = command.bounds.output_cap_bytes.unwrap_or(0) as usize;

        let started_at = SystemTime::now();
        let started_instant = Instant::now();

        let mut child = cmd.spawn().map_err(ExecutorError::Io)?;
        job.assign(child.as_raw_handle());

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
                let _ = child.kill().await;
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

        let usage = finish(Baseline::Windows, Some(&job));

        let stdout_sink = Arc::try_unwrap(stdout_sink)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_else(|a| a.lock().unwrap().clone());
        let stderr_sink = Arc::try_unwrap(stderr_sink)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_else(|a| a.lock().unwrap().clone());
        let merged_sink = Arc::try_unwrap(merged_sink)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_else(|a| a.lock().unwrap().clone());

        let truncated = stdout_sink.truncated() || stderr_sink.truncated() || merged_sink.truncated();
        let discarded_bytes =
            stdout_sink.discarded() + stderr_sink.discarded() + merged_sink.discarded();

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
            isolation_used: IsolationMode::LinuxNamespace, // no dedicated Windows variant in the mode enum
            request_id: command.request_id,
        })
    }
}

fn apply_limits(job: &JobHandle, command: &ExecCommand) {
    let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
    let mut flags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
    if let Some(rss) = command.bounds.rss_cap_bytes {
        info.JobMemoryLimit = rss as usize;
        flags |= JOB_OBJECT_LIMIT_JOB_MEMORY;
    }
    info.BasicLimitInformation.LimitFlags = flags;

    unsafe {
        SetInformationJobObject(
            job.raw(),
            JobObjectExtendedLimitInformation,
            &mut info as *mut _ as *mut _,
            mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
        );
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
