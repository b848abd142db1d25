//! Command execution inside a running container, via `docker exec`
//! semantics over the bollard API.

use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::ExecInspectResponse;
use futures::StreamExt;
use std::io::Write;

use crate::container::{ContainerClient, ContainerError, Result};
use crate::sink::BoundedSink;

/// A single in-container invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
    pub user: Option<String>,
    /// `0` means unbounded, matching [`BoundedSink::new`].
    pub stdout_cap: usize,
    pub stderr_cap: usize,
    pub merged_cap: usize,
}

impl ExecRequest {
    pub fn new(cmd: Vec<String>) -> Self {
        Self {
            cmd,
            working_dir: None,
            env: Vec::new(),
            user: None,
            stdout_cap: 0,
            stderr_cap: 0,
            merged_cap: 0,
        }
    }
}

/// Captured output of an in-container invocation.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub merged: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub merged_truncated: bool,
    pub discarded_bytes: u64,
}

/// Create, start, and drain an exec session, then resolve its exit code.
pub async fn exec_in_container(
    client: &ContainerClient,
    container_id: &str,
    req: ExecRequest,
) -> Result<ExecOutcome> {
    let env: Vec<String> = req
        .env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    let options = CreateExecOptions {
        cmd: Some(req.cmd.clone()),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        working_dir: req.working_dir.clone(),
        env: if env.is_empty() { None } else { Some(env) },
        user: req.user.clone(),
        ..Default::default()
    };

    let created = client
        .docker()
        .create_exec(container_id, options)
        .await
        .map_err(ContainerError::ApiError)?;

    let mut stdout_sink = BoundedSink::new(req.stdout_cap);
    let mut stderr_sink = BoundedSink::new(req.stderr_cap);
    let mut merged_sink = BoundedSink::new(req.merged_cap);

    match client
        .docker()
        .start_exec(&created.id, None)
        .await
        .map_err(ContainerError::ApiError)?
    {
        StartExecResults::Attached { mut output, .. } => {
            while let Some(chunk) = output.next().await {
                let chunk = chunk.map_err(ContainerError::ApiError)?;
                match chunk {
                    LogOutput::StdOut { message } => {
                        let _ = stdout_sink.write(&message);
                        let _ = merged_sink.write(&message);
                    }
                    LogOutput::StdErr { message } => {
                        let _ = stderr_sink.write(&message);
                        let _ = merged_sink.write(&message);
                    }
                    LogOutput::Console { message } => {
                        let _ = stdout_sink.write(&message);
                        let _ = merged_sink.write(&message);
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
        }
        StartExecResults::Detached => {
            return Err(ContainerError::ExecutionError(
                "exec session started detached unexpectedly".to_string(),
            ));
        }
    }

    let inspect: ExecInspectResponse = client
        .docker()
        .inspect_exec(&created.id)
        .await
        .map_err(ContainerError::ApiError)?;
    let exit_code = inspect.exit_code.unwrap_or(-1) as i32;

    let discarded_bytes = stdout_sink.discarded() + stderr_sink.discarded();

    Ok(ExecOutcome {
        exit_code,
        stdout_truncated: stdout_sink.truncated(),
        stderr_truncated: stderr_sink.truncated(),
        merged_truncated: merged_sink.truncated(),
        stdout: stdout_sink.into_bytes(),
        stderr: stderr_sink.into_bytes(),
        merged: merged_sink.into_bytes(),
        discarded_bytes,
    })
}
