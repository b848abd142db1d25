//! Docker Ephemeral Executor (C6): `docker run --rm` semantics — create a
//! disposable container for exactly one command, translate the merged
//! resource bounds and isolation policy into bollard's `HostConfig`, exec
//! the command, then tear the container down unconditionally.

use std::time::{Instant, SystemTime};

use bollard::models::HostConfig;
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
};
use tracing::{debug, warn};

use crate::command::{Command as ExecCommand, IsolationMode};
use crate::container::{exec_in_container, ContainerClient, ExecRequest};
use crate::executor::{build_environment, Executor, ExecutorError, Result};
use crate::result::ExecutionResult;

/// Fallback used when neither the command's isolation policy nor this
/// executor carries a configured image.
const FALLBACK_IMAGE: &str = "alpine:latest";

pub struct DockerExecutor {
    client: ContainerClient,
    default_image: Option<String>,
}

impl DockerExecutor {
    pub async fn connect() -> Result<Self> {
        let client = ContainerClient::new()
            .await
            .map_err(ExecutorError::Container)?;
        Ok(Self {
            client,
            default_image: None,
        })
    }

    pub fn with_client(client: ContainerClient) -> Self {
        Self {
            client,
            default_image: None,
        }
    }

    /// Configure the image used when a command's isolation policy doesn't
    /// name one. Falls back further to [`FALLBACK_IMAGE`] if never set.
    pub fn with_default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = Some(image.into());
        self
    }
}

#[async_trait::async_trait]
impl Executor for DockerExecutor {
    async fn execute(&self, command: &ExecCommand) -> Result<ExecutionResult> {
        command
            .validate()
            .map_err(ExecutorError::InvalidCommand)?;

        let image = command
            .isolation
            .image
            .clone()
            .or_else(|| self.default_image.clone())
            .unwrap_or_else(|| FALLBACK_IMAGE.to_string());

        let started_at = SystemTime::now();
        let started_instant = Instant::now();

        let host_config = HostConfig {
            readonly_rootfs: Some(command.isolation.read_only_root),
            memory: command.bounds.rss_cap_bytes.map(|b| b as i64),
            network_mode: command.isolation.network_mode.clone(),
            cap_drop: if command.isolation.drop_capabilities.is_empty() {
                None
            } else {
                Some(command.isolation.drop_capabilities.clone())
            },
            security_opt: if command.isolation.no_new_privileges {
                Some(vec!["no-new-privileges".to_string()])
            } else {
                None
            },
            binds: if command.isolation.allow_paths.is_empty() {
                None
            } else {
                Some(
                    command
                        .isolation
                        .allow_paths
                        .iter()
                        .map(|p| format!("{p}:{p}"))
                        .collect(),
                )
            },
            ..Default::default()
        };

        let body = bollard::models::ContainerCreateBody {
            image: Some(image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: command.working_dir.clone(),
            user: command.isolation.user.clone(),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptionsBuilder::default().build();
        let created = self
            .client
            .docker()
            .create_container(Some(options), body)
            .await
            .map_err(|e| ExecutorError::Container(e.into()))?;

        self.client
            .docker()
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
            .map_err(|e| ExecutorError::Container(e.into()))?;

        let timeout = command
            .bounds
            .wall_clock_timeout
            .unwrap_or(std::time::Duration::from_secs(300));
        let output_cap = command.bounds.output_cap_bytes.unwrap_or(0) as usize;

        let mut cmd = vec![command.program.clone()];
        cmd.extend(command.args.clone());

        let req = ExecRequest {
            cmd,
            working_dir: command.working_dir.clone(),
            env: build_environment(command),
            user: command.isolation.user.clone(),
            stdout_cap: output_cap,
            stderr_cap: output_cap,
            merged_cap: output_cap,
        };

        let exec_future = exec_in_container(&self.client, &created.id, req);
        let (killed, kill_reason, outcome) = match tokio::time::timeout(timeout, exec_future).await
        {
            Ok(Ok(outcome)) => (false, None, Some(outcome)),
            Ok(Err(e)) => {
                warn!(error = %e, "docker exec failed");
                (false, None, None)
            }
            Err(_) => {
                debug!(container = %created.id, "wall clock timeout exceeded in docker executor");
                (
                    true,
                    Some(format!("wall clock timeout of {:?} exceeded", timeout)),
                    None,
                )
            }
        };

        let remove_options = RemoveContainerOptionsBuilder::default().force(true).build();
        if let Err(e) = self
            .client
            .docker()
            .remove_container(&created.id, Some(remove_options))
            .await
        {
            warn!(container = %created.id, error = %e, "failed to remove ephemeral container");
        }

        let (exit_code, stdout, stderr, merged, truncated, discarded_bytes, error) = match outcome {
            Some(o) => (
                o.exit_code,
                o.stdout,
                o.stderr,
                o.merged,
                o.stdout_truncated || o.stderr_truncated,
                o.discarded_bytes,
                None,
            ),
            None if killed => (-1, Vec::new(), Vec::new(), Vec::new(), false, 0, None),
            None => (
                -1,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                false,
                0,
                Some("docker exec failed".to_string()),
            ),
        };

        Ok(ExecutionResult {
            success: error.is_none(),
            exit_code,
            stdout,
            stderr,
            merged,
            started_at,
            finished_at: SystemTime::now(),
            duration: started_instant.elapsed(),
            killed,
            kill_reason,
            truncated,
            discarded_bytes,
            usage: None,
            error,
            isolation_used: IsolationMode::Docker,
            request_id: command.request_id,
        })
    }
}
