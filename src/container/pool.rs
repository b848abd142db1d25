//! Persistent Container Pool (C7): containers that outlive a single
//! command, addressed by a non-owning [`ContainerId`] handle so that a
//! caller (e.g. an [`crate::environment::Environment`]) never holds a
//! dangling reference across a pool-driven reset.
//!
//! The pool itself owns every container's lifetime; callers only ever
//! carry an id and ask the pool to act on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bollard::models::{HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::container::{ContainerClient, ContainerError, ContainerState, Result};

/// Opaque handle into the pool's registry. Stable across container
/// restarts; the pool may reassign the underlying Docker container id on
/// recreation (e.g. after a snapshot restore) without invalidating the
/// handle held by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ContainerId(pub Uuid);

impl ContainerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool-wide configuration applied to every container it creates.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub memory_limit_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub read_only_root: bool,
    pub network_mode: Option<String>,
    pub healthcheck_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: None,
            nano_cpus: None,
            read_only_root: false,
            network_mode: None,
            healthcheck_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifecycle state of a [`ContainerRecord`], distinct from
/// [`crate::container::ContainerState`] (the raw Docker-inspection
/// state): this is the pool's own view, updated on create/start/stop and
/// refreshed by [`PersistentContainerPool::run_health_checks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistentState {
    Creating,
    Running,
    Paused,
    Stopped,
    Error,
}

#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub docker_id: String,
    pub image: String,
    pub created_at: SystemTime,
    pub state: PersistentState,
    pub last_exec_at: Option<SystemTime>,
    pub exec_count: u64,
    pub health_check_count: u64,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<String>,
    pub env: Vec<(String, String)>,
    pub last_error: Option<String>,
}

/// Long-lived containers addressed by [`ContainerId`], backed by a Docker
/// (or Podman) daemon.
pub struct PersistentContainerPool {
    client: Arc<ContainerClient>,
    config: PoolConfig,
    registry: RwLock<HashMap<ContainerId, ContainerRecord>>,
}

impl PersistentContainerPool {
    pub fn new(client: ContainerClient, config: PoolConfig) -> Self {
        Self {
            client: Arc::new(client),
            config,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Create a stopped container from `image` and register it under a
    /// freshly minted [`ContainerId`]. With no explicit `cmd`, the
    /// container is launched with a command that sleeps indefinitely so
    /// it stays alive for `exec`.
    pub async fn create(
        &self,
        image: &str,
        name: Option<&str>,
        cmd: Option<Vec<String>>,
    ) -> Result<ContainerId> {
        let host_config = HostConfig {
            memory: self.config.memory_limit_bytes,
            nano_cpus: self.config.nano_cpus,
            readonly_rootfs: Some(self.config.read_only_root),
            network_mode: self.config.network_mode.clone(),
            ..Default::default()
        };

        let body = bollard::models::ContainerCreateBody {
            image: Some(image.to_string()),
            cmd: Some(cmd.unwrap_or_else(|| vec!["sleep".to_string(), "infinity".to_string()])),
            tty: Some(true),
            open_stdin: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let mut builder = CreateContainerOptionsBuilder::default();
        if let Some(name) = name {
            builder = builder.name(name);
        }
        let options = builder.build();

        let created = self
            .client
            .docker()
            .create_container(Some(options), body)
            .await
            .map_err(ContainerError::ApiError)?;

        let id = ContainerId::new();
        self.registry.write().await.insert(
            id,
            ContainerRecord {
                docker_id: created.id,
                image: image.to_string(),
                created_at: SystemTime::now(),
                state: PersistentState::Creating,
                last_exec_at: None,
                exec_count: 0,
                health_check_count: 0,
                labels: HashMap::new(),
                mounts: Vec::new(),
                env: Vec::new(),
                last_error: None,
            },
        );
        debug!(?id, image, "registered container in persistent pool");
        Ok(id)
    }

    pub async fn start(&self, id: ContainerId) -> Result<()> {
        let docker_id = self.docker_id(id).await?;
        self.client
            .docker()
            .start_container(&docker_id, None::<StartContainerOptions>)
            .await
            .map_err(ContainerError::ApiError)?;
        if let Some(record) = self.registry.write().await.get_mut(&id) {
            record.state = PersistentState::Running;
        }
        Ok(())
    }

    pub async fn stop(&self, id: ContainerId) -> Result<()> {
        let docker_id = self.docker_id(id).await?;
        let options = StopContainerOptionsBuilder::default().t(10).build();
        self.client
            .docker()
            .stop_container(&docker_id, Some(options))
            .await
            .map_err(ContainerError::ApiError)?;
        if let Some(record) = self.registry.write().await.get_mut(&id) {
            record.state = PersistentState::Stopped;
        }
        Ok(())
    }

    pub async fn remove(&self, id: ContainerId) -> Result<()> {
        let docker_id = self.docker_id(id).await?;
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        self.client
            .docker()
            .remove_container(&docker_id, Some(options))
            .await
            .map_err(ContainerError::ApiError)?;
        self.registry.write().await.remove(&id);
        Ok(())
    }

    /// Run an in-container command via [`crate::container::exec_in_container`].
    /// A container not in [`PersistentState::Running`] rejects the request.
    pub async fn exec(
        &self,
        id: ContainerId,
        req: crate::container::ExecRequest,
    ) -> Result<crate::container::ExecOutcome> {
        let docker_id = {
            let registry = self.registry.read().await;
            let record = registry
                .get(&id)
                .ok_or_else(|| ContainerError::NotFound(format!("{:?}", id.0)))?;
            if record.state != PersistentState::Running {
                return Err(ContainerError::ExecutionError(format!(
                    "container {:?} is not running (state: {:?})",
                    id.0, record.state
                )));
            }
            record.docker_id.clone()
        };

        let outcome = crate::container::exec_in_container(&self.client, &docker_id, req).await;

        if let Some(record) = self.registry.write().await.get_mut(&id) {
            record.exec_count += 1;
            record.last_exec_at = Some(SystemTime::now());
            if let Err(e) = &outcome {
                record.last_error = Some(e.to_string());
            }
        }

        outcome
    }

    /// `true` iff the container is running and, when a healthcheck is
    /// configured on the image, reports healthy.
    pub async fn healthcheck(&self, id: ContainerId) -> Result<bool> {
        let docker_id = self.docker_id(id).await?;
        match self.client.container_state(&docker_id).await {
            Ok(ContainerState::Running) => Ok(true),
            Ok(_) => Ok(false),
            Err(ContainerError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Poll every registered container's live Docker state, refresh
    /// [`ContainerRecord::state`], and bump `health_check_count`. Best
    /// effort, like [`Self::cleanup`]: one container's inspection failure
    /// doesn't stop the sweep.
    pub async fn run_health_checks(&self) {
        let ids: Vec<ContainerId> = self.registry.read().await.keys().copied().collect();
        for id in ids {
            let docker_id = match self.docker_id(id).await {
                Ok(d) => d,
                Err(_) => continue,
            };
            let observed = self.client.container_state(&docker_id).await;
            let mut registry = self.registry.write().await;
            let Some(record) = registry.get_mut(&id) else {
                continue;
            };
            record.health_check_count += 1;
            match observed {
                Ok(ContainerState::Running) => record.state = PersistentState::Running,
                Ok(ContainerState::Paused) => record.state = PersistentState::Paused,
                Ok(_) => record.state = PersistentState::Stopped,
                Err(e) => {
                    record.state = PersistentState::Error;
                    record.last_error = Some(e.to_string());
                }
            }
        }
    }

    /// Spawn a background task that calls [`Self::run_health_checks`] on
    /// `interval` until the returned handle is aborted or the pool is
    /// dropped (in which case the last surviving `Arc` clone stops the
    /// loop on its own).
    pub fn spawn_health_ticker(
        self: Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.run_health_checks().await;
            }
        })
    }

    pub async fn copy_to(&self, id: ContainerId, dest_path: &str, tar_archive: Vec<u8>) -> Result<()> {
        let docker_id = self.docker_id(id).await?;
        let options = bollard::query_parameters::UploadToContainerOptionsBuilder::default()
            .path(dest_path)
            .build();
        self.client
            .docker()
            .upload_to_container(&docker_id, Some(options), tar_archive.into())
            .await
            .map_err(ContainerError::ApiError)
    }

    pub async fn copy_from(&self, id: ContainerId, src_path: &str) -> Result<Vec<u8>> {
        use futures::StreamExt;

        let docker_id = self.docker_id(id).await?;
        let options = bollard::query_parameters::DownloadFromContainerOptionsBuilder::default()
            .path(src_path)
            .build();
        let mut stream = self
            .client
            .docker()
            .download_from_container(&docker_id, Some(options));

        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk.map_err(ContainerError::ApiError)?);
        }
        Ok(buf)
    }

    /// Stop, remove, and forget every container this pool created. Best
    /// effort: failures on individual containers are logged, not
    /// propagated, so a single stuck container doesn't block cleanup of
    /// the rest.
    pub async fn cleanup(&self) {
        let ids: Vec<ContainerId> = self.registry.read().await.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.remove(id).await {
                warn!(?id, error = %e, "failed to remove container during pool cleanup");
            }
        }
        info!("persistent container pool cleanup complete");
    }

    pub async fn record(&self, id: ContainerId) -> Result<ContainerRecord> {
        self.registry
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ContainerError::NotFound(format!("{:?}", id.0)))
    }

    /// Drop a [`ContainerId`] from the registry without touching Docker.
    /// Used when a handle's underlying container has been folded into
    /// another handle (see snapshot restore).
    pub(crate) async fn forget(&self, id: ContainerId) {
        self.registry.write().await.remove(&id);
    }

    /// Re-point a [`ContainerId`] at a different underlying Docker
    /// container without changing the handle callers hold. Used by
    /// snapshot restore, which creates a brand-new container from a
    /// committed image and retires the old one.
    pub(crate) async fn rebind(&self, id: ContainerId, record: ContainerRecord) {
        self.registry.write().await.insert(id, record);
    }

    pub(crate) fn client(&self) -> &Arc<ContainerClient> {
        &self.client
    }

    async fn docker_id(&self, id: ContainerId) -> Result<String> {
        self.registry
            .read()
            .await
            .get(&id)
            .map(|r| r.docker_id.clone())
            .ok_or_else(|| ContainerError::NotFound(format!("{:?}", id.0)))
    }
}

#[cfg(all(test, feature = "containers"))]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_is_stable_copy() {
        let a = ContainerId::new();
        let b = a;
        assert_eq!(a, b);
    }
}
