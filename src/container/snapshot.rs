//! Container snapshotting: commit a running container's filesystem to an
//! image and later restore it into a fresh container bound to the same
//! [`crate::container::ContainerId`].

use std::time::SystemTime;

use bollard::query_parameters::CommitContainerOptionsBuilder;
use tracing::debug;
use uuid::Uuid;

use crate::container::pool::{ContainerId, ContainerRecord, PersistentState};
use crate::container::{ContainerError, PersistentContainerPool, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ContainerSnapshot {
    pub id: SnapshotId,
    pub container: ContainerId,
    pub committed_image: String,
    pub created_at: SystemTime,
}

/// Commit `container`'s current filesystem state into a new image tagged
/// `tactile-snapshot:<uuid>`.
pub async fn snapshot(
    pool: &PersistentContainerPool,
    container: ContainerId,
) -> Result<ContainerSnapshot> {
    let record = pool.record(container).await?;
    let tag = format!("tactile-snapshot:{}", Uuid::new_v4());

    let options = CommitContainerOptionsBuilder::default()
        .container(record.docker_id.as_str())
        .repo(tag.as_str())
        .build();

    pool.client()
        .docker()
        .commit_container(options, bollard::models::ContainerConfig::default())
        .await
        .map_err(ContainerError::ApiError)?;

    debug!(?container, image = %tag, "committed container snapshot");

    Ok(ContainerSnapshot {
        id: SnapshotId::new(),
        container,
        committed_image: tag,
        created_at: SystemTime::now(),
    })
}

/// Stop and remove the container behind `container`, then recreate it from
/// `snapshot`'s committed image, rebinding the same [`ContainerId`] so
/// callers holding it see no discontinuity.
pub async fn restore(
    pool: &PersistentContainerPool,
    container: ContainerId,
    snapshot: &ContainerSnapshot,
) -> Result<()> {
    if snapshot.container != container {
        return Err(ContainerError::ConfigError(
            "snapshot does not belong to the target container".to_string(),
        ));
    }

    let outgoing = pool.record(container).await.ok();

    // Best effort: the old container may already be stopped or gone.
    let _ = pool.stop(container).await;
    let _ = pool.remove(container).await;

    let fresh = pool
        .create(&snapshot.committed_image, None, None)
        .await?;
    let record = pool.record(fresh).await?;
    pool.forget(fresh).await;
    pool.rebind(
        container,
        ContainerRecord {
            docker_id: record.docker_id,
            image: snapshot.committed_image.clone(),
            created_at: SystemTime::now(),
            state: PersistentState::Creating,
            last_exec_at: None,
            exec_count: 0,
            health_check_count: 0,
            labels: outgoing.as_ref().map(|r| r.labels.clone()).unwrap_or_default(),
            mounts: outgoing.as_ref().map(|r| r.mounts.clone()).unwrap_or_default(),
            env: outgoing.as_ref().map(|r| r.env.clone()).unwrap_or_default(),
            last_error: None,
        },
    )
    .await;
    pool.start(container).await?;
    Ok(())
}
