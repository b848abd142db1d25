//! Container orchestration layer: the Docker Ephemeral Executor's backing
//! client plus the Persistent Container Pool.
//!
//! - [`client`]: Docker/Podman API client wrapper with connection management.
//! - [`pool`]: long-lived container lifecycle (create/start/exec/stop/
//!   remove/healthcheck) behind a non-owning handle.
//! - [`snapshot`]: commit/restore of a running container's filesystem state.
//! - [`exec`]: command execution inside a running container, with bounded
//!   stdout/stderr capture matching [`crate::sink::BoundedSink`] semantics.

mod client;
mod exec;
mod pool;
mod snapshot;

pub use client::{ContainerClient, ContainerClientConfig, ContainerState, RuntimeType};
pub use exec::{exec_in_container, ExecOutcome, ExecRequest};
pub use pool::{ContainerId, ContainerRecord, PersistentContainerPool, PersistentState, PoolConfig};
pub use snapshot::{restore as restore_snapshot, snapshot as snapshot_container, ContainerSnapshot, SnapshotId};

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container API error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("archive error: {0}")]
    ArchiveError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("container error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
