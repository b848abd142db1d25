//! # Tactile Execution Core
//!
//! A cross-platform executor and persistent-container core: runs
//! untrusted or semi-trusted commands under configurable isolation and
//! resource bounds, and emits a structured audit trail for every
//! invocation.
//!
//! ## Architecture Overview
//!
//! - **[`command`]**: the [`Command`] and [`command::ExecutorDefaults`]
//!   types, and the field-by-field merge between them.
//! - **[`result`]**: [`result::ExecutionResult`] and [`result::ResourceUsage`],
//!   the shared outcome shape every backend produces.
//! - **[`sink`]**: [`sink::BoundedSink`], the size-capped output buffer
//!   used to cap captured stdout/stderr/merged streams.
//! - **[`resources`]**: the Resource Accountant — platform-specialized
//!   CPU/RSS/IO accounting, snapshot/diff on Unix and job-object query on
//!   Windows.
//! - **[`executor`]**: the Direct, Docker Ephemeral, Linux-Namespace,
//!   Firejail, and Windows-Job-Object executors, the retrying wrapper, and
//!   the composite router that dispatches a command to the right one.
//! - **[`container`]**: the Docker/Podman client, the Persistent Container
//!   Pool, in-container exec, and snapshot/restore.
//! - **[`audit`]**: the synchronous audit event stream, a rolling metrics
//!   aggregator, a rotating file sink, and derived audit facts.
//! - **[`environment`]**: the Python-project environment state machine
//!   layered over a persistent container, plus SWE-bench harness semantics.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tactile_exec_core::command::Command;
//! use tactile_exec_core::executor::{host::HostExecutor, Executor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = HostExecutor;
//!     let command = Command::new("echo", vec!["hello".to_string()]);
//!     let result = executor.execute(&command).await.unwrap();
//!     assert!(result.succeeded_cleanly());
//! }
//! ```

/// Command specification and executor-default merging.
pub mod command;

/// Execution outcome types shared across every backend.
pub mod result;

/// Bounded output capture.
pub mod sink;

/// Platform-specialized process resource accounting.
pub mod resources;

/// Executor backends, retry wrapper, and composite router.
pub mod executor;

/// Container orchestration: client, persistent pool, exec, snapshot.
///
/// Only available with the `containers` feature, which is enabled by
/// default.
#[cfg(feature = "containers")]
pub mod container;

/// Audit trail: event stream, metrics aggregator, file sink, derived facts.
pub mod audit;

/// Python-project environment state machine and SWE-bench harness.
#[cfg(feature = "containers")]
pub mod environment;

pub use command::{Command, ExecutorDefaults, IsolationMode, IsolationPolicy, ResourceBounds};
pub use result::{ExecutionResult, ResourceUsage};
pub use sink::BoundedSink;
pub use executor::{Executor, ExecutorError};

#[cfg(feature = "containers")]
pub use container::{ContainerClient, ContainerError, PersistentContainerPool};
