//! Executor Layer (C4/C6/C8): run a [`crate::command::Command`] and produce
//! an [`crate::result::ExecutionResult`] under whichever isolation backend
//! the command (merged against executor defaults) asks for.

pub mod audited;
pub mod docker;
pub mod host;
pub mod limits;
pub mod retry;
pub mod router;

use async_trait::async_trait;
use thiserror::Error;

use crate::command::Command;
use crate::result::ExecutionResult;

/// Errors an executor can raise *before* it has a result to report
/// (everything else — the child failing, timing out, being killed — is
/// represented as a non-error `ExecutionResult`, not an `ExecutorError`;
/// see [`ExecutionResult::success`]).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("isolation backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("container error: {0}")]
    Container(#[from] crate::container::ContainerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// A backend capable of running a single command to completion.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, command: &Command) -> Result<ExecutionResult>;
}

/// Build the allow-listed environment for a child process: start from the
/// fixed minimal set every backend needs (path-like `PATH`, identity
/// `HOME`/`USER`, locale `LANG`/`LC_ALL`), then layer the command's
/// explicit `env` bindings on top, later entries winning on key collision.
pub fn build_environment(command: &Command) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = Vec::new();
    for key in ["PATH", "HOME", "USER", "LANG", "LC_ALL"] {
        if let Ok(value) = std::env::var(key) {
            env.push((key.to_string(), value));
        }
    }
    for (k, v) in &command.env {
        if let Some(existing) = env.iter_mut().find(|(ek, _)| ek == k) {
            existing.1 = v.clone();
        } else {
            env.push((k.clone(), v.clone()));
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_environment_command_overrides_inherited() {
        std::env::set_var("PATH", "/usr/bin");
        let cmd = Command::new("x", vec![]).with_env("PATH", "/custom/bin");
        let env = build_environment(&cmd);
        let path = env.iter().find(|(k, _)| k == "PATH").unwrap();
        assert_eq!(path.1, "/custom/bin");
    }
}
