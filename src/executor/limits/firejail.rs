//! Firejail Limit Enforcer: delegates the actual spawn/capture/classify
//! machinery to the Direct Executor, but rewrites the command so
//! `firejail` itself is the program, with sandboxing flags assembled from
//! the isolation policy and the real program/args trailing after `--`.
//!
//! No corpus example uses Firejail directly; flag assembly here follows
//! Firejail's own documented CLI syntax rather than a pattern borrowed
//! from the retrieved examples.

use crate::command::{Command as ExecCommand, IsolationMode};
use crate::executor::{host::HostExecutor, Executor, ExecutorError, Result};
use crate::result::ExecutionResult;

pub fn firejail_args(command: &ExecCommand) -> Vec<String> {
    let mut args = vec!["--quiet".to_string(), "--private-tmp".to_string()];

    if command.isolation.no_new_privileges {
        args.push("--nonewprivs".to_string());
    }
    if !command.isolation.drop_capabilities.is_empty() {
        args.push(format!(
            "--caps.drop={}",
            command.isolation.drop_capabilities.join(",")
        ));
    }
    if command.bounds.network != crate::command::NetworkPolicy::Allow {
        args.push("--net=none".to_string());
    }
    if command.isolation.read_only_root {
        args.push("--read-only=/".to_string());
    }
    for path in &command.isolation.read_only_paths {
        args.push(format!("--read-only={path}"));
    }
    for path in &command.isolation.allow_paths {
        args.push(format!("--whitelist={path}"));
    }
    if let Some(rss) = command.bounds.rss_cap_bytes {
        args.push(format!("--rlimit-as={rss}"));
    }
    if let Some(max) = command.bounds.max_child_processes {
        args.push(format!("--rlimit-nproc={max}"));
    }
    args.push("--seccomp".to_string());

    args
}

/// Firejail backend, available wherever `firejail` is on `PATH` (see
/// [`super::firejail_available`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct FirejailExecutor;

#[async_trait::async_trait]
impl Executor for FirejailExecutor {
    async fn execute(&self, command: &ExecCommand) -> Result<ExecutionResult> {
        command
            .validate()
            .map_err(ExecutorError::InvalidCommand)?;

        if !super::firejail_available() {
            return Err(ExecutorError::BackendUnavailable(
                "firejail is not on PATH".to_string(),
            ));
        }

        let mut wrapped_args = firejail_args(command);
        wrapped_args.push(command.program.clone());
        wrapped_args.extend(command.args.clone());

        let mut wrapped = command.clone();
        wrapped.program = "firejail".to_string();
        wrapped.args = wrapped_args;

        let mut result = HostExecutor.execute(&wrapped).await?;
        result.isolation_used = IsolationMode::Firejail;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, IsolationPolicy};

    #[test]
    fn test_args_include_seccomp_and_private_tmp() {
        let cmd = Command::new("echo", vec!["hi".to_string()]);
        let args = firejail_args(&cmd);
        assert!(args.contains(&"--seccomp".to_string()));
        assert!(args.contains(&"--private-tmp".to_string()));
    }

    #[test]
    fn test_no_new_privileges_flag_is_conditional() {
        let mut cmd = Command::new("echo", vec![]);
        assert!(!firejail_args(&cmd).contains(&"--nonewprivs".to_string()));
        cmd.isolation = IsolationPolicy {
            no_new_privileges: true,
            ..Default::default()
        };
        assert!(firejail_args(&cmd).contains(&"--nonewprivs".to_string()));
    }
}
