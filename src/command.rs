//! Command specification and executor-default merging.
//!
//! A [`Command`] describes an invocation the core should run. It is never
//! mutated by the core: [`Command::merge`] produces a new, fully populated
//! value against an [`ExecutorDefaults`], field by field.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tri-state network policy: explicit allow, explicit deny, or "unset" (let
/// the backend pick its own default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NetworkPolicy {
    Allow,
    Deny,
    #[default]
    Unset,
}

/// Resource bounds a command may carry. Every field is optional; `None` (or
/// `0` for the numeric shorthand constructors) means "default/unbounded" and
/// is resolved against [`ExecutorDefaults::bounds`] during merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBounds {
    /// Wall-clock timeout.
    pub wall_clock_timeout: Option<Duration>,
    /// CPU-time cap.
    pub cpu_time_cap: Option<Duration>,
    /// Resident-set cap, in bytes.
    pub rss_cap_bytes: Option<u64>,
    /// Captured-output cap, in bytes.
    pub output_cap_bytes: Option<u64>,
    /// Produced-file-size cap, in bytes.
    pub file_size_cap_bytes: Option<u64>,
    /// Child-process cap.
    pub max_child_processes: Option<u32>,
    /// Network policy.
    pub network: NetworkPolicy,
}

impl ResourceBounds {
    /// Merge `self` over `defaults`, field by field. Fields set in `self`
    /// win; unset fields adopt `defaults`'s value.
    pub fn merged_over(&self, defaults: &ResourceBounds) -> ResourceBounds {
        ResourceBounds {
            wall_clock_timeout: self.wall_clock_timeout.or(defaults.wall_clock_timeout),
            cpu_time_cap: self.cpu_time_cap.or(defaults.cpu_time_cap),
            rss_cap_bytes: self.rss_cap_bytes.or(defaults.rss_cap_bytes),
            output_cap_bytes: self.output_cap_bytes.or(defaults.output_cap_bytes),
            file_size_cap_bytes: self.file_size_cap_bytes.or(defaults.file_size_cap_bytes),
            max_child_processes: self.max_child_processes.or(defaults.max_child_processes),
            network: match self.network {
                NetworkPolicy::Unset => defaults.network,
                explicit => explicit,
            },
        }
    }
}

/// Requested sandboxing strategy for a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    None,
    Docker,
    LinuxNamespace,
    Firejail,
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IsolationMode::None => "none",
            IsolationMode::Docker => "docker",
            IsolationMode::LinuxNamespace => "linux-namespace",
            IsolationMode::Firejail => "firejail",
        };
        write!(f, "{s}")
    }
}

/// Full isolation policy for a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationPolicy {
    pub mode: Option<IsolationMode>,
    pub image: Option<String>,
    pub read_only_root: bool,
    pub allow_paths: Vec<String>,
    pub read_only_paths: Vec<String>,
    pub drop_capabilities: Vec<String>,
    pub no_new_privileges: bool,
    pub user: Option<String>,
    pub group: Option<String>,
    pub network_mode: Option<String>,
    pub tmpfs_size_hint: Option<String>,
}

impl IsolationPolicy {
    fn merged_over(&self, defaults: &IsolationPolicy) -> IsolationPolicy {
        if self.mode.is_none() {
            return defaults.clone();
        }
        self.clone()
    }
}

/// The invocation request. Constructed by the caller and never mutated by
/// the core; see [`Command::merge`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Program name. Invariant: non-empty.
    pub program: String,
    /// Ordered argument list.
    pub args: Vec<String>,
    /// Working directory; `None` adopts the executor default on merge.
    pub working_dir: Option<String>,
    /// Environment as ordered name=value bindings.
    pub env: Vec<(String, String)>,
    /// Standard-input byte string.
    pub stdin: Vec<u8>,
    pub bounds: ResourceBounds,
    pub isolation: IsolationPolicy,
    pub session_id: Uuid,
    pub request_id: Uuid,
    pub tags: HashMap<String, String>,
}

impl Command {
    /// Construct a new command with a fresh session and request id.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            env: Vec::new(),
            stdin: Vec::new(),
            bounds: ResourceBounds::default(),
            isolation: IsolationPolicy::default(),
            session_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            tags: HashMap::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = stdin.into();
        self
    }

    pub fn with_bounds(mut self, bounds: ResourceBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationPolicy) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Invariant check: program name must be non-empty.
    pub fn validate(&self) -> Result<(), String> {
        if self.program.trim().is_empty() {
            return Err("command program must not be empty".to_string());
        }
        Ok(())
    }

    /// Produce a *new* command merged against executor defaults. Unset
    /// working directory adopts the executor default; unset bound fields
    /// adopt the defaults field-by-field; the wall-clock timeout is then
    /// capped at the executor's maximum timeout; unset isolation policy
    /// adopts the executor default in full.
    pub fn merge(&self, defaults: &ExecutorDefaults) -> Command {
        let mut bounds = self.bounds.merged_over(&defaults.bounds);
        bounds.wall_clock_timeout = Some(match bounds.wall_clock_timeout {
            Some(t) => t.min(defaults.max_timeout),
            None => defaults.max_timeout,
        });

        Command {
            program: self.program.clone(),
            args: self.args.clone(),
            working_dir: self
                .working_dir
                .clone()
                .or_else(|| defaults.working_dir.clone()),
            env: self.env.clone(),
            stdin: self.stdin.clone(),
            bounds,
            isolation: self.isolation.merged_over(&defaults.isolation),
            session_id: self.session_id,
            request_id: self.request_id,
            tags: self.tags.clone(),
        }
    }

    /// Display form used only for logging: `program` followed by
    /// space-separated arguments, no quoting.
    pub fn display_form(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_form())
    }
}

/// Executor-wide defaults a [`Command`] merges against.
#[derive(Debug, Clone)]
pub struct ExecutorDefaults {
    pub working_dir: Option<String>,
    pub bounds: ResourceBounds,
    pub isolation: IsolationPolicy,
    pub max_timeout: Duration,
}

impl Default for ExecutorDefaults {
    fn default() -> Self {
        Self {
            working_dir: None,
            bounds: ResourceBounds::default(),
            isolation: IsolationPolicy::default(),
            max_timeout: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_program() {
        let cmd = Command::new("", vec![]);
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn test_display_form_no_quoting() {
        let cmd = Command::new("echo", vec!["hello world".to_string(), "x".to_string()]);
        assert_eq!(cmd.display_form(), "echo hello world x");
    }

    #[test]
    fn test_merge_field_by_field_not_wholesale() {
        let defaults = ExecutorDefaults {
            working_dir: Some("/default".to_string()),
            bounds: ResourceBounds {
                wall_clock_timeout: Some(Duration::from_secs(10)),
                rss_cap_bytes: Some(1024),
                ..Default::default()
            },
            max_timeout: Duration::from_secs(60),
            ..ExecutorDefaults::default()
        };

        let cmd = Command::new("x", vec![]).with_bounds(ResourceBounds {
            rss_cap_bytes: Some(2048),
            ..Default::default()
        });

        let merged = cmd.merge(&defaults);
        assert_eq!(merged.working_dir, Some("/default".to_string()));
        // explicit field wins
        assert_eq!(merged.bounds.rss_cap_bytes, Some(2048));
        // unset field adopts default
        assert_eq!(
            merged.bounds.wall_clock_timeout,
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_merge_caps_timeout_at_executor_max() {
        let defaults = ExecutorDefaults {
            max_timeout: Duration::from_secs(5),
            ..ExecutorDefaults::default()
        };
        let cmd = Command::new("x", vec![]).with_bounds(ResourceBounds {
            wall_clock_timeout: Some(Duration::from_secs(500)),
            ..Default::default()
        });

        let merged = cmd.merge(&defaults);
        assert_eq!(merged.bounds.wall_clock_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_merge_does_not_mutate_original() {
        let defaults = ExecutorDefaults::default();
        let cmd = Command::new("x", vec![]);
        let _ = cmd.merge(&defaults);
        assert!(cmd.working_dir.is_none());
    }

    #[test]
    fn test_network_policy_unset_adopts_default() {
        let defaults = ResourceBounds {
            network: NetworkPolicy::Deny,
            ..Default::default()
        };
        let explicit = ResourceBounds::default();
        let merged = explicit.merged_over(&defaults);
        assert_eq!(merged.network, NetworkPolicy::Deny);
    }
}
