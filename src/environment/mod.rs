//! Python Project Environment (C10): a state machine layered over a
//! [`crate::container::PersistentContainerPool`] handle, taking a cloned
//! repository through setup, patch application, and test runs while
//! keeping the underlying container's lifetime owned entirely by the
//! pool (see [`crate::container::pool`] for why the handle never owns
//! the container directly).

pub mod swebench;

use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info};

use crate::container::{
    snapshot_container, ContainerId, ContainerSnapshot, ExecRequest, PersistentContainerPool,
};

/// Environment lifecycle states.
///
/// ```text
/// Initializing -> Cloning -> CheckingOut -> SettingUp -> Ready
/// Ready <-> PatchApplied <-> Testing
/// (any) -> Error
/// Ready | PatchApplied | Testing -> Complete
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    Initializing,
    Cloning,
    CheckingOut,
    SettingUp,
    Ready,
    PatchApplied,
    Testing,
    Complete,
    Error,
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("invalid transition from {from:?} for this operation")]
    InvalidTransition { from: EnvironmentState },

    #[error("no supported Python manifest found (tried pyproject.toml, setup.py, requirements*.txt)")]
    NoManifest,

    #[error("container error: {0}")]
    Container(#[from] crate::container::ContainerError),
}

pub type Result<T> = std::result::Result<T, EnvironmentError>;

/// Manifest probing order, per the setup step: install is attempted
/// against each present manifest in turn, stopping at the first whose
/// install exits zero.
const MANIFEST_CANDIDATES: &[&str] = &[
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    "requirements-dev.txt",
    "requirements-test.txt",
];

/// Fixed path of the virtual environment created during setup.
const VENV_PATH: &str = "/opt/tactile-venv";

/// A single project checkout bound to a persistent container.
pub struct Environment<'p> {
    pool: &'p PersistentContainerPool,
    container: ContainerId,
    repo_url: String,
    revision: String,
    workdir: String,
    state: EnvironmentState,
    created_at: SystemTime,
    post_setup_snapshot: Option<ContainerSnapshot>,
}

impl<'p> Environment<'p> {
    pub fn new(
        pool: &'p PersistentContainerPool,
        container: ContainerId,
        repo_url: impl Into<String>,
        revision: impl Into<String>,
        workdir: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            container,
            repo_url: repo_url.into(),
            revision: revision.into(),
            workdir: workdir.into(),
            state: EnvironmentState::Initializing,
            created_at: SystemTime::now(),
            post_setup_snapshot: None,
        }
    }

    pub fn state(&self) -> EnvironmentState {
        self.state
    }

    async fn run(&self, program: &str, args: Vec<&str>) -> Result<crate::container::ExecOutcome> {
        let mut cmd = vec![program.to_string()];
        cmd.extend(args.into_iter().map(String::from));
        let req = ExecRequest {
            cmd,
            working_dir: Some(self.workdir.clone()),
            env: Vec::new(),
            user: None,
            stdout_cap: 1 << 20,
            stderr_cap: 1 << 20,
            merged_cap: 1 << 20,
        };
        Ok(self.pool.exec(self.container, req).await?)
    }

    /// Clone the repository and check out `revision`.
    pub async fn initialize(&mut self) -> Result<()> {
        self.state = EnvironmentState::Cloning;
        let clone = self
            .run("git", vec!["clone", &self.repo_url, &self.workdir])
            .await?;
        if clone.exit_code != 0 {
            self.state = EnvironmentState::Error;
            return Err(EnvironmentError::Container(
                crate::container::ContainerError::ExecutionError(format!(
                    "git clone failed with exit code {}",
                    clone.exit_code
                )),
            ));
        }

        self.state = EnvironmentState::CheckingOut;
        let checkout = self.run("git", vec!["checkout", &self.revision]).await?;
        if checkout.exit_code != 0 {
            self.state = EnvironmentState::Error;
            return Err(EnvironmentError::Container(
                crate::container::ContainerError::ExecutionError(format!(
                    "git checkout failed with exit code {}",
                    checkout.exit_code
                )),
            ));
        }

        self.setup().await
    }

    fn venv_bin(&self, tool: &str) -> String {
        format!("{}/bin/{}", VENV_PATH, tool)
    }

    /// Probe present manifests in [`MANIFEST_CANDIDATES`] order, trying
    /// each in turn against the venv's `pip` and stopping at the first
    /// whose install exits zero. Falls through to the next candidate on
    /// a nonzero exit rather than failing outright.
    async fn install_dependencies(&self) -> Result<()> {
        let listing = self.run("ls", vec![&self.workdir]).await?;
        let found = String::from_utf8_lossy(&listing.stdout);
        let present: Vec<&str> = MANIFEST_CANDIDATES
            .iter()
            .copied()
            .filter(|candidate| found.lines().any(|line| line.trim() == *candidate))
            .collect();

        if present.is_empty() {
            return Err(EnvironmentError::NoManifest);
        }

        let pip = self.venv_bin("pip");
        for manifest in present {
            debug!(manifest, "attempting dependency install");
            let install_result = match manifest {
                "pyproject.toml" | "setup.py" => self.run(&pip, vec!["install", "-e", "."]).await?,
                other => self.run(&pip, vec!["install", "-r", other]).await?,
            };
            if install_result.exit_code == 0 {
                info!(manifest, "dependency install succeeded");
                return Ok(());
            }
            debug!(
                manifest,
                exit_code = install_result.exit_code,
                "install failed, trying next manifest"
            );
        }

        Err(EnvironmentError::Container(
            crate::container::ContainerError::ExecutionError(
                "dependency install failed for every present manifest".to_string(),
            ),
        ))
    }

    /// Create the virtual environment, install dependencies into it from
    /// the first manifest whose install succeeds, and snapshot the
    /// container's resulting filesystem so [`Self::reset`] has something
    /// to restore to.
    async fn setup(&mut self) -> Result<()> {
        self.state = EnvironmentState::SettingUp;

        let venv = self.run("python3", vec!["-m", "venv", VENV_PATH]).await?;
        if venv.exit_code != 0 {
            self.state = EnvironmentState::Error;
            return Err(EnvironmentError::Container(
                crate::container::ContainerError::ExecutionError(format!(
                    "failed to create virtual environment at {VENV_PATH} (exit code {})",
                    venv.exit_code
                )),
            ));
        }

        if let Err(e) = self.install_dependencies().await {
            self.state = EnvironmentState::Error;
            return Err(e);
        }

        self.state = EnvironmentState::Ready;

        match snapshot_container(self.pool, self.container).await {
            Ok(snapshot) => self.post_setup_snapshot = Some(snapshot),
            Err(e) => debug!(error = %e, "post-setup snapshot failed, reset will be unavailable"),
        }

        info!(repo = %self.repo_url, revision = %self.revision, "environment ready");
        Ok(())
    }

    /// Apply a unified diff via `git apply`. Idempotent: applying the
    /// same patch twice from `Ready` is a no-op from the caller's
    /// perspective, since `revert_patch` always returns to `Ready` first.
    pub async fn apply_patch(&mut self, patch: &str) -> Result<()> {
        if self.state != EnvironmentState::Ready {
            return Err(EnvironmentError::InvalidTransition { from: self.state });
        }

        let patch_path = format!("{}/.tactile-patch.diff", self.workdir);
        self.pool
            .copy_to(self.container, &self.workdir, patch_tar(&patch_path, patch))
            .await?;

        let apply = self.run("git", vec!["apply", &patch_path]).await?;
        if apply.exit_code != 0 {
            return Err(EnvironmentError::Container(
                crate::container::ContainerError::ExecutionError(format!(
                    "git apply failed with exit code {}",
                    apply.exit_code
                )),
            ));
        }

        self.state = EnvironmentState::PatchApplied;
        Ok(())
    }

    pub async fn revert_patch(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            EnvironmentState::PatchApplied | EnvironmentState::Testing
        ) {
            return Err(EnvironmentError::InvalidTransition { from: self.state });
        }
        let reset = self.run("git", vec!["checkout", "--", "."]).await?;
        if reset.exit_code != 0 {
            self.state = EnvironmentState::Error;
            return Err(EnvironmentError::Container(
                crate::container::ContainerError::ExecutionError(
                    "failed to revert patch".to_string(),
                ),
            ));
        }
        self.state = EnvironmentState::Ready;
        Ok(())
    }

    /// Run `pytest` with the given node ids.
    pub async fn run_pytest(&mut self, node_ids: &[&str]) -> Result<crate::container::ExecOutcome> {
        let resume_state = self.state;
        if !matches!(
            resume_state,
            EnvironmentState::Ready | EnvironmentState::PatchApplied
        ) {
            return Err(EnvironmentError::InvalidTransition { from: resume_state });
        }
        self.state = EnvironmentState::Testing;
        let mut args = vec!["-q".to_string()];
        args.extend(node_ids.iter().map(|s| s.to_string()));
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        let pytest = self.venv_bin("pytest");
        let outcome = self.run(&pytest, args_ref).await?;
        self.state = resume_state;
        Ok(outcome)
    }

    /// Reset the environment to a clean `Ready` state by stopping and
    /// removing the underlying container and recreating it from the
    /// snapshot taken right after [`Self::setup`] completed. Fails if no
    /// such snapshot was ever taken.
    pub async fn reset(&mut self) -> Result<()> {
        let Some(snapshot) = self.post_setup_snapshot.clone() else {
            self.state = EnvironmentState::Error;
            return Err(EnvironmentError::Container(
                crate::container::ContainerError::ExecutionError(
                    "no post-setup snapshot to restore".to_string(),
                ),
            ));
        };
        crate::container::restore_snapshot(self.pool, self.container, &snapshot).await?;
        self.state = EnvironmentState::Ready;
        Ok(())
    }

    pub async fn teardown(mut self) -> Result<()> {
        self.pool.remove(self.container).await?;
        self.state = EnvironmentState::Complete;
        Ok(())
    }
}

fn patch_tar(path_in_archive: &str, patch: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(patch.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    let name = path_in_archive.trim_start_matches('/');
    let _ = builder.append_data(&mut header, name, patch.as_bytes());
    builder.into_inner().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_candidates_order() {
        assert_eq!(MANIFEST_CANDIDATES[0], "pyproject.toml");
        assert_eq!(MANIFEST_CANDIDATES.last(), Some(&"requirements-test.txt"));
    }
}
