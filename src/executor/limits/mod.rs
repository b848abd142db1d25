//! Limit Enforcer (C5): isolation backends that sit between the bare
//! Direct Executor and the heavyweight Docker Ephemeral Executor —
//! process-group + cgroup limits or full Linux namespaces on Linux,
//! Firejail as a third Linux option, and Job Objects on Windows.
//!
//! Probing which backend is actually usable on the current host happens
//! here so [`crate::executor::router::CompositeRouter`] doesn't need to
//! know about platform differences; it just asks for the backend behind
//! an [`crate::command::IsolationMode`] and this module decides what that
//! resolves to.

pub mod cgroup;
pub mod firejail;
#[cfg(unix)]
pub mod namespace;
#[cfg(windows)]
pub mod job_object;

/// Is `firejail` present on `PATH`? Cached per-process since `which` walks
/// `PATH` on every call and this is queried once per router construction,
/// not per command.
pub fn firejail_available() -> bool {
    which::which("firejail").is_ok()
}

/// Can this process create new Linux namespaces? Cheapest true test is
/// attempting an unprivileged user+mount namespace unshare in a forked
/// child so failure doesn't affect the caller's own namespaces; here we
/// settle for the conservative proxy of "are we on Linux and is
/// /proc/self/ns present", since a full probe fork is only worth paying
/// for once at startup, by the caller, not on every `firejail_available`-
/// style check.
#[cfg(target_os = "linux")]
pub fn namespaces_available() -> bool {
    std::path::Path::new("/proc/self/ns/mnt").exists()
}

#[cfg(not(target_os = "linux"))]
pub fn namespaces_available() -> bool {
    false
}
