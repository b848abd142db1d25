//! Integration tests for the Persistent Container Pool: container state
//! surviving across commands, and snapshot/restore. Skipped when no
//! container runtime is reachable.

#![cfg(feature = "containers")]

use tactile_exec_core::container::{
    ContainerClient, ContainerId, ExecRequest, PersistentContainerPool, PoolConfig,
};

fn should_run_container_tests() -> bool {
    if let Ok(value) = std::env::var("SKIP_CONTAINER_TESTS") {
        if value == "1" || value.eq_ignore_ascii_case("true") {
            return false;
        }
    }
    std::process::Command::new("docker")
        .arg("info")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
        || std::process::Command::new("podman")
            .arg("info")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
}

async fn new_pool() -> Option<PersistentContainerPool> {
    let client = ContainerClient::new().await.ok()?;
    Some(PersistentContainerPool::new(client, PoolConfig::default()))
}

async fn exec_in(pool: &PersistentContainerPool, id: ContainerId, cmd: &[&str]) -> String {
    let req = ExecRequest::new(cmd.iter().map(|s| s.to_string()).collect());
    let outcome = pool.exec(id, req).await.expect("exec failed");
    String::from_utf8_lossy(&outcome.stdout).trim().to_string()
}

#[tokio::test]
async fn test_persistent_container_state_survives_across_commands() {
    if !should_run_container_tests() {
        eprintln!("skipping: no container runtime available");
        return;
    }
    let Some(pool) = new_pool().await else {
        eprintln!("skipping: could not connect to container runtime");
        return;
    };

    let id = pool
        .create("alpine:latest", None, None)
        .await
        .expect("create failed");
    pool.start(id).await.expect("start failed");

    exec_in(&pool, id, &["sh", "-c", "echo persisted > /tmp/marker"]).await;
    let readback = exec_in(&pool, id, &["cat", "/tmp/marker"]).await;
    assert_eq!(readback, "persisted");

    pool.cleanup().await;
}

#[tokio::test]
async fn test_snapshot_restore_resets_container_state() {
    if !should_run_container_tests() {
        eprintln!("skipping: no container runtime available");
        return;
    }
    let Some(pool) = new_pool().await else {
        eprintln!("skipping: could not connect to container runtime");
        return;
    };

    let id = pool
        .create("alpine:latest", None, None)
        .await
        .expect("create failed");
    pool.start(id).await.expect("start failed");

    let clean_snapshot = tactile_exec_core::container::snapshot_container(&pool, id)
        .await
        .expect("snapshot failed");

    exec_in(&pool, id, &["sh", "-c", "echo dirty > /tmp/dirty"]).await;
    let before_restore = exec_in(&pool, id, &["sh", "-c", "cat /tmp/dirty 2>/dev/null || echo absent"]).await;
    assert_eq!(before_restore, "dirty");

    tactile_exec_core::container::restore_snapshot(&pool, id, &clean_snapshot)
        .await
        .expect("restore failed");

    let after_restore = exec_in(&pool, id, &["sh", "-c", "cat /tmp/dirty 2>/dev/null || echo absent"]).await;
    assert_eq!(after_restore, "absent", "restore should discard post-snapshot writes");

    pool.cleanup().await;
}
