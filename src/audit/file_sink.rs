//! Append-only JSON-lines audit sink, with size-based rotation.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::audit::{AuditEvent, AuditSink};

/// Writes one JSON object per line to `path`, rotating to
/// `<path>.YYYYMMDD-HHMMSS` once the file exceeds `max_bytes`.
pub struct FileAuditSink {
    path: PathBuf,
    max_bytes: u64,
    file: Mutex<File>,
}

impl FileAuditSink {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            max_bytes,
            file: Mutex::new(file),
        })
    }

    fn rotate_if_needed(&self, file: &File) -> std::io::Result<()> {
        if self.max_bytes == 0 {
            return Ok(());
        }
        let len = file.metadata()?.len();
        if len < self.max_bytes {
            return Ok(());
        }
        let suffix = rotation_suffix();
        let rotated = self.rotated_path(&suffix);
        fs::rename(&self.path, &rotated)?;
        Ok(())
    }

    fn rotated_path(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }
}

fn rotation_suffix() -> String {
    let now: chrono::DateTime<chrono::Utc> = chrono::Utc::now();
    now.format("%Y%m%d-%H%M%S").to_string()
}

impl AuditSink for FileAuditSink {
    fn on_event(&self, event: &AuditEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            warn!("failed to serialize audit event");
            return;
        };

        let mut file = self.file.lock().unwrap();
        if let Err(e) = self.rotate_if_needed(&file) {
            warn!(error = %e, "failed to rotate audit log");
        } else if self.max_bytes != 0 && file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
            // Rotation just happened; reopen at the original path.
            if let Ok(reopened) = OpenOptions::new().create(true).append(true).open(&self.path) {
                *file = reopened;
            }
        }

        if let Err(e) = writeln!(file, "{line}") {
            warn!(error = %e, path = ?self.path, "failed to write audit event");
        }
    }
}

pub fn path_exists(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[test]
    fn test_writes_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = FileAuditSink::open(&path, 0).unwrap();

        sink.on_event(&AuditEvent::blocked(&Command::new("rm", vec![]), "denied"));
        sink.on_event(&AuditEvent::blocked(&Command::new("rm", vec![]), "denied again"));

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_rotates_past_max_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = FileAuditSink::open(&path, 10).unwrap();

        for _ in 0..5 {
            sink.on_event(&AuditEvent::blocked(&Command::new("rm", vec![]), "x".repeat(20)));
        }

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(entries.len() >= 2, "expected a rotated file alongside the live one");
    }
}
