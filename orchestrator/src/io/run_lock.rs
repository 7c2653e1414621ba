//! Exclusive per-issue run lock.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct LockInfo {
    issue: u64,
    pid: u32,
    acquired_at: String,
}

/// Held for the duration of a run; the lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn lock_path(dir: &Path, issue: u64) -> PathBuf {
        dir.join(format!("issue-{issue}.lock"))
    }

    /// Create the lock file, failing fast if another run holds it.
    pub fn acquire(dir: &Path, issue: u64) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
        let path = Self::lock_path(dir, issue);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                return Err(anyhow!(
                    "issue #{issue} is already being processed (lock {}){}",
                    path.display(),
                    if holder.trim().is_empty() {
                        String::new()
                    } else {
                        format!(": {}", holder.trim())
                    }
                ));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("create lock {}", path.display()));
            }
        };

        let info = LockInfo {
            issue,
            pid: std::process::id(),
            acquired_at: chrono::Utc::now().to_rfc3339(),
        };
        let buf = serde_json::to_string(&info)?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("write lock {}", path.display()))?;
        debug!(path = %path.display(), "run lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to remove run lock");
        }
    }
}
