//! Run-level mutual exclusion.
//!
//! Two overlapping runs could both miss a key and both insert it. Holding a
//! lock file for the whole run serializes them; the UNIQUE key index in the
//! store catches anything that gets past it.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::IngestError;

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create `path` exclusively. Fails with `Locked` if it already exists.
    pub fn acquire(path: &Path, run_id: &str) -> Result<Self, IngestError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path)
                    .map(|s| s.trim().replace('\n', ", "))
                    .unwrap_or_else(|_| "unknown holder".to_string());
                return Err(IngestError::Locked {
                    path: path.display().to_string(),
                    holder,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let lock = Self {
            path: path.to_path_buf(),
        };
        writeln!(
            file,
            "pid={}\nrun_id={run_id}\nstarted={}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )?;
        log::debug!("acquired run lock {}", path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("released run lock {}", self.path.display()),
            Err(e) => log::warn!("could not remove run lock {}: {e}", self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("var/rawsync.lock");

        let held = RunLock::acquire(&path, "run-1").unwrap();
        let err = RunLock::acquire(&path, "run-2").unwrap_err();
        match &err {
            IngestError::Locked { holder, .. } => assert!(holder.contains("run_id=run-1")),
            other => panic!("expected Locked, got {other:?}"),
        }
        assert!(err.is_fatal());

        drop(held);
        assert!(!path.exists());
        let _again = RunLock::acquire(&path, "run-3").unwrap();
    }
}
