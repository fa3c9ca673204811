//! The store's single cross-process advisory lock (the store directory).

use std::fs;
use std::path::{Path, PathBuf};

use wsync_error::{ErrorCode, WsyncError};

const LOCK_FILE_NAME: &str = ".wsync-lock";

/// Held for the lifetime of an open [`crate::Store`]; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the lock for `dir`, failing if another process (or an
    /// unclean prior exit) already holds it.
    pub fn acquire(dir: &Path) -> Result<Self, WsyncError> {
        let path = dir.join(LOCK_FILE_NAME);
        fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                WsyncError::new(
                    ErrorCode::Internal,
                    format!("store at {} is locked: {e}", dir.display()),
                )
                .with_context("path", dir.display().to_string())
            })?;
        Ok(Self { path })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
