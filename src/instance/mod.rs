//! One service per user: an exclusive lock on a file in the data directory.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the lifetime of the service; dropping it releases the lock.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file {:?}", path))?;

        if file.try_lock_exclusive().is_err() {
            bail!(
                "Another callwatch instance is already running (lock held on {:?})",
                path
            );
        }

        debug!("Acquired instance lock {:?}", path);
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!("Failed to release instance lock: {err:?}");
        }
    }
}
