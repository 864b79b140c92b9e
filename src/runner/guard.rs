//! Patch guard for test runs.
//!
//! A patched file is always restored to its original content when the guard
//! is dropped, including when the run fails or panics.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::{Error, Result};

/// RAII guard holding the original content of a patched file.
pub struct PatchGuard {
    path: PathBuf,
    /// `None` when the file did not exist before patching.
    original: Option<Vec<u8>>,
    restored: bool,
}

impl PatchGuard {
    /// Replace `path` with `content`, remembering what was there.
    pub fn apply(path: impl AsRef<Path>, content: &[u8]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let original = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::Io(e)),
        };
        atomic_write(&path, content)?;
        Ok(Self {
            path,
            original,
            restored: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Restore now and surface any error.
    pub fn restore(mut self) -> Result<()> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        match &self.original {
            Some(bytes) => atomic_write(&self.path, bytes),
            None => match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(e)),
            },
        }
    }
}

impl Drop for PatchGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore_inner() {
            tracing::error!("failed to restore {}: {e}", self.path.display());
        }
    }
}

/// Write content to a file via a temp file and rename.
pub fn atomic_write(path: impl AsRef<Path>, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".augur-{}-{file_name}.tmp", std::process::id()));

    let mut file = File::create(&temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}
