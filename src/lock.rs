//! Cross-process store lock
//!
//! On unix the lock is `flock(LOCK_EX | LOCK_NB)` on `{store}/lockfile`; the
//! kernel drops it when the file handle closes, so a crashed process never
//! leaves a stale lock behind. Elsewhere the lock is the existence of a
//! `create_new` marker file that is removed on drop.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::paths::{self, LOCK_FILENAME};

/// An acquired exclusive lock on a store directory
#[derive(Debug)]
pub struct LockFile {
    /// Kept open to hold the lock
    _file: File,
    path: PathBuf,
}

impl LockFile {
    /// Try to take the lock without blocking
    ///
    /// Returns `Ok(None)` when another holder already has it.
    pub fn try_acquire(dir: &Path, file_mode: u32) -> Result<Option<Self>> {
        let path = dir.join(LOCK_FILENAME);
        Self::try_acquire_at(path, file_mode)
    }

    #[cfg(unix)]
    fn try_acquire_at(path: PathBuf, file_mode: u32) -> Result<Option<Self>> {
        use std::os::unix::io::AsRawFd;

        let file = paths::create_options(file_mode)
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // SAFETY: the fd is owned by `file` and stays valid for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err.into());
        }

        Ok(Some(Self { _file: file, path }))
    }

    #[cfg(not(unix))]
    fn try_acquire_at(path: PathBuf, file_mode: u32) -> Result<Option<Self>> {
        match paths::create_options(file_mode)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => Ok(Some(Self { _file: file, path })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(not(unix))]
impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
