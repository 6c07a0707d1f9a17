//! File-backed segment
//!
//! Writes go through positional `pwrite` at the current cursor and reads
//! through positional `pread`, so readers never contend on a shared file
//! position and a read-only view can share the same handle.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CaskError, Result};
use crate::paths;

use super::{would_overflow, Entry, Segment};

/// An on-disk log segment
#[derive(Debug)]
pub struct FileSegment {
    id: u32,
    path: PathBuf,
    file: Arc<File>,
    /// Write cursor; only advanced while `write_lock` is held
    size: AtomicU64,
    readonly: AtomicBool,
    /// Rotation threshold (0 = unbounded)
    max_size: u64,
    /// Serializes appends
    write_lock: Mutex<()>,
}

impl FileSegment {
    /// Open segment `id` in `dir`
    ///
    /// A writable open creates the file if needed; a read-only open requires
    /// it to exist.
    pub fn open(dir: &Path, id: u32, readonly: bool, max_size: u64, file_mode: u32) -> Result<Self> {
        let path = paths::segment_path(dir, id);

        let file = if readonly {
            File::open(&path)?
        } else {
            let existed = path.exists();
            let file = paths::create_options(file_mode)
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            if !existed {
                paths::sync_dir(dir)?;
            }
            file
        };

        let size = file.metadata()?.len();
        tracing::debug!(segment = id, size, readonly, "opened segment");

        Ok(Self {
            id,
            path,
            file: Arc::new(file),
            size: AtomicU64::new(size),
            readonly: AtomicBool::new(readonly),
            max_size,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the segment file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Segment for FileSegment {
    fn id(&self) -> u32 {
        self.id
    }

    fn write(&self, entry: &Entry) -> Result<(u64, u64)> {
        let _guard = self.write_lock.lock();

        if self.readonly.load(Ordering::Acquire) {
            return Err(CaskError::DatabaseReadonly);
        }

        let offset = self.size.load(Ordering::Acquire);
        let len = entry.encoded_len();
        if would_overflow(offset, len, self.max_size) {
            return Err(CaskError::SegmentFull);
        }

        let buf = entry.encode();
        write_all_at(&self.file, &buf, offset)?;
        self.size.store(offset + len, Ordering::Release);

        Ok((offset, len))
    }

    fn read_bytes_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        read_exact_at(&self.file, buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if !self.readonly.load(Ordering::Acquire) {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if !self.readonly.swap(true, Ordering::AcqRel) {
            self.file.sync_all()?;
            tracing::debug!(segment = self.id, size = self.size(), "closed segment");
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn is_readonly(&self) -> bool {
        self.readonly.load(Ordering::Acquire)
    }

    fn reopen_readonly(&self) -> Arc<dyn Segment> {
        Arc::new(Self {
            id: self.id,
            path: self.path.clone(),
            file: Arc::clone(&self.file),
            size: AtomicU64::new(self.size()),
            readonly: AtomicBool::new(true),
            max_size: self.max_size,
            write_lock: Mutex::new(()),
        })
    }
}

// =============================================================================
// Positional I/O helpers
// =============================================================================

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset)? {
            0 => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            n => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset)? {
            0 => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            n => {
                buf = &buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}
