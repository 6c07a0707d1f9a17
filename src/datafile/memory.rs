//! Memory-backed segment
//!
//! Holds the uncommitted writes of a transaction. Never persisted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CaskError, Result};

use super::{would_overflow, Entry, Segment};

/// A segment living entirely in a byte buffer
#[derive(Debug)]
pub struct MemorySegment {
    id: u32,
    data: RwLock<Vec<u8>>,
    readonly: AtomicBool,
    /// Rotation threshold (0 = unbounded)
    max_size: u64,
}

impl MemorySegment {
    /// An empty, writable, unbounded segment
    pub fn new(id: u32) -> Self {
        Self::with_max_size(id, 0)
    }

    pub fn with_max_size(id: u32, max_size: u64) -> Self {
        Self {
            id,
            data: RwLock::new(Vec::new()),
            readonly: AtomicBool::new(false),
            max_size,
        }
    }

    /// A frozen segment over existing bytes
    pub fn from_bytes(id: u32, data: Vec<u8>) -> Self {
        Self {
            id,
            data: RwLock::new(data),
            readonly: AtomicBool::new(true),
            max_size: 0,
        }
    }
}

impl Segment for MemorySegment {
    fn id(&self) -> u32 {
        self.id
    }

    fn write(&self, entry: &Entry) -> Result<(u64, u64)> {
        let mut data = self.data.write();

        if self.readonly.load(Ordering::Acquire) {
            return Err(CaskError::DatabaseReadonly);
        }

        let offset = data.len() as u64;
        let len = entry.encoded_len();
        if would_overflow(offset, len, self.max_size) {
            return Err(CaskError::SegmentFull);
        }

        data.extend_from_slice(&entry.encode());
        Ok((offset, len))
    }

    fn read_bytes_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.read();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).filter(|&end| end <= data.len());
        match end {
            Some(end) => {
                buf.copy_from_slice(&data[start..end]);
                Ok(())
            }
            None => Err(CaskError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read of {} bytes at {} past end of memory segment", buf.len(), offset),
            ))),
        }
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.readonly.store(true, Ordering::Release);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn is_readonly(&self) -> bool {
        self.readonly.load(Ordering::Acquire)
    }

    fn reopen_readonly(&self) -> Arc<dyn Segment> {
        Arc::new(Self::from_bytes(self.id, self.data.read().clone()))
    }
}
