//! Datafile (Segment) Module
//!
//! Append-only log segments holding framed, checksummed records.
//!
//! ## Responsibilities
//! - Append one framed record per write, never a partial record
//! - Read a record back by (offset, length) and verify its checksum
//! - Signal `SegmentFull` so the store can rotate to a new segment
//! - Freeze segments read-only once they are rotated out
//!
//! ## Record Format
//! ```text
//! ┌─────────┬───────────┬─────────────┬───────────────┬──────┬────────┐
//! │ CRC (4) │ Flags (1) │ KeyLen (4)  │ ValueLen (8)  │ Key  │ Value  │
//! └─────────┴───────────┴─────────────┴───────────────┴──────┴────────┘
//!   CRC32 over Flags..Value; Flags bit 0 = tombstone; little-endian
//! ```
//!
//! [`ValueReader`] streams a single value out of a segment without loading it.
//!
//! Two backings implement [`Segment`]: [`FileSegment`] for the on-disk log and
//! [`MemorySegment`] for the private scratch space of a transaction.

mod entry;
mod file;
mod iterator;
mod memory;
mod reader;

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{CaskError, Result};

pub use entry::{Entry, RecordHeader, FLAG_TOMBSTONE, HEADER_SIZE};
pub use file::FileSegment;
pub use iterator::{EntryIter, ScannedEntry};
pub use memory::MemorySegment;
pub use reader::ValueReader;

/// Capability interface shared by file-backed and memory-backed segments
///
/// All methods take `&self`: readers use positional reads and the write
/// cursor is guarded internally, so a segment can be shared behind `Arc`.
pub trait Segment: Send + Sync + Debug {
    /// Segment id (file name for on-disk segments)
    fn id(&self) -> u32;

    /// Append a framed entry, returning `(offset, length)` of the record
    ///
    /// Fails with `SegmentFull` when the record would push a non-empty
    /// segment past its size limit, and with `DatabaseReadonly` once the
    /// segment is closed.
    fn write(&self, entry: &Entry) -> Result<(u64, u64)>;

    /// Fill `buf` with the bytes starting at `offset`
    fn read_bytes_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Flush written records to durable storage
    fn sync(&self) -> Result<()>;

    /// Stop accepting writes; the segment stays readable
    fn close(&self) -> Result<()>;

    /// Current size in bytes (the write cursor)
    fn size(&self) -> u64;

    fn is_readonly(&self) -> bool;

    /// A read-only view of the records written so far
    fn reopen_readonly(&self) -> Arc<dyn Segment>;

    /// Read and verify the record at `(offset, len)`
    fn read_at(&self, offset: u64, len: u64) -> Result<Entry> {
        if len < HEADER_SIZE as u64 || offset.saturating_add(len) > self.size() {
            return Err(CaskError::Corruption(format!(
                "segment {}: location {}+{} outside {} bytes",
                self.id(),
                offset,
                len,
                self.size()
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_bytes_at(offset, &mut buf)?;
        Entry::decode(&buf, self.id(), offset)
    }
}

impl dyn Segment + '_ {
    /// Scan every record from the start of the segment
    pub fn entries(&self) -> EntryIter<'_> {
        EntryIter::new(self)
    }
}

/// `SegmentFull` check shared by the backings
///
/// An empty segment always accepts the record so an oversized entry can
/// never cause endless rotation.
pub(crate) fn would_overflow(current: u64, record_len: u64, max_size: u64) -> bool {
    max_size > 0 && current > 0 && current + record_len > max_size
}
