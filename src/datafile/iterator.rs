//! Sequential scan over the records of a segment
//!
//! Used to rebuild the key index and by the recovery pass. The iterator fuses
//! after the first error; `position()` then points at the start of the first
//! record that could not be read, i.e. the length of the valid prefix.

use crate::error::{CaskError, Result};

use super::entry::{Entry, RecordHeader, HEADER_SIZE};
use super::Segment;

/// A record read during a scan, with its location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    pub offset: u64,
    pub len: u64,
    pub entry: Entry,
}

/// Iterator over the records of a segment in log order
pub struct EntryIter<'a> {
    segment: &'a dyn Segment,
    /// Start of the next record
    offset: u64,
    /// Stop here (segment size at creation)
    end: u64,
    done: bool,
}

impl<'a> EntryIter<'a> {
    pub(super) fn new(segment: &'a dyn Segment) -> Self {
        Self {
            segment,
            offset: 0,
            end: segment.size(),
            done: false,
        }
    }

    /// Offset of the next record (or of the failing one after an error)
    pub fn position(&self) -> u64 {
        self.offset
    }

    fn read_next(&mut self) -> Result<ScannedEntry> {
        let remaining = self.end - self.offset;
        if remaining < HEADER_SIZE as u64 {
            return Err(CaskError::Corruption(format!(
                "truncated header at offset {} ({} trailing bytes)",
                self.offset, remaining
            )));
        }

        let mut header_buf = [0u8; HEADER_SIZE];
        self.segment.read_bytes_at(self.offset, &mut header_buf)?;
        let header = RecordHeader::parse(&header_buf)?;

        let len = header.record_len();
        if len > remaining {
            return Err(CaskError::Corruption(format!(
                "truncated record at offset {}: needs {} bytes, {} left",
                self.offset, len, remaining
            )));
        }

        let mut buf = vec![0u8; len as usize];
        self.segment.read_bytes_at(self.offset, &mut buf)?;
        let entry = Entry::decode(&buf, self.segment.id(), self.offset)?;

        Ok(ScannedEntry {
            offset: self.offset,
            len,
            entry,
        })
    }
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = Result<ScannedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.end {
            return None;
        }

        match self.read_next() {
            Ok(scanned) => {
                self.offset += scanned.len;
                Some(Ok(scanned))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
