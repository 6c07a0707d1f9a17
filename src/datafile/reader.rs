//! Streaming access to one stored value

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::{CaskError, Result};

use super::{RecordHeader, Segment, HEADER_SIZE};

/// `Read + Seek` over the value of a single record, read in place from its
/// segment
///
/// The record header is checked when the reader is created. The record
/// checksum is not: it covers the whole value, so use `get` when the bytes
/// must be verified.
#[derive(Debug)]
pub struct ValueReader {
    segment: Arc<dyn Segment>,
    /// Segment offset of the first value byte
    start: u64,
    len: u64,
    position: u64,
}

impl ValueReader {
    /// Reader over the value of the record at `(offset, len)` in `segment`
    pub fn new(segment: Arc<dyn Segment>, offset: u64, len: u64) -> Result<Self> {
        if len < HEADER_SIZE as u64 || offset.saturating_add(len) > segment.size() {
            return Err(CaskError::Corruption(format!(
                "segment {}: location {}+{} outside {} bytes",
                segment.id(),
                offset,
                len,
                segment.size()
            )));
        }

        let mut buf = [0u8; HEADER_SIZE];
        segment.read_bytes_at(offset, &mut buf)?;
        let header = RecordHeader::parse(&buf)?;
        if header.is_tombstone() {
            return Err(CaskError::Corruption(format!(
                "segment {} offset {}: index points at a tombstone",
                segment.id(),
                offset
            )));
        }
        if header.record_len() != len {
            return Err(CaskError::Corruption(format!(
                "segment {} offset {}: record is {} bytes, index says {}",
                segment.id(),
                offset,
                header.record_len(),
                len
            )));
        }

        Ok(Self {
            start: offset + HEADER_SIZE as u64 + header.key_len as u64,
            len: header.value_len,
            position: 0,
            segment,
        })
    }

    /// Value length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes left before the end of the value
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.position)
    }
}

impl Read for ValueReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.remaining().min(buf.len() as u64) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.segment
            .read_bytes_at(self.start + self.position, &mut buf[..n])
            .map_err(into_io)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for ValueReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.position = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

fn into_io(e: CaskError) -> io::Error {
    match e {
        CaskError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
