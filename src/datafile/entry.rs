//! Log record encoding
//!
//! A record is written with a single framed write so a crash can only ever
//! leave a truncated *tail*, never a torn record in the middle of a segment.

use crate::error::{CaskError, Result};

/// Header size: CRC (4) + Flags (1) + KeyLen (4) + ValueLen (8) = 17 bytes
pub const HEADER_SIZE: usize = 17;

/// Flag: the record deletes its key
pub const FLAG_TOMBSTONE: u8 = 1 << 0;

const KNOWN_FLAGS: u8 = FLAG_TOMBSTONE;

/// A single logical record as stored in a segment
///
/// Deletions are explicit `Delete` records; a `Put` with an empty value is a
/// live key whose value happens to be zero bytes long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Store a value for a key
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Tombstone for a key
    Delete { key: Vec<u8> },
}

impl Entry {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Entry::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Entry::Delete { key: key.into() }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Entry::Put { key, .. } | Entry::Delete { key } => key,
        }
    }

    /// The stored value, or `None` for a tombstone
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Entry::Put { value, .. } => Some(value),
            Entry::Delete { .. } => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Entry::Delete { .. })
    }

    /// Total bytes this entry occupies on disk once framed
    pub fn encoded_len(&self) -> u64 {
        let value_len = self.value().map_or(0, |v| v.len());
        (HEADER_SIZE + self.key().len() + value_len) as u64
    }

    /// Frame the entry: `[crc][flags][key_len][value_len][key][value]`
    ///
    /// The CRC covers everything after itself, so a flipped bit in the
    /// header, key, or value is caught on read.
    pub fn encode(&self) -> Vec<u8> {
        let key = self.key();
        let value = self.value().unwrap_or(&[]);
        let flags = if self.is_tombstone() { FLAG_TOMBSTONE } else { 0 };

        let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + value.len());
        buf.extend_from_slice(&[0u8; 4]);
        buf.push(flags);
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);

        let crc = crc32fast::hash(&buf[4..]);
        buf[0..4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode one complete framed record
    ///
    /// `segment_id` and `offset` only label the error on a checksum failure.
    pub fn decode(buf: &[u8], segment_id: u32, offset: u64) -> Result<Self> {
        let header = RecordHeader::parse(buf)?;
        if buf.len() as u64 != header.record_len() {
            return Err(CaskError::Corruption(format!(
                "record length mismatch: header says {}, have {} bytes",
                header.record_len(),
                buf.len()
            )));
        }

        if crc32fast::hash(&buf[4..]) != header.checksum {
            return Err(CaskError::ChecksumMismatch { segment_id, offset });
        }

        let key_end = HEADER_SIZE + header.key_len as usize;
        let key = buf[HEADER_SIZE..key_end].to_vec();

        if header.is_tombstone() {
            Ok(Entry::Delete { key })
        } else {
            Ok(Entry::Put {
                key,
                value: buf[key_end..].to_vec(),
            })
        }
    }
}

/// Fixed-size prefix of every record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub checksum: u32,
    pub flags: u8,
    pub key_len: u32,
    pub value_len: u64,
}

impl RecordHeader {
    /// Parse and sanity-check the first `HEADER_SIZE` bytes of `buf`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CaskError::Corruption(format!(
                "truncated header: {} of {} bytes",
                buf.len(),
                HEADER_SIZE
            )));
        }

        let mut crc = [0u8; 4];
        crc.copy_from_slice(&buf[0..4]);
        let mut key_len = [0u8; 4];
        key_len.copy_from_slice(&buf[5..9]);
        let mut value_len = [0u8; 8];
        value_len.copy_from_slice(&buf[9..17]);

        let header = Self {
            checksum: u32::from_le_bytes(crc),
            flags: buf[4],
            key_len: u32::from_le_bytes(key_len),
            value_len: u64::from_le_bytes(value_len),
        };

        if header.flags & !KNOWN_FLAGS != 0 {
            return Err(CaskError::Corruption(format!(
                "unknown record flags 0x{:02x}",
                header.flags
            )));
        }
        if header.key_len == 0 {
            return Err(CaskError::Corruption("record with empty key".to_string()));
        }
        if header.is_tombstone() && header.value_len != 0 {
            return Err(CaskError::Corruption(
                "tombstone record carries a value".to_string(),
            ));
        }

        Ok(header)
    }

    pub fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }

    /// Length of the full record this header introduces
    pub fn record_len(&self) -> u64 {
        (HEADER_SIZE as u64 + self.key_len as u64).saturating_add(self.value_len)
    }
}
