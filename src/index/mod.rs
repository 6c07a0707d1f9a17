//! Key Index Module
//!
//! Ordered, copy-on-write mapping from key to the location of its latest
//! live record.
//!
//! ## Responsibilities
//! - Point lookups, inserts and deletes in O(log n)
//! - O(1) snapshots that later mutations never disturb
//! - Ordered range and prefix walks in lexicographic byte order
//! - Persisting the full mapping to the `index` file and loading it back
//!
//! ## Index File Format
//! ```text
//! ┌──────────────┬───────────┬─────────────────┬──────────────────────────────┐
//! │ Magic "CKIX" │ CRC32 (4) │ PayloadLen (8)  │ Payload                      │
//! └──────────────┴───────────┴─────────────────┴──────────────────────────────┘
//!   Payload = bincode(count: u64) followed by count × bincode((key, Item))
//! ```

mod tree;

use std::io::Cursor;
use std::ops::{Bound, ControlFlow};
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CaskError, Result};
use crate::paths;

pub use tree::{prefix_successor, Iter};

const INDEX_MAGIC: &[u8; 4] = b"CKIX";
const INDEX_HEADER_SIZE: usize = 16;

/// Location of the latest live record for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub segment_id: u32,
    pub offset: u64,
    /// Full framed record length
    pub len: u64,
}

/// Persistent ordered index
///
/// `Clone` is the snapshot operation: it shares every node with the original
/// and the two evolve independently afterwards.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    tree: tree::Tree<Item>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<Item> {
        self.tree.get(key).copied()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.tree.contains_key(key)
    }

    /// Point `key` at `item`, returning the location it replaces
    pub fn insert(&mut self, key: impl Into<Bytes>, item: Item) -> Option<Item> {
        self.tree.insert(key.into(), item)
    }

    /// Drop `key`, returning its last location
    pub fn delete(&mut self, key: &[u8]) -> Option<Item> {
        self.tree.remove(key)
    }

    /// Immutable point-in-time view
    pub fn snapshot(&self) -> KeyIndex {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Visit every key in `[start, end]` in ascending order
    ///
    /// Fails with `InvalidRange` when `start` sorts after `end`.
    pub fn walk_range<F>(&self, start: &[u8], end: &[u8], mut visitor: F) -> Result<()>
    where
        F: FnMut(&Bytes, &Item) -> ControlFlow<()>,
    {
        if start > end {
            return Err(CaskError::InvalidRange);
        }
        let _ = self
            .tree
            .walk_range(Bound::Included(start), Bound::Included(end), &mut visitor);
        Ok(())
    }

    /// Visit every key starting with `prefix` in ascending order
    pub fn walk_prefix<F>(&self, prefix: &[u8], mut visitor: F)
    where
        F: FnMut(&Bytes, &Item) -> ControlFlow<()>,
    {
        let _ = self.tree.walk_prefix(prefix, &mut visitor);
    }

    /// Visit every key in ascending order
    pub fn walk<F>(&self, mut visitor: F)
    where
        F: FnMut(&Bytes, &Item) -> ControlFlow<()>,
    {
        let _ = self
            .tree
            .walk_range(Bound::Unbounded, Bound::Unbounded, &mut visitor);
    }

    pub fn iter(&self) -> Iter<Item> {
        self.tree.iter()
    }

    /// Iterator over the keys starting with `prefix`
    pub fn prefix_iter(&self, prefix: &[u8]) -> Iter<Item> {
        self.tree.prefix(prefix)
    }

    /// Iterator over the keys in `[start, end]`
    pub fn range_iter(&self, start: &[u8], end: &[u8]) -> Result<Iter<Item>> {
        if start > end {
            return Err(CaskError::InvalidRange);
        }
        Ok(self.tree.range(Bound::Included(start), Bound::Included(end)))
    }

    pub fn keys(&self) -> Vec<Bytes> {
        self.iter().map(|(key, _)| key).collect()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the full mapping to `path` atomically
    pub fn save(&self, path: &Path, file_mode: u32) -> Result<()> {
        let mut payload = Vec::new();
        bincode::serialize_into(&mut payload, &(self.len() as u64))?;
        for (key, item) in self.iter() {
            bincode::serialize_into(&mut payload, &(&key[..], item))?;
        }

        let mut buf = Vec::with_capacity(INDEX_HEADER_SIZE + payload.len());
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&payload);

        paths::write_file_atomic(path, &buf, file_mode)?;
        tracing::debug!(keys = self.len(), bytes = buf.len(), "saved index");
        Ok(())
    }

    /// Read a mapping written by [`KeyIndex::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let buf = std::fs::read(path)?;
        if buf.len() < INDEX_HEADER_SIZE || &buf[0..4] != INDEX_MAGIC {
            return Err(CaskError::Corruption(format!(
                "{}: not an index file",
                path.display()
            )));
        }

        let checksum = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&buf[8..16]);
        let payload_len = u64::from_le_bytes(len_bytes);

        let payload = &buf[INDEX_HEADER_SIZE..];
        if payload.len() as u64 != payload_len {
            return Err(CaskError::Corruption(format!(
                "{}: payload is {} bytes, header says {}",
                path.display(),
                payload.len(),
                payload_len
            )));
        }
        if crc32fast::hash(payload) != checksum {
            return Err(CaskError::Corruption(format!(
                "{}: checksum mismatch",
                path.display()
            )));
        }

        let mut cursor = Cursor::new(payload);
        let count: u64 = bincode::deserialize_from(&mut cursor)?;
        let mut index = KeyIndex::new();
        for _ in 0..count {
            let (key, item): (Vec<u8>, Item) = bincode::deserialize_from(&mut cursor)?;
            index.insert(key, item);
        }
        if cursor.position() != payload_len {
            return Err(CaskError::Corruption(format!(
                "{}: trailing bytes after {} records",
                path.display(),
                count
            )));
        }

        tracing::debug!(keys = index.len(), "loaded index");
        Ok(index)
    }
}

impl FromIterator<(Bytes, Item)> for KeyIndex {
    fn from_iter<T: IntoIterator<Item = (Bytes, Item)>>(iter: T) -> Self {
        let mut index = KeyIndex::new();
        for (key, item) in iter {
            index.insert(key, item);
        }
        index
    }
}

impl PartialEq for KeyIndex {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for KeyIndex {}
