//! Isolated read/write session
//!
//! A transaction pins three things when it starts: a snapshot of the index, a
//! read-only view of the segment that was active at that moment, and the
//! table of closed segments. Its own writes land in a private memory segment
//! and in its copy of the index, so reads see them immediately while nothing
//! is visible to the store until `commit`.
//!
//! There is no conflict detection: the last transaction to commit wins for
//! every key it wrote.

use std::sync::Arc;

use bytes::Bytes;

use crate::datafile::{Entry, MemorySegment, Segment, ValueReader};
use crate::error::{CaskError, Result};
use crate::index::{Item, KeyIndex};
use crate::store::{visit, Iter, Pinned, Store};

use super::Batch;

/// Segment id of a transaction's private write space; real segments never
/// reach it
pub const SCRATCH_SEGMENT_ID: u32 = u32::MAX;

/// A short-lived isolated view of a [`Store`], owned by a single caller
pub struct Transaction<'a> {
    store: &'a Store,
    /// Snapshot overlaid with this transaction's writes
    index: KeyIndex,
    /// Segments as of the start, plus the scratch segment
    segments: Pinned,
    scratch: Arc<MemorySegment>,
    batch: Batch,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(store: &'a Store, index: KeyIndex, mut segments: Pinned) -> Self {
        let scratch = Arc::new(MemorySegment::new(SCRATCH_SEGMENT_ID));
        segments.scratch = Some(Arc::clone(&scratch) as Arc<dyn Segment>);
        Self {
            store,
            index,
            segments,
            scratch,
            batch: store.batch(),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let item = self.index.get(key).ok_or(CaskError::KeyNotFound)?;
        self.segments.value(item)
    }

    /// Streaming reader over the value visible to this transaction
    pub fn get_reader(&self, key: &[u8]) -> Result<ValueReader> {
        let item = self.index.get(key).ok_or(CaskError::KeyNotFound)?;
        self.segments.reader(item)
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    /// Keys visible to this transaction
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn scan<F>(&self, prefix: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut result = Ok(());
        self.index
            .walk_prefix(prefix, |key, _| visit(&mut f, &mut result, key));
        result
    }

    pub fn range<F>(&self, start: &[u8], end: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut result = Ok(());
        self.index
            .walk_range(start, end, |key, _| visit(&mut f, &mut result, key))?;
        result
    }

    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut result = Ok(());
        self.index.walk(|key, _| visit(&mut f, &mut result, key));
        result
    }

    /// `(key, value)` pairs visible to this transaction, staged writes
    /// included, in key order
    ///
    /// The iterator is a snapshot: writes staged after it is created do not
    /// show up in it.
    pub fn iter(&self) -> Iter {
        Iter::new(self.index.snapshot(), self.segments.clone())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Stage `value` under `key`
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        if self.store.is_readonly() {
            return Err(CaskError::DatabaseReadonly);
        }
        let key = key.into();
        let value = value.into();
        self.batch.put(key.clone(), value.clone())?;

        let (offset, len) = self.scratch.write(&Entry::put(key.clone(), value))?;
        let item = Item {
            segment_id: SCRATCH_SEGMENT_ID,
            offset,
            len,
        };
        self.index.insert(Bytes::from(key), item);
        Ok(())
    }

    /// Stage a delete of `key`
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> Result<()> {
        if self.store.is_readonly() {
            return Err(CaskError::DatabaseReadonly);
        }
        let key = key.into();
        self.batch.delete(key.clone())?;
        self.index.delete(&key);
        Ok(())
    }

    /// Number of staged writes
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Apply the staged writes to the store in staging order
    pub fn commit(self) -> Result<()> {
        tracing::debug!(entries = self.batch.len(), "committing transaction");
        self.store.write_batch(&self.batch)
    }

    /// Drop every staged write
    pub fn discard(self) {
        tracing::debug!(entries = self.batch.len(), "discarding transaction");
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("pending", &self.batch.len())
            .field("keys", &self.index.len())
            .finish_non_exhaustive()
    }
}
