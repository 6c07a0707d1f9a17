//! Store Module
//!
//! The public face of the engine: opens a store directory, serves reads from
//! the key index plus segments, and commits writes to the active segment.
//!
//! ## Responsibilities
//! - Run the open sequence (config, lock, recovery, index, active segment)
//! - Route point/range/prefix reads through the index to the segments
//! - Append committed entries, rotating the active segment when it fills
//! - Persist the index and metadata on sync and close
//! - Compact segments (see [`merge`](self::merge))

mod merge;

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigBuilder};
use crate::datafile::{Entry, FileSegment, MemorySegment, Segment, ValueReader};
use crate::error::{CaskError, Result};
use crate::index::{self, Item, KeyIndex};
use crate::lock::LockFile;
use crate::metadata::Metadata;
use crate::paths::{self, CONFIG_FILENAME, INDEX_FILENAME, META_FILENAME};
use crate::recovery;
use crate::txn::{Batch, Transaction};

/// Segment table shared with snapshots; closed segments by id
pub(crate) type SegmentMap = BTreeMap<u32, Arc<dyn Segment>>;

/// Store-wide counters reported by [`Store::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Segments on disk, including the active one
    pub datafiles: usize,
    /// Live keys
    pub keys: usize,
    /// Bytes used by the store directory
    pub size: u64,
    /// Bytes held by superseded or deleted records
    pub reclaimable: u64,
}

/// Mutable store state, guarded by the store-wide lock
pub(crate) struct State {
    /// The single writable segment; always the highest id
    pub(crate) active: Arc<dyn Segment>,
    /// Every other segment, read-only
    pub(crate) datafiles: Arc<SegmentMap>,
    /// Live index
    pub(crate) index: KeyIndex,
    pub(crate) meta: Metadata,
    /// The active segment is an in-memory stand-in with no file behind it
    placeholder: bool,
}

impl State {
    /// Open the segments in `dir` and load or rebuild the index over them
    fn load(dir: &Path, config: &Config, readonly: bool, meta: Metadata) -> Result<Self> {
        let ids = paths::list_segment_ids(dir)?;

        // Step 1: Every segment but the newest is frozen
        let mut datafiles = SegmentMap::new();
        let (active_id, closed) = match ids.split_last() {
            Some((last, rest)) => (Some(*last), rest),
            None => (None, &[][..]),
        };
        for &id in closed {
            let segment = FileSegment::open(dir, id, true, config.max_datafile_size, config.file_mode)?;
            datafiles.insert(id, Arc::new(segment) as Arc<dyn Segment>);
        }

        // Step 2: The newest one is the active segment
        let placeholder = active_id.is_none() && readonly;
        let active: Arc<dyn Segment> = match (active_id, readonly) {
            (Some(id), _) => Arc::new(FileSegment::open(
                dir,
                id,
                readonly,
                config.max_datafile_size,
                config.file_mode,
            )?),
            (None, false) => Arc::new(FileSegment::open(
                dir,
                0,
                false,
                config.max_datafile_size,
                config.file_mode,
            )?),
            // Nothing on disk and nothing may be created
            (None, true) => Arc::new(MemorySegment::from_bytes(0, Vec::new())),
        };

        let mut state = Self {
            active,
            datafiles: Arc::new(datafiles),
            index: KeyIndex::new(),
            meta,
            placeholder,
        };

        // Step 3: Trust the saved index only if it was saved after the last write
        let index_path = dir.join(INDEX_FILENAME);
        let saved = if state.meta.index_up_to_date && index_path.exists() {
            match KeyIndex::load(&index_path) {
                Ok(index) if state.covers(&index) => Some(index),
                Ok(_) => {
                    tracing::warn!("saved index points past segment ends; rebuilding");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load saved index; rebuilding");
                    None
                }
            }
        } else {
            None
        };

        state.index = match saved {
            Some(index) => {
                tracing::debug!(keys = index.len(), "using saved index");
                index
            }
            None => {
                let index = recovery::rebuild_index(&state.segments())?;
                tracing::debug!(keys = index.len(), segments = ids.len(), "rebuilt index from segments");
                state.meta.index_up_to_date = false;
                index
            }
        };

        Ok(state)
    }

    /// All segments in ascending id order, active last
    pub(crate) fn segments(&self) -> Vec<Arc<dyn Segment>> {
        let mut segments: Vec<_> = self.datafiles.values().cloned().collect();
        segments.push(Arc::clone(&self.active));
        segments
    }

    /// Segments with a file on disk
    fn datafile_count(&self) -> usize {
        self.datafiles.len() + usize::from(!self.placeholder)
    }

    /// Pin the current segment set for a snapshot reader
    pub(crate) fn pin(&self) -> Pinned {
        Pinned {
            active: self.active.reopen_readonly(),
            datafiles: Arc::clone(&self.datafiles),
            scratch: None,
        }
    }

    pub(crate) fn segment(&self, id: u32) -> Option<Arc<dyn Segment>> {
        if id == self.active.id() {
            return Some(Arc::clone(&self.active));
        }
        self.datafiles.get(&id).cloned()
    }

    /// Every item of `index` lies inside a segment we have
    fn covers(&self, index: &KeyIndex) -> bool {
        index.iter().all(|(_, item)| match self.segment(item.segment_id) {
            Some(segment) => item.offset.saturating_add(item.len) <= segment.size(),
            None => false,
        })
    }

    /// Freeze the active segment and start the next one
    ///
    /// The next segment is opened first, so a failure leaves the current one
    /// writable.
    fn rotate(&mut self, dir: &Path, config: &Config) -> Result<()> {
        let next_id = self.active.id() + 1;
        let next = FileSegment::open(dir, next_id, false, config.max_datafile_size, config.file_mode)?;
        self.active.close()?;

        let previous = std::mem::replace(&mut self.active, Arc::new(next));
        Arc::make_mut(&mut self.datafiles).insert(previous.id(), previous);

        tracing::debug!(segment = next_id, "rotated active segment");
        Ok(())
    }
}

/// An open store
///
/// ## Concurrency Model
///
/// - One coarse `RwLock` guards the active segment, the segment table, the
///   live index and the metadata. Writers hold it for the length of a commit.
/// - Readers hold it only long enough to copy out an index item and the
///   segment it points at; the record itself is read after the lock is
///   released, through a positional read.
/// - Transactions and iterators work on O(1) index snapshots.
/// - A merge holds the write lock only to swap the compacted segments in.
pub struct Store {
    path: PathBuf,
    config: Config,
    readonly: bool,

    state: RwLock<State>,

    /// Set while a merge runs
    merging: AtomicBool,

    /// Set once `close` has run so `Drop` does not repeat it
    closed: AtomicBool,

    /// Held for the lifetime of a writable store
    _lock: Option<LockFile>,
}

impl Store {
    // =========================================================================
    // Open
    // =========================================================================

    /// Open or create the store at `path` with its persisted (or default) config
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ConfigBuilder::default())
    }

    /// Builder of caller overrides for [`Store::open_with`]
    pub fn builder() -> ConfigBuilder {
        Config::builder()
    }

    /// Open or create the store at `path`, applying `overrides` on top of the
    /// persisted config
    ///
    /// 1. Load `config.json` (or defaults) and apply the overrides
    /// 2. Take the directory lock, or fall back to read-only if allowed
    /// 3. Save the config and run the repair pass (writable opens only)
    /// 4. Load the saved index or rebuild it from the segments
    /// 5. Open the newest segment as the active one
    pub fn open_with(path: impl AsRef<Path>, overrides: ConfigBuilder) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Step 1: Persisted config plus overrides
        let config_path = path.join(CONFIG_FILENAME);
        let base = if config_path.exists() {
            Config::load(&config_path)?
        } else {
            Config::default()
        };
        let config = overrides.apply(base)?;

        paths::create_dir_all(&path, config.dir_mode)?;

        // Step 2: Cross-process lock
        let lock = LockFile::try_acquire(&path, config.file_mode)?;
        let readonly = match lock {
            Some(_) => false,
            None if config.open_readonly => true,
            None => return Err(CaskError::DatabaseLocked),
        };

        // Step 3: Writable opens own the directory
        if !readonly {
            config.save(&config_path)?;
            recovery::clear_merge_leftovers(&path)?;
            if config.auto_recovery {
                recovery::check_and_recover(&path, &config)?;
            }
        }

        // Steps 4 and 5: Segments and index
        let meta = Metadata::load_or_default(&path.join(META_FILENAME))?;
        let state = State::load(&path, &config, readonly, meta)?;

        tracing::info!(
            path = %path.display(),
            keys = state.index.len(),
            segments = state.datafiles.len() + 1,
            readonly,
            "opened store"
        );

        Ok(Self {
            path,
            config,
            readonly,
            state: RwLock::new(state),
            merging: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            _lock: lock,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let (item, segment) = {
            let state = self.state.read();
            let item = state.index.get(key).ok_or(CaskError::KeyNotFound)?;
            let segment = state.segment(item.segment_id).ok_or_else(|| missing_segment(item))?;
            (item, segment)
        };
        read_value(segment.as_ref(), item)
    }

    /// Streaming reader over the value stored under `key`
    ///
    /// The value is read in place from its segment as the reader advances, so
    /// large values need not be loaded whole.
    pub fn get_reader(&self, key: &[u8]) -> Result<ValueReader> {
        let (item, segment) = {
            let state = self.state.read();
            let item = state.index.get(key).ok_or(CaskError::KeyNotFound)?;
            let segment = state.segment(item.segment_id).ok_or_else(|| missing_segment(item))?;
            (item, segment)
        };
        ValueReader::new(segment, item.offset, item.len)
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.state.read().index.contains_key(key)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.state.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every key starting with `prefix` in ascending order
    ///
    /// The visitor's first error stops the walk and is returned.
    pub fn scan<F>(&self, prefix: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let index = self.snapshot();
        let mut result = Ok(());
        index.walk_prefix(prefix, |key, _| visit(&mut f, &mut result, key));
        result
    }

    /// Visit every key in `[start, end]` in ascending order
    pub fn range<F>(&self, start: &[u8], end: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let index = self.snapshot();
        let mut result = Ok(());
        index.walk_range(start, end, |key, _| visit(&mut f, &mut result, key))?;
        result
    }

    /// Visit every key in ascending order
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let index = self.snapshot();
        let mut result = Ok(());
        index.walk(|key, _| visit(&mut f, &mut result, key));
        result
    }

    /// Keys of a point-in-time snapshot, ascending
    pub fn keys(&self) -> Vec<Bytes> {
        self.snapshot().keys()
    }

    /// `(key, value)` pairs of a point-in-time snapshot
    ///
    /// Ascending by key; `.rev()` walks descending. Values are read lazily,
    /// so a read failure surfaces as an `Err` item.
    pub fn iter(&self) -> Iter {
        let state = self.state.read();
        Iter::new(state.index.snapshot(), state.pin())
    }

    fn snapshot(&self) -> KeyIndex {
        self.state.read().index.snapshot()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `value` under `key`
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let mut batch = self.batch();
        batch.put(key, value)?;
        self.write_batch(&batch)
    }

    /// Remove `key`
    ///
    /// Deleting a key that does not exist still appends a tombstone.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        let mut batch = self.batch();
        batch.delete(key)?;
        self.write_batch(&batch)
    }

    /// An empty batch bound to this store's size limits
    pub fn batch(&self) -> Batch {
        Batch::new(&self.config)
    }

    /// Commit every entry of `batch` in order
    ///
    /// Each entry is appended to the log and then applied to the index before
    /// the next one is written. A failure part way through leaves the earlier
    /// entries committed.
    pub fn write_batch(&self, batch: &Batch) -> Result<()> {
        if self.readonly {
            return Err(CaskError::DatabaseReadonly);
        }
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();

        // The saved index stops matching the log with this write
        if state.meta.index_up_to_date {
            state.meta.index_up_to_date = false;
            state.meta.save(&self.path.join(META_FILENAME), self.config.file_mode)?;
        }

        for entry in batch.entries() {
            let (offset, len) = match state.active.write(entry) {
                Err(CaskError::SegmentFull) => {
                    state.rotate(&self.path, &self.config)?;
                    state.active.write(entry)?
                }
                result => result?,
            };
            if self.config.sync_writes {
                state.active.sync()?;
            }

            let item = Item {
                segment_id: state.active.id(),
                offset,
                len,
            };
            let reclaimed = match entry {
                Entry::Put { key, .. } => state.index.insert(key.clone(), item).map_or(0, |old| old.len),
                Entry::Delete { key } => state.index.delete(key).map_or(0, |old| old.len) + len,
            };
            state.meta.reclaimable_space += reclaimed;
        }

        Ok(())
    }

    /// Start an isolated read/write session over a snapshot of the store
    pub fn transaction(&self) -> Transaction<'_> {
        let state = self.state.read();
        Transaction::new(self, state.index.snapshot(), state.pin())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Flush the active segment and persist the index and metadata
    pub fn sync(&self) -> Result<()> {
        if self.readonly {
            return Ok(());
        }
        let mut state = self.state.write();
        self.persist(&mut state)
    }

    fn persist(&self, state: &mut State) -> Result<()> {
        state.active.sync()?;
        state
            .index
            .save(&self.path.join(INDEX_FILENAME), self.config.file_mode)?;
        state.meta.index_up_to_date = true;
        state.meta.save(&self.path.join(META_FILENAME), self.config.file_mode)
    }

    /// Persist everything and release the store
    pub fn close(self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.readonly {
            return Ok(());
        }

        let mut state = self.state.write();
        self.persist(&mut state)?;
        state.active.close()?;
        tracing::info!(path = %self.path.display(), keys = state.index.len(), "closed store");
        Ok(())
    }

    /// Copy the store's files into `dest`
    ///
    /// Writers are held off for the duration of the copy.
    pub fn backup(&self, dest: impl AsRef<Path>) -> Result<()> {
        let dest = dest.as_ref();
        let state = self.state.write();
        state.active.sync()?;
        paths::create_dir_all(dest, self.config.dir_mode)?;
        let bytes = paths::copy_dir_files(&self.path, dest)?;
        tracing::info!(dest = %dest.display(), bytes, "backed up store");
        Ok(())
    }

    pub fn stats(&self) -> Result<Stats> {
        let (datafiles, keys, reclaimable) = {
            let state = self.state.read();
            (
                state.datafile_count(),
                state.index.len(),
                state.meta.reclaimable_space,
            )
        };
        Ok(Stats {
            datafiles,
            keys,
            size: paths::dir_size(&self.path)?,
            reclaimable,
        })
    }

    /// Reclaim the space held by superseded and deleted records
    pub fn merge(&self) -> Result<()> {
        merge::run(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to close store");
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("readonly", &self.readonly)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Segments a snapshot reads from
///
/// The active segment is pinned as a read-only view of what it held when the
/// snapshot was taken. A transaction adds its scratch segment.
#[derive(Clone)]
pub(crate) struct Pinned {
    pub(crate) active: Arc<dyn Segment>,
    pub(crate) datafiles: Arc<SegmentMap>,
    pub(crate) scratch: Option<Arc<dyn Segment>>,
}

impl Pinned {
    pub(crate) fn segment(&self, item: Item) -> Result<&Arc<dyn Segment>> {
        if let Some(scratch) = &self.scratch {
            if scratch.id() == item.segment_id {
                return Ok(scratch);
            }
        }
        if item.segment_id == self.active.id() {
            return Ok(&self.active);
        }
        self.datafiles
            .get(&item.segment_id)
            .ok_or_else(|| missing_segment(item))
    }

    pub(crate) fn value(&self, item: Item) -> Result<Vec<u8>> {
        read_value(self.segment(item)?.as_ref(), item)
    }

    pub(crate) fn reader(&self, item: Item) -> Result<ValueReader> {
        ValueReader::new(Arc::clone(self.segment(item)?), item.offset, item.len)
    }
}

/// Iterator returned by [`Store::iter`] and [`Transaction::iter`]
pub struct Iter {
    index: KeyIndex,
    keys: index::Iter<Item>,
    segments: Pinned,
}

impl Iter {
    pub(crate) fn new(index: KeyIndex, segments: Pinned) -> Self {
        Self {
            keys: index.iter(),
            index,
            segments,
        }
    }

    /// Restrict the iterator to the keys starting with `prefix`
    ///
    /// Iteration restarts at the first such key, from either end, over the
    /// same snapshot.
    pub fn seek_prefix(&mut self, prefix: &[u8]) -> &mut Self {
        self.keys = self.index.prefix_iter(prefix);
        self
    }

    fn resolve(&self, key: Bytes, item: Item) -> Result<(Bytes, Vec<u8>)> {
        Ok((key, self.segments.value(item)?))
    }
}

impl std::fmt::Debug for Iter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iter")
            .field("remaining", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl Iterator for Iter {
    type Item = Result<(Bytes, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, item) = self.keys.next()?;
        Some(self.resolve(key, item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.keys.size_hint()
    }
}

impl DoubleEndedIterator for Iter {
    fn next_back(&mut self) -> Option<Self::Item> {
        let (key, item) = self.keys.next_back()?;
        Some(self.resolve(key, item))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Read the record at `item` and return its value
pub(crate) fn read_value(segment: &dyn Segment, item: Item) -> Result<Vec<u8>> {
    match segment.read_at(item.offset, item.len)? {
        Entry::Put { value, .. } => Ok(value),
        Entry::Delete { .. } => Err(CaskError::Corruption(format!(
            "segment {} offset {}: index points at a tombstone",
            item.segment_id, item.offset
        ))),
    }
}

pub(crate) fn missing_segment(item: Item) -> CaskError {
    CaskError::Corruption(format!("index points at missing segment {}", item.segment_id))
}

/// Feed one key to a fallible visitor, stopping the walk on its first error
pub(crate) fn visit<F>(f: &mut F, result: &mut Result<()>, key: &[u8]) -> ControlFlow<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    match f(key) {
        Ok(()) => ControlFlow::Continue(()),
        Err(e) => {
            *result = Err(e);
            ControlFlow::Break(())
        }
    }
}
