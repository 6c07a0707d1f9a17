//! Merge (compaction)
//!
//! 1. Freeze the active segment and start a new one; the id of the frozen
//!    segment is the merge frontier
//! 2. Copy every live key whose record sits at or below the frontier into a
//!    temporary store inside the store directory, without holding the lock
//! 3. Under the write lock, retire the segments at or below the frontier,
//!    move the compacted segments in as ids `0..n` and renumber the segments
//!    written during the merge to follow them
//! 4. Rebuild the index over the new segment set
//!
//! Every rename of step 3 is journaled. If the swap fails part way, the
//! renames are undone and the store reopens writable over its old segments.
//! Retired segments are deleted only once the whole swap has succeeded.
//!
//! Renumbering keeps log order equal to write order, so replaying the new
//! segment set gives the same answer as the index it replaces.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ConfigBuilder;
use crate::error::{CaskError, Result};
use crate::paths::{
    self, INDEX_FILENAME, MERGE_DIR_PREFIX, MERGE_RETIRED_DIR, MERGE_STAGED_DIR, META_FILENAME,
};

use super::{read_value, State, Store};

/// Clears the in-progress flag however the merge ends
struct MergeGuard<'a>(&'a AtomicBool);

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(super) fn run(store: &Store) -> Result<()> {
    if store.readonly {
        return Err(CaskError::DatabaseReadonly);
    }
    if store.merging.swap(true, Ordering::AcqRel) {
        return Err(CaskError::MergeInProgress);
    }
    let _guard = MergeGuard(&store.merging);

    let dir = store.path.as_path();
    let size_before = paths::dir_size(dir)?;

    // Step 1: Freeze the active segment and pin what we are about to copy
    let (frontier, index, segments) = {
        let mut state = store.state.write();
        let frontier = state.active.id();
        state.rotate(dir, &store.config)?;
        (frontier, state.index.snapshot(), state.datafiles.clone())
    };
    tracing::info!(frontier, keys = index.len(), "merge started");

    // Step 2: Copy live records into a scratch store
    let scratch = tempfile::Builder::new()
        .prefix(MERGE_DIR_PREFIX)
        .tempdir_in(dir)?;
    let overrides = ConfigBuilder::from(store.config.clone())
        .auto_recovery(false)
        .open_readonly(false);
    let merged = Store::open_with(scratch.path(), overrides)?;

    let mut copied = 0usize;
    for (key, item) in index.iter() {
        if item.segment_id > frontier {
            continue;
        }
        let segment = segments
            .get(&item.segment_id)
            .ok_or_else(|| super::missing_segment(item))?;
        let value = read_value(segment.as_ref(), item)?;
        merged.put(key.to_vec(), value)?;
        copied += 1;
    }
    merged.close()?;

    // From here on the scratch directory may hold the only copy of retired
    // segments, so it must outlive an early return
    let scratch = scratch.keep();

    // Step 3: Swap segment sets; nothing reads or writes until the index is rebuilt
    let mut state = store.state.write();
    let mut renames = Renames::default();
    let swapped = swap(store, &mut state, &scratch, frontier, &mut renames);

    let retired = match swapped {
        Ok(retired) => retired,
        Err(e) => {
            tracing::warn!(error = %e, "merge swap failed; restoring previous segments");
            restore(store, &mut state, &scratch, renames);
            return Err(e);
        }
    };
    let keys = state.index.len();
    drop(state);

    if let Err(e) = fs::remove_dir_all(&scratch) {
        tracing::warn!(dir = %scratch.display(), error = %e, "failed to remove merge directory");
    }

    let size_after = paths::dir_size(dir)?;
    tracing::info!(
        copied,
        keys,
        retired,
        size_before,
        size_after,
        "merge finished"
    );
    Ok(())
}

/// Move the compacted segments in and reload the store over them,
/// returning the number of segments retired
fn swap(
    store: &Store,
    state: &mut State,
    scratch: &Path,
    frontier: u32,
    renames: &mut Renames,
) -> Result<usize> {
    let dir = store.path.as_path();
    state.active.close()?;

    let merged_ids = paths::list_segment_ids(scratch)?;
    let (retired_ids, newer_ids): (Vec<u32>, Vec<u32>) = paths::list_segment_ids(dir)?
        .into_iter()
        .partition(|&id| id <= frontier);

    let retired = scratch.join(MERGE_RETIRED_DIR);
    let staged = scratch.join(MERGE_STAGED_DIR);
    fs::create_dir(&retired)?;
    fs::create_dir(&staged)?;

    for &id in &retired_ids {
        renames.apply(dir, id, &retired, id)?;
    }
    let first_newer = merged_ids.len() as u32;
    for (k, &id) in newer_ids.iter().enumerate() {
        renames.apply(dir, id, &staged, first_newer + k as u32)?;
    }
    for (k, &id) in merged_ids.iter().enumerate() {
        renames.apply(scratch, id, dir, k as u32)?;
    }
    for k in 0..newer_ids.len() as u32 {
        renames.apply(&staged, first_newer + k, dir, first_newer + k)?;
    }
    paths::sync_dir(dir)?;

    let mut meta = state.meta.clone();
    meta.reclaimable_space = 0;
    meta.index_up_to_date = false;
    meta.save(&dir.join(META_FILENAME), store.config.file_mode)?;

    let index_path = dir.join(INDEX_FILENAME);
    if index_path.exists() {
        fs::remove_file(&index_path)?;
    }

    // Step 4: Reopen over the new segment set
    *state = State::load(dir, &store.config, false, meta)?;
    Ok(retired_ids.len())
}

/// Undo a partial swap and reopen the store writable over the old segments
fn restore(store: &Store, state: &mut State, scratch: &Path, renames: Renames) {
    let dir = store.path.as_path();
    let rolled_back = renames.rollback();

    // The index may have been removed or may be stale relative to the
    // renumbered files; replay is always correct
    let mut meta = state.meta.clone();
    meta.index_up_to_date = false;
    match State::load(dir, &store.config, false, meta) {
        Ok(reloaded) => *state = reloaded,
        Err(e) => {
            tracing::error!(error = %e, "failed to reopen segments after merge failure");
            return;
        }
    }

    if rolled_back {
        if let Err(e) = fs::remove_dir_all(scratch) {
            tracing::warn!(dir = %scratch.display(), error = %e, "failed to remove merge directory");
        }
    } else {
        tracing::error!(
            dir = %scratch.display(),
            "merge could not restore every segment; the rest are kept in the merge directory"
        );
    }
}

/// Segment renames performed so far, so a failed swap can be undone
#[derive(Default)]
struct Renames {
    done: Vec<(PathBuf, PathBuf)>,
}

impl Renames {
    fn apply(&mut self, from_dir: &Path, from_id: u32, to_dir: &Path, to_id: u32) -> Result<()> {
        let from = paths::segment_path(from_dir, from_id);
        let to = paths::segment_path(to_dir, to_id);
        fs::rename(&from, &to)?;
        self.done.push((from, to));
        Ok(())
    }

    /// Undo every rename, newest first; false if any could not be undone
    fn rollback(self) -> bool {
        let mut complete = true;
        for (from, to) in self.done.into_iter().rev() {
            if let Err(e) = fs::rename(&to, &from) {
                tracing::error!(from = %to.display(), to = %from.display(), error = %e, "failed to undo segment move");
                complete = false;
            }
        }
        complete
    }
}
