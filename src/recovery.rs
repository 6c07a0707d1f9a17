//! Crash recovery
//!
//! A crash can only leave a segment with a bad tail: records are appended with
//! a single framed write. The repair pass finds the longest valid prefix of
//! every segment, keeps a copy of the original bytes as `<segment>.recovered`,
//! and truncates the segment to that prefix. A persisted index that no longer
//! decodes is moved aside to `index.recovered`.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::datafile::{FileSegment, Segment};
use crate::error::Result;
use crate::index::{Item, KeyIndex};
use crate::metadata::Metadata;
use crate::paths::{
    self, INDEX_FILENAME, MERGE_DIR_PREFIX, MERGE_RETIRED_DIR, META_FILENAME, RECOVERED_SUFFIX,
};

/// What a repair pass found and changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Segments scanned
    pub segments_checked: usize,
    /// Segments cut back to their last valid record
    pub segments_truncated: usize,
    /// Bytes removed from segment tails
    pub bytes_discarded: u64,
    /// The persisted index was unreadable and moved aside
    pub index_quarantined: bool,
}

impl RecoveryReport {
    pub fn repaired(&self) -> bool {
        self.segments_truncated > 0 || self.index_quarantined
    }
}

/// Scan and repair the store at `path` without opening it
///
/// The caller must hold the store lock (or know no other process uses the
/// directory). Any repair marks the persisted index as stale so the next open
/// rebuilds it from the segments.
pub fn check_and_recover(path: &Path, config: &Config) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for id in paths::list_segment_ids(path)? {
        report.segments_checked += 1;
        if let Some(discarded) = repair_segment(path, id, config)? {
            report.segments_truncated += 1;
            report.bytes_discarded += discarded;
        }
    }

    let index_path = path.join(INDEX_FILENAME);
    if index_path.exists() {
        if let Err(e) = KeyIndex::load(&index_path) {
            let quarantine = recovered_path(&index_path);
            tracing::warn!(error = %e, to = %quarantine.display(), "moving unreadable index aside");
            fs::rename(&index_path, &quarantine)?;
            report.index_quarantined = true;
        }
    }

    if report.repaired() {
        let meta_path = path.join(META_FILENAME);
        let mut meta = Metadata::load_or_default(&meta_path)?;
        meta.index_up_to_date = false;
        meta.save(&meta_path, config.file_mode)?;
        tracing::info!(
            segments = report.segments_truncated,
            bytes = report.bytes_discarded,
            index = report.index_quarantined,
            "recovered store"
        );
    }

    Ok(report)
}

/// Deal with scratch directories left behind by an interrupted merge
///
/// A directory that holds only compacted copies is removed. One that still
/// holds retired segments means the swap itself was cut short; it is kept for
/// manual inspection. Returns the number of directories removed.
pub fn clear_merge_leftovers(path: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name();
        if !entry.file_type()?.is_dir() || !name.to_string_lossy().starts_with(MERGE_DIR_PREFIX) {
            continue;
        }

        let scratch = entry.path();
        let retired = paths::list_segment_ids(&scratch.join(MERGE_RETIRED_DIR)).unwrap_or_default();
        if retired.is_empty() {
            tracing::warn!(dir = %scratch.display(), "removing leftover merge directory");
            fs::remove_dir_all(&scratch)?;
            removed += 1;
        } else {
            tracing::warn!(
                dir = %scratch.display(),
                retired = retired.len(),
                "interrupted merge left retired segments behind; keeping them"
            );
        }
    }
    Ok(removed)
}

/// Truncate segment `id` to its valid prefix, returning the bytes removed
fn repair_segment(dir: &Path, id: u32, config: &Config) -> Result<Option<u64>> {
    let segment = FileSegment::open(dir, id, true, 0, config.file_mode)?;
    let size = segment.size();

    let segment: &dyn Segment = &segment;
    let mut entries = segment.entries();
    let mut failure = None;
    for scanned in entries.by_ref() {
        if let Err(e) = scanned {
            failure = Some(e);
            break;
        }
    }
    let Some(error) = failure else {
        return Ok(None);
    };
    let valid = entries.position();

    let path = paths::segment_path(dir, id);
    let backup = recovered_path(&path);
    tracing::warn!(
        segment = id,
        offset = valid,
        discarded = size - valid,
        error = %error,
        "truncating corrupt segment"
    );
    fs::copy(&path, &backup)?;

    let file = OpenOptions::new().write(true).open(&path)?;
    file.set_len(valid)?;
    file.sync_all()?;

    Ok(Some(size - valid))
}

fn recovered_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(RECOVERED_SUFFIX);
    path.with_file_name(name)
}

/// Build an index by replaying segments in the order given
///
/// Later records win over earlier ones for the same key; a tombstone removes
/// the key. Segments must be passed in ascending id order.
pub fn rebuild_index(segments: &[Arc<dyn Segment>]) -> Result<KeyIndex> {
    let mut index = KeyIndex::new();
    for segment in segments {
        for scanned in segment.entries() {
            let scanned = scanned?;
            if scanned.entry.is_tombstone() {
                index.delete(scanned.entry.key());
            } else {
                let item = Item {
                    segment_id: segment.id(),
                    offset: scanned.offset,
                    len: scanned.len,
                };
                index.insert(scanned.entry.key().to_vec(), item);
            }
        }
    }
    Ok(index)
}
