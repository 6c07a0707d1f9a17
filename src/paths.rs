//! On-disk layout of a store directory
//!
//! ```text
//! {store}/
//!   ├── lockfile       (flock held by the writing process)
//!   ├── config.json    (persisted Config)
//!   ├── meta.json      (index freshness + reclaimable bytes)
//!   ├── index          (persisted key index snapshot)
//!   ├── 000000000      (segments, ascending id; highest is active)
//!   └── 000000001
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

use crate::error::Result;

pub const LOCK_FILENAME: &str = "lockfile";
pub const CONFIG_FILENAME: &str = "config.json";
pub const META_FILENAME: &str = "meta.json";
pub const INDEX_FILENAME: &str = "index";

/// Suffix of the evidence copies written by the recovery pass
pub const RECOVERED_SUFFIX: &str = "recovered";

/// Prefix of the scratch directory a merge writes into
pub const MERGE_DIR_PREFIX: &str = "merge";

/// Where a merge parks the segments it replaces until the swap completes
pub const MERGE_RETIRED_DIR: &str = "retired";

/// Where a merge parks segments written during the merge while they are
/// renumbered
pub const MERGE_STAGED_DIR: &str = "staged";

/// Segment files are named by their zero-padded id: 42 → "000000042"
pub fn segment_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{:09}", id))
}

/// "000000042" → Some(42); anything that is not purely digits → None
pub fn parse_segment_id(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// All segment ids present in `dir`, ascending
pub fn list_segment_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(id) = parse_segment_id(&path) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// `create_dir_all` honouring the configured permission bits
pub fn create_dir_all(dir: &Path, mode: u32) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(dir)?;
    Ok(())
}

/// Open options for a file the store creates, with the configured mode
pub fn create_options(mode: u32) -> OpenOptions {
    let mut opts = OpenOptions::new();
    #[cfg(unix)]
    opts.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    opts
}

/// Write `data` to a sibling temp file, fsync it, then rename over `path`
pub fn write_file_atomic(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = create_options(mode)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// fsync a directory so newly created or renamed entries are durable
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Total size of the regular files directly inside `dir`, excluding the lock file
pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() && entry.file_name() != LOCK_FILENAME {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Copy every regular file of `src` into `dst`, skipping the lock file
pub fn copy_dir_files(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() || entry.file_name() == LOCK_FILENAME {
            continue;
        }
        copied += fs::copy(entry.path(), dst.join(entry.file_name()))?;
    }
    Ok(copied)
}
