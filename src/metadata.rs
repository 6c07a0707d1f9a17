//! Store metadata persisted as `meta.json`

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CaskError, Result};
use crate::paths;

/// Store-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// The persisted `index` file matches the segments on disk
    pub index_up_to_date: bool,

    /// Bytes held by superseded or deleted records; reset only by merge
    pub reclaimable_space: u64,
}

impl Metadata {
    /// Load `meta.json`, or defaults when the file does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read(path)
            .map_err(|e| CaskError::BadMetadata(format!("{}: {}", path.display(), e)))?;
        serde_json::from_slice(&data)
            .map_err(|e| CaskError::BadMetadata(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path, file_mode: u32) -> Result<()> {
        let data =
            serde_json::to_vec(self).map_err(|e| CaskError::Serialization(e.to_string()))?;
        paths::write_file_atomic(path, &data, file_mode)
    }
}
