//! Ordered list of pending writes
//!
//! Keys and values are validated against the store limits when staged, so an
//! invalid entry never reaches the log.

use crate::config::Config;
use crate::datafile::Entry;
use crate::error::{CaskError, Result};

/// Staged puts and deletes, applied in staging order
#[derive(Debug, Clone)]
pub struct Batch {
    max_key_size: u32,
    max_value_size: u64,
    entries: Vec<Entry>,
}

impl Batch {
    /// An empty batch enforcing the limits of `config`
    pub fn new(config: &Config) -> Self {
        Self {
            max_key_size: config.max_key_size,
            max_value_size: config.max_value_size,
            entries: Vec::new(),
        }
    }

    /// Stage a write of `value` under `key`
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<&mut Self> {
        let key = key.into();
        let value = value.into();
        self.check_key(&key)?;
        self.check_value(&value)?;
        self.entries.push(Entry::put(key, value));
        Ok(self)
    }

    /// Stage a delete of `key`
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> Result<&mut Self> {
        let key = key.into();
        self.check_key(&key)?;
        self.entries.push(Entry::delete(key));
        Ok(self)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub(crate) fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }
        if self.max_key_size > 0 && key.len() as u64 > self.max_key_size as u64 {
            return Err(CaskError::KeyTooLarge {
                size: key.len(),
                max: self.max_key_size,
            });
        }
        Ok(())
    }

    pub(crate) fn check_value(&self, value: &[u8]) -> Result<()> {
        if self.max_value_size > 0 && value.len() as u64 > self.max_value_size {
            return Err(CaskError::ValueTooLarge {
                size: value.len(),
                max: self.max_value_size,
            });
        }
        Ok(())
    }
}
