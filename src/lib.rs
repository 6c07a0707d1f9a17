//! # CaskDB
//!
//! An embedded, log-structured key-value store in the Bitcask style:
//! - Append-only segments of checksummed records
//! - A persistent (copy-on-write) ordered key index with O(1) snapshots
//! - Snapshot-isolated transactions and validated write batches
//! - Merge compaction that reclaims superseded and deleted records
//! - Crash recovery that truncates bad segment tails and rebuilds the index
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                               │
//! │        (open sequence, RwLock over store state)             │
//! └──────┬──────────────────┬─────────────────────┬─────────────┘
//!        │                  │                     │
//!        ▼                  ▼                     ▼
//!  ┌───────────┐     ┌─────────────┐      ┌──────────────┐
//!  │ Txn/Batch │     │  Key Index  │      │    Merge     │
//!  │ (staging) │     │ (AVL + Arc) │      │ (compaction) │
//!  └─────┬─────┘     └──────┬──────┘      └──────┬───────┘
//!        │                  │ key → (segment, offset, len)
//!        ▼                  ▼                     ▼
//!  ┌─────────────────────────────────────────────────────────────┐
//!  │                Segments (append-only log)                   │
//!  │        000000000  000000001  ...  active (highest id)       │
//!  └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use caskdb::Store;
//!
//! # fn main() -> caskdb::Result<()> {
//! let store = Store::open("/tmp/caskdb")?;
//! store.put("hello", "world")?;
//! assert_eq!(store.get(b"hello")?, b"world");
//! store.close()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod datafile;
pub mod index;
pub mod lock;
pub mod metadata;
pub mod paths;
pub mod recovery;
pub mod store;
pub mod txn;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, ConfigBuilder};
pub use datafile::ValueReader;
pub use error::{CaskError, Result};
pub use recovery::{check_and_recover, RecoveryReport};
pub use store::{Iter, Stats, Store};
pub use txn::{Batch, Transaction};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CaskDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
