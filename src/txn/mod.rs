//! Transaction & Batch Module
//!
//! ## Responsibilities
//! - Stage puts and deletes, validating them before anything is written
//! - Give a session an isolated view: a pinned index snapshot plus its own
//!   uncommitted writes
//! - Hand staged writes to the store for an in-order commit

mod batch;
mod transaction;

pub use batch::Batch;
pub use transaction::{Transaction, SCRATCH_SEGMENT_ID};
