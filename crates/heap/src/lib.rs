mod record;
pub mod slotted;

pub use record::{RecordFile, RecordId, SpaceStats};

use thiserror::Error;

use storage::StorageError;

/// Errors returned by the slotted page codec and record files.
#[derive(Debug, Error)]
pub enum HeapError {
    /// The buffer pool or paged file failed underneath.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// The slot number is out of range or names a tombstone.
    #[error("invalid slot {0}")]
    InvalidSlot(u16),
    /// The page cannot hold the record.
    #[error("not enough free space in page")]
    NoSpace,
    /// The record exceeds what any page can hold.
    #[error("record of {0} bytes exceeds page capacity")]
    RecordTooLarge(usize),
}

/// Convenience alias for heap results.
pub type HeapResult<T> = Result<T, HeapError>;
