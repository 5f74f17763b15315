mod btree;
mod builder;
mod bulk;
mod key;
mod pagefmt;

pub use btree::BPlusIndex;
pub use builder::{build_from_scan, build_incremental, bulk_build};
pub use bulk::DEFAULT_FILL_FACTOR;
pub use key::{KeyType, compare_keys};
pub use pagefmt::{
    InternalView, LeafView, INTERNAL_MARKER, LEAF_MARKER, NO_PAGE, internal_capacity,
    leaf_capacity, pack_rid, unpack_rid,
};

use thiserror::Error;

use heap::HeapError;
use storage::StorageError;

/// Errors returned by index construction and probing.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    /// The key does not match the index's fixed attribute length.
    #[error("key length {got} does not match attribute length {expected}")]
    KeyLength { got: usize, expected: usize },
    /// The attribute length is not valid for the key type.
    #[error("invalid key length {len} for {key_type:?} keys")]
    InvalidKeyLength { key_type: KeyType, len: usize },
    /// The record id cannot be packed into the on-disk format.
    #[error("record id {page}:{slot} does not fit the packed format")]
    RidOverflow { page: u32, slot: u16 },
    /// An index page failed structural validation.
    #[error("corrupt index page: {0}")]
    Corrupt(String),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
