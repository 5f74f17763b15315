use thiserror::Error;

use crate::disk::PageId;

/// Errors returned by the paged file store and buffer pool.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying file operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// A page read returned fewer bytes than a full page.
    #[error("short read at page {page}: {got} of {expected} bytes")]
    ShortRead {
        page: PageId,
        got: usize,
        expected: usize,
    },
    /// A page write persisted fewer bytes than a full page.
    #[error("short write at page {page}: {got} of {expected} bytes")]
    ShortWrite {
        page: PageId,
        got: usize,
        expected: usize,
    },
    /// The page number is out of range or refers to a disposed page.
    #[error("invalid page {0}")]
    InvalidPage(PageId),
    /// The page is already on the file's free chain.
    #[error("page {0} is already free")]
    PageAlreadyFree(PageId),
    /// The page is pinned and cannot be fetched, disposed, or released.
    #[error("page {0} is pinned")]
    PageFixed(PageId),
    /// The page is not resident in the buffer pool.
    #[error("page {0} is not in the buffer pool")]
    PageNotInBuf(PageId),
    /// The page is resident but not pinned.
    #[error("page {0} is not pinned")]
    PageUnfixed(PageId),
    /// Every frame is pinned; no victim can be chosen.
    #[error("no unpinned frame available")]
    NoBuffer,
    /// The path is already registered with the pool.
    #[error("file is already open: {0}")]
    FileAlreadyOpen(String),
    /// The open-file table has reached its fixed capacity.
    #[error("open file table is full")]
    FileTableFull,
    /// The file handle does not name an open file.
    #[error("bad file handle {0}")]
    BadHandle(u32),
    /// The page directory already holds an entry for this page.
    #[error("duplicate page directory entry for page {0}")]
    DuplicateEntry(PageId),
    /// The page directory holds no entry for this page.
    #[error("missing page directory entry for page {0}")]
    EntryNotFound(PageId),
    /// The buffer pool lock was poisoned.
    #[error("buffer pool lock poisoned")]
    LockPoisoned,
}

/// Convenience alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;
