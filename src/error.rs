//! Error kinds surfaced by the index, the buffer manager, and the storage layer.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Meta page of an existing index file disagrees with the open parameters.
    #[error("index metadata mismatch: {0}")]
    BadIndexInfo(String),

    /// Scan bounds use the wrong comparison operators (low must be GT/GTE, high LT/LTE).
    #[error("bad scan opcodes")]
    BadOpcodes,

    /// Scan range with low > high.
    #[error("bad scan range")]
    BadScanrange,

    /// `scan_next`/`end_scan` without a successful `start_scan`.
    #[error("scan not initialized")]
    ScanNotInitialized,

    /// Normal termination of a range scan; not a failure.
    #[error("index scan completed")]
    IndexScanCompleted,

    /// Point lookup found no entry for the key.
    #[error("no such key found")]
    NoSuchKeyFound,

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("file already exists: {0}")]
    FileExists(PathBuf),

    /// End of the relation file during a scan; consumed by the bulk loader.
    #[error("end of file")]
    EndOfFile,

    /// Unpin of a page whose pin count is already zero.
    #[error("page {page_no} of file {file} is not pinned")]
    PageNotPinned { file: u32, page_no: u32 },

    /// Page is not resident in the buffer pool.
    #[error("page {page_no} of file {file} is not cached")]
    PageNotCached { file: u32, page_no: u32 },

    /// Every frame in the pool is pinned.
    #[error("buffer pool exhausted")]
    BufferExhausted,

    #[error("corrupt page: {0}")]
    CorruptPage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the buffer-manager kinds that release sites absorb (§5 pin discipline).
    pub fn is_unpin_noise(&self) -> bool {
        matches!(
            self,
            Error::PageNotPinned { .. } | Error::PageNotCached { .. }
        )
    }
}
