//! Error taxonomy: a flat `thiserror` enum with one variant per
//! failure class rather than one variant per call site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache configuration: {0}")]
    ConfigInvalid(String),

    #[error("shared-file I/O failed: {0}")]
    IoFailed(#[from] std::io::Error),

    #[error("advisory lock on page {page} timed out after {timeout_secs}s")]
    LockTimeout { page: u32, timeout_secs: u32 },

    #[error("page {page} is corrupt: {reason}")]
    PageCorrupt { page: u32, reason: String },

    #[error("callback failed: {0}")]
    CallbackFailed(String),

    #[error("reentrant call into the cache while page {page} is already locked by this handle")]
    LockReentrancy { page: u32 },
}

pub type CacheResult<T> = Result<T, CacheError>;
