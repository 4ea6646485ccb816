//! Coordination store errors

use thiserror::Error;

/// etcd v2 error code for a missing key.
pub const CODE_KEY_NOT_FOUND: u64 = 100;
/// etcd v2 error code for a failed compare (prevValue/prevIndex mismatch).
pub const CODE_TEST_FAILED: u64 = 101;
/// etcd v2 error code returned when a directory operation targets a file.
pub const CODE_NOT_DIR: u64 = 104;
/// etcd v2 error code for `prevExist=false` against an existing key.
pub const CODE_NODE_EXIST: u64 = 105;
/// etcd v2 error code when the requested watch index has been compacted away.
pub const CODE_EVENT_INDEX_CLEARED: u64 = 401;

/// Errors returned by [`crate::KeyValueStore`] implementations.
///
/// `NotFound`, `AlreadyExists` and `CompareFailed` are control-flow signals for
/// callers (absent resource, lock contention, lost ownership) rather than faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("compare failed for key: {0}")]
    CompareFailed(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("watch index cleared for key: {0}")]
    EventIndexCleared(String),

    #[error("etcd API error {code}: {message}")]
    Api { code: u64, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Map an etcd error body onto a typed variant.
    pub fn from_code(code: u64, message: String, key: &str) -> Self {
        match code {
            CODE_KEY_NOT_FOUND => Self::NotFound(key.to_string()),
            CODE_TEST_FAILED => Self::CompareFailed(key.to_string()),
            CODE_NOT_DIR => Self::NotADirectory(key.to_string()),
            CODE_NODE_EXIST => Self::AlreadyExists(key.to_string()),
            CODE_EVENT_INDEX_CLEARED => Self::EventIndexCleared(key.to_string()),
            _ => Self::Api { code, message },
        }
    }

    /// True for a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when the transport gave up waiting, which long-poll watches hit routinely.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_timeout())
    }
}
