//! Status taxonomy shared by every engine.
//!
//! Mirrors the storage status kinds surfaced to callers:
//! `NotFound` (absent or stale key, never fatal on its own), `Corruption`
//! (format/invariant/type violations and KV-layer failures),
//! `InvalidArgument` (bad parameters), `Incomplete` (operation cut short
//! by shutdown).

use thiserror::Error;

/// Storage error returned by all engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Key absent, expired or logically deleted.
    #[error("not found: {0}")]
    NotFound(String),
    /// Invariant violation, unsupported type or KV-layer failure.
    #[error("corruption: {0}")]
    Corruption(String),
    /// Bad parameters supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation truncated by a graceful shutdown.
    #[error("incomplete: {0}")]
    Incomplete(String),
}

impl StoreError {
    /// NotFound with no extra context.
    pub fn not_found() -> Self {
        StoreError::NotFound(String::new())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Corruption(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(StoreError::not_found().is_not_found());
        assert!(StoreError::NotFound("stale".to_string()).is_not_found());
        assert!(!StoreError::Corruption("bad meta".to_string()).is_not_found());
    }

    #[test]
    fn test_display_messages() {
        let e = StoreError::InvalidArgument("invalid expire time".to_string());
        assert_eq!(e.to_string(), "invalid argument: invalid expire time");
    }
}
