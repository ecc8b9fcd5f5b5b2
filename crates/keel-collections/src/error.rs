#![forbid(unsafe_code)]

//! Error type for collection operations.

use keel_core::{CaptureError, LockError};
use thiserror::Error;

/// Failures returned by list mutators, readers and wrappers.
///
/// Every failure is raised before the backing store is touched, so a
/// failed call leaves the items, the undo log and the capture state of
/// every item unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    #[error("collection has been disposed")]
    Disposed,

    #[error(transparent)]
    Lock(LockError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("range {start}..{start}+{count} is out of bounds for length {len}")]
    RangeOutOfBounds {
        start: usize,
        count: usize,
        len: usize,
    },

    /// Write addressed to an index owned by a read-only slave list.
    #[error("index {index} belongs to a read-only slave list")]
    ReadOnlyIndex { index: usize },
}

impl From<LockError> for CollectionError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Disposed => Self::Disposed,
            other => Self::Lock(other),
        }
    }
}

pub type Result<T, E = CollectionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::LockMode;

    #[test]
    fn disposed_lock_maps_to_disposed_collection() {
        assert_eq!(
            CollectionError::from(LockError::Disposed),
            CollectionError::Disposed
        );
        assert!(matches!(
            CollectionError::from(LockError::Recursive {
                mode: LockMode::Read
            }),
            CollectionError::Lock(_)
        ));
    }

    #[test]
    fn messages_name_the_offending_index() {
        let err = CollectionError::IndexOutOfRange { index: 4, len: 2 };
        assert_eq!(err.to_string(), "index 4 is out of range for length 2");
        let err = CollectionError::ReadOnlyIndex { index: 9 };
        assert!(err.to_string().contains('9'));
    }
}
