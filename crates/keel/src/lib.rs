#![forbid(unsafe_code)]

//! Keel public facade crate.
//!
//! Re-exports the lock and capture primitives from `keel-core` and the
//! observable collections from `keel-collections`, plus a prelude for
//! day-to-day use.
//!
//! ```
//! use keel::prelude::*;
//!
//! let list = ObservableList::from_vec(vec![1, 7, 3, 9]);
//! let big = FilterableObservableList::new(list.clone(), |x: &i32, min: &i32| x > min);
//! big.set_filter(Some(5))?;
//! assert_eq!(big.to_vec()?, vec![7, 9]);
//!
//! list.remove(&7)?;
//! assert_eq!(big.to_vec()?, vec![9]);
//! list.undo()?;
//! assert_eq!(big.to_vec()?, vec![7, 9]);
//! # Ok::<(), keel::Error>(())
//! ```

use thiserror::Error;

// --- Core re-exports -------------------------------------------------------

pub use keel_core::{
    AutoCaptureTransaction, AutoReleaseTransaction, CaptureAccess, CaptureCell, CaptureError,
    Capturable, ContextId, EditCommitted, EditCommittedHandler, EnvironmentSettings, ItemEdit,
    LockError, LockMode, LockSettings, LockTimeoutPolicy, OperationTransaction, ReadLockToken,
    ReadWriteLockToken, ReaderWriterLock, SettingsError, Synchronized, WriteLockToken,
    as_capturable, capture_all, release_all,
};

// --- Collection re-exports -------------------------------------------------

pub use keel_collections::{
    CollectionChange, CollectionError, Direction, FilterableObservableList, HistoryConfig, Iter,
    ListConfig, MasterSlaveObservableList, Notifier, ObservableList, PropertyChange,
    StateChange, StorageAdapter, Subscription, SuppressionContext, UndoLog, VecStore, ViewCache,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for Keel callers.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        Self::Collection(err.into())
    }
}

impl From<CaptureError> for Error {
    fn from(err: CaptureError) -> Self {
        Self::Collection(err.into())
    }
}

/// Standard result type for Keel APIs.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Capturable, CaptureCell, CollectionChange, Error, FilterableObservableList, HistoryConfig,
        ItemEdit, ListConfig, LockSettings, LockTimeoutPolicy, MasterSlaveObservableList,
        ObservableList, PropertyChange, Result, Subscription, SuppressionContext,
    };

    pub use crate::{collections, core};
}

pub use keel_collections as collections;
pub use keel_core as core;
