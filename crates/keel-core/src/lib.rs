#![forbid(unsafe_code)]

//! Keel core primitives.
//!
//! This crate holds the leaf layers every Keel collection is built on:
//!
//! - [`lock`]: timeout-bounded reader-writer lock and its RAII tokens
//! - [`synchronized`]: one lock per owned value, with scoped helpers
//! - [`capture`]: the single-owner capture protocol for sub-items
//! - [`transaction`]: commit/rollback units with LIFO revert steps
//! - [`auto_capture`]: bulk capture/release registered into a transaction
//! - [`settings`]: process-wide lock defaults and their loaders
//!
//! # Role in Keel
//! `keel-collections` builds the undo log and the observable mutation
//! engine on top of these primitives; the `keel` facade re-exports both.

pub mod auto_capture;
pub mod capture;
pub mod error;
pub mod lock;
pub mod settings;
pub mod synchronized;
pub mod transaction;

pub use auto_capture::{AutoCaptureTransaction, AutoReleaseTransaction, capture_all, release_all};
pub use capture::{
    CaptureAccess, CaptureCell, Capturable, ContextId, EditCommitted, EditCommittedHandler,
    ItemEdit, as_capturable,
};
pub use error::{CaptureError, LockError, SettingsError};
pub use lock::{LockMode, ReadLockToken, ReadWriteLockToken, ReaderWriterLock, WriteLockToken};
pub use settings::{EnvironmentSettings, LockSettings, LockTimeoutPolicy};
pub use synchronized::Synchronized;
pub use transaction::OperationTransaction;
