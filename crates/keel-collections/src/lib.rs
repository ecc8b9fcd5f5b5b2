#![forbid(unsafe_code)]

//! Undo-tracked observable collections.
//!
//! - [`list`]: [`ObservableList`], the mutation engine with undo/redo,
//!   capture of sub-items and change notifications
//! - [`undo`]: state-change records and the bounded undo log
//! - [`storage`]: the backing-store seam ([`StorageAdapter`], [`VecStore`])
//! - [`notify`]: change events and weak subscriber lists
//! - [`filterable`] and [`master_slave`]: derived views over lists
//! - [`concurrent`]: the lazily locked view cache those views share
//!
//! # Example
//!
//! ```
//! use keel_collections::{CollectionChange, ObservableList};
//!
//! let list = ObservableList::new();
//! let _sub = list.subscribe_collection_changed(|change: &CollectionChange<i32>| {
//!     println!("{change:?}");
//! });
//! list.push(1).unwrap();
//! list.push(2).unwrap();
//! list.undo().unwrap();
//! assert_eq!(list.to_vec().unwrap(), vec![1]);
//! ```

pub mod concurrent;
pub mod error;
pub mod filterable;
pub mod iter;
pub mod list;
pub mod master_slave;
pub mod notify;
pub mod storage;
pub mod undo;

pub use concurrent::ViewCache;
pub use error::{CollectionError, Result};
pub use filterable::FilterableObservableList;
pub use iter::Iter;
pub use list::{ListConfig, ObservableList};
pub use master_slave::MasterSlaveObservableList;
pub use notify::{CollectionChange, Notifier, PropertyChange, Subscription, SuppressionContext};
pub use storage::{StorageAdapter, VecStore};
pub use undo::{Direction, HistoryConfig, StateChange, UndoLog};
