#![forbid(unsafe_code)]

//! Master/slave composition: one writable list followed by read-only lists.
//!
//! ```text
//! index:   0 .. m-1 │ m .. m+s1-1 │ m+s1 .. m+s1+s2-1
//!          master   │ slave 0     │ slave 1
//!          writable │ ReadOnlyIndex on write
//! ```
//!
//! Master notifications are forwarded unchanged (master indices coincide
//! with merged indices). A slave collection change, and any change to the
//! slave set, raises `Reset`. A slave mutation raises `Count` and `Items`
//! once, keyed off the slave's `Items` event.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use keel_core::{LockSettings, Synchronized};
use tracing::debug;

use crate::concurrent::ViewCache;
use crate::error::{CollectionError, Result};
use crate::list::ObservableList;
use crate::notify::{CollectionChange, Notifier, PropertyChange, Subscription};

struct Slave<T> {
    list: ObservableList<T>,
    _subscriptions: [Subscription; 2],
}

struct MergeShared<T> {
    master: ObservableList<T>,
    slaves: Synchronized<Vec<Slave<T>>>,
    generation: AtomicU64,
    cache: ViewCache<(u64, u64, u64), Arc<Vec<T>>>,
    collection_changed: Notifier<CollectionChange<T>>,
    property_changed: Notifier<PropertyChange>,
    _master_subscriptions: [Subscription; 2],
}

/// A writable master list merged with read-only slave lists.
///
/// Cloning creates a new handle to the same composition.
pub struct MasterSlaveObservableList<T> {
    shared: Arc<MergeShared<T>>,
}

impl<T> Clone for MasterSlaveObservableList<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for MasterSlaveObservableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSlaveObservableList")
            .field("master", &self.shared.master)
            .field("generation", &self.shared.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> MasterSlaveObservableList<T> {
    pub fn new(master: ObservableList<T>) -> Self {
        let settings = master.lock_settings();
        Self::with_settings(master, settings)
    }

    pub fn with_settings(master: ObservableList<T>, settings: LockSettings) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<MergeShared<T>>| {
            let on_change = weak.clone();
            let changes = master.subscribe_collection_changed(move |change| {
                if let Some(shared) = on_change.upgrade() {
                    shared.forward(std::slice::from_ref(change), None);
                }
            });
            let on_property = weak.clone();
            let properties = master.subscribe_property_changed(move |property| {
                if let Some(shared) = on_property.upgrade() {
                    shared.forward(&[], Some(*property));
                }
            });
            MergeShared {
                slaves: Synchronized::with_settings(Vec::new(), settings),
                generation: AtomicU64::new(0),
                cache: ViewCache::new(settings),
                collection_changed: Notifier::new("merged_collection_changed"),
                property_changed: Notifier::new("merged_property_changed"),
                _master_subscriptions: [changes, properties],
                master,
            }
        });
        Self { shared }
    }

    #[must_use]
    pub fn master(&self) -> &ObservableList<T> {
        &self.shared.master
    }

    // ========================================================================
    // Slave set
    // ========================================================================

    /// Append a read-only slave after the existing ones.
    pub fn add_slave(&self, slave: ObservableList<T>) -> Result<()> {
        let weak = Arc::downgrade(&self.shared);
        let on_change = weak.clone();
        let changes = slave.subscribe_collection_changed(move |_| {
            if let Some(shared) = on_change.upgrade() {
                shared.slave_changed();
            }
        });
        let properties = slave.subscribe_property_changed(move |property| {
            if let Some(shared) = weak.upgrade() {
                shared.slave_property_changed(*property);
            }
        });
        self.shared.slaves.write_lock(|slaves| {
            slaves.push(Slave {
                list: slave,
                _subscriptions: [changes, properties],
            });
        })?;
        self.shared.slave_set_changed();
        Ok(())
    }

    /// Detach the slave at `index` in the slave set.
    pub fn remove_slave(&self, index: usize) -> Result<ObservableList<T>> {
        let removed = self.shared.slaves.write_lock(|slaves| {
            if index < slaves.len() {
                Ok(slaves.remove(index).list)
            } else {
                Err(CollectionError::IndexOutOfRange {
                    index,
                    len: slaves.len(),
                })
            }
        })??;
        self.shared.slave_set_changed();
        Ok(removed)
    }

    /// Detach every slave. Raises `Reset` even when there were none.
    pub fn clear_slaves(&self) -> Result<Vec<ObservableList<T>>> {
        let removed = self
            .shared
            .slaves
            .write_lock(|slaves| slaves.drain(..).map(|s| s.list).collect())?;
        self.shared.slave_set_changed();
        Ok(removed)
    }

    pub fn slave_count(&self) -> Result<usize> {
        Ok(self.shared.slaves.read_lock(Vec::len)?)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Master items followed by each slave's items.
    pub fn view(&self) -> Result<Arc<Vec<T>>> {
        self.shared.view()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.view()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.view()?.is_empty())
    }

    pub fn get(&self, index: usize) -> Result<Option<T>> {
        Ok(self.view()?.get(index).cloned())
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        Ok(self.view()?.as_ref().clone())
    }

    // ========================================================================
    // Writes (master only)
    // ========================================================================

    pub fn push(&self, item: T) -> Result<()> {
        self.shared.master.push(item)
    }

    /// Insert into the master. `index` may equal the master length.
    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.writable(index, true)?;
        self.shared.master.insert(index, item)
    }

    pub fn set(&self, index: usize, item: T) -> Result<T> {
        self.writable(index, false)?;
        self.shared.master.set(index, item)
    }

    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.writable(index, false)?;
        self.shared.master.remove_at(index)
    }

    /// Clear the master; slaves are untouched.
    pub fn clear(&self) -> Result<()> {
        self.shared.master.clear()
    }

    pub fn undo(&self) -> Result<bool> {
        self.shared.master.undo()
    }

    pub fn redo(&self) -> Result<bool> {
        self.shared.master.redo()
    }

    pub fn dispose(&self) -> bool {
        let first = self.shared.cache.dispose();
        if first {
            self.shared.slaves.write_lock(Vec::clear).ok();
            self.shared.slaves.dispose();
        }
        first
    }

    /// Classify `index` against the master range.
    fn writable(&self, index: usize, inserting: bool) -> Result<()> {
        let master_len = self.shared.master.len()?;
        let in_master = if inserting {
            index <= master_len
        } else {
            index < master_len
        };
        if in_master {
            return Ok(());
        }
        let total = self.len()?;
        if index < total {
            Err(CollectionError::ReadOnlyIndex { index })
        } else {
            Err(CollectionError::IndexOutOfRange { index, len: total })
        }
    }

    pub fn subscribe_collection_changed(
        &self,
        callback: impl Fn(&CollectionChange<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.collection_changed.subscribe(callback)
    }

    pub fn subscribe_property_changed(
        &self,
        callback: impl Fn(&PropertyChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.property_changed.subscribe(callback)
    }
}

impl<T: Clone + Send + Sync + 'static> MergeShared<T> {
    fn view(&self) -> Result<Arc<Vec<T>>> {
        let slave_versions = self.slaves.read_lock(|slaves| {
            slaves
                .iter()
                .map(|s| s.list.version())
                .fold(0u64, u64::wrapping_add)
        })?;
        let key = (
            self.generation.load(Ordering::Acquire),
            self.master.version(),
            slave_versions,
        );
        self.cache.get_or_build(key, || {
            let mut merged = self.master.to_vec()?;
            let slaves: Vec<ObservableList<T>> =
                self.slaves.read_lock(|s| s.iter().map(|s| s.list.clone()).collect())?;
            for slave in &slaves {
                merged.extend(slave.to_vec()?);
            }
            Ok(Arc::new(merged))
        })
    }

    fn forward(&self, changes: &[CollectionChange<T>], property: Option<PropertyChange>) {
        if self.cache.invalidate().is_err() {
            return;
        }
        self.collection_changed.raise(changes);
        if let Some(property) = property {
            self.property_changed.raise(&[property]);
        }
    }

    fn slave_changed(&self) {
        if self.cache.invalidate().is_err() {
            return;
        }
        self.collection_changed.raise(&[CollectionChange::Reset]);
    }

    /// Slave lists raise `Items` once per mutation, including in-place item
    /// edits that carry no collection change.
    fn slave_property_changed(&self, property: PropertyChange) {
        if self.cache.invalidate().is_err() || property != PropertyChange::Items {
            return;
        }
        self.property_changed
            .raise(&[PropertyChange::Count, PropertyChange::Items]);
    }

    fn slave_set_changed(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if self.cache.invalidate().is_err() {
            return;
        }
        debug!(master = %self.master.context(), "slave set changed");
        self.raise_reset();
    }

    fn raise_reset(&self) {
        self.collection_changed.raise(&[CollectionChange::Reset]);
        self.property_changed
            .raise(&[PropertyChange::Count, PropertyChange::Items]);
    }
}
