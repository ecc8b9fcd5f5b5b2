#![forbid(unsafe_code)]

//! Filtered view over an [`ObservableList`].
//!
//! The view is derived lazily and cached in a [`ViewCache`] keyed by
//! `(filter generation, base version)`. Writes go to the base list.
//!
//! # Invariants
//!
//! 1. Without a filter, base notifications are forwarded unchanged.
//! 2. With a filter, every base collection change collapses to one `Reset`
//!    (indices in the base do not map onto the view), and each base
//!    mutation raises `Count` and `Items` once.
//! 3. The view always reflects the base list and filter current at the
//!    time of the read.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use keel_core::{LockSettings, Synchronized};
use tracing::debug;

use crate::concurrent::ViewCache;
use crate::error::Result;
use crate::list::ObservableList;
use crate::notify::{CollectionChange, Notifier, PropertyChange, Subscription};

type Predicate<T, F> = Arc<dyn Fn(&T, &F) -> bool + Send + Sync>;

struct FilterShared<T, F> {
    base: ObservableList<T>,
    predicate: Predicate<T, F>,
    filter: Synchronized<Option<F>>,
    generation: AtomicU64,
    cache: ViewCache<(u64, u64), Arc<Vec<T>>>,
    collection_changed: Notifier<CollectionChange<T>>,
    property_changed: Notifier<PropertyChange>,
    _base_subscriptions: [Subscription; 2],
}

/// A list view showing the base items that satisfy the current filter.
///
/// Cloning creates a new handle to the same view.
pub struct FilterableObservableList<T, F> {
    shared: Arc<FilterShared<T, F>>,
}

impl<T, F> Clone for FilterableObservableList<T, F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, F> fmt::Debug for FilterableObservableList<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterableObservableList")
            .field("base", &self.shared.base)
            .field("generation", &self.shared.generation.load(Ordering::Relaxed))
            .field("cache", &self.shared.cache)
            .finish()
    }
}

impl<T, F> FilterableObservableList<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
{
    /// Filter `base` with `predicate(item, filter)`. No filter is active
    /// initially.
    pub fn new(
        base: ObservableList<T>,
        predicate: impl Fn(&T, &F) -> bool + Send + Sync + 'static,
    ) -> Self {
        let settings = base.lock_settings();
        Self::with_settings(base, predicate, settings)
    }

    pub fn with_settings(
        base: ObservableList<T>,
        predicate: impl Fn(&T, &F) -> bool + Send + Sync + 'static,
        settings: LockSettings,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<FilterShared<T, F>>| {
            let on_change = weak.clone();
            let changes = base.subscribe_collection_changed(move |change| {
                if let Some(shared) = on_change.upgrade() {
                    shared.on_base_changed(change);
                }
            });
            let on_property = weak.clone();
            let properties = base.subscribe_property_changed(move |property| {
                if let Some(shared) = on_property.upgrade() {
                    shared.on_base_property(*property);
                }
            });
            FilterShared {
                predicate: Arc::new(predicate),
                filter: Synchronized::with_settings(None, settings),
                generation: AtomicU64::new(0),
                cache: ViewCache::new(settings),
                collection_changed: Notifier::new("filtered_collection_changed"),
                property_changed: Notifier::new("filtered_property_changed"),
                _base_subscriptions: [changes, properties],
                base,
            }
        });
        Self { shared }
    }

    #[must_use]
    pub fn base(&self) -> &ObservableList<T> {
        &self.shared.base
    }

    pub fn filter(&self) -> Result<Option<F>> {
        Ok(self.shared.filter.read_lock(Clone::clone)?)
    }

    #[must_use]
    pub fn is_filtered(&self) -> bool {
        matches!(self.shared.filter.read_lock(Option::is_some), Ok(true))
    }

    /// Replace the filter (or remove it with `None`) and raise `Reset`.
    pub fn set_filter(&self, filter: Option<F>) -> Result<()> {
        let shared = &self.shared;
        shared.filter.write_lock(|slot| *slot = filter)?;
        shared.generation.fetch_add(1, Ordering::AcqRel);
        shared.cache.invalidate()?;
        debug!(base = %shared.base.context(), "filter changed");
        shared.raise_reset();
        Ok(())
    }

    pub fn clear_filter(&self) -> Result<()> {
        self.set_filter(None)
    }

    /// The filtered items, shared until the base or the filter changes.
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

    pub fn dispose(&self) -> bool {
        let first = self.shared.cache.dispose();
        self.shared.filter.dispose();
        first
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

impl<T, F> FilterableObservableList<T, F>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
{
    pub fn contains(&self, item: &T) -> Result<bool> {
        Ok(self.view()?.contains(item))
    }
}

impl<T, F> FilterShared<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
{
    fn view(&self) -> Result<Arc<Vec<T>>> {
        let key = (
            self.generation.load(Ordering::Acquire),
            self.base.version(),
        );
        self.cache.get_or_build(key, || {
            let filter = self.filter.read_lock(Clone::clone)?;
            let items = self.base.to_vec()?;
            let view = match filter {
                None => items,
                Some(filter) => items
                    .into_iter()
                    .filter(|item| (self.predicate)(item, &filter))
                    .collect(),
            };
            Ok(Arc::new(view))
        })
    }

    fn filtered(&self) -> bool {
        matches!(self.filter.read_lock(Option::is_some), Ok(true))
    }

    fn on_base_changed(&self, change: &CollectionChange<T>) {
        if self.cache.invalidate().is_err() {
            return;
        }
        if self.filtered() {
            self.collection_changed.raise(&[CollectionChange::Reset]);
        } else {
            self.collection_changed.raise(std::slice::from_ref(change));
        }
    }

    fn on_base_property(&self, property: PropertyChange) {
        if self.cache.is_disposed() {
            return;
        }
        if !self.filtered() {
            self.property_changed.raise(&[property]);
            return;
        }
        // The base raises `Items` once per mutation; the filtered count is
        // unknown until rebuild, so both are raised from that one event.
        if property == PropertyChange::Items {
            self.property_changed
                .raise(&[PropertyChange::Count, PropertyChange::Items]);
        }
    }

    fn raise_reset(&self) {
        self.collection_changed.raise(&[CollectionChange::Reset]);
        self.property_changed
            .raise(&[PropertyChange::Count, PropertyChange::Items]);
    }
}
