#![forbid(unsafe_code)]

//! Undo-tracked observable list: the mutation engine.
//!
//! # Design
//!
//! All state (backing store plus undo log) lives in one
//! [`Synchronized`] value. Every mutator runs the same pipeline:
//!
//! ```text
//! upgradeable read ──► plan + check ──► upgrade ──► transaction ──► apply ──► push record
//!        │                  │                         (release       │
//!        │              Err: nothing                   leaving,      │
//!        │              changed                        capture       ▼
//!        ▼                                             entering)   release lock
//!   poll take_must_reset                                              │
//!                                                                     ▼
//!                                                      raise notifications
//! ```
//!
//! Undo and redo replay the newest record of the respective stack through
//! the same transaction/apply step.
//!
//! # Invariants
//!
//! 1. A failed call leaves the store, the undo log and the capture state
//!    of every item unchanged.
//! 2. Notifications are raised after the lock is released, in the order
//!    the store changed.
//! 3. `Count` is raised only when the length changed; `Items` whenever a
//!    collection change was raised or a captured item's edit replayed.
//! 4. With item capture enabled, every item in the list is captured by
//!    this list's [`ContextId`] and appears at most once.
//! 5. [`ObservableList::version`] increases on every committed change.
//!
//! # Failure Modes
//!
//! - **Re-entrant access**: calling back into the list from inside
//!   [`ObservableList::read`] fails with a recursive lock error.
//!   Subscribers run outside the lock and may mutate freely.
//! - **Out-of-band store change**: an adapter that reports
//!   `take_must_reset` makes the next mutation drop the undo history and
//!   raise `Reset` before it proceeds.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use keel_core::{
    CaptureAccess, CaptureError, Capturable, ContextId, EditCommitted, EditCommittedHandler,
    LockError, LockSettings, OperationTransaction, Synchronized, as_capturable, capture_all,
    release_all,
};
use tracing::{debug, warn};

use crate::error::{CollectionError, Result};
use crate::iter::Iter;
use crate::notify::{CollectionChange, Notifier, PropertyChange, SuppressionContext, Subscription};
use crate::storage::{StorageAdapter, VecStore};
use crate::undo::{Applied, Direction, HistoryConfig, StateChange, Transfers, UndoLog};

/// Per-instance configuration of an [`ObservableList`].
#[derive(Debug, Clone, Copy)]
pub struct ListConfig {
    /// Lock timeout and timeout policy; defaults to the process-wide settings.
    pub lock: LockSettings,
    pub history: HistoryConfig,
    /// Record committed edits of captured items in the undo log. Only
    /// meaningful for lists built with item capture.
    pub track_item_edits: bool,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            lock: LockSettings::default(),
            history: HistoryConfig::default(),
            track_item_edits: true,
        }
    }
}

impl ListConfig {
    #[must_use]
    pub fn with_lock_settings(mut self, lock: LockSettings) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_item_edits(mut self, track: bool) -> Self {
        self.track_item_edits = track;
        self
    }
}

struct ListState<T> {
    store: Box<dyn StorageAdapter<T>>,
    history: UndoLog<T>,
}

/// Notifications accumulated under the lock, raised after release.
struct Pending<T> {
    changes: Vec<CollectionChange<T>>,
    count_changed: bool,
    items_changed: bool,
}

impl<T> Default for Pending<T> {
    fn default() -> Self {
        Self {
            changes: Vec::new(),
            count_changed: false,
            items_changed: false,
        }
    }
}

impl<T> Pending<T> {
    fn record(&mut self, applied: Applied<T>, count_changed: bool) {
        self.items_changed |= !applied.changes.is_empty() || applied.items_edited;
        self.count_changed |= count_changed;
        self.changes.extend(applied.changes);
    }

    fn reset(&mut self) {
        self.changes.push(CollectionChange::Reset);
        self.count_changed = true;
        self.items_changed = true;
    }
}

struct ListShared<T> {
    state: Synchronized<ListState<T>>,
    context: ContextId,
    access: Option<CaptureAccess<T>>,
    edit_handler: Option<EditCommittedHandler>,
    version: AtomicU64,
    collection_changed: Notifier<CollectionChange<T>>,
    property_changed: Notifier<PropertyChange>,
}

/// A thread-safe list with undo/redo, change notification and optional
/// capture of its items.
///
/// Cloning an `ObservableList` creates a new handle to the **same** list.
pub struct ObservableList<T> {
    shared: Arc<ListShared<T>>,
}

impl<T> Clone for ObservableList<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableList")
            .field("context", &self.shared.context)
            .field("version", &self.shared.version.load(Ordering::Relaxed))
            .field("captures_items", &self.shared.access.is_some())
            .field("disposed", &self.shared.state.is_disposed())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> From<Vec<T>> for ObservableList<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

impl<T: Clone + Send + Sync + 'static> FromIterator<T> for ObservableList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T: Clone + Send + Sync + 'static> ObservableList<T> {
    // ========================================================================
    // Construction
    // ========================================================================

    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ListConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ListConfig) -> Self {
        Self::with_store(VecStore::new(), config)
    }

    /// A list seeded with `items` and an empty undo history.
    #[must_use]
    pub fn from_vec(items: Vec<T>) -> Self {
        Self::with_store(VecStore::from(items), ListConfig::default())
    }

    #[must_use]
    pub fn with_store(store: impl StorageAdapter<T> + 'static, config: ListConfig) -> Self {
        Self::build(Box::new(store), config, None)
    }

    /// A list that captures each item through `access` while it is a member.
    ///
    /// Items already in `store` are captured immediately; items owned by
    /// another context are left alone and logged.
    #[must_use]
    pub fn with_capture_access(
        store: impl StorageAdapter<T> + 'static,
        config: ListConfig,
        access: CaptureAccess<T>,
    ) -> Self {
        let list = Self::build(Box::new(store), config, Some(access));
        if let Ok(mut state) = list.shared.state.acquire_write_lock() {
            list.shared.adopt_items(&*state.store);
            state.history.clear();
        }
        list
    }

    fn build(
        store: Box<dyn StorageAdapter<T>>,
        config: ListConfig,
        access: Option<CaptureAccess<T>>,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<ListShared<T>>| {
            let edit_handler = (access.is_some() && config.track_item_edits).then(|| {
                let weak = weak.clone();
                let handler: EditCommittedHandler = Arc::new(move |event: &EditCommitted| {
                    if let Some(shared) = weak.upgrade() {
                        shared.record_item_edit(event);
                    }
                });
                handler
            });
            ListShared {
                state: Synchronized::with_settings(
                    ListState {
                        store,
                        history: UndoLog::new(config.history),
                    },
                    config.lock,
                ),
                context: ContextId::next(),
                access,
                edit_handler,
                version: AtomicU64::new(0),
                collection_changed: Notifier::new("collection_changed"),
                property_changed: Notifier::new("property_changed"),
            }
        });
        Self { shared }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Run `f` against the backing store under a read lock.
    pub fn read<R>(&self, f: impl FnOnce(&dyn StorageAdapter<T>) -> R) -> Result<R> {
        Ok(self.shared.state.read_lock(|state| f(&*state.store))?)
    }

    pub fn len(&self) -> Result<usize> {
        self.read(|store| store.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.read(|store| store.is_empty())
    }

    pub fn get(&self, index: usize) -> Result<Option<T>> {
        self.read(|store| store.get(index).cloned())
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.read(|store| store.iter().cloned().collect())
    }

    /// Locking iterator: each step takes a short read lock, so writers may
    /// interleave with the enumeration.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(self)
    }

    /// Increases on every committed change, including resets.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }

    /// The undo context that owns this list's captured items.
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.shared.context
    }

    #[must_use]
    pub fn lock_settings(&self) -> LockSettings {
        self.shared.state.settings()
    }

    // ========================================================================
    // Mutators
    // ========================================================================

    pub fn push(&self, item: T) -> Result<()> {
        self.push_with(item, SuppressionContext::Raise)
    }

    pub fn push_with(&self, item: T, cx: SuppressionContext) -> Result<()> {
        self.shared.mutate(cx, "push", |store| {
            let index = store.len();
            Ok((Some(StateChange::Add { index, item }), ()))
        })
    }

    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.insert_with(index, item, SuppressionContext::Raise)
    }

    pub fn insert_with(&self, index: usize, item: T, cx: SuppressionContext) -> Result<()> {
        self.shared.mutate(cx, "insert", |_| {
            Ok((Some(StateChange::Add { index, item }), ()))
        })
    }

    pub fn add_range(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.add_range_with(items, SuppressionContext::Raise)
    }

    pub fn add_range_with(
        &self,
        items: impl IntoIterator<Item = T>,
        cx: SuppressionContext,
    ) -> Result<()> {
        let items: Vec<T> = items.into_iter().collect();
        self.shared.mutate(cx, "add_range", |store| {
            let index = store.len();
            Ok((
                (!items.is_empty()).then(|| StateChange::AddMultiple { index, items }),
                (),
            ))
        })
    }

    pub fn insert_range(&self, index: usize, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.insert_range_with(index, items, SuppressionContext::Raise)
    }

    pub fn insert_range_with(
        &self,
        index: usize,
        items: impl IntoIterator<Item = T>,
        cx: SuppressionContext,
    ) -> Result<()> {
        let items: Vec<T> = items.into_iter().collect();
        self.shared.mutate(cx, "insert_range", |store| {
            let len = store.len();
            if index > len {
                return Err(CollectionError::IndexOutOfRange { index, len });
            }
            Ok((
                (!items.is_empty()).then(|| StateChange::AddMultiple { index, items }),
                (),
            ))
        })
    }

    /// Remove and return the item at `index`.
    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.remove_at_with(index, SuppressionContext::Raise)
    }

    pub fn remove_at_with(&self, index: usize, cx: SuppressionContext) -> Result<T> {
        self.shared.mutate(cx, "remove_at", |store| {
            let item = store
                .get(index)
                .cloned()
                .ok_or(CollectionError::IndexOutOfRange {
                    index,
                    len: store.len(),
                })?;
            Ok((
                Some(StateChange::Remove {
                    index,
                    item: item.clone(),
                }),
                item,
            ))
        })
    }

    /// Remove the `count` items starting at `start`, returned in order.
    pub fn remove_range(&self, start: usize, count: usize) -> Result<Vec<T>> {
        self.remove_range_with(start, count, SuppressionContext::Raise)
    }

    pub fn remove_range_with(
        &self,
        start: usize,
        count: usize,
        cx: SuppressionContext,
    ) -> Result<Vec<T>> {
        self.shared.mutate(cx, "remove_range", |store| {
            let len = store.len();
            let end = start
                .checked_add(count)
                .filter(|end| *end <= len)
                .ok_or(CollectionError::RangeOutOfBounds { start, count, len })?;
            let items: Vec<T> = (start..end).filter_map(|i| store.get(i).cloned()).collect();
            if items.is_empty() {
                return Ok((None, items));
            }
            let record = StateChange::RemoveMultiple {
                indices: (start..end).collect(),
                items: items.clone(),
            };
            Ok((Some(record), items))
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.clear_with(SuppressionContext::Raise)
    }

    pub fn clear_with(&self, cx: SuppressionContext) -> Result<()> {
        self.shared.mutate(cx, "clear", |store| {
            let items: Vec<T> = store.iter().cloned().collect();
            Ok(((!items.is_empty()).then(|| StateChange::Clear { items }), ()))
        })
    }

    /// Replace the item at `index`, returning the previous one.
    pub fn set(&self, index: usize, item: T) -> Result<T> {
        self.set_with(index, item, SuppressionContext::Raise)
    }

    pub fn set_with(&self, index: usize, item: T, cx: SuppressionContext) -> Result<T> {
        self.shared.mutate(cx, "set", |store| {
            let old = store
                .get(index)
                .cloned()
                .ok_or(CollectionError::IndexOutOfRange {
                    index,
                    len: store.len(),
                })?;
            let record = StateChange::ChangeAt {
                index,
                old: old.clone(),
                new: item,
            };
            Ok((Some(record), old))
        })
    }

    /// Move the item at `old_index` so that it ends up at `new_index`.
    pub fn move_item(&self, old_index: usize, new_index: usize) -> Result<()> {
        self.move_item_with(old_index, new_index, SuppressionContext::Raise)
    }

    pub fn move_item_with(
        &self,
        old_index: usize,
        new_index: usize,
        cx: SuppressionContext,
    ) -> Result<()> {
        self.shared.mutate(cx, "move_item", |store| {
            let len = store.len();
            for index in [old_index, new_index] {
                if index >= len {
                    return Err(CollectionError::IndexOutOfRange { index, len });
                }
            }
            if old_index == new_index {
                return Ok((None, ()));
            }
            let item = store
                .get(old_index)
                .cloned()
                .ok_or(CollectionError::IndexOutOfRange {
                    index: old_index,
                    len,
                })?;
            Ok((Some(StateChange::moved(item, old_index, new_index)), ()))
        })
    }

    // ========================================================================
    // Undo / Redo
    // ========================================================================

    /// Revert the newest change. Returns `false` when there is nothing to undo.
    pub fn undo(&self) -> Result<bool> {
        self.undo_with(SuppressionContext::Raise)
    }

    pub fn undo_with(&self, cx: SuppressionContext) -> Result<bool> {
        self.shared.replay(cx, Direction::Backward)
    }

    /// Re-apply the newest undone change. Returns `false` when there is
    /// nothing to redo.
    pub fn redo(&self) -> Result<bool> {
        self.redo_with(SuppressionContext::Raise)
    }

    pub fn redo_with(&self, cx: SuppressionContext) -> Result<bool> {
        self.shared.replay(cx, Direction::Forward)
    }

    pub fn can_undo(&self) -> Result<bool> {
        Ok(self.shared.state.read_lock(|s| s.history.can_undo())?)
    }

    pub fn can_redo(&self) -> Result<bool> {
        Ok(self.shared.state.read_lock(|s| s.history.can_redo())?)
    }

    pub fn undo_depth(&self) -> Result<usize> {
        Ok(self.shared.state.read_lock(|s| s.history.undo_depth())?)
    }

    pub fn redo_depth(&self) -> Result<usize> {
        Ok(self.shared.state.read_lock(|s| s.history.redo_depth())?)
    }

    /// Drop both undo and redo history. Items stay as they are.
    pub fn clear_history(&self) -> Result<()> {
        Ok(self.shared.state.write_lock(|s| s.history.clear())?)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Run `f` directly on the backing store.
    ///
    /// The change is not recorded: the undo history is cleared, item
    /// ownership is re-synchronized with the new contents, and `Reset` is
    /// raised.
    pub fn modify_store<R>(&self, f: impl FnOnce(&mut dyn StorageAdapter<T>) -> R) -> Result<R> {
        let out = {
            let mut state = self.shared.state.acquire_write_lock()?;
            let state = &mut *state;
            self.shared.release_items(&*state.store);
            let out = f(&mut *state.store);
            self.shared.adopt_items(&*state.store);
            state.history.clear();
            self.shared.version.fetch_add(1, Ordering::AcqRel);
            debug!(context = %self.shared.context, "store modified out of band");
            out
        };
        let mut pending = Pending::default();
        pending.reset();
        self.shared.raise(SuppressionContext::Raise, pending);
        Ok(out)
    }

    /// Raise `Reset` plus `Count`/`Items`, typically after suppressed mutations.
    pub fn notify_reset(&self) -> Result<()> {
        if self.shared.state.is_disposed() {
            return Err(CollectionError::Disposed);
        }
        let mut pending = Pending::default();
        pending.reset();
        self.shared.raise(SuppressionContext::Raise, pending);
        Ok(())
    }

    /// Release captured items, drop history and reject further use.
    /// Returns `false` if the list was already disposed.
    pub fn dispose(&self) -> bool {
        let shared = &self.shared;
        if shared.state.is_disposed() {
            return false;
        }
        match shared.state.acquire_write_lock() {
            Ok(mut state) => {
                shared.release_items(&*state.store);
                state.history.clear();
            }
            Err(err) => warn!(context = %shared.context, %err, "disposing without releasing items"),
        }
        let first = shared.state.dispose();
        if first {
            debug!(context = %shared.context, "list disposed");
        }
        first
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.state.is_disposed()
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

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

impl<T: Clone + PartialEq + Send + Sync + 'static> ObservableList<T> {
    pub fn contains(&self, item: &T) -> Result<bool> {
        self.read(|store| store.iter().any(|x| x == item))
    }

    pub fn index_of(&self, item: &T) -> Result<Option<usize>> {
        self.read(|store| store.iter().position(|x| x == item))
    }

    /// Remove the first occurrence of `item`. Returns whether one was found.
    pub fn remove(&self, item: &T) -> Result<bool> {
        self.remove_with(item, SuppressionContext::Raise)
    }

    pub fn remove_with(&self, item: &T, cx: SuppressionContext) -> Result<bool> {
        self.shared.mutate(cx, "remove", |store| {
            let Some((index, stored)) = store.iter().enumerate().find(|(_, x)| *x == item) else {
                return Ok((None, false));
            };
            // The record carries the member, not the caller's equal value.
            let record = StateChange::Remove {
                index,
                item: stored.clone(),
            };
            Ok((Some(record), true))
        })
    }
}

impl<T: Capturable + Clone + Send + Sync + 'static> ObservableList<T> {
    /// An empty list whose items are captured while they are members, with
    /// their committed edits recorded in this list's undo log.
    #[must_use]
    pub fn with_item_capture(config: ListConfig) -> Self {
        Self::with_capture_access(VecStore::new(), config, as_capturable::<T>)
    }
}

impl<'a, T: Clone + Send + Sync + 'static> IntoIterator for &'a ObservableList<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

// ============================================================================
// Engine
// ============================================================================

impl<T: Clone + Send + Sync + 'static> ListShared<T> {
    fn mutate<R>(
        &self,
        cx: SuppressionContext,
        op: &'static str,
        plan: impl FnOnce(&dyn StorageAdapter<T>) -> Result<(Option<StateChange<T>>, R)>,
    ) -> Result<R> {
        let mut pending = Pending::default();
        let result = self.mutate_locked(op, plan, &mut pending);
        self.raise(cx, pending);
        result
    }

    fn mutate_locked<R>(
        &self,
        op: &'static str,
        plan: impl FnOnce(&dyn StorageAdapter<T>) -> Result<(Option<StateChange<T>>, R)>,
        pending: &mut Pending<T>,
    ) -> Result<R> {
        let token = self.state.acquire_read_write_lock()?;
        if token.store.take_must_reset() {
            let mut state = token.into_write()?;
            self.reset_locked(&mut state, pending);
            let (record, out) = plan(&*state.store)?;
            return self.record_planned(&mut state, op, record, out, pending);
        }

        let (record, out) = plan(&*token.store)?;
        let Some(record) = record else {
            return Ok(out);
        };
        record.check(Direction::Forward, token.store.len())?;

        let mut state = token.into_write()?;
        self.record_planned(&mut state, op, Some(record), out, pending)
    }

    fn record_planned<R>(
        &self,
        state: &mut ListState<T>,
        op: &'static str,
        record: Option<StateChange<T>>,
        out: R,
        pending: &mut Pending<T>,
    ) -> Result<R> {
        let Some(record) = record else {
            return Ok(out);
        };
        let (applied, count_changed) = self.commit(&mut *state.store, &record, Direction::Forward)?;
        state.history.push(record);
        pending.record(applied, count_changed);
        debug!(context = %self.context, op, len = state.store.len(), "list mutated");
        Ok(out)
    }

    fn replay(&self, cx: SuppressionContext, direction: Direction) -> Result<bool> {
        let mut pending = Pending::default();
        let result = self.replay_locked(direction, &mut pending);
        self.raise(cx, pending);
        result
    }

    fn replay_locked(&self, direction: Direction, pending: &mut Pending<T>) -> Result<bool> {
        let mut token = self.state.acquire_write_lock()?;
        let state = &mut *token;
        if state.store.take_must_reset() {
            self.reset_locked(state, pending);
        }

        let ListState { store, history } = state;
        let apply = |record: &StateChange<T>| self.commit(&mut **store, record, direction);
        let outcome = match direction {
            Direction::Backward => history.undo(apply),
            Direction::Forward => history.redo(apply),
        };
        match outcome {
            None => Ok(false),
            Some(Ok((applied, count_changed))) => {
                pending.record(applied, count_changed);
                debug!(context = %self.context, ?direction, "history replayed");
                Ok(true)
            }
            Some(Err(err)) => {
                debug!(context = %self.context, ?direction, %err, "history replay rejected");
                Err(err)
            }
        }
    }

    /// Validate, move item ownership, and apply one record.
    fn commit(
        &self,
        store: &mut dyn StorageAdapter<T>,
        record: &StateChange<T>,
        direction: Direction,
    ) -> Result<(Applied<T>, bool)> {
        let len = store.len();
        let new_len = record.check(direction, len)?;

        let mut tx = OperationTransaction::new();
        if let Some(access) = self.access {
            let Transfers { leaving, entering } = record.transfers(direction);
            self.check_entering(access, &leaving, &entering)?;
            release_all(&mut tx, &leaving, access, self.context)?;
            capture_all(
                &mut tx,
                &entering,
                access,
                self.context,
                self.edit_handler.as_ref(),
            )?;
        }
        let applied = record.apply(direction, store);
        tx.success();
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok((applied, len != new_len))
    }

    /// Entering items must be free, unless they are leaving in the same
    /// record, and must not repeat.
    fn check_entering(
        &self,
        access: CaptureAccess<T>,
        leaving: &[T],
        entering: &[T],
    ) -> Result<(), CaptureError> {
        let same = |a: &T, b: &T| ptr::eq(access(a).capture_cell(), access(b).capture_cell());
        for (index, item) in entering.iter().enumerate() {
            if entering[..index].iter().any(|other| same(other, item)) {
                return Err(CaptureError::AlreadyCaptured {
                    index,
                    owner: self.context,
                });
            }
            if let Some(owner) = access(item).parent_context() {
                let moving_within = owner == self.context && leaving.iter().any(|l| same(l, item));
                if !moving_within {
                    return Err(CaptureError::AlreadyCaptured { index, owner });
                }
            }
        }
        Ok(())
    }

    fn reset_locked(&self, state: &mut ListState<T>, pending: &mut Pending<T>) {
        state.history.clear();
        self.adopt_items(&*state.store);
        self.version.fetch_add(1, Ordering::AcqRel);
        pending.reset();
        debug!(context = %self.context, "store requested reset; history cleared");
    }

    /// Capture every free item in `store` into this context.
    fn adopt_items(&self, store: &dyn StorageAdapter<T>) {
        let Some(access) = self.access else {
            return;
        };
        for (index, item) in store.iter().enumerate() {
            let cell = access(item).capture_cell();
            match cell.parent_context() {
                Some(owner) if owner != self.context => {
                    warn!(context = %self.context, index, %owner, "item owned by another context left uncaptured");
                    continue;
                }
                Some(_) => {}
                None => {
                    if let Err(err) = cell.capture_into(self.context) {
                        warn!(context = %self.context, index, %err, "item capture failed");
                        continue;
                    }
                }
            }
            if let Some(handler) = &self.edit_handler {
                cell.subscribe_edit_committed(self.context, Arc::clone(handler));
            }
        }
    }

    /// Release every item in `store` owned by this context.
    fn release_items(&self, store: &dyn StorageAdapter<T>) {
        let Some(access) = self.access else {
            return;
        };
        for item in store.iter() {
            release_cell(access(item), self.context);
        }
    }

    fn record_item_edit(&self, event: &EditCommitted) {
        let mut pending = Pending::default();
        match self.state.acquire_write_lock() {
            Ok(mut state) => {
                state.history.push(StateChange::SubItem(Arc::clone(&event.edit)));
                self.version.fetch_add(1, Ordering::AcqRel);
                pending.items_changed = true;
            }
            Err(LockError::Disposed) => return,
            Err(err) => {
                warn!(context = %self.context, %err, edit = event.edit.description(), "item edit not recorded");
                return;
            }
        }
        self.raise(SuppressionContext::Raise, pending);
    }

    fn raise(&self, cx: SuppressionContext, pending: Pending<T>) {
        if cx.is_suppressed() {
            return;
        }
        self.collection_changed.raise(&pending.changes);
        let mut properties = Vec::with_capacity(2);
        if pending.count_changed {
            properties.push(PropertyChange::Count);
        }
        if pending.items_changed {
            properties.push(PropertyChange::Items);
        }
        self.property_changed.raise(&properties);
    }
}

fn release_cell(item: &dyn Capturable, context: ContextId) {
    let cell = item.capture_cell();
    if cell.parent_context() == Some(context) {
        cell.restore_owner(None);
        cell.unsubscribe_edit_committed(context);
    }
}

impl<T> Drop for ListShared<T> {
    fn drop(&mut self) {
        let Some(access) = self.access else {
            return;
        };
        let context = self.context;
        let state = self.state.get_mut();
        for item in state.store.iter() {
            release_cell(access(item), context);
        }
    }
}

#[cfg(feature = "serde")]
impl<T: Clone + Send + Sync + serde::Serialize + 'static> serde::Serialize for ObservableList<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let state = self
            .shared
            .state
            .acquire_read_lock()
            .map_err(<S::Error as serde::ser::Error>::custom)?;
        serde::Serializer::collect_seq(serializer, state.store.iter())
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for ObservableList<T>
where
    T: Clone + Send + Sync + serde::Deserialize<'de> + 'static,
{
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        <Vec<T> as serde::Deserialize<'de>>::deserialize(deserializer).map(Self::from_vec)
    }
}
