#![forbid(unsafe_code)]

//! Capture protocol: single-owner membership of items in undo contexts.
//!
//! An undo context (normally one tracked collection) is identified by a
//! [`ContextId`]. An item opts into sub-item undo by embedding a
//! [`CaptureCell`] and implementing [`Capturable`]. The cell records
//! *which* context owns the item; it never points at the owner, so there
//! is no reference cycle between collections and their items.
//!
//! # Invariants
//!
//! 1. An item is captured by at most one context at a time.
//! 2. Capturing into the current owner again is a no-op.
//! 3. Edit-committed handlers are keyed by context, one per key.
//! 4. Handlers run outside the cell's mutex, so a handler may call back
//!    into the same cell.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::error::CaptureError;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for an undo context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a process-unique context id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A committed, reversible edit of a single item.
///
/// Implementations must not commit new edits from `undo`/`redo`.
pub trait ItemEdit: Send + Sync + fmt::Debug {
    fn undo(&self);

    fn redo(&self);

    fn description(&self) -> &str {
        "Edit item"
    }
}

/// Payload of the edit-committed event.
#[derive(Debug, Clone)]
pub struct EditCommitted {
    pub edit: Arc<dyn ItemEdit>,
}

/// Subscriber for [`EditCommitted`] events.
pub type EditCommittedHandler = Arc<dyn Fn(&EditCommitted) + Send + Sync>;

#[derive(Default)]
struct CellState {
    owner: Option<ContextId>,
    handlers: Vec<(ContextId, EditCommittedHandler)>,
}

/// Capture state embedded in every [`Capturable`] item.
#[derive(Default)]
pub struct CaptureCell {
    state: Mutex<CellState>,
}

impl fmt::Debug for CaptureCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CaptureCell")
            .field("owner", &state.owner)
            .field("handlers", &state.handlers.len())
            .finish()
    }
}

impl CaptureCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_captured(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    #[must_use]
    pub fn parent_context(&self) -> Option<ContextId> {
        self.state.lock().owner
    }

    pub fn capture_into(&self, parent: ContextId) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner != parent => Err(CaptureError::AlreadyCaptured { index: 0, owner }),
            _ => {
                state.owner = Some(parent);
                trace!(%parent, "item captured");
                Ok(())
            }
        }
    }

    /// Clear the owner, returning the context that held the item.
    pub fn release_from_context(&self) -> Result<ContextId, CaptureError> {
        let mut state = self.state.lock();
        let owner = state.owner.take().ok_or(CaptureError::NotCaptured { index: 0 })?;
        trace!(%owner, "item released");
        Ok(owner)
    }

    /// Put the owner back exactly as it was. Used by transaction rollback.
    pub fn restore_owner(&self, owner: Option<ContextId>) {
        self.state.lock().owner = owner;
    }

    /// Register `handler` under `key`, replacing any handler already there.
    pub fn subscribe_edit_committed(&self, key: ContextId, handler: EditCommittedHandler) {
        let mut state = self.state.lock();
        match state.handlers.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = handler,
            None => state.handlers.push((key, handler)),
        }
    }

    /// Remove and return the handler registered under `key`.
    pub fn unsubscribe_edit_committed(&self, key: ContextId) -> Option<EditCommittedHandler> {
        let mut state = self.state.lock();
        let pos = state.handlers.iter().position(|(k, _)| *k == key)?;
        Some(state.handlers.remove(pos).1)
    }

    #[must_use]
    pub fn edit_handler_count(&self) -> usize {
        self.state.lock().handlers.len()
    }

    /// Raise the edit-committed event. Returns the number of handlers run.
    pub fn commit_edit(&self, edit: Arc<dyn ItemEdit>) -> usize {
        let handlers: Vec<EditCommittedHandler> = self
            .state
            .lock()
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        let event = EditCommitted { edit };
        for handler in &handlers {
            handler(&event);
        }
        trace!(
            handlers = handlers.len(),
            edit = event.edit.description(),
            "edit committed"
        );
        handlers.len()
    }
}

/// An entity that can be owned by at most one undo context.
pub trait Capturable: Send + Sync {
    fn capture_cell(&self) -> &CaptureCell;

    fn is_captured(&self) -> bool {
        self.capture_cell().is_captured()
    }

    fn parent_context(&self) -> Option<ContextId> {
        self.capture_cell().parent_context()
    }

    fn capture_into(&self, parent: ContextId) -> Result<(), CaptureError> {
        self.capture_cell().capture_into(parent)
    }

    fn release_from_context(&self) -> Result<ContextId, CaptureError> {
        self.capture_cell().release_from_context()
    }
}

impl Capturable for CaptureCell {
    fn capture_cell(&self) -> &CaptureCell {
        self
    }
}

impl<C: Capturable + ?Sized> Capturable for Arc<C> {
    fn capture_cell(&self) -> &CaptureCell {
        (**self).capture_cell()
    }
}

impl<C: Capturable + ?Sized> Capturable for Box<C> {
    fn capture_cell(&self) -> &CaptureCell {
        (**self).capture_cell()
    }
}

/// Projection from a collection element to its capture protocol.
pub type CaptureAccess<T> = fn(&T) -> &dyn Capturable;

/// The [`CaptureAccess`] for element types that are themselves capturable.
pub fn as_capturable<C: Capturable>(item: &C) -> &dyn Capturable {
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct Noop;

    impl ItemEdit for Noop {
        fn undo(&self) {}
        fn redo(&self) {}
    }

    #[test]
    fn capture_is_exclusive() {
        let cell = CaptureCell::new();
        let p1 = ContextId::next();
        let p2 = ContextId::next();

        cell.capture_into(p1).unwrap();
        assert_eq!(
            cell.capture_into(p2),
            Err(CaptureError::AlreadyCaptured { index: 0, owner: p1 })
        );
        assert_eq!(cell.parent_context(), Some(p1));
    }

    #[test]
    fn recapture_by_owner_is_a_noop() {
        let cell = CaptureCell::new();
        let p = ContextId::next();
        cell.capture_into(p).unwrap();
        cell.capture_into(p).unwrap();
        assert_eq!(cell.parent_context(), Some(p));
    }

    #[test]
    fn release_requires_capture() {
        let cell = CaptureCell::new();
        assert_eq!(
            cell.release_from_context(),
            Err(CaptureError::NotCaptured { index: 0 })
        );
        let p = ContextId::next();
        cell.capture_into(p).unwrap();
        assert_eq!(cell.release_from_context(), Ok(p));
        assert!(!cell.is_captured());
    }

    #[test]
    fn handlers_are_keyed_by_context() {
        let cell = CaptureCell::new();
        let key = ContextId::next();
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = Arc::clone(&hits);
        cell.subscribe_edit_committed(key, Arc::new(move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        }));
        let h2 = Arc::clone(&hits);
        cell.subscribe_edit_committed(key, Arc::new(move |_| {
            h2.fetch_add(10, Ordering::SeqCst);
        }));
        assert_eq!(cell.edit_handler_count(), 1);

        assert_eq!(cell.commit_edit(Arc::new(Noop)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 10);

        assert!(cell.unsubscribe_edit_committed(key).is_some());
        assert!(cell.unsubscribe_edit_committed(key).is_none());
        assert_eq!(cell.commit_edit(Arc::new(Noop)), 0);
    }

    #[test]
    fn handler_may_reenter_cell() {
        let cell = Arc::new(CaptureCell::new());
        let key = ContextId::next();
        let inner = Arc::clone(&cell);
        cell.subscribe_edit_committed(key, Arc::new(move |_| {
            assert_eq!(inner.edit_handler_count(), 1);
        }));
        assert_eq!(cell.commit_edit(Arc::new(Noop)), 1);
    }

    #[test]
    fn arc_forwards_to_inner_cell() {
        let item: Arc<CaptureCell> = Arc::new(CaptureCell::new());
        let p = ContextId::next();
        item.capture_into(p).unwrap();
        let access: CaptureAccess<Arc<CaptureCell>> = as_capturable::<Arc<CaptureCell>>;
        assert_eq!(access(&item).parent_context(), Some(p));
    }
}
