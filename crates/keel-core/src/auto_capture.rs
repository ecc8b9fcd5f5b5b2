#![forbid(unsafe_code)]

//! Bulk capture and release inside an [`OperationTransaction`].
//!
//! [`capture_all`] and [`release_all`] validate the whole batch before
//! touching any item, then transition each item and register one revert
//! step per item. A caller that opens a single transaction can therefore
//! release the items leaving a collection and capture the items entering
//! it, and have both undone together if anything later fails.
//!
//! [`AutoCaptureTransaction`] and [`AutoReleaseTransaction`] are the
//! single-purpose forms that own their transaction.
//!
//! # Invariants
//!
//! 1. A rejected batch leaves every item exactly as it was.
//! 2. Each revert step restores the owner *and* the edit handler that were
//!    in place before the step's item was processed.
//! 3. An item listed twice in one release batch is released once.

use std::ops::{Deref, DerefMut};

use tracing::trace;

use crate::capture::{CaptureAccess, ContextId, EditCommittedHandler};
use crate::error::CaptureError;
use crate::transaction::OperationTransaction;

/// Capture every item into `parent`, subscribing `handler` to each item's
/// edit-committed event.
///
/// Fails with [`CaptureError::AlreadyCaptured`] (first offending index)
/// before any item changes if an item belongs to another context.
pub fn capture_all<T: Clone + 'static>(
    tx: &mut OperationTransaction,
    items: &[T],
    access: CaptureAccess<T>,
    parent: ContextId,
    handler: Option<&EditCommittedHandler>,
) -> Result<(), CaptureError> {
    for (index, item) in items.iter().enumerate() {
        if let Some(owner) = access(item).parent_context()
            && owner != parent
        {
            return Err(CaptureError::AlreadyCaptured { index, owner });
        }
    }

    for (index, item) in items.iter().enumerate() {
        let cell = access(item).capture_cell();
        let previous_owner = cell.parent_context();
        cell.capture_into(parent).map_err(|err| match err {
            CaptureError::AlreadyCaptured { owner, .. } => {
                CaptureError::AlreadyCaptured { index, owner }
            }
            other => other,
        })?;

        let subscribed = handler.is_some();
        let previous_handler = handler.and_then(|h| {
            let old = cell.unsubscribe_edit_committed(parent);
            cell.subscribe_edit_committed(parent, h.clone());
            old
        });

        tx.add_revert_step(
            (item.clone(), previous_owner, previous_handler),
            move |(item, previous_owner, previous_handler)| {
                let cell = access(&item).capture_cell();
                cell.restore_owner(previous_owner);
                if subscribed {
                    cell.unsubscribe_edit_committed(parent);
                }
                if let Some(h) = previous_handler {
                    cell.subscribe_edit_committed(parent, h);
                }
            },
        );
    }
    trace!(%parent, items = items.len(), "captured batch");
    Ok(())
}

/// Release every item from `parent`, unsubscribing the parent's handler.
///
/// Fails before any item changes if an item is not captured
/// ([`CaptureError::NotCaptured`]) or belongs to another context
/// ([`CaptureError::CapturedByOther`]).
pub fn release_all<T: Clone + 'static>(
    tx: &mut OperationTransaction,
    items: &[T],
    access: CaptureAccess<T>,
    parent: ContextId,
) -> Result<(), CaptureError> {
    for (index, item) in items.iter().enumerate() {
        match access(item).parent_context() {
            None => return Err(CaptureError::NotCaptured { index }),
            Some(owner) if owner != parent => {
                return Err(CaptureError::CapturedByOther {
                    index,
                    owner,
                    expected: parent,
                });
            }
            Some(_) => {}
        }
    }

    for item in items {
        let cell = access(item).capture_cell();
        if cell.parent_context() != Some(parent) {
            // Duplicate entry already released earlier in this batch.
            continue;
        }
        cell.restore_owner(None);
        let previous_handler = cell.unsubscribe_edit_committed(parent);

        tx.add_revert_step(
            (item.clone(), previous_handler),
            move |(item, previous_handler)| {
                let cell = access(&item).capture_cell();
                cell.restore_owner(Some(parent));
                if let Some(h) = previous_handler {
                    cell.subscribe_edit_committed(parent, h);
                }
            },
        );
    }
    trace!(%parent, items = items.len(), "released batch");
    Ok(())
}

/// A transaction whose only job is capturing a batch.
#[derive(Debug)]
pub struct AutoCaptureTransaction {
    tx: OperationTransaction,
}

impl AutoCaptureTransaction {
    pub fn new<T: Clone + 'static>(
        items: &[T],
        access: CaptureAccess<T>,
        parent: ContextId,
        handler: Option<&EditCommittedHandler>,
    ) -> Result<Self, CaptureError> {
        let mut tx = OperationTransaction::new();
        capture_all(&mut tx, items, access, parent, handler)?;
        Ok(Self { tx })
    }

    pub fn into_inner(self) -> OperationTransaction {
        self.tx
    }
}

impl Deref for AutoCaptureTransaction {
    type Target = OperationTransaction;

    fn deref(&self) -> &OperationTransaction {
        &self.tx
    }
}

impl DerefMut for AutoCaptureTransaction {
    fn deref_mut(&mut self) -> &mut OperationTransaction {
        &mut self.tx
    }
}

/// A transaction whose only job is releasing a batch.
#[derive(Debug)]
pub struct AutoReleaseTransaction {
    tx: OperationTransaction,
}

impl AutoReleaseTransaction {
    pub fn new<T: Clone + 'static>(
        items: &[T],
        access: CaptureAccess<T>,
        parent: ContextId,
    ) -> Result<Self, CaptureError> {
        let mut tx = OperationTransaction::new();
        release_all(&mut tx, items, access, parent)?;
        Ok(Self { tx })
    }

    pub fn into_inner(self) -> OperationTransaction {
        self.tx
    }
}

impl Deref for AutoReleaseTransaction {
    type Target = OperationTransaction;

    fn deref(&self) -> &OperationTransaction {
        &self.tx
    }
}

impl DerefMut for AutoReleaseTransaction {
    fn deref_mut(&mut self) -> &mut OperationTransaction {
        &mut self.tx
    }
}
