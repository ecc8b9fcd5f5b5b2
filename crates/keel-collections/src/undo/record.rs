#![forbid(unsafe_code)]

//! Reversible state-change records and their interpreter.
//!
//! One [`StateChange`] describes one committed mutation. The same record
//! is applied [`Direction::Backward`] to undo it and
//! [`Direction::Forward`] to redo it; the first application of a fresh
//! mutation is also a forward application.
//!
//! # Ordering
//!
//! | Record | Forward | Backward |
//! |--------|---------|----------|
//! | `AddMultiple` | insert block at `index` | remove highest index first |
//! | `RemoveMultiple` | remove descending | reinsert ascending |
//! | `Composite` | children in order | children in reverse |
//!
//! # Invariants
//!
//! 1. [`StateChange::check`] succeeding against the store length means
//!    [`StateChange::apply`] cannot go out of bounds.
//! 2. `RemoveMultiple::indices` are strictly ascending positions in the
//!    list *before* the removal; `items[k]` sat at `indices[k]`.

use std::fmt;
use std::sync::Arc;

use keel_core::ItemEdit;

use crate::error::{CollectionError, Result};
use crate::notify::CollectionChange;
use crate::storage::StorageAdapter;

/// Which way a record is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A reversible description of one committed mutation.
#[derive(Clone)]
pub enum StateChange<T> {
    Add {
        index: usize,
        item: T,
    },
    AddMultiple {
        index: usize,
        items: Vec<T>,
    },
    Remove {
        index: usize,
        item: T,
    },
    RemoveMultiple {
        indices: Vec<usize>,
        items: Vec<T>,
    },
    Clear {
        items: Vec<T>,
    },
    ChangeAt {
        index: usize,
        old: T,
        new: T,
    },
    Composite(Vec<StateChange<T>>),
    /// A committed edit of a captured item.
    SubItem(Arc<dyn ItemEdit>),
}

impl<T: fmt::Debug> fmt::Debug for StateChange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { index, item } => f
                .debug_struct("Add")
                .field("index", index)
                .field("item", item)
                .finish(),
            Self::AddMultiple { index, items } => f
                .debug_struct("AddMultiple")
                .field("index", index)
                .field("items", items)
                .finish(),
            Self::Remove { index, item } => f
                .debug_struct("Remove")
                .field("index", index)
                .field("item", item)
                .finish(),
            Self::RemoveMultiple { indices, items } => f
                .debug_struct("RemoveMultiple")
                .field("indices", indices)
                .field("items", items)
                .finish(),
            Self::Clear { items } => f.debug_struct("Clear").field("items", items).finish(),
            Self::ChangeAt { index, old, new } => f
                .debug_struct("ChangeAt")
                .field("index", index)
                .field("old", old)
                .field("new", new)
                .finish(),
            Self::Composite(children) => f.debug_tuple("Composite").field(children).finish(),
            Self::SubItem(edit) => f.debug_tuple("SubItem").field(edit).finish(),
        }
    }
}

/// Items changing owner when a record is applied.
#[derive(Debug)]
pub struct Transfers<T> {
    pub leaving: Vec<T>,
    pub entering: Vec<T>,
}

impl<T> Default for Transfers<T> {
    fn default() -> Self {
        Self {
            leaving: Vec::new(),
            entering: Vec::new(),
        }
    }
}

/// What one application produced, for notification.
#[derive(Debug)]
pub struct Applied<T> {
    pub changes: Vec<CollectionChange<T>>,
    /// A sub-item edit replayed; item content changed without a structural change.
    pub items_edited: bool,
}

impl<T: Clone> StateChange<T> {
    /// Move `item` from `old_index` to `new_index`.
    pub fn moved(item: T, old_index: usize, new_index: usize) -> Self {
        Self::Composite(vec![
            Self::Remove {
                index: old_index,
                item: item.clone(),
            },
            Self::Add {
                index: new_index,
                item,
            },
        ])
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Add { .. } => "Add item",
            Self::AddMultiple { .. } => "Add items",
            Self::Remove { .. } => "Remove item",
            Self::RemoveMultiple { .. } => "Remove items",
            Self::Clear { .. } => "Clear",
            Self::ChangeAt { .. } => "Replace item",
            Self::Composite(_) if self.as_move().is_some() => "Move item",
            Self::Composite(_) => "Composite change",
            Self::SubItem(_) => "Edit item",
        }
    }

    /// `(item, old_index, new_index)` when this record is a move.
    fn as_move(&self) -> Option<(&T, usize, usize)> {
        match self {
            Self::Composite(children) => match children.as_slice() {
                [
                    Self::Remove { index: from, item },
                    Self::Add { index: to, .. },
                ] => Some((item, *from, *to)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Validate against a store of length `len`, returning the length after
    /// application. Nothing is mutated.
    pub fn check(&self, direction: Direction, len: usize) -> Result<usize> {
        use Direction::{Backward, Forward};
        let in_range = |index: usize, len: usize| {
            if index < len {
                Ok(())
            } else {
                Err(CollectionError::IndexOutOfRange { index, len })
            }
        };
        let insertable = |index: usize, len: usize| {
            if index <= len {
                Ok(())
            } else {
                Err(CollectionError::IndexOutOfRange { index, len })
            }
        };

        match (self, direction) {
            (Self::Add { index, .. }, Forward) | (Self::Remove { index, .. }, Backward) => {
                insertable(*index, len)?;
                Ok(len + 1)
            }
            (Self::Add { index, .. }, Backward) | (Self::Remove { index, .. }, Forward) => {
                in_range(*index, len)?;
                Ok(len - 1)
            }
            (Self::AddMultiple { index, items }, Forward) => {
                insertable(*index, len)?;
                Ok(len + items.len())
            }
            (Self::AddMultiple { index, items }, Backward) => {
                let count = items.len();
                match index.checked_add(count) {
                    Some(end) if end <= len => Ok(len - count),
                    _ => Err(CollectionError::RangeOutOfBounds {
                        start: *index,
                        count,
                        len,
                    }),
                }
            }
            (Self::RemoveMultiple { indices, .. }, Forward) => {
                if let Some(last) = indices.last() {
                    in_range(*last, len)?;
                }
                Ok(len - indices.len())
            }
            (Self::RemoveMultiple { indices, .. }, Backward) => {
                let mut current = len;
                for index in indices {
                    insertable(*index, current)?;
                    current += 1;
                }
                Ok(current)
            }
            (Self::Clear { items }, Forward) => {
                if len == items.len() {
                    Ok(0)
                } else {
                    Err(CollectionError::RangeOutOfBounds {
                        start: 0,
                        count: items.len(),
                        len,
                    })
                }
            }
            (Self::Clear { items }, Backward) => {
                if len == 0 {
                    Ok(items.len())
                } else {
                    Err(CollectionError::IndexOutOfRange { index: 0, len })
                }
            }
            (Self::ChangeAt { index, .. }, _) => {
                in_range(*index, len)?;
                Ok(len)
            }
            (Self::Composite(children), Forward) => children
                .iter()
                .try_fold(len, |len, child| child.check(Forward, len)),
            (Self::Composite(children), Backward) => children
                .iter()
                .rev()
                .try_fold(len, |len, child| child.check(Backward, len)),
            (Self::SubItem(_), _) => Ok(len),
        }
    }

    /// Items leaving and entering the collection under `direction`.
    #[must_use]
    pub fn transfers(&self, direction: Direction) -> Transfers<T> {
        let mut out = Transfers::default();
        self.collect_transfers(direction, &mut out);
        out
    }

    fn collect_transfers(&self, direction: Direction, out: &mut Transfers<T>) {
        let (gained, lost) = match direction {
            Direction::Forward => (&mut out.entering, &mut out.leaving),
            Direction::Backward => (&mut out.leaving, &mut out.entering),
        };
        match self {
            Self::Add { item, .. } => gained.push(item.clone()),
            Self::AddMultiple { items, .. } => gained.extend(items.iter().cloned()),
            Self::Remove { item, .. } => lost.push(item.clone()),
            Self::RemoveMultiple { items, .. } | Self::Clear { items } => {
                lost.extend(items.iter().cloned());
            }
            Self::ChangeAt { old, new, .. } => {
                lost.push(old.clone());
                gained.push(new.clone());
            }
            Self::Composite(children) => match direction {
                Direction::Forward => {
                    for child in children {
                        child.collect_transfers(direction, out);
                    }
                }
                Direction::Backward => {
                    for child in children.iter().rev() {
                        child.collect_transfers(direction, out);
                    }
                }
            },
            Self::SubItem(_) => {}
        }
    }

    /// Apply to `store`. Call only after [`Self::check`] succeeded.
    pub fn apply(&self, direction: Direction, store: &mut dyn StorageAdapter<T>) -> Applied<T> {
        let mut applied = Applied {
            changes: Vec::new(),
            items_edited: false,
        };
        if let Some((item, from, to)) = self.as_move() {
            let (old_index, new_index) = match direction {
                Direction::Forward => (from, to),
                Direction::Backward => (to, from),
            };
            let moving = store.remove(old_index);
            store.insert(new_index, moving);
            applied.changes.push(CollectionChange::Move {
                item: item.clone(),
                old_index,
                new_index,
            });
            return applied;
        }
        self.apply_into(direction, store, &mut applied);
        applied
    }

    fn apply_into(
        &self,
        direction: Direction,
        store: &mut dyn StorageAdapter<T>,
        applied: &mut Applied<T>,
    ) {
        use Direction::{Backward, Forward};
        let changes = &mut applied.changes;
        match (self, direction) {
            (Self::Add { index, item }, Forward) | (Self::Remove { index, item }, Backward) => {
                store.insert(*index, item.clone());
                changes.push(CollectionChange::Add {
                    index: *index,
                    items: vec![item.clone()],
                });
            }
            (Self::Add { index, item }, Backward) | (Self::Remove { index, item }, Forward) => {
                store.remove(*index);
                changes.push(CollectionChange::Remove {
                    index: *index,
                    items: vec![item.clone()],
                });
            }
            (Self::AddMultiple { index, items }, Forward) => {
                store.insert_many(*index, items.clone());
                changes.push(CollectionChange::Add {
                    index: *index,
                    items: items.clone(),
                });
            }
            (Self::AddMultiple { index, items }, Backward) => {
                for offset in (0..items.len()).rev() {
                    store.remove(index + offset);
                }
                changes.push(CollectionChange::Remove {
                    index: *index,
                    items: items.clone(),
                });
            }
            (Self::RemoveMultiple { indices, items }, Forward) => {
                for index in indices.iter().rev() {
                    store.remove(*index);
                }
                for run in contiguous_runs(indices).into_iter().rev() {
                    changes.push(CollectionChange::Remove {
                        index: indices[run.start],
                        items: items[run].to_vec(),
                    });
                }
            }
            (Self::RemoveMultiple { indices, items }, Backward) => {
                for (index, item) in indices.iter().zip(items) {
                    store.insert(*index, item.clone());
                }
                for run in contiguous_runs(indices) {
                    changes.push(CollectionChange::Add {
                        index: indices[run.start],
                        items: items[run].to_vec(),
                    });
                }
            }
            (Self::Clear { .. }, Forward) => {
                store.clear();
                changes.push(CollectionChange::Reset);
            }
            (Self::Clear { items }, Backward) => {
                store.insert_many(0, items.clone());
                if !items.is_empty() {
                    changes.push(CollectionChange::Add {
                        index: 0,
                        items: items.clone(),
                    });
                }
            }
            (Self::ChangeAt { index, old, new }, _) => {
                let (from, to) = match direction {
                    Forward => (old, new),
                    Backward => (new, old),
                };
                store.replace(*index, to.clone());
                changes.push(CollectionChange::Replace {
                    index: *index,
                    old: from.clone(),
                    new: to.clone(),
                });
            }
            (Self::Composite(children), Forward) => {
                for child in children {
                    child.apply_into(Forward, store, applied);
                }
            }
            (Self::Composite(children), Backward) => {
                for child in children.iter().rev() {
                    child.apply_into(Backward, store, applied);
                }
            }
            (Self::SubItem(edit), Forward) => {
                edit.redo();
                applied.items_edited = true;
            }
            (Self::SubItem(edit), Backward) => {
                edit.undo();
                applied.items_edited = true;
            }
        }
    }
}

/// Ranges of positions in `indices` whose values are consecutive integers.
fn contiguous_runs(indices: &[usize]) -> Vec<std::ops::Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    for k in 1..=indices.len() {
        if k == indices.len() || indices[k] != indices[k - 1] + 1 {
            if k > start {
                runs.push(start..k);
            }
            start = k;
        }
    }
    runs
}
