#![forbid(unsafe_code)]

//! Locking iterator over an [`ObservableList`].
//!
//! Each `next()` takes a short read lock for one element, so writers may
//! run between steps. Under concurrent mutation an element can be skipped
//! or seen twice; the iterator never observes a torn store.

use std::iter::FusedIterator;

use tracing::debug;

use crate::error::CollectionError;
use crate::list::ObservableList;

/// Index-based iterator that re-locks for every element.
#[derive(Debug)]
pub struct Iter<'a, T> {
    list: &'a ObservableList<T>,
    next: usize,
    error: Option<CollectionError>,
}

impl<'a, T: Clone + Send + Sync + 'static> Iter<'a, T> {
    pub(crate) fn new(list: &'a ObservableList<T>) -> Self {
        Self {
            list,
            next: 0,
            error: None,
        }
    }

    /// The error that ended iteration early, if any.
    #[must_use]
    pub fn error(&self) -> Option<&CollectionError> {
        self.error.as_ref()
    }
}

impl<T: Clone + Send + Sync + 'static> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.error.is_some() {
            return None;
        }
        match self.list.get(self.next) {
            Ok(Some(item)) => {
                self.next += 1;
                Some(item)
            }
            Ok(None) => None,
            Err(err) => {
                debug!(index = self.next, %err, "iteration stopped");
                self.error = Some(err);
                None
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> FusedIterator for Iter<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_items_in_order() {
        let list = ObservableList::from_vec(vec![1, 2, 3]);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        let mut sum = 0;
        for x in &list {
            sum += x;
        }
        assert_eq!(sum, 6);
    }

    #[test]
    fn writer_may_run_between_steps() {
        let list = ObservableList::from_vec(vec![1, 2]);
        let mut iter = list.iter();
        assert_eq!(iter.next(), Some(1));
        list.push(3).unwrap();
        assert_eq!(iter.collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn disposal_ends_iteration_with_error() {
        let list = ObservableList::from_vec(vec![1, 2]);
        let mut iter = list.iter();
        assert_eq!(iter.next(), Some(1));
        list.dispose();
        assert_eq!(iter.next(), None);
        assert_eq!(iter.error(), Some(&CollectionError::Disposed));
    }
}
