#![forbid(unsafe_code)]

//! Backing-store contract for observable lists.
//!
//! The mutation engine validates every index before it calls into an
//! adapter, so adapters may treat out-of-range indices as a bug and panic
//! the way `Vec` does.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Indexed storage behind an [`crate::ObservableList`].
pub trait StorageAdapter<T>: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<&T>;

    /// Insert at `index` (`index <= len`).
    fn insert(&mut self, index: usize, item: T);

    /// Remove and return the item at `index` (`index < len`).
    fn remove(&mut self, index: usize) -> T;

    /// Replace the item at `index` (`index < len`), returning the old one.
    fn replace(&mut self, index: usize, item: T) -> T;

    /// Remove every item, returning them in order.
    fn clear(&mut self) -> Vec<T>;

    fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_>;

    /// Insert `items` starting at `index`, preserving their order.
    fn insert_many(&mut self, index: usize, items: Vec<T>) {
        for (offset, item) in items.into_iter().enumerate() {
            self.insert(index + offset, item);
        }
    }

    /// Whether the store changed behind the engine's back since the last
    /// call. Returning `true` clears the signal; the engine then drops its
    /// undo history and raises a reset.
    fn take_must_reset(&self) -> bool {
        false
    }
}

/// The default adapter: a plain `Vec<T>`.
pub struct VecStore<T> {
    items: Vec<T>,
    must_reset: AtomicBool,
}

impl<T: fmt::Debug> fmt::Debug for VecStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VecStore")
            .field("items", &self.items)
            .field("must_reset", &self.must_reset.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> Default for VecStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> VecStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            must_reset: AtomicBool::new(false),
        }
    }

    /// Flag an out-of-band change; the next mutation resets the owning list.
    pub fn request_reset(&self) {
        self.must_reset.store(true, Ordering::Release);
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> From<Vec<T>> for VecStore<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items,
            must_reset: AtomicBool::new(false),
        }
    }
}

impl<T: Send + Sync> StorageAdapter<T> for VecStore<T> {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    fn insert(&mut self, index: usize, item: T) {
        self.items.insert(index, item);
    }

    fn remove(&mut self, index: usize) -> T {
        self.items.remove(index)
    }

    fn replace(&mut self, index: usize, item: T) -> T {
        std::mem::replace(&mut self.items[index], item)
    }

    fn clear(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        Box::new(self.items.iter())
    }

    fn insert_many(&mut self, index: usize, items: Vec<T>) {
        self.items.splice(index..index, items);
    }

    fn take_must_reset(&self) -> bool {
        self.must_reset.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_store_follows_vec_semantics() {
        let mut store = VecStore::from(vec![1, 2, 3]);
        store.insert(0, 0);
        assert_eq!(store.remove(3), 3);
        assert_eq!(store.replace(1, 10), 1);
        store.insert_many(1, vec![7, 8]);
        assert_eq!(store.as_slice(), &[0, 7, 8, 10, 2]);
        assert_eq!(store.iter().copied().sum::<i32>(), 27);
        assert_eq!(store.clear(), vec![0, 7, 8, 10, 2]);
        assert!(store.is_empty());
    }

    #[test]
    fn must_reset_is_taken_once() {
        let store: VecStore<u8> = VecStore::new();
        assert!(!store.take_must_reset());
        store.request_reset();
        assert!(store.take_must_reset());
        assert!(!store.take_must_reset());
    }
}
