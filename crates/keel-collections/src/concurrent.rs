#![forbid(unsafe_code)]

//! Lazily locked, version-keyed view cache.
//!
//! Wrappers that derive a view from other lists (filtering, merging) keep
//! it in a [`ViewCache`]. The cache owns one [`ReaderWriterLock`] that is
//! built on first use, so a wrapper that is never read never allocates a
//! lock. The lock is never serialized.
//!
//! ```text
//! get_or_build(key)
//!   upgradeable read ──► cached key == key ? ──yes──► clone view
//!                                 │
//!                                 no
//!                                 ▼
//!                        upgrade ──► build() ──► store (key, view)
//! ```
//!
//! # Invariants
//!
//! 1. A view is returned only under the key it was built for.
//! 2. Readers of a current view never block each other.
//! 3. After `dispose` every call fails with `Disposed`; the second
//!    `dispose` returns `false`.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use keel_core::{LockSettings, ReaderWriterLock};
use tracing::trace;

use crate::error::{CollectionError, Result};

/// A cached `(key, view)` pair behind a lazily constructed lock.
pub struct ViewCache<K, V> {
    lock: OnceLock<ReaderWriterLock<Option<(K, V)>>>,
    settings: LockSettings,
    disposed: AtomicBool,
}

impl<K, V> fmt::Debug for ViewCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCache")
            .field("constructed", &self.lock.get().is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<K, V> Default for ViewCache<K, V> {
    fn default() -> Self {
        Self::new(LockSettings::default())
    }
}

impl<K, V> ViewCache<K, V> {
    #[must_use]
    pub fn new(settings: LockSettings) -> Self {
        Self {
            lock: OnceLock::new(),
            settings,
            disposed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<&ReaderWriterLock<Option<(K, V)>>> {
        if self.is_disposed() {
            return Err(CollectionError::Disposed);
        }
        Ok(self
            .lock
            .get_or_init(|| ReaderWriterLock::with_settings(None, self.settings)))
    }

    /// Whether the lock has been built yet.
    #[must_use]
    pub fn is_constructed(&self) -> bool {
        self.lock.get().is_some()
    }

    /// Drop the cached view. A cache that was never read stays unbuilt.
    pub fn invalidate(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(CollectionError::Disposed);
        }
        if let Some(lock) = self.lock.get() {
            *lock.acquire_write()? = None;
            trace!("view cache invalidated");
        }
        Ok(())
    }

    pub fn dispose(&self) -> bool {
        let first = !self.disposed.swap(true, Ordering::AcqRel);
        if first && let Some(lock) = self.lock.get() {
            lock.dispose();
        }
        first
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl<K: PartialEq, V: Clone> ViewCache<K, V> {
    /// Return the view cached under `key`, building it on a miss.
    ///
    /// `build` runs with the cache write-locked; it must not touch this
    /// cache. A failed build leaves the previous entry in place.
    pub fn get_or_build(&self, key: K, build: impl FnOnce() -> Result<V>) -> Result<V> {
        let token = self.lock()?.acquire_upgradeable_read()?;
        if let Some((cached, view)) = &*token
            && *cached == key
        {
            return Ok(view.clone());
        }
        let mut slot = token.into_write()?;
        let view = build()?;
        *slot = Some((key, view.clone()));
        trace!("view cache rebuilt");
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::LockTimeoutPolicy;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn cache() -> ViewCache<u64, Vec<u8>> {
        ViewCache::new(LockSettings::new(
            Duration::from_millis(100),
            LockTimeoutPolicy::Fail,
        ))
    }

    #[test]
    fn lock_is_built_on_first_use() {
        let cache = cache();
        assert!(!cache.is_constructed());
        cache.invalidate().unwrap();
        assert!(!cache.is_constructed());
        cache.get_or_build(1, || Ok(vec![1])).unwrap();
        assert!(cache.is_constructed());
    }

    #[test]
    fn hit_skips_build_and_miss_rebuilds() {
        let cache = cache();
        let builds = AtomicUsize::new(0);
        let build = |v: u8| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(vec![v])
        };
        assert_eq!(cache.get_or_build(1, || build(1)).unwrap(), vec![1]);
        assert_eq!(cache.get_or_build(1, || build(9)).unwrap(), vec![1]);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get_or_build(2, || build(2)).unwrap(), vec![2]);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let cache = cache();
        cache.get_or_build(1, || Ok(vec![1])).unwrap();
        cache.invalidate().unwrap();
        assert_eq!(cache.get_or_build(1, || Ok(vec![7])).unwrap(), vec![7]);
    }

    #[test]
    fn failed_build_propagates() {
        let cache = cache();
        cache.get_or_build(1, || Ok(vec![1])).unwrap();
        let err = cache
            .get_or_build(2, || Err(CollectionError::Disposed))
            .unwrap_err();
        assert_eq!(err, CollectionError::Disposed);
        assert_eq!(cache.get_or_build(1, || Ok(vec![0])).unwrap(), vec![1]);
    }

    #[test]
    fn dispose_is_one_shot() {
        let cache = cache();
        cache.get_or_build(1, || Ok(vec![1])).unwrap();
        assert!(cache.dispose());
        assert!(!cache.dispose());
        assert_eq!(
            cache.get_or_build(1, || Ok(vec![1])).unwrap_err(),
            CollectionError::Disposed
        );
        assert_eq!(cache.invalidate().unwrap_err(), CollectionError::Disposed);
    }
}
