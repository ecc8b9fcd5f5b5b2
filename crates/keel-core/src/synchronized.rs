#![forbid(unsafe_code)]

//! Synchronized base: one reader-writer lock per owned value.
//!
//! Collections keep all shared state inside a single [`Synchronized<T>`]
//! and reach it only through the helpers below, so every access is
//! bracketed by a lock token that is released on scope exit.
//!
//! With the `serde` feature the *value* round-trips; the lock never does.
//! Deserialization always builds a fresh lock from the process-wide
//! [`LockSettings`].

use std::fmt;

use crate::error::LockError;
use crate::lock::{ReadLockToken, ReadWriteLockToken, ReaderWriterLock, WriteLockToken};
use crate::settings::LockSettings;

/// A value guarded by its own timeout-bounded reader-writer lock.
pub struct Synchronized<T> {
    lock: ReaderWriterLock<T>,
}

impl<T: fmt::Debug> fmt::Debug for Synchronized<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronized")
            .field("lock", &self.lock)
            .finish()
    }
}

impl<T: Default> Default for Synchronized<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Synchronized<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_settings(value, LockSettings::default())
    }

    #[must_use]
    pub fn with_settings(value: T, settings: LockSettings) -> Self {
        Self {
            lock: ReaderWriterLock::with_settings(value, settings),
        }
    }

    /// Run `f` under a read lock.
    pub fn read_lock<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, LockError> {
        let token = self.lock.acquire_read()?;
        Ok(f(&token))
    }

    /// Run `f` under a write lock.
    pub fn write_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, LockError> {
        let mut token = self.lock.acquire_write()?;
        Ok(f(&mut token))
    }

    /// Take an upgradeable read token; call [`ReadWriteLockToken::upgrade`]
    /// or [`ReadWriteLockToken::into_write`] once validation passes.
    pub fn acquire_read_write_lock(&self) -> Result<ReadWriteLockToken<'_, T>, LockError> {
        self.lock.acquire_upgradeable_read()
    }

    pub fn acquire_read_lock(&self) -> Result<ReadLockToken<'_, T>, LockError> {
        self.lock.acquire_read()
    }

    pub fn acquire_write_lock(&self) -> Result<WriteLockToken<'_, T>, LockError> {
        self.lock.acquire_write()
    }

    #[must_use]
    pub fn lock(&self) -> &ReaderWriterLock<T> {
        &self.lock
    }

    #[must_use]
    pub fn settings(&self) -> LockSettings {
        self.lock.settings()
    }

    /// Dispose the lock. Returns `false` on the second call.
    pub fn dispose(&self) -> bool {
        self.lock.dispose()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lock.is_disposed()
    }

    pub fn into_inner(self) -> T {
        self.lock.into_inner()
    }

    /// Direct access through exclusive ownership; no token needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.lock.get_mut()
    }
}

#[cfg(feature = "serde")]
impl<T: serde::Serialize> serde::Serialize for Synchronized<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let token = self
            .lock
            .acquire_read()
            .map_err(<S::Error as serde::ser::Error>::custom)?;
        serde::Serialize::serialize(&*token, serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de, T: serde::Deserialize<'de>> serde::Deserialize<'de> for Synchronized<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self::new)
    }
}
