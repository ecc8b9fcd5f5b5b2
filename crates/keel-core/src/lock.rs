#![forbid(unsafe_code)]

//! Timeout-bounded reader-writer lock with RAII tokens.
//!
//! [`ReaderWriterLock<T>`] wraps a `parking_lot::RwLock<T>` and hands out
//! three kinds of scoped token:
//!
//! | Token | Holds | Access |
//! |-------|-------|--------|
//! | [`ReadLockToken`] | shared read | `&T` |
//! | [`WriteLockToken`] | exclusive write | `&mut T` |
//! | [`ReadWriteLockToken`] | upgradeable read, upgraded once by value | `&T`, then a write token |
//!
//! Every token releases its lock when dropped, including during unwinding.
//!
//! # Invariants
//!
//! 1. Every acquisition and upgrade is bounded by [`LockSettings::timeout`].
//!    What happens on expiry is decided by [`LockTimeoutPolicy`].
//! 2. A thread may hold at most one token per lock. A second acquisition
//!    on the same thread fails with [`LockError::Recursive`] instead of
//!    deadlocking.
//! 3. A [`ReadWriteLockToken`] upgrades at most once, by value, and the
//!    write token it yields never downgrades.
//! 4. Acquisitions on a disposed lock fail with [`LockError::Disposed`]
//!    before the lock is touched.
//!
//! # Failure Modes
//!
//! - **Timeout under `WarnAndWait`**: the token logs a warning and then
//!   blocks until the lock is free. A writer that never releases starves
//!   the caller.
//! - **Upgrade contention**: only one upgradeable reader exists at a time,
//!   so upgradeable tokens serialize with each other (plain readers do not).

use std::cell::RefCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::error::LockError;
use crate::settings::{LockSettings, LockTimeoutPolicy};

/// Which kind of hold a token represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
    UpgradeableRead,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
            Self::UpgradeableRead => f.write_str("upgradeable read"),
        }
    }
}

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Ids of the locks the current thread holds a token for.
    static HELD: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Registration of one held lock in the per-thread ledger.
struct HeldLock {
    id: u64,
}

impl HeldLock {
    fn register(id: u64, mode: LockMode) -> Result<Self, LockError> {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if held.contains(&id) {
                return Err(LockError::Recursive { mode });
            }
            held.push(id);
            Ok(Self { id })
        })
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|id| *id == self.id) {
                held.swap_remove(pos);
            }
        });
    }
}

/// A reader-writer lock whose acquisitions are timeout bounded.
pub struct ReaderWriterLock<T> {
    id: u64,
    settings: LockSettings,
    disposed: AtomicBool,
    inner: RwLock<T>,
}

impl<T: fmt::Debug> fmt::Debug for ReaderWriterLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("ReaderWriterLock");
        dbg.field("id", &self.id)
            .field("settings", &self.settings)
            .field("disposed", &self.is_disposed());
        match self.inner.try_read() {
            Some(value) => dbg.field("value", &&*value),
            None => dbg.field("value", &"<locked>"),
        };
        dbg.finish()
    }
}

impl<T> ReaderWriterLock<T> {
    /// Create a lock using the process-wide [`LockSettings`].
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_settings(value, LockSettings::default())
    }

    /// Create a lock with a per-instance override.
    #[must_use]
    pub fn with_settings(value: T, settings: LockSettings) -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            settings,
            disposed: AtomicBool::new(false),
            inner: RwLock::new(value),
        }
    }

    #[must_use]
    pub fn settings(&self) -> LockSettings {
        self.settings
    }

    /// Mark the lock disposed. Returns `false` if it already was.
    pub fn dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Whether the calling thread currently holds a token on this lock.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        HELD.with(|held| held.borrow().contains(&self.id))
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Direct access through exclusive ownership; no token needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn acquire_read(&self) -> Result<ReadLockToken<'_, T>, LockError> {
        self.acquire_read_for(self.settings.timeout)
    }

    pub fn acquire_read_for(&self, timeout: Duration) -> Result<ReadLockToken<'_, T>, LockError> {
        let (guard, held) = self.acquire(
            LockMode::Read,
            timeout,
            |t| self.inner.try_read_for(t),
            || self.inner.read(),
        )?;
        Ok(ReadLockToken { guard, _held: held })
    }

    pub fn acquire_write(&self) -> Result<WriteLockToken<'_, T>, LockError> {
        self.acquire_write_for(self.settings.timeout)
    }

    pub fn acquire_write_for(&self, timeout: Duration) -> Result<WriteLockToken<'_, T>, LockError> {
        let (guard, held) = self.acquire(
            LockMode::Write,
            timeout,
            |t| self.inner.try_write_for(t),
            || self.inner.write(),
        )?;
        Ok(WriteLockToken { guard, _held: held })
    }

    pub fn acquire_upgradeable_read(&self) -> Result<ReadWriteLockToken<'_, T>, LockError> {
        self.acquire_upgradeable_read_for(self.settings.timeout)
    }

    pub fn acquire_upgradeable_read_for(
        &self,
        timeout: Duration,
    ) -> Result<ReadWriteLockToken<'_, T>, LockError> {
        let (guard, held) = self.acquire(
            LockMode::UpgradeableRead,
            timeout,
            |t| self.inner.try_upgradable_read_for(t),
            || self.inner.upgradable_read(),
        )?;
        Ok(ReadWriteLockToken {
            guard,
            settings: self.settings,
            _held: held,
        })
    }

    fn acquire<G>(
        &self,
        mode: LockMode,
        timeout: Duration,
        try_for: impl FnOnce(Duration) -> Option<G>,
        blocking: impl FnOnce() -> G,
    ) -> Result<(G, HeldLock), LockError> {
        if self.is_disposed() {
            return Err(LockError::Disposed);
        }
        let held = HeldLock::register(self.id, mode)?;
        if let Some(guard) = try_for(timeout) {
            return Ok((guard, held));
        }
        match self.settings.policy {
            LockTimeoutPolicy::Fail => Err(LockError::Timeout { mode, timeout }),
            LockTimeoutPolicy::WarnAndWait => {
                warn!(
                    lock_id = self.id,
                    %mode,
                    timeout_ms = timeout.as_millis() as u64,
                    "lock acquisition timed out; waiting without a deadline"
                );
                Ok((blocking(), held))
            }
        }
    }
}

/// Shared read hold.
pub struct ReadLockToken<'a, T> {
    guard: RwLockReadGuard<'a, T>,
    _held: HeldLock,
}

impl<T> Deref for ReadLockToken<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadLockToken<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadLockToken").field(&&*self.guard).finish()
    }
}

/// Exclusive write hold.
pub struct WriteLockToken<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    _held: HeldLock,
}

impl<T> Deref for WriteLockToken<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for WriteLockToken<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: fmt::Debug> fmt::Debug for WriteLockToken<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WriteLockToken").field(&&*self.guard).finish()
    }
}

/// Upgradeable read hold that may be escalated once to a write hold.
///
/// Escalation consumes the token, so it happens at most once and the
/// resulting [`WriteLockToken`] never downgrades.
pub struct ReadWriteLockToken<'a, T> {
    guard: RwLockUpgradableReadGuard<'a, T>,
    settings: LockSettings,
    _held: HeldLock,
}

impl<'a, T> ReadWriteLockToken<'a, T> {
    /// Escalate the upgradeable read to a write hold.
    ///
    /// Under [`LockTimeoutPolicy::Fail`] a timeout hands the token back
    /// with its read hold intact. Under `WarnAndWait` the escalation logs a
    /// warning and then blocks, so it always succeeds.
    pub fn upgrade(self) -> Result<WriteLockToken<'a, T>, Self> {
        let Self {
            guard,
            settings,
            _held: held,
        } = self;
        match RwLockUpgradableReadGuard::try_upgrade_for(guard, settings.timeout) {
            Ok(guard) => Ok(WriteLockToken { guard, _held: held }),
            Err(guard) => match settings.policy {
                LockTimeoutPolicy::Fail => Err(Self {
                    guard,
                    settings,
                    _held: held,
                }),
                LockTimeoutPolicy::WarnAndWait => {
                    warn!(
                        timeout_ms = settings.timeout.as_millis() as u64,
                        "lock upgrade timed out; waiting without a deadline"
                    );
                    Ok(WriteLockToken {
                        guard: RwLockUpgradableReadGuard::upgrade(guard),
                        _held: held,
                    })
                }
            },
        }
    }

    /// Escalate, reporting a timeout as [`LockError::Timeout`]. The read
    /// hold is released on failure.
    pub fn into_write(self) -> Result<WriteLockToken<'a, T>, LockError> {
        let timeout = self.settings.timeout;
        self.upgrade().map_err(|_| LockError::Timeout {
            mode: LockMode::Write,
            timeout,
        })
    }
}

impl<T> Deref for ReadWriteLockToken<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadWriteLockToken<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadWriteLockToken")
            .field(&&*self.guard)
            .finish()
    }
}
