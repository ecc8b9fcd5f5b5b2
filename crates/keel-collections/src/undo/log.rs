#![forbid(unsafe_code)]

//! Per-collection undo/redo stacks of [`StateChange`] records.
//!
//! ```text
//! push(r5)
//! ┌───────────────────────────────────────┐
//! │ Undo: [r1, r2, r3, r4, r5]            │
//! │ Redo: []                              │
//! └───────────────────────────────────────┘
//!
//! undo() x2
//! ┌───────────────────────────────────────┐
//! │ Undo: [r1, r2, r3]                    │
//! │ Redo: [r4, r5]                        │
//! └───────────────────────────────────────┘
//!
//! push(r6)  <-- forward mutation, truncates redo
//! ┌───────────────────────────────────────┐
//! │ Undo: [r1, r2, r3, r6]                │
//! │ Redo: []                              │
//! └───────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! 1. `undo_depth() <= config.max_depth` after every push.
//! 2. The redo stack is cleared whenever a record is pushed.
//! 3. A record whose replay fails goes back on the stack it came from.

use std::collections::VecDeque;
use std::fmt;

use super::record::StateChange;

/// Limits for an [`UndoLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Maximum records kept for undo; the oldest are evicted first.
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl HistoryConfig {
    #[must_use]
    pub const fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_depth: usize::MAX,
        }
    }

    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.max_depth != usize::MAX
    }
}

/// Dual-stack undo/redo history.
pub struct UndoLog<T> {
    /// Newest at back.
    undo_stack: VecDeque<StateChange<T>>,
    /// Newest at back.
    redo_stack: VecDeque<StateChange<T>>,
    config: HistoryConfig,
}

impl<T> fmt::Debug for UndoLog<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoLog")
            .field("undo_depth", &self.undo_stack.len())
            .field("redo_depth", &self.redo_stack.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<T> Default for UndoLog<T> {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl<T> UndoLog<T> {
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            config,
        }
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Record an already-applied mutation. Truncates redo history.
    pub fn push(&mut self, record: StateChange<T>) {
        self.redo_stack.clear();
        self.undo_stack.push_back(record);
        while self.undo_stack.len() > self.config.max_depth {
            self.undo_stack.pop_front();
        }
    }

    /// Replay the newest undo record through `replay`.
    ///
    /// On success the record moves to the redo stack; on failure it stays
    /// on the undo stack. Returns `None` when there is nothing to undo.
    pub fn undo<R, E>(
        &mut self,
        replay: impl FnOnce(&StateChange<T>) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let record = self.undo_stack.pop_back()?;
        match replay(&record) {
            Ok(out) => {
                self.redo_stack.push_back(record);
                Some(Ok(out))
            }
            Err(e) => {
                self.undo_stack.push_back(record);
                Some(Err(e))
            }
        }
    }

    /// Replay the newest redo record through `replay`, mirroring [`Self::undo`].
    pub fn redo<R, E>(
        &mut self,
        replay: impl FnOnce(&StateChange<T>) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let record = self.redo_stack.pop_back()?;
        match replay(&record) {
            Ok(out) => {
                self.undo_stack.push_back(record);
                Some(Ok(out))
            }
            Err(e) => {
                self.redo_stack.push_back(record);
                Some(Err(e))
            }
        }
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    // ========================================================================
    // Info
    // ========================================================================

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// The record the next undo would replay.
    #[must_use]
    pub fn peek_undo(&self) -> Option<&StateChange<T>> {
        self.undo_stack.back()
    }

    #[must_use]
    pub fn peek_redo(&self) -> Option<&StateChange<T>> {
        self.redo_stack.back()
    }

    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(index: usize) -> StateChange<u32> {
        StateChange::Add {
            index,
            item: index as u32,
        }
    }

    fn ok(_: &StateChange<u32>) -> Result<(), ()> {
        Ok(())
    }

    #[test]
    fn new_log_is_empty() {
        let log: UndoLog<u32> = UndoLog::default();
        assert!(!log.can_undo());
        assert!(!log.can_redo());
        assert!(!log.config().is_bounded());
    }

    #[test]
    fn undo_moves_record_to_redo() {
        let mut log = UndoLog::default();
        log.push(add(0));
        log.push(add(1));
        assert_eq!(log.undo(ok), Some(Ok(())));
        assert_eq!(log.undo_depth(), 1);
        assert_eq!(log.redo_depth(), 1);
        assert!(matches!(log.peek_redo(), Some(StateChange::Add { index: 1, .. })));
        assert_eq!(log.redo(ok), Some(Ok(())));
        assert_eq!(log.undo_depth(), 2);
        assert!(!log.can_redo());
    }

    #[test]
    fn push_truncates_redo() {
        let mut log = UndoLog::default();
        log.push(add(0));
        log.push(add(1));
        log.undo(ok);
        log.undo(ok);
        assert_eq!(log.redo_depth(), 2);
        log.push(add(5));
        assert_eq!(log.redo_depth(), 0);
        assert_eq!(log.undo_depth(), 1);
    }

    #[test]
    fn failed_replay_keeps_cursor() {
        let mut log = UndoLog::default();
        log.push(add(0));
        assert_eq!(log.undo(|_| Err::<(), _>("boom")), Some(Err("boom")));
        assert_eq!(log.undo_depth(), 1);
        assert_eq!(log.redo_depth(), 0);

        log.undo(ok);
        assert_eq!(log.redo(|_| Err::<(), _>("boom")), Some(Err("boom")));
        assert_eq!(log.redo_depth(), 1);
    }

    #[test]
    fn empty_stacks_return_none() {
        let mut log: UndoLog<u32> = UndoLog::default();
        assert!(log.undo(ok).is_none());
        assert!(log.redo(ok).is_none());
    }

    #[test]
    fn max_depth_evicts_oldest() {
        let mut log = UndoLog::new(HistoryConfig::new(2));
        for i in 0..5 {
            log.push(add(i));
        }
        assert_eq!(log.undo_depth(), 2);
        assert!(matches!(log.peek_undo(), Some(StateChange::Add { index: 4, .. })));
        log.undo(ok);
        assert!(matches!(log.peek_undo(), Some(StateChange::Add { index: 3, .. })));
    }

    #[test]
    fn clear_drops_both_stacks() {
        let mut log = UndoLog::default();
        log.push(add(0));
        log.push(add(1));
        log.undo(ok);
        log.clear();
        assert_eq!((log.undo_depth(), log.redo_depth()), (0, 0));
    }
}
