#![forbid(unsafe_code)]

//! Scoped commit/rollback unit.
//!
//! An [`OperationTransaction`] collects compensating ("revert") steps while
//! an operation makes progress. Dropping the transaction without calling
//! [`OperationTransaction::success`] runs every revert step, newest first.
//! Calling `success` discards the revert steps and arms the
//! [`OperationTransaction::when_successful`] hooks instead.
//!
//! ```text
//! add_revert_step(a)   add_revert_step(b)   add_revert_step(c)   drop (no success)
//!        │                    │                    │                  │
//!        ▼                    ▼                    ▼                  ▼
//!   reverts: [a]         reverts: [a, b]     reverts: [a, b, c]   run c, b, a
//! ```
//!
//! # Failure Modes
//!
//! - **Revert step panics**: the remaining steps still run. The first panic
//!   is re-raised afterwards unless the thread is already unwinding.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};

use tracing::debug;

type Step = Box<dyn FnOnce()>;

/// A commit/rollback unit. Not `Send`: it lives and dies on one thread.
#[must_use = "dropping a transaction without success() rolls it back"]
pub struct OperationTransaction {
    reverts: Vec<Step>,
    on_success: Vec<Step>,
    succeeded: bool,
}

impl fmt::Debug for OperationTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTransaction")
            .field("revert_steps", &self.reverts.len())
            .field("success_hooks", &self.on_success.len())
            .field("succeeded", &self.succeeded)
            .finish()
    }
}

impl Default for OperationTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationTransaction {
    /// An empty transaction. With nothing registered, rollback is a no-op.
    pub fn new() -> Self {
        Self {
            reverts: Vec::new(),
            on_success: Vec::new(),
            succeeded: false,
        }
    }

    /// A transaction that is already marked successful.
    pub fn succeeded() -> Self {
        let mut tx = Self::new();
        tx.succeeded = true;
        tx
    }

    /// Register a compensating step that receives the state it restores.
    pub fn add_revert_step<S: 'static>(&mut self, state: S, action: impl FnOnce(S) + 'static) {
        self.reverts.push(Box::new(move || action(state)));
    }

    /// Register a hook that runs on drop only if the transaction succeeded.
    pub fn when_successful(&mut self, action: impl FnOnce() + 'static) {
        self.on_success.push(Box::new(action));
    }

    /// Mark the unit complete; revert steps will not run.
    pub fn success(&mut self) {
        self.succeeded = true;
    }

    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.succeeded
    }

    #[must_use]
    pub fn revert_step_count(&self) -> usize {
        self.reverts.len()
    }

    /// Mark successful and finish now.
    pub fn commit(mut self) {
        self.success();
    }

    /// Finish now without success, running every revert step.
    pub fn rollback(self) {}
}

fn run_all(steps: impl Iterator<Item = Step>) {
    let mut first_panic: Option<Box<dyn Any + Send>> = None;
    for step in steps {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(step))
            && first_panic.is_none()
        {
            first_panic = Some(payload);
        }
    }
    if let Some(payload) = first_panic
        && !std::thread::panicking()
    {
        resume_unwind(payload);
    }
}

impl Drop for OperationTransaction {
    fn drop(&mut self) {
        let reverts = std::mem::take(&mut self.reverts);
        let on_success = std::mem::take(&mut self.on_success);
        if self.succeeded {
            run_all(on_success.into_iter());
        } else {
            if !reverts.is_empty() {
                debug!(steps = reverts.len(), "rolling back operation transaction");
            }
            run_all(reverts.into_iter().rev());
        }
    }
}
