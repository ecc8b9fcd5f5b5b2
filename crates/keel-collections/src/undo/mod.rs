#![forbid(unsafe_code)]

//! Undo/redo for observable lists.
//!
//! - [`record`]: the [`StateChange`] sum type and its interpreter
//! - [`log`]: the dual-stack [`UndoLog`] and its [`HistoryConfig`]

pub mod log;
pub mod record;

pub use log::{HistoryConfig, UndoLog};
pub use record::{Applied, Direction, StateChange, Transfers};
