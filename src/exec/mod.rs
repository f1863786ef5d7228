// src/exec/mod.rs

//! Command execution.
//!
//! - [`CommandNode`]: one node of a hook tree (pre / main / post / after).
//! - [`Executor`]: runs a node's hook chain in a shell, streaming output
//!   through the engine's console, and dispatches after-hooks.
//! - `shell`: wraps command lines for the platform shell.
//! - `output`: line pumps for child stdout/stderr.

mod after;
mod executor;
mod node;
mod output;
pub mod shell;

pub use executor::{CycleControl, Executor};
pub use node::{AfterBranches, CommandNode, Hooks};
