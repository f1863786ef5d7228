// src/watch/mod.rs

//! File watching and watch-mode restarts.
//!
//! This module is responsible for:
//! - Normalizing and compiling `watch` include/exclude globs.
//! - Turning file-system events into "something changed" notifications
//!   (`notify`), behind the [`ChangeSource`] / [`WatcherFactory`] seam.
//! - The watch session state machine that debounces changes and restarts
//!   the running command.

pub mod path_utils;
pub mod patterns;
mod session;
pub mod watcher;

pub use patterns::{WatchMatcher, WatchPatterns, normalize_pattern};
pub use session::run_watch_session;
pub use watcher::{ChangeSource, NotifyChangeSource, NotifyWatcherFactory, WatcherFactory};
