// src/exec/node.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::task::task_tracker::TaskTrackerToken;

use crate::console::LogPrefix;
use crate::watch::WatchPatterns;

/// One node of a command hook tree.
///
/// Built once during resolution and read-only afterwards, apart from the
/// run-state flags. All command lines of a node run in a single shell
/// invocation, chained with `&&`.
#[derive(Debug, Default)]
pub struct CommandNode {
    /// `cmd`, `project`, `project:cmd` or the runner name for literal lines.
    pub identifier: String,
    pub dir: PathBuf,
    /// Shell override. `None` means the platform default.
    pub shell: Option<String>,
    pub commands: Vec<String>,
    /// Environment overlay, later entries win.
    pub env: Vec<(String, String)>,
    pub watch: WatchPatterns,
    /// Set on runner entries only; hooks print with their root's prefix.
    pub prefix: Option<LogPrefix>,
    pub hooks: Hooks,
    /// Only populated on after-hook nodes.
    pub branches: AfterBranches,
    state: RunState,
}

#[derive(Debug, Default)]
pub struct Hooks {
    pub project_pre: Option<Box<CommandNode>>,
    pub project_post: Option<Box<CommandNode>>,
    pub project_after: Option<Box<CommandNode>>,
    pub pre: Option<Box<CommandNode>>,
    pub post: Option<Box<CommandNode>>,
    pub after: Option<Box<CommandNode>>,
}

#[derive(Debug, Default)]
pub struct AfterBranches {
    pub success: Option<Box<CommandNode>>,
    pub failure: Option<Box<CommandNode>>,
    pub change: Option<Box<CommandNode>>,
    pub always: Option<Box<CommandNode>>,
}

impl AfterBranches {
    pub fn is_empty(&self) -> bool {
        self.success.is_none()
            && self.failure.is_none()
            && self.change.is_none()
            && self.always.is_none()
    }
}

#[derive(Default)]
struct RunState {
    after_executed: AtomicBool,
    watch_executed: AtomicBool,
    /// Keeps the shutdown drain waiting until this node's after-hooks ran.
    /// One-shot runs only; a node runs at most once at a time outside watch
    /// mode.
    pending_after: Mutex<Option<TaskTrackerToken>>,
}

impl fmt::Debug for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunState")
            .field("after_executed", &self.after_executed.load(Ordering::SeqCst))
            .field("watch_executed", &self.watch_executed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl CommandNode {
    pub fn new(identifier: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn has_after_hooks(&self) -> bool {
        self.hooks.after.is_some() || self.hooks.project_after.is_some()
    }

    pub fn has_watch(&self) -> bool {
        self.watch.has_includes()
    }

    pub fn after_executed(&self) -> bool {
        self.state.after_executed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_after_executed(&self) {
        self.state.after_executed.store(true, Ordering::SeqCst);
    }

    /// Whether this node ran under a watch session, which then owns the
    /// after-hook calls.
    pub fn watch_executed(&self) -> bool {
        self.state.watch_executed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_watch_executed(&self) {
        self.state.watch_executed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn arm_pending_after(&self, token: TaskTrackerToken) {
        *self.pending() = Some(token);
    }

    pub(crate) fn take_pending_after(&self) -> Option<TaskTrackerToken> {
        self.pending().take()
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Option<TaskTrackerToken>> {
        self.state
            .pending_after
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Indented tree view used by `--dry-run`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.describe_into(&mut out, 0);
        out
    }

    fn describe_into(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        out.push_str(&format!("{pad}dir: {}\n", self.dir.display()));
        if let Some(shell) = &self.shell {
            out.push_str(&format!("{pad}shell: {shell}\n"));
        }
        for line in &self.commands {
            out.push_str(&format!("{pad}run: {line}\n"));
        }
        for (key, value) in &self.env {
            out.push_str(&format!("{pad}env: {key}={value}\n"));
        }
        for pattern in &self.watch.include {
            out.push_str(&format!("{pad}watch: {pattern}\n"));
        }
        for pattern in &self.watch.exclude {
            out.push_str(&format!("{pad}exclude: {pattern}\n"));
        }

        let children = [
            ("project pre", &self.hooks.project_pre),
            ("pre", &self.hooks.pre),
            ("post", &self.hooks.post),
            ("project post", &self.hooks.project_post),
            ("after", &self.hooks.after),
            ("project after", &self.hooks.project_after),
            ("success", &self.branches.success),
            ("failure", &self.branches.failure),
            ("change", &self.branches.change),
            ("always", &self.branches.always),
        ];
        for (label, child) in children {
            if let Some(child) = child {
                out.push_str(&format!("{pad}{label}:\n"));
                child.describe_into(out, depth + 1);
            }
        }
    }
}
