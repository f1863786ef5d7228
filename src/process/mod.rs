// src/process/mod.rs

//! Process supervision: registry of live children plus the platform
//! primitives used to stop them.
//!
//! Children are tracked by pid in two pools:
//!
//! - `Main`: regular commands and their pre/post hooks. Signalled first on
//!   shutdown.
//! - `After`: after-hook commands. Left alone by terminate/interrupt so they
//!   can finish their cleanup, killed only by [`ProcessSupervisor::kill_all`].
//!
//! On Unix every child leads its own process group, so signalling the group
//! also reaches processes spawned by the shell. On Windows, terminate and
//! interrupt both raise a console Ctrl-C event, which reaches the whole
//! console group rather than only the target; kills go through `taskkill /T`
//! and a kill-on-close job object that every child is assigned to.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::process::Command;
use tracing::debug;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as sys;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as sys;

/// Which registry pool a child belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPool {
    Main,
    After,
}

#[derive(Debug)]
pub struct ProcessSupervisor {
    main: Mutex<HashSet<u32>>,
    after: Mutex<HashSet<u32>>,
    terminating: AtomicBool,
    after_hooks_suppressed: AtomicBool,
    platform: sys::Platform,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self {
            main: Mutex::new(HashSet::new()),
            after: Mutex::new(HashSet::new()),
            terminating: AtomicBool::new(false),
            after_hooks_suppressed: AtomicBool::new(false),
            platform: sys::Platform::new(),
        }
    }
}

impl ProcessSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Apply the platform process-group setup to a command before spawning.
    pub fn prepare(&self, cmd: &mut Command) {
        self.platform.prepare(cmd);
    }

    /// Track a freshly spawned child. The returned guard removes it from the
    /// registry when dropped, i.e. once the caller has reaped the child.
    pub fn register(self: &Arc<Self>, pid: u32, pool: ProcessPool) -> Registration {
        self.platform.adopt(pid);
        self.pool(pool).insert(pid);
        debug!(pid, ?pool, "registered child process");
        Registration {
            supervisor: Arc::clone(self),
            pid,
            pool,
        }
    }

    /// Number of children currently registered in the given pool.
    pub fn live_count(&self, pool: ProcessPool) -> usize {
        self.pool(pool).len()
    }

    pub fn has_live_processes(&self) -> bool {
        self.live_count(ProcessPool::Main) > 0 || self.live_count(ProcessPool::After) > 0
    }

    /// Flip the process-wide terminating flag. Returns `true` only for the
    /// caller that actually flipped it.
    pub fn begin_termination(&self) -> bool {
        !self.terminating.swap(true, Ordering::SeqCst)
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// Stop any new after-hook chain from starting.
    pub fn suppress_after_hooks(&self) {
        self.after_hooks_suppressed.store(true, Ordering::SeqCst);
    }

    pub fn after_hooks_suppressed(&self) -> bool {
        self.after_hooks_suppressed.load(Ordering::SeqCst)
    }

    /// Graceful stop of one child's process group (SIGTERM on Unix).
    pub fn terminate(&self, pid: u32) {
        self.platform.terminate(pid);
    }

    /// SIGINT on Unix; identical to [`Self::terminate`] on Windows.
    pub fn interrupt(&self, pid: u32) {
        self.platform.interrupt(pid);
    }

    /// Unconditional hard kill of a child and its descendants.
    pub fn kill(&self, pid: u32) {
        self.platform.kill(pid);
    }

    /// Stop a child because its watched files changed. Windows has no
    /// reliable per-process graceful stop, so this kills there.
    pub fn terminate_for_restart(&self, pid: u32) {
        self.platform.restart_stop(pid);
    }

    /// Terminate every main-pool child.
    pub fn terminate_all(&self) {
        self.terminating.store(true, Ordering::SeqCst);
        for pid in self.snapshot(ProcessPool::Main) {
            self.platform.terminate(pid);
        }
    }

    /// Interrupt every main-pool child.
    pub fn interrupt_all(&self) {
        self.terminating.store(true, Ordering::SeqCst);
        for pid in self.snapshot(ProcessPool::Main) {
            self.platform.interrupt(pid);
        }
    }

    /// Kill every child in both pools and clear the registry.
    pub fn kill_all(&self) {
        for pool in [ProcessPool::Main, ProcessPool::After] {
            let pids: Vec<u32> = self.pool(pool).drain().collect();
            for pid in pids {
                self.platform.kill(pid);
            }
        }
        self.platform.release_all();
    }

    fn snapshot(&self, pool: ProcessPool) -> Vec<u32> {
        self.pool(pool).iter().copied().collect()
    }

    fn pool(&self, pool: ProcessPool) -> MutexGuard<'_, HashSet<u32>> {
        let lock = match pool {
            ProcessPool::Main => &self.main,
            ProcessPool::After => &self.after,
        };
        lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a child registered until dropped.
#[derive(Debug)]
pub struct Registration {
    supervisor: Arc<ProcessSupervisor>,
    pid: u32,
    pool: ProcessPool,
}

impl Registration {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.supervisor.pool(self.pool).remove(&self.pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_flag_flips_once() {
        let sup = ProcessSupervisor::new();
        assert!(!sup.is_terminating());
        assert!(sup.begin_termination());
        assert!(!sup.begin_termination());
        assert!(sup.is_terminating());
    }

    #[test]
    fn registration_guard_unregisters() {
        let sup = ProcessSupervisor::new();
        {
            let _main = sup.register(999_991, ProcessPool::Main);
            let _after = sup.register(999_992, ProcessPool::After);
            assert_eq!(sup.live_count(ProcessPool::Main), 1);
            assert_eq!(sup.live_count(ProcessPool::After), 1);
        }
        assert!(!sup.has_live_processes());
    }
}
