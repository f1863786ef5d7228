// src/engine/mod.rs

//! Orchestration engine for runbook.
//!
//! This module ties together:
//! - the shared [`Engine`] context (console, process supervisor, prefix
//!   allocator, watcher factory, root cancellation token, in-flight tracker)
//! - the port gate ([`port`])
//! - the retry budget used by restartable runner entries ([`restart`])
//! - the runner scheduler ([`runner`])
//! - the shutdown coordinator ([`shutdown`])
//!
//! Command execution itself lives in `crate::exec`; the watch-mode restart
//! controller lives in `crate::watch::session`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::console::{Console, PrefixAllocator, StdConsole};
use crate::exec::Executor;
use crate::process::ProcessSupervisor;
use crate::watch::{NotifyWatcherFactory, WatcherFactory};

pub mod port;
pub mod restart;
pub mod runner;
pub mod shutdown;

pub use runner::{
    PortAwait, RestartPolicy, RunnerCommand, RunnerExecution, RunnerPlan, execute_runner,
};
pub use shutdown::{ShutdownCause, listen_for_signals};

/// Timings used by the engine. Production always runs with the defaults;
/// tests shorten them.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Quiet period after the last file change before a watch restart.
    pub debounce: Duration,
    /// How long a watch restart waits for the old process before killing it.
    pub restart_grace: Duration,
    /// How long shutdown waits for in-flight work before killing everything.
    pub shutdown_drain: Duration,
    /// Delay between two connection attempts while waiting on a port.
    pub port_poll: Duration,
    /// How often a "still waiting" line is printed while waiting on a port.
    pub port_log_interval: Duration,
    /// Port wait timeout (seconds) when a runner entry does not set one.
    pub default_port_timeout: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            restart_grace: Duration::from_secs(5),
            shutdown_drain: Duration::from_secs(10),
            port_poll: Duration::from_secs(1),
            port_log_interval: Duration::from_secs(5),
            default_port_timeout: 30.0,
        }
    }
}

/// Shared context handed to every part of the engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    settings: EngineSettings,
    console: Arc<dyn Console>,
    supervisor: Arc<ProcessSupervisor>,
    prefixes: Arc<PrefixAllocator>,
    watchers: Arc<dyn WatcherFactory>,
    root: CancellationToken,
    tracker: TaskTracker,
    shutdown_done: CompletionSignal,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.inner.settings)
            .field("terminating", &self.inner.supervisor.is_terminating())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn console(&self) -> &Arc<dyn Console> {
        &self.inner.console
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.inner.supervisor
    }

    pub fn prefixes(&self) -> &Arc<PrefixAllocator> {
        &self.inner.prefixes
    }

    pub fn watchers(&self) -> &Arc<dyn WatcherFactory> {
        &self.inner.watchers
    }

    /// Root execution token. Cancelled only by the shutdown coordinator.
    pub fn root_token(&self) -> &CancellationToken {
        &self.inner.root
    }

    /// Counts in-flight command runs and pending after-hook chains; the
    /// shutdown drain waits on it.
    pub fn tracker(&self) -> &TaskTracker {
        &self.inner.tracker
    }

    pub fn is_terminating(&self) -> bool {
        self.inner.supervisor.is_terminating()
    }

    pub fn executor(&self) -> Executor {
        Executor::new(self.clone())
    }

    pub(crate) fn shutdown_done(&self) -> &CompletionSignal {
        &self.inner.shutdown_done
    }
}

#[derive(Default)]
pub struct EngineBuilder {
    settings: EngineSettings,
    console: Option<Arc<dyn Console>>,
    supervisor: Option<Arc<ProcessSupervisor>>,
    prefixes: Option<Arc<PrefixAllocator>>,
    watchers: Option<Arc<dyn WatcherFactory>>,
}

impl EngineBuilder {
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn supervisor(mut self, supervisor: Arc<ProcessSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn prefixes(mut self, prefixes: Arc<PrefixAllocator>) -> Self {
        self.prefixes = Some(prefixes);
        self
    }

    pub fn watchers(mut self, watchers: Arc<dyn WatcherFactory>) -> Self {
        self.watchers = Some(watchers);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                settings: self.settings,
                console: self
                    .console
                    .unwrap_or_else(|| Arc::new(StdConsole::new())),
                supervisor: self.supervisor.unwrap_or_else(ProcessSupervisor::new),
                prefixes: self.prefixes.unwrap_or_else(PrefixAllocator::new),
                watchers: self
                    .watchers
                    .unwrap_or_else(|| Arc::new(NotifyWatcherFactory)),
                root: CancellationToken::new(),
                tracker: TaskTracker::new(),
                shutdown_done: CompletionSignal::new(),
            }),
        }
    }
}

/// Close-once, many-waiters signal.
///
/// Used to chain runner entries (an entry starts once its predecessor's
/// signal opens), to report that a watch cycle's process has finished, and
/// to report that shutdown has completed.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A signal that is already open.
    pub fn opened() -> Self {
        let signal = Self::new();
        signal.open();
        signal
    }

    /// Release every current and future waiter. Idempotent.
    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|open| *open).await;
    }
}
