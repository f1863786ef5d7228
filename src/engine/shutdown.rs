// src/engine/shutdown.rs

//! Shutdown coordinator.
//!
//! `request_shutdown` is the only way the invocation is torn down. It flips
//! the terminating flag exactly once, then a background task:
//!
//! 1. signals every main-pool child (interrupt for Ctrl-C, terminate
//!    otherwise),
//! 2. waits up to `shutdown_drain` for in-flight runs and pending after-hook
//!    chains tracked by the engine's `TaskTracker`,
//! 3. suppresses new after-hooks, cancels the root token and kills whatever
//!    is left in both pools,
//! 4. opens the `shutdown_done` signal that the top-level invocation waits
//!    on before exiting non-zero.

use tokio::time::timeout;
use tracing::{debug, info};

use super::Engine;

/// Why shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// A serial/dependent entry, a failed command or a failed after-hook.
    Failure,
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl ShutdownCause {
    pub fn is_signal(self) -> bool {
        !matches!(self, ShutdownCause::Failure)
    }
}

impl Engine {
    /// Start a graceful shutdown. Only the first call has any effect.
    pub fn request_shutdown(&self, cause: ShutdownCause) {
        if !self.supervisor().begin_termination() {
            debug!(?cause, "shutdown already in progress");
            return;
        }

        info!(?cause, "shutdown requested");
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drain(cause).await;
        });
    }

    /// Resolves once shutdown has completed (all children killed).
    pub async fn wait_for_shutdown(&self) {
        self.shutdown_done().wait().await;
    }

    pub fn shutdown_finished(&self) -> bool {
        self.shutdown_done().is_open()
    }

    async fn drain(&self, cause: ShutdownCause) {
        let supervisor = self.supervisor();

        if supervisor.live_count(crate::process::ProcessPool::Main) == 0 {
            self.force_stop();
            return;
        }

        self.console()
            .warn(None, "Shutting down processes... (don't close the terminal)");

        // On Windows the console control event from the signal already
        // reached every child in the console group.
        if !cfg!(windows) || !cause.is_signal() {
            match cause {
                ShutdownCause::Interrupt => supervisor.interrupt_all(),
                _ => supervisor.terminate_all(),
            }
        }

        let tracker = self.tracker();
        tracker.close();
        if timeout(self.settings().shutdown_drain, tracker.wait())
            .await
            .is_err()
        {
            self.console().warn(
                None,
                "Child processes took too long to terminate. Forcing shutdown...",
            );
        }

        self.force_stop();
    }

    fn force_stop(&self) {
        let supervisor = self.supervisor();
        supervisor.suppress_after_hooks();
        self.root_token().cancel();
        supervisor.kill_all();
        debug!("shutdown complete");
        self.shutdown_done().open();
    }
}

/// Translate OS signals into shutdown requests. Runs until the process
/// exits; spawn it once per invocation.
pub async fn listen_for_signals(engine: Engine) {
    loop {
        let Some((name, cause)) = next_signal().await else {
            return;
        };

        if !engine.is_terminating() {
            engine
                .console()
                .warn(None, &format!("Received `{name}` signal"));
        }
        engine.request_shutdown(cause);
    }
}

#[cfg(unix)]
async fn next_signal() -> Option<(&'static str, ShutdownCause)> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            debug!(error = %err, "cannot listen for SIGTERM");
            return tokio::signal::ctrl_c()
                .await
                .ok()
                .map(|_| ("interrupt", ShutdownCause::Interrupt));
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.ok().map(|_| ("interrupt", ShutdownCause::Interrupt)),
        _ = term.recv() => Some(("terminated", ShutdownCause::Terminate)),
    }
}

#[cfg(windows)]
async fn next_signal() -> Option<(&'static str, ShutdownCause)> {
    tokio::signal::ctrl_c()
        .await
        .ok()
        .map(|_| ("interrupt", ShutdownCause::Interrupt))
}
