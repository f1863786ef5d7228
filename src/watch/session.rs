// src/watch/session.rs

//! Watch session: run a node, restart it on debounced file changes.
//!
//! A single controller task owns all state and reacts to three inputs:
//! change notifications, the debounce deadline and "cycle ended" reports
//! from the run it started. Each run ("cycle") gets its own child token of
//! the session token and its own [`CycleControl`], so a restart only ever
//! cancels the cycle it replaces.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::ShutdownCause;
use crate::errors::{Interruption, Outcome};
use crate::exec::{CommandNode, CycleControl, Executor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Debouncing(Instant),
}

/// One in-flight run of the watched node. Its task outlives the struct when
/// the cycle is replaced, until its after-hooks are done.
struct Cycle {
    token: CancellationToken,
    control: Arc<CycleControl>,
}

impl Cycle {
    fn start(
        executor: &Executor,
        node: &Arc<CommandNode>,
        session: &CancellationToken,
        ended: &mpsc::UnboundedSender<Outcome>,
    ) -> Self {
        let token = session.child_token();
        let control = CycleControl::new();

        let executor = executor.clone();
        let node = Arc::clone(node);
        let run_token = token.clone();
        let run_control = Arc::clone(&control);
        let session = session.clone();
        let ended = ended.clone();
        // Held until this cycle's after-hooks are done, even when a newer
        // cycle is already running.
        let pending = executor.engine().tracker().token();

        tokio::spawn(async move {
            let _pending = pending;
            let outcome = executor
                .run_once(&node, &run_token, Some(&run_control))
                .await;
            run_control.finished().open();

            // After-hooks run under the session token so that replacing this
            // cycle does not cut them short.
            let after_change = outcome.is_watch_restart();
            if let Err(err) = executor
                .run_after_hooks(&node, &outcome, &session, after_change)
                .await
            {
                let engine = executor.engine();
                engine.console().error(
                    node.prefix.as_ref(),
                    &format!("Fail during execution of after command(s) in watch mode: {err}"),
                );
                engine.request_shutdown(ShutdownCause::Failure);
            }

            if !outcome.is_success() && !outcome.is_watch_restart() {
                let _ = ended.send(outcome);
            }
        });

        Self { token, control }
    }
}

/// Run `node` in watch mode until a run fails, the session token is
/// cancelled or the change source cannot be set up.
pub async fn run_watch_session(
    executor: &Executor,
    node: &Arc<CommandNode>,
    session: &CancellationToken,
) -> Outcome {
    let engine = executor.engine();
    let console = engine.console();
    let settings = engine.settings();
    let prefix = node.prefix.as_ref();

    console.info(prefix, "Starting in watch mode");
    node.mark_watch_executed();

    let mut source = match engine.watchers().create(&node.watch, prefix, console) {
        Ok(source) => source,
        Err(err) => return Outcome::Failed(err),
    };
    let mut changes = match source.start() {
        Ok(rx) => rx,
        Err(err) => {
            source.stop();
            return Outcome::Failed(err);
        }
    };

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel::<Outcome>();
    let mut cycle = Cycle::start(executor, node, session, &ended_tx);
    let mut state = State::Idle;
    let mut watching = true;

    let outcome = loop {
        let deadline = match state {
            State::Debouncing(deadline) => Some(deadline),
            State::Idle => None,
        };

        tokio::select! {
            _ = session.cancelled() => {
                break Outcome::Interrupted(Interruption::Terminated);
            }
            Some(outcome) = ended_rx.recv() => {
                break outcome;
            }
            change = changes.recv(), if watching => {
                if change.is_none() {
                    debug!("change source closed");
                    watching = false;
                    continue;
                }
                if engine.is_terminating() {
                    continue;
                }
                if state == State::Idle {
                    console.info(prefix, "File change detected. Stopping running command...");
                }
                state = State::Debouncing(Instant::now() + settings.debounce);
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                state = State::Idle;
                if engine.is_terminating() {
                    continue;
                }
                cycle = restart(executor, node, session, cycle, &ended_tx).await;
            }
        }
    };

    cycle.token.cancel();
    source.stop();
    outcome
}

/// Stop `old` (graceful first, then forced) and start a fresh cycle.
async fn restart(
    executor: &Executor,
    node: &Arc<CommandNode>,
    session: &CancellationToken,
    old: Cycle,
    ended: &mpsc::UnboundedSender<Outcome>,
) -> Cycle {
    let engine = executor.engine();
    let supervisor = engine.supervisor();

    old.control.mark_restarting();
    if let Some(pid) = old.control.pid() {
        supervisor.terminate_for_restart(pid);
    }

    if timeout(engine.settings().restart_grace, old.control.finished().wait())
        .await
        .is_err()
    {
        engine
            .console()
            .warn(None, "Command took too long to stop. Forcing stop...");
    }

    old.token.cancel();
    if let Some(pid) = old.control.pid() {
        supervisor.kill(pid);
    }
    old.control.finished().wait().await;

    debug!(node = %node.identifier, "restarting watched command");
    Cycle::start(executor, node, session, ended)
}
