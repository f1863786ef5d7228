// src/engine/runner.rs

//! Runner scheduler.
//!
//! Entries are chained with [`CompletionSignal`]s: entry `i` waits on the
//! signal opened by entry `i - 1`. A non-serial entry opens its successor's
//! signal as soon as it starts; a serial entry only once it is done.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::{Outcome, Result};
use crate::exec::CommandNode;
use crate::types::{RestartCondition, RunnerFlags, format_seconds, seconds_to_duration};

use super::port::wait_for_ports;
use super::restart::{RetryBudget, RetryDecision};
use super::shutdown::ShutdownCause;
use super::{CompletionSignal, Engine};

/// Auto-restart settings of one runner entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub condition: RestartCondition,
    /// Seconds between two runs.
    pub interval: f64,
    /// `0` means unlimited.
    pub retries: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            condition: RestartCondition::Failure,
            interval: 1.0,
            retries: 0,
        }
    }
}

/// Ports an entry waits for before it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct PortAwait {
    pub ports: Vec<u16>,
    /// Seconds; `<= 0` means the engine default.
    pub timeout: f64,
}

/// One entry of a runner, as written in the config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnerCommand {
    pub cmd: String,
    pub name: Option<String>,
    /// Seconds to wait before each run.
    pub delay: f64,
    pub restart: RestartPolicy,
    pub awaits: Option<PortAwait>,
    pub serial: bool,
    pub dependent: bool,
}

/// A resolved entry: the command tree plus its policy.
#[derive(Debug, Clone)]
pub struct RunnerExecution {
    pub node: Arc<CommandNode>,
    pub command: RunnerCommand,
}

/// A named (or inline) runner ready to execute.
#[derive(Debug, Clone)]
pub struct RunnerPlan {
    pub name: String,
    pub inline: bool,
    pub flags: RunnerFlags,
    pub executions: Vec<RunnerExecution>,
}

impl RunnerPlan {
    fn start_message(&self) -> String {
        let flags = self.flags.names();
        match (self.inline, flags.is_empty()) {
            (true, true) => format!(
                "Starting inline runner with {} command(s)",
                self.executions.len()
            ),
            (true, false) => format!(
                "Starting inline runner with flags [{}] and {} command(s)",
                flags.join(", "),
                self.executions.len()
            ),
            (false, true) => format!("Starting runner `{}`", self.name),
            (false, false) => format!(
                "Starting runner `{}` with flags [{}]",
                self.name,
                flags.join(", ")
            ),
        }
    }
}

/// Reactions to entry failures, shared by every entry of one runner.
#[derive(Debug, Clone)]
struct EntryHandlers {
    engine: Engine,
    runner: String,
    flags: RunnerFlags,
}

impl EntryHandlers {
    /// Entry flags OR-ed with the runner's own.
    fn is_serial(&self, command: &RunnerCommand) -> bool {
        command.serial || self.flags.serial
    }

    fn is_dependent(&self, command: &RunnerCommand) -> bool {
        command.dependent || self.flags.dependent
    }

    fn serial_failure(&self, command: &RunnerCommand) {
        if self.is_serial(command) {
            self.engine.console().error(
                None,
                &format!("A serial command in runner `{}` has failed", self.runner),
            );
            self.engine.request_shutdown(ShutdownCause::Failure);
        }
    }

    fn dependent_completion(&self, command: &RunnerCommand) {
        if self.is_dependent(command) {
            self.engine.console().error(
                None,
                &format!(
                    "A dependent command in runner `{}` has failed or finished",
                    self.runner
                ),
            );
            self.engine.request_shutdown(ShutdownCause::Failure);
        }
    }
}

/// Execute every entry of `plan` and wait for all of them.
pub async fn execute_runner(engine: &Engine, plan: RunnerPlan) -> Result<()> {
    engine.console().info(None, &plan.start_message());

    let handlers = EntryHandlers {
        engine: engine.clone(),
        runner: plan.name.clone(),
        flags: plan.flags,
    };

    let mut entries = JoinSet::new();
    let mut previous = CompletionSignal::opened();

    for execution in plan.executions {
        let next = CompletionSignal::new();
        let entry = Entry {
            engine: engine.clone(),
            handlers: handlers.clone(),
            execution,
            start: previous,
            next: next.clone(),
        };
        entries.spawn(entry.run());
        previous = next;
    }

    while let Some(joined) = entries.join_next().await {
        if let Err(err) = joined {
            // A dead entry never opens its successor's signal.
            warn!(error = %err, "runner entry task failed");
            engine.request_shutdown(ShutdownCause::Failure);
        }
    }

    debug!(runner = %plan.name, "all runner entries finished");
    Ok(())
}

/// What the retry loop decided after a run.
enum RetryStep {
    Retry,
    GiveUp,
    Cancelled,
}

struct Entry {
    engine: Engine,
    handlers: EntryHandlers,
    execution: RunnerExecution,
    start: CompletionSignal,
    next: CompletionSignal,
}

impl Entry {
    async fn run(self) {
        let root = self.engine.root_token().clone();
        tokio::select! {
            _ = self.start.wait() => {}
            _ = root.cancelled() => return,
        }

        let serial = self.handlers.is_serial(&self.execution.command);
        if !serial && !self.engine.is_terminating() {
            self.next.open();
        }

        if self.execution.command.restart.enabled {
            self.run_restartable().await;
        } else {
            self.run_one_time().await;
        }

        if serial && !self.engine.is_terminating() {
            self.next.open();
        }
    }

    fn prefix(&self) -> Option<&crate::console::LogPrefix> {
        self.execution.node.prefix.as_ref()
    }

    async fn run_one_time(&self) {
        let command = &self.execution.command;

        let gate = self.wait_for_ports().await;
        if !gate.is_success() {
            if self.engine.is_terminating() {
                return;
            }
            if let Some(err) = gate.error() {
                self.engine.console().error(self.prefix(), &err.to_string());
            }
            self.handlers.serial_failure(command);
            self.handlers.dependent_completion(command);
            return;
        }

        if !self.apply_delay().await {
            return;
        }

        let outcome = self.execute_with_after_hooks().await;
        if outcome.is_terminated() {
            return;
        }
        if outcome.error().is_some() {
            self.handlers.serial_failure(command);
        }
        self.handlers.dependent_completion(command);
    }

    async fn run_restartable(&self) {
        let command = &self.execution.command;
        let policy = &command.restart;
        let mut budget = RetryBudget::new(policy.retries);

        let message = match budget.max() {
            Some(max) => format!("Starting with auto-restart (max {max} retries)"),
            None => "Starting with auto-restart".to_string(),
        };
        self.engine.console().info(self.prefix(), &message);

        loop {
            let gate = self.wait_for_ports().await;
            if !gate.is_success() {
                if self.engine.is_terminating() {
                    return;
                }
                if let Some(err) = gate.error() {
                    self.engine.console().error(self.prefix(), &err.to_string());
                }
                match self.schedule_retry(&mut budget).await {
                    RetryStep::Retry => continue,
                    RetryStep::Cancelled => return,
                    RetryStep::GiveUp => {
                        self.handlers.serial_failure(command);
                        self.handlers.dependent_completion(command);
                        return;
                    }
                }
            }

            if !self.apply_delay().await {
                return;
            }

            let outcome = self.execute_with_after_hooks().await;
            if outcome.is_terminated() {
                return;
            }

            let failed = outcome.error().is_some();
            if policy.condition.restarts_after(failed) {
                match self.schedule_retry(&mut budget).await {
                    RetryStep::Retry => continue,
                    RetryStep::Cancelled => return,
                    RetryStep::GiveUp => {}
                }
            }

            if failed {
                self.handlers.serial_failure(command);
            }
            self.handlers.dependent_completion(command);
            return;
        }
    }

    async fn schedule_retry(&self, budget: &mut RetryBudget) -> RetryStep {
        let interval = self.execution.command.restart.interval;
        let console = self.engine.console();

        match budget.next() {
            RetryDecision::Exhausted { max } => {
                console.warn(
                    self.prefix(),
                    &format!("Maximum retry attempts ({max}) reached. Terminating"),
                );
                return RetryStep::GiveUp;
            }
            RetryDecision::Retry {
                attempt,
                max: Some(max),
            } => console.info(
                self.prefix(),
                &format!(
                    "Restarting in {} seconds... (attempt {attempt}/{max})",
                    format_seconds(interval)
                ),
            ),
            RetryDecision::Retry { max: None, .. } => console.info(
                self.prefix(),
                &format!("Restarting in {} seconds...", format_seconds(interval)),
            ),
        }

        if self.sleep_cancellable(interval).await {
            RetryStep::Retry
        } else {
            RetryStep::Cancelled
        }
    }

    async fn wait_for_ports(&self) -> Outcome {
        if self.engine.is_terminating() {
            return Outcome::Interrupted(crate::errors::Interruption::Terminated);
        }
        match &self.execution.command.awaits {
            Some(awaits) => {
                wait_for_ports(&self.engine, self.prefix(), &awaits.ports, awaits.timeout).await
            }
            None => Outcome::Success,
        }
    }

    /// Returns `false` when the invocation started terminating meanwhile.
    async fn apply_delay(&self) -> bool {
        let delay = self.execution.command.delay;
        if delay > 0.0 {
            self.engine.console().info(
                self.prefix(),
                &format!("Waiting {} seconds before execution...", format_seconds(delay)),
            );
            if !self.sleep_cancellable(delay).await {
                return false;
            }
        }
        !self.engine.is_terminating()
    }

    /// Sleep `seconds`; `false` if the root token was cancelled first.
    async fn sleep_cancellable(&self, seconds: f64) -> bool {
        let duration = seconds_to_duration(seconds);
        tokio::select! {
            _ = sleep(duration) => true,
            _ = self.engine.root_token().cancelled() => false,
        }
    }

    async fn execute_with_after_hooks(&self) -> Outcome {
        let node = &self.execution.node;
        let root = self.engine.root_token();
        let executor = self.engine.executor();

        let outcome = executor.execute(node, root).await;
        if let Some(err) = outcome.error() {
            self.engine.console().error(self.prefix(), &err.to_string());
        }

        if !node.watch_executed() {
            if let Err(err) = executor.run_after_hooks(node, &outcome, root, false).await {
                self.engine.console().error(
                    self.prefix(),
                    &format!("Fail during execution of after command(s): {err}"),
                );
                self.engine.request_shutdown(ShutdownCause::Failure);
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(inline: bool, flags: RunnerFlags) -> RunnerPlan {
        RunnerPlan {
            name: "dev".into(),
            inline,
            flags,
            executions: vec![
                RunnerExecution {
                    node: Arc::new(CommandNode::new("a", ".")),
                    command: RunnerCommand::default(),
                },
                RunnerExecution {
                    node: Arc::new(CommandNode::new("b", ".")),
                    command: RunnerCommand::default(),
                },
            ],
        }
    }

    #[test]
    fn start_messages() {
        let both = RunnerFlags {
            serial: true,
            dependent: true,
        };
        assert_eq!(
            plan(false, RunnerFlags::default()).start_message(),
            "Starting runner `dev`"
        );
        assert_eq!(
            plan(false, both).start_message(),
            "Starting runner `dev` with flags [serial, dependent]"
        );
        assert_eq!(
            plan(true, RunnerFlags::default()).start_message(),
            "Starting inline runner with 2 command(s)"
        );
        assert_eq!(
            plan(true, both).start_message(),
            "Starting inline runner with flags [serial, dependent] and 2 command(s)"
        );
    }
}
