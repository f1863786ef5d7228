// src/exec/executor.rs

use std::future::Future;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::console::LogPrefix;
use crate::engine::{CompletionSignal, Engine};
use crate::errors::{HookRole, Interruption, Outcome, RunbookError};
use crate::process::ProcessPool;

use super::node::CommandNode;
use super::output::OutputPumps;
use super::shell;

type BoxedOutcome<'a> = Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;

/// Whether a chain runs as regular work or as an after-hook.
///
/// After-hook processes are registered in the `After` pool and keep running
/// while the invocation is terminating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecMode {
    Main,
    After,
}

impl ExecMode {
    fn pool(self) -> ProcessPool {
        match self {
            ExecMode::Main => ProcessPool::Main,
            ExecMode::After => ProcessPool::After,
        }
    }
}

/// Per-cycle state shared between a watch session and the run it started.
#[derive(Debug, Default)]
pub struct CycleControl {
    restarting: AtomicBool,
    pid: Mutex<Option<u32>>,
    finished: CompletionSignal,
}

impl CycleControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    pub fn mark_restarting(&self) {
        self.restarting.store(true, Ordering::SeqCst);
    }

    /// Pid of the child currently running for this cycle, if any.
    pub fn pid(&self) -> Option<u32> {
        *self.lock_pid()
    }

    fn set_pid(&self, pid: Option<u32>) {
        *self.lock_pid() = pid;
    }

    pub fn finished(&self) -> &CompletionSignal {
        &self.finished
    }

    fn lock_pid(&self) -> std::sync::MutexGuard<'_, Option<u32>> {
        self.pid.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs command trees. Cheap to clone; all state lives in the [`Engine`].
#[derive(Debug, Clone)]
pub struct Executor {
    engine: Engine,
}

impl Executor {
    pub(crate) fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Execute a root node. Nodes with include patterns run under a watch
    /// session; everything else runs once.
    pub async fn execute(&self, node: &Arc<CommandNode>, token: &CancellationToken) -> Outcome {
        if node.has_watch() {
            return crate::watch::run_watch_session(self, node, token).await;
        }
        self.run_once(node, token, None).await
    }

    /// Run the full hook chain of `node` once.
    pub async fn run_once(
        &self,
        node: &CommandNode,
        token: &CancellationToken,
        cycle: Option<&CycleControl>,
    ) -> Outcome {
        let tracker = self.engine.tracker();
        let _in_flight = tracker.token();
        // Watch cycles hold their own token across their after-hooks.
        if cycle.is_none() && node.has_after_hooks() {
            node.arm_pending_after(tracker.token());
        }

        let prefix = node.prefix.as_ref();
        let outcome = self
            .run_chain(node, prefix, token, cycle, ExecMode::Main, true)
            .await;

        if outcome.is_success() {
            self.engine
                .console()
                .info(prefix, "Command(s) completed successfully");
        }
        outcome
    }

    /// project pre -> pre -> commands -> post -> project post.
    ///
    /// Project-level hooks only apply in `Main` mode. Hooks print with the
    /// prefix of the root they belong to.
    pub(crate) fn run_chain<'a>(
        &'a self,
        node: &'a CommandNode,
        prefix: Option<&'a LogPrefix>,
        token: &'a CancellationToken,
        cycle: Option<&'a CycleControl>,
        mode: ExecMode,
        is_main: bool,
    ) -> BoxedOutcome<'a> {
        Box::pin(async move {
            let console = self.engine.console();
            let hooks = &node.hooks;
            let has_hooks = match mode {
                ExecMode::Main => {
                    hooks.pre.is_some()
                        || hooks.post.is_some()
                        || hooks.project_pre.is_some()
                        || hooks.project_post.is_some()
                }
                ExecMode::After => hooks.pre.is_some() || hooks.post.is_some(),
            };

            if mode == ExecMode::Main {
                if let Some(hook) = &hooks.project_pre {
                    console.info(prefix, "Running project-level `pre` command...");
                    let outcome = self
                        .run_chain(hook, prefix, token, cycle, mode, false)
                        .await
                        .in_hook(HookRole::ProjectPre);
                    if !outcome.is_success() {
                        return outcome;
                    }
                }
            }

            if let Some(hook) = &hooks.pre {
                console.info(prefix, "Running `pre` command...");
                let outcome = self
                    .run_chain(hook, prefix, token, cycle, mode, false)
                    .await
                    .in_hook(HookRole::Pre);
                if !outcome.is_success() {
                    return outcome;
                }
            }

            if has_hooks && is_main {
                console.info(prefix, "Running main command...");
            }

            let outcome = self.spawn_commands(node, prefix, token, cycle, mode).await;
            if !outcome.is_success() {
                return outcome;
            }

            if let Some(hook) = &hooks.post {
                console.info(prefix, "Running `post` command...");
                let outcome = self
                    .run_chain(hook, prefix, token, cycle, mode, false)
                    .await
                    .in_hook(HookRole::Post);
                if !outcome.is_success() {
                    return outcome;
                }
            }

            if mode == ExecMode::Main {
                if let Some(hook) = &hooks.project_post {
                    console.info(prefix, "Running project-level `post` command...");
                    let outcome = self
                        .run_chain(hook, prefix, token, cycle, mode, false)
                        .await
                        .in_hook(HookRole::ProjectPost);
                    if !outcome.is_success() {
                        return outcome;
                    }
                }
            }

            Outcome::Success
        })
    }

    /// Why the current run should be treated as interrupted, if it should.
    fn interruption(
        &self,
        mode: ExecMode,
        cycle: Option<&CycleControl>,
        token: &CancellationToken,
    ) -> Option<Interruption> {
        if mode == ExecMode::Main && self.engine.is_terminating() {
            return Some(Interruption::Terminated);
        }
        if cycle.is_some_and(CycleControl::is_restarting) {
            return Some(Interruption::WatchRestart);
        }
        if token.is_cancelled() {
            return Some(Interruption::Terminated);
        }
        None
    }

    /// Run every command line of `node` in one shell process and wait for it.
    async fn spawn_commands(
        &self,
        node: &CommandNode,
        prefix: Option<&LogPrefix>,
        token: &CancellationToken,
        cycle: Option<&CycleControl>,
        mode: ExecMode,
    ) -> Outcome {
        if let Some(interruption) = self.interruption(mode, cycle, token) {
            return Outcome::Interrupted(interruption);
        }
        if node.commands.is_empty() {
            return Outcome::Success;
        }

        let shell_name = node
            .shell
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(shell::default_shell);
        let invocation = match shell::wrap(&shell_name, &node.commands) {
            Ok(invocation) => invocation,
            Err(err) => return Outcome::Failed(err),
        };

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&node.dir)
            .envs(node.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("FORCE_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let supervisor = self.engine.supervisor();
        supervisor.prepare(&mut cmd);

        debug!(
            node = %node.identifier,
            program = %invocation.program,
            dir = %node.dir.display(),
            "spawning"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                if let Some(interruption) = self.interruption(mode, cycle, token) {
                    return Outcome::Interrupted(interruption);
                }
                return Outcome::Failed(RunbookError::SpawnFailed(err.to_string()));
            }
        };

        let pid = child.id();
        let registration = pid.map(|pid| supervisor.register(pid, mode.pool()));
        if let Some(cycle) = cycle {
            cycle.set_pid(pid);
        }

        let pumps = OutputPumps::spawn(
            child.stdout.take(),
            child.stderr.take(),
            self.engine.console(),
            prefix,
            invocation.markers,
        );

        let status = tokio::select! {
            status = child.wait() => {
                pumps.finish().await;
                status
            }
            _ = token.cancelled() => {
                match pid {
                    Some(pid) => supervisor.kill(pid),
                    None => {
                        let _ = child.start_kill();
                    }
                }
                let status = child.wait().await;
                pumps.abort();
                status
            }
        };

        if let Some(cycle) = cycle {
            cycle.set_pid(None);
        }
        drop(registration);

        if let Some(interruption) = self.interruption(mode, cycle, token) {
            return Outcome::Interrupted(interruption);
        }

        match status {
            Ok(status) if status.success() => Outcome::Success,
            Ok(status) => Outcome::Failed(RunbookError::ExitFailure(describe_exit(status))),
            Err(err) => {
                warn!(node = %node.identifier, error = %err, "waiting on child failed");
                Outcome::Failed(RunbookError::SpawnFailed(err.to_string()))
            }
        }
    }
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }
    status.to_string()
}
