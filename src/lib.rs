// src/lib.rs

pub mod cli;
pub mod config;
pub mod console;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod process;
pub mod types;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, Resolver, Target};
use crate::engine::{Engine, RunnerPlan, ShutdownCause, execute_runner, listen_for_signals};
use crate::errors::Outcome;
use crate::exec::CommandNode;
use crate::types::{RunnerFlags, format_seconds};

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Everything finished on its own.
    Completed,
    /// The shutdown coordinator tore the invocation down.
    ShutDown,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::ShutDown => 1,
        }
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the engine (console, process supervisor, watchers)
/// - Ctrl-C / SIGTERM handling
/// - target resolution and execution
pub async fn run(args: CliArgs) -> Result<RunStatus> {
    let config_path = config::config_path(args.file.as_deref())?;
    let cfg = config::load_and_validate(&config_path)?;
    let root = config::config_root_dir(&config_path);
    info!(config = %config_path.display(), "configuration loaded");

    let engine = Engine::builder().build();
    if !args.dry_run {
        tokio::spawn(listen_for_signals(engine.clone()));
    }

    run_target(
        &engine,
        &cfg,
        &root,
        &args.target,
        args.runner_flags(),
        args.dry_run,
    )
    .await
}

/// Resolve `target` against `cfg` and run it on `engine`.
///
/// Split from [`run`] so tests can drive an engine with a recording console
/// and shortened timings.
pub async fn run_target(
    engine: &Engine,
    cfg: &ConfigFile,
    root: &Path,
    target: &[String],
    flags: RunnerFlags,
    dry_run: bool,
) -> Result<RunStatus> {
    let resolver = Resolver::new(cfg, root, Arc::clone(engine.prefixes()));
    let resolved = resolver.resolve(target, flags)?;

    if dry_run {
        print_dry_run(&resolved);
        return Ok(RunStatus::Completed);
    }

    match resolved {
        Target::Runner(plan) => execute_runner(engine, plan).await?,
        Target::Command(node) => {
            let node = Arc::new(node);
            let outcome = engine.executor().execute(&node, engine.root_token()).await;
            finish_command(engine, &node, outcome).await;
        }
    }

    if engine.is_terminating() {
        engine.wait_for_shutdown().await;
        debug!("invocation shut down");
        return Ok(RunStatus::ShutDown);
    }
    Ok(RunStatus::Completed)
}

/// Report the outcome of a single top-level command, run its after-hooks if
/// nothing ran them yet, and shut down on any real failure.
async fn finish_command(engine: &Engine, node: &CommandNode, outcome: Outcome) {
    let console = engine.console();
    if let Some(err) = outcome.error() {
        console.error(None, &err.to_string());
    }

    let mut after_failed = false;
    if !node.after_executed() {
        if let Err(err) = engine
            .executor()
            .run_after_hooks(node, &outcome, engine.root_token(), false)
            .await
        {
            console.error(
                None,
                &format!("Fail during execution of after command(s): {err}"),
            );
            after_failed = true;
        }
    }

    if outcome.is_terminated() {
        return;
    }
    if outcome.error().is_some() || after_failed {
        engine.request_shutdown(ShutdownCause::Failure);
    }
}

/// Dry-run output: print the resolved runner plan or command tree.
fn print_dry_run(target: &Target) {
    println!("runbook dry-run");
    match target {
        Target::Command(node) => {
            println!("command `{}`", node.identifier);
            print_indented(&node.describe(), 2);
        }
        Target::Runner(plan) => print_runner_plan(plan),
    }
    debug!("dry-run complete (no execution)");
}

fn print_runner_plan(plan: &RunnerPlan) {
    let label = if plan.inline {
        "inline runner".to_string()
    } else {
        format!("runner `{}`", plan.name)
    };
    let flags = plan.flags.names();
    if flags.is_empty() {
        println!("{label} ({} command(s))", plan.executions.len());
    } else {
        println!(
            "{label} [{}] ({} command(s))",
            flags.join(", "),
            plan.executions.len()
        );
    }

    for execution in &plan.executions {
        let command = &execution.command;
        println!("  - {}", command.cmd);
        if let Some(prefix) = &execution.node.prefix {
            println!("      prefix: {}", prefix.text());
        }
        if command.serial {
            println!("      serial: true");
        }
        if command.dependent {
            println!("      dependent: true");
        }
        if command.delay > 0.0 {
            println!("      delay: {}s", format_seconds(command.delay));
        }
        if command.restart.enabled {
            let retries = match command.restart.retries {
                0 => "unlimited".to_string(),
                n => n.to_string(),
            };
            println!(
                "      restart: on {} every {}s (retries: {retries})",
                command.restart.condition,
                format_seconds(command.restart.interval)
            );
        }
        if let Some(awaits) = &command.awaits {
            let ports: Vec<String> = awaits.ports.iter().map(u16::to_string).collect();
            println!("      awaits: [{}]", ports.join(", "));
        }
        print_indented(&execution.node.describe(), 6);
    }
}

fn print_indented(text: &str, width: usize) {
    let pad = " ".repeat(width);
    for line in text.lines() {
        println!("{pad}{line}");
    }
}
