// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::RunnerFlags;

/// Command-line arguments for `runbook`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runbook",
    version,
    about = "Run project commands, hooks and runners from a single config file.",
    long_about = None,
    after_help = "Targets:\n  \
        runbook lint              run the global command `lint`\n  \
        runbook web:dev           run command `dev` of project `web`\n  \
        runbook web:*             run every command of project `web`\n  \
        runbook web cargo build   run `cargo build` inside project `web`\n  \
        runbook dev               run the runner `dev`\n  \
        runbook lint web:dev      run several commands as an inline runner"
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Runbook.toml` in the current working directory.
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub file: Option<String>,

    /// Run every runner command sequentially.
    #[arg(short, long)]
    pub serial: bool,

    /// Shut the runner down as soon as any of its commands finishes.
    #[arg(short, long)]
    pub dependent: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNBOOK_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Resolve the target and print what would run, without running it.
    #[arg(long)]
    pub dry_run: bool,

    /// Runner, command, `project:command`, `project:*` or `project <args...>`,
    /// followed by extra arguments.
    #[arg(
        value_name = "TARGET",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub target: Vec<String>,
}

impl CliArgs {
    pub fn runner_flags(&self) -> RunnerFlags {
        RunnerFlags {
            serial: self.serial,
            dependent: self.dependent,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
