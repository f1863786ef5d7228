// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::engine::RunnerCommand;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [commands]
/// lint = "cargo clippy"
///
/// [projects.web]
/// dir = "web"
/// pre = "npm install"
///
/// [projects.web.cmds]
/// dev = { run = "npm run dev", watch = ["src/**"] }
///
/// [runners]
/// dev = ["web:dev", { cmd = "api:start", serial = true }]
/// ```
///
/// All sections are optional. Use [`ConfigFile`] (via `TryFrom`) for a
/// validated view.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    /// Global commands from `[commands]`, runnable from the config directory.
    #[serde(default)]
    pub commands: BTreeMap<String, CommandSpec>,

    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,

    /// Runners keyed by name, optionally with flags: `"dev[serial]"`.
    #[serde(default)]
    pub runners: BTreeMap<String, RunnerSpec>,
}

/// A single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(item) => vec![item.clone()],
            OneOrMany::Many(items) => items.clone(),
        }
    }
}

/// `[projects.<name>]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project directory, relative to the config file. Required.
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, toml::Value>,

    #[serde(default)]
    pub pre: Option<CommandSpec>,

    #[serde(default)]
    pub post: Option<CommandSpec>,

    #[serde(default)]
    pub after: Option<AfterSpec>,

    /// Applies to every command of the project.
    #[serde(default)]
    pub watch: Option<WatchSpec>,

    #[serde(default)]
    pub cmds: BTreeMap<String, CommandSpec>,
}

/// A command: a shell line, a list of lines, or a table with hooks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Lines(OneOrMany),
    Table(Box<CommandTable>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandTable {
    /// Required; checked during validation so the error can name the command.
    #[serde(default)]
    pub run: Option<OneOrMany>,

    /// Relative to the owning project (or config) directory.
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, toml::Value>,

    #[serde(default)]
    pub pre: Option<CommandSpec>,

    #[serde(default)]
    pub post: Option<CommandSpec>,

    #[serde(default)]
    pub after: Option<AfterSpec>,

    #[serde(default)]
    pub watch: Option<WatchSpec>,
}

/// `after`: a plain command, or outcome-specific branches.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AfterSpec {
    Branches(AfterBranchesSpec),
    Command(CommandSpec),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AfterBranchesSpec {
    #[serde(default)]
    pub success: Option<CommandSpec>,
    #[serde(default)]
    pub failure: Option<CommandSpec>,
    #[serde(default)]
    pub change: Option<CommandSpec>,
    #[serde(default)]
    pub always: Option<CommandSpec>,
}

impl AfterBranchesSpec {
    pub fn is_empty(&self) -> bool {
        self.success.is_none()
            && self.failure.is_none()
            && self.change.is_none()
            && self.always.is_none()
    }
}

/// `watch`: include patterns, or a table with `include` / `exclude`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WatchSpec {
    Include(OneOrMany),
    Table {
        #[serde(default)]
        include: Option<OneOrMany>,
        #[serde(default)]
        exclude: Option<OneOrMany>,
    },
}

impl WatchSpec {
    /// `(include, exclude)` as written, not yet normalized.
    pub fn split(&self) -> (Vec<String>, Vec<String>) {
        match self {
            WatchSpec::Include(include) => (include.to_vec(), Vec::new()),
            WatchSpec::Table { include, exclude } => (
                include.as_ref().map(OneOrMany::to_vec).unwrap_or_default(),
                exclude.as_ref().map(OneOrMany::to_vec).unwrap_or_default(),
            ),
        }
    }
}

/// A runner: one target string or a list of entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RunnerSpec {
    One(String),
    Many(Vec<RunnerEntrySpec>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RunnerEntrySpec {
    Cmd(String),
    Table(RunnerEntryTable),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerEntryTable {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Seconds to wait before each run.
    #[serde(default)]
    pub delay: Option<f64>,
    #[serde(default)]
    pub restart: Option<RestartSpec>,
    #[serde(default)]
    pub awaits: Option<AwaitsSpec>,
    #[serde(default)]
    pub serial: Option<bool>,
    #[serde(default)]
    pub dependent: Option<bool>,
}

/// `restart = true` or `restart = { condition, retries, interval }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RestartSpec {
    Enabled(bool),
    Table(RestartTable),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestartTable {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub retries: Option<i64>,
    #[serde(default)]
    pub interval: Option<f64>,
}

/// `awaits = 5432`, `awaits = [5432, 6379]` or
/// `awaits = { ports = [...], timeout = 10 }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AwaitsSpec {
    Port(i64),
    Ports(Vec<i64>),
    Table(AwaitsTable),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwaitsTable {
    #[serde(default)]
    pub ports: Option<PortsSpec>,
    #[serde(default)]
    pub timeout: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortsSpec {
    One(i64),
    Many(Vec<i64>),
}

/// Validated configuration.
///
/// Commands and projects are kept in their declared shape (they are turned
/// into command trees on demand by `config::resolve`); runner entries are
/// already parsed into [`RunnerCommand`]s.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub commands: BTreeMap<String, CommandSpec>,
    pub projects: BTreeMap<String, ProjectConfig>,
    pub runners: BTreeMap<String, Vec<RunnerCommand>>,
}

impl ConfigFile {
    /// Construct without re-validating. Used by `TryFrom<RawConfigFile>`.
    pub(crate) fn new_unchecked(
        commands: BTreeMap<String, CommandSpec>,
        projects: BTreeMap<String, ProjectConfig>,
        runners: BTreeMap<String, Vec<RunnerCommand>>,
    ) -> Self {
        Self {
            commands,
            projects,
            runners,
        }
    }
}
