// src/config/resolve.rs

//! Turn CLI targets into command trees and runner plans.
//!
//! Lookup order for `runbook <args...>`:
//! 1. a runner: exact key, then the key without `[flags]`, then configured
//!    keys whose name (without flags) matches
//! 2. an inline runner: every arg is a known `cmd`, `project:cmd` or
//!    `project:*` (and there is more than one command, or a `project:*`)
//! 3. a global command, then `project:cmd`, then `project <args...>`
//!
//! Extra args are appended to the last command line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::model::{AfterSpec, CommandSpec, ConfigFile, OneOrMany, WatchSpec};
use crate::console::PrefixAllocator;
use crate::engine::{RunnerCommand, RunnerExecution, RunnerPlan};
use crate::errors::{Result, RunbookError};
use crate::exec::CommandNode;
use crate::types::RunnerFlags;
use crate::watch::path_utils::resolve_path;
use crate::watch::{WatchPatterns, normalize_pattern};

/// Name shown for runners assembled from several CLI targets.
pub const INLINE_RUNNER_NAME: &str = "inline";

/// What a CLI invocation resolved to.
#[derive(Debug)]
pub enum Target {
    Runner(RunnerPlan),
    Command(CommandNode),
}

/// A runner found in the config (or assembled inline), before its entries
/// are resolved to command trees.
#[derive(Debug, Clone, PartialEq)]
struct RunnerMatch {
    name: String,
    flags: RunnerFlags,
    inline: bool,
    entries: Vec<RunnerCommand>,
}

enum Found<'a> {
    Global(&'a str),
    Project {
        project: &'a str,
        command: Option<&'a str>,
    },
}

/// Inherited settings while building a command tree.
#[derive(Debug, Clone, Default)]
struct NodeContext {
    dir: PathBuf,
    shell: Option<String>,
    env: Vec<(String, String)>,
    watch: WatchPatterns,
}

impl NodeContext {
    /// Hooks inherit everything but the watch patterns.
    fn for_hooks(&self) -> NodeContext {
        NodeContext {
            watch: WatchPatterns::default(),
            ..self.clone()
        }
    }
}

pub struct Resolver<'a> {
    config: &'a ConfigFile,
    root: PathBuf,
    prefixes: Arc<PrefixAllocator>,
}

impl<'a> Resolver<'a> {
    /// `root` is the directory containing the config file.
    pub fn new(config: &'a ConfigFile, root: impl Into<PathBuf>, prefixes: Arc<PrefixAllocator>) -> Self {
        Self {
            config,
            root: root.into(),
            prefixes,
        }
    }

    pub fn resolve(&self, args: &[String], cli_flags: RunnerFlags) -> Result<Target> {
        if args.is_empty() {
            return Err(RunbookError::ConfigError("Missing command arguments".to_string()));
        }

        if let Some(found) = self.find_runner(args, cli_flags) {
            debug!(runner = %found.name, inline = found.inline, "resolved runner");
            return self.runner_plan(found).map(Target::Runner);
        }

        self.command_node(args).map(Target::Command)
    }

    fn find_runner(&self, args: &[String], cli_flags: RunnerFlags) -> Option<RunnerMatch> {
        let first = args[0].as_str();
        let runners = &self.config.runners;

        let (input_base, input_flags) = split_runner_key(first);
        let matched = if let Some(entries) = runners.get(first) {
            let (base, key_flags) = split_runner_key(first);
            Some((base, merge_flags(cli_flags, &key_flags), entries))
        } else if let Some(entries) = runners.get(&input_base) {
            Some((input_base.clone(), merge_flags(cli_flags, &input_flags), entries))
        } else {
            runners.iter().find_map(|(key, entries)| {
                let (base, key_flags) = split_runner_key(key);
                (base == input_base).then(|| {
                    let flags = merge_flags(merge_flags(cli_flags, &key_flags), &input_flags);
                    (base, flags, entries)
                })
            })
        };

        if let Some((name, flags, entries)) = matched {
            return Some(RunnerMatch {
                name,
                flags,
                inline: false,
                entries: self.expand_wildcards(entries),
            });
        }

        self.inline_runner(args, cli_flags)
    }

    fn inline_runner(&self, args: &[String], flags: RunnerFlags) -> Option<RunnerMatch> {
        if !args.iter().all(|arg| self.is_known_command(arg)) {
            return None;
        }

        let entries: Vec<RunnerCommand> = args
            .iter()
            .map(|arg| RunnerCommand {
                cmd: arg.clone(),
                ..RunnerCommand::default()
            })
            .collect();
        let forced = args.len() == 1 && args[0].ends_with(":*");
        let entries = self.expand_wildcards(&entries);

        if entries.len() <= 1 && !forced {
            return None;
        }

        Some(RunnerMatch {
            name: INLINE_RUNNER_NAME.to_string(),
            flags,
            inline: true,
            entries,
        })
    }

    fn is_known_command(&self, arg: &str) -> bool {
        if self.config.commands.contains_key(arg) {
            return true;
        }
        let Some((project, command)) = arg.split_once(':') else {
            return false;
        };
        self.config.projects.get(project).is_some_and(|p| {
            !p.cmds.is_empty() && (command == "*" || p.cmds.contains_key(command))
        })
    }

    /// Replace every `project:*` entry with one entry per project command
    /// (sorted by name), keeping the entry's other settings. Unknown
    /// projects are dropped.
    fn expand_wildcards(&self, entries: &[RunnerCommand]) -> Vec<RunnerCommand> {
        let mut expanded = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(project) = entry.cmd.strip_suffix(":*") else {
                expanded.push(entry.clone());
                continue;
            };
            let Some(config) = self.config.projects.get(project) else {
                debug!(project, "skipping wildcard entry for unknown project");
                continue;
            };
            for command in config.cmds.keys() {
                expanded.push(RunnerCommand {
                    cmd: format!("{project}:{command}"),
                    ..entry.clone()
                });
            }
        }
        expanded
    }

    fn runner_plan(&self, found: RunnerMatch) -> Result<RunnerPlan> {
        let mut executions = Vec::with_capacity(found.entries.len());

        for mut command in found.entries {
            command.serial |= found.flags.serial;
            command.dependent |= found.flags.dependent;

            let tokens = shlex::split(&command.cmd)
                .filter(|tokens| !tokens.is_empty())
                .ok_or_else(|| {
                    RunbookError::ConfigError(format!(
                        "Invalid format for command `{}` in runner `{}`",
                        command.cmd, found.name
                    ))
                })?;

            let mut node = match self.command_node(&tokens) {
                Ok(node) => node,
                Err(RunbookError::TargetNotFound(_)) => {
                    debug!(cmd = %command.cmd, "runner entry runs as a literal shell line");
                    let mut node = CommandNode::new(found.name.clone(), self.root.clone());
                    node.commands = vec![command.cmd.clone()];
                    node
                }
                Err(err) => return Err(err),
            };

            let prefix_text = command.name.as_deref().unwrap_or(&node.identifier).to_string();
            node.prefix = Some(self.prefixes.allocate(&prefix_text));

            executions.push(RunnerExecution {
                node: Arc::new(node),
                command,
            });
        }

        Ok(RunnerPlan {
            name: found.name,
            inline: found.inline,
            flags: found.flags,
            executions,
        })
    }

    fn find_target<'b>(&'b self, first: &'b str) -> Result<Found<'b>> {
        if let Some((name, _)) = self.config.commands.get_key_value(first) {
            return Ok(Found::Global(name));
        }
        if let Some((name, _)) = self.config.projects.get_key_value(first) {
            return Ok(Found::Project {
                project: name,
                command: None,
            });
        }
        if let Some((project, command)) = first.split_once(':') {
            if let Some((name, _)) = self.config.projects.get_key_value(project) {
                return Ok(Found::Project {
                    project: name,
                    command: Some(command),
                });
            }
        }
        Err(RunbookError::TargetNotFound(first.to_string()))
    }

    /// Build the command tree for a global command, `project:cmd` or
    /// `project <args...>`, with any extra args appended.
    pub fn command_node(&self, args: &[String]) -> Result<CommandNode> {
        let Some(first) = args.first() else {
            return Err(RunbookError::ConfigError("Missing command arguments".to_string()));
        };
        let mut extra = &args[1..];

        let mut node = match self.find_target(first)? {
            Found::Global(name) => {
                let ctx = NodeContext {
                    dir: self.root.clone(),
                    ..NodeContext::default()
                };
                build_node(&self.config.commands[name], &ctx, name)?
            }
            Found::Project { project, command } => {
                let config = &self.config.projects[project];
                let dir = resolve_path(
                    Path::new(config.dir.as_deref().unwrap_or(".").trim()),
                    &self.root,
                );
                let mut watch = WatchPatterns::default();
                if let Some(spec) = &config.watch {
                    watch.extend(&normalize_watch(spec, &dir));
                }
                let ctx = NodeContext {
                    dir,
                    shell: non_empty(config.shell.as_deref()),
                    env: env_pairs(&config.env),
                    watch,
                };

                let mut node = match command {
                    Some(command) => {
                        let spec = config.cmds.get(command).ok_or_else(|| {
                            RunbookError::ConfigError(format!(
                                "Command `{command}` not found in project `{project}`"
                            ))
                        })?;
                        build_node(spec, &ctx, &format!("{project}:{command}"))?
                    }
                    None => {
                        if extra.is_empty() {
                            return Err(RunbookError::ConfigError(format!(
                                "Missing command to execute in project `{project}`"
                            )));
                        }
                        let line = quote_args(extra).join(" ");
                        extra = &args[..0];
                        build_node(&CommandSpec::Lines(OneOrMany::One(line)), &ctx, project)?
                    }
                };

                let hooks = ctx.for_hooks();
                if let Some(pre) = &config.pre {
                    node.hooks.project_pre = Some(Box::new(build_node(pre, &hooks, "pre")?));
                }
                if let Some(post) = &config.post {
                    node.hooks.project_post = Some(Box::new(build_node(post, &hooks, "post")?));
                }
                if let Some(after) = &config.after {
                    node.hooks.project_after = Some(Box::new(build_after(after, &hooks)?));
                }
                node
            }
        };

        if !extra.is_empty() {
            let appended = quote_args(extra).join(" ");
            match node.commands.last_mut() {
                Some(last) => {
                    last.push(' ');
                    last.push_str(&appended);
                }
                None => node.commands.push(appended),
            }
        }

        Ok(node)
    }
}

/// Build one node (and its `pre` / `post` / `after` hooks) from `spec`.
fn build_node(spec: &CommandSpec, ctx: &NodeContext, identifier: &str) -> Result<CommandNode> {
    let table = match spec {
        CommandSpec::Lines(lines) => {
            let mut node = CommandNode::new(identifier, ctx.dir.clone());
            node.shell = ctx.shell.clone();
            node.commands = lines.to_vec();
            node.env = ctx.env.clone();
            node.watch = ctx.watch.clone();
            return Ok(node);
        }
        CommandSpec::Table(table) => table,
    };

    let dir = match table.dir.as_deref().map(str::trim) {
        Some(dir) if !dir.is_empty() => resolve_path(Path::new(dir), &ctx.dir),
        _ => ctx.dir.clone(),
    };
    let shell = non_empty(table.shell.as_deref()).or_else(|| ctx.shell.clone());

    let mut env = ctx.env.clone();
    env.extend(env_pairs(&table.env));

    let mut watch = ctx.watch.clone();
    if let Some(spec) = &table.watch {
        watch.extend(&normalize_watch(spec, &dir));
    }

    let hooks = NodeContext {
        dir: dir.clone(),
        shell: shell.clone(),
        env: env.clone(),
        watch: WatchPatterns::default(),
    };

    let mut node = CommandNode::new(identifier, dir);
    node.shell = shell;
    node.commands = table.run.as_ref().map(OneOrMany::to_vec).unwrap_or_default();
    node.env = env;
    node.watch = watch;

    if let Some(pre) = &table.pre {
        node.hooks.pre = Some(Box::new(build_node(pre, &hooks, "pre")?));
    }
    if let Some(post) = &table.post {
        node.hooks.post = Some(Box::new(build_node(post, &hooks, "post")?));
    }
    if let Some(after) = &table.after {
        node.hooks.after = Some(Box::new(build_after(after, &hooks)?));
    }
    Ok(node)
}

fn build_after(spec: &AfterSpec, ctx: &NodeContext) -> Result<CommandNode> {
    let branches = match spec {
        AfterSpec::Command(command) => return build_node(command, ctx, "after"),
        AfterSpec::Branches(branches) => branches,
    };

    let build = |branch: &Option<CommandSpec>, name: &str| -> Result<Option<Box<CommandNode>>> {
        branch
            .as_ref()
            .map(|spec| build_node(spec, ctx, name).map(Box::new))
            .transpose()
    };

    let mut node = CommandNode::new("after", ctx.dir.clone());
    node.shell = ctx.shell.clone();
    node.env = ctx.env.clone();
    node.branches.success = build(&branches.success, "after.success")?;
    node.branches.failure = build(&branches.failure, "after.failure")?;
    node.branches.change = build(&branches.change, "after.change")?;
    node.branches.always = build(&branches.always, "after.always")?;
    Ok(node)
}

fn normalize_watch(spec: &WatchSpec, dir: &Path) -> WatchPatterns {
    let (include, exclude) = spec.split();
    WatchPatterns {
        include: include.iter().map(|p| normalize_pattern(p.trim(), dir)).collect(),
        exclude: exclude.iter().map(|p| normalize_pattern(p.trim(), dir)).collect(),
    }
}

fn env_pairs(env: &BTreeMap<String, toml::Value>) -> Vec<(String, String)> {
    env.iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Wrap args containing spaces in double quotes (unless already quoted).
pub fn quote_args(args: &[String]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            if arg.contains(' ') && !arg.starts_with('"') {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            }
        })
        .collect()
}

/// Split `"name[flag1,flag2]"` into its base name and flags.
pub fn split_runner_key(key: &str) -> (String, Vec<String>) {
    let (Some(open), true) = (key.rfind('['), key.ends_with(']')) else {
        return (key.to_string(), Vec::new());
    };
    if open == 0 {
        return (key.to_string(), Vec::new());
    }

    let base = key[..open].trim().to_string();
    let flags = key[open + 1..key.len() - 1]
        .split(',')
        .map(str::trim)
        .filter(|flag| !flag.is_empty())
        .map(str::to_string)
        .collect();
    (base, flags)
}

fn merge_flags(flags: RunnerFlags, names: &[String]) -> RunnerFlags {
    let extra = RunnerFlags::from_names(names.iter().map(String::as_str));
    RunnerFlags {
        serial: flags.serial || extra.serial,
        dependent: flags.dependent || extra.dependent,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::model::RawConfigFile;

    const CONFIG: &str = r#"
        [commands]
        lint = "cargo clippy"
        fmt = { run = ["cargo fmt"], dir = "tools", env = { CHECK = 1 } }

        [projects.web]
        dir = "web"
        shell = "bash"
        env = { PORT = "3000" }
        pre = "echo project-pre"
        after = { success = "echo ok", failure = "echo ko" }
        watch = ["src/**"]

        [projects.web.cmds]
        build = "npm run build"
        dev = { run = "npm run dev", dir = "app", env = { PORT = "4000" }, pre = "echo pre", watch = { include = ["lib/"], exclude = ["lib/gen"] } }

        [projects.api]
        dir = "api"

        [projects.api.cmds]
        start = "cargo run"

        [runners]
        dev = ["web:dev", { cmd = "api:start", name = "backend", serial = true }]
        "all[serial,dependent]" = ["web:*"]
        literal = ["echo hello world"]
        broken = ["web:missing"]
    "#;

    fn config() -> ConfigFile {
        let raw: RawConfigFile = toml::from_str(CONFIG).unwrap();
        ConfigFile::try_from(raw).unwrap()
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn resolve(cfg: &ConfigFile, items: &[&str], flags: RunnerFlags) -> Result<Target> {
        Resolver::new(cfg, "/repo", PrefixAllocator::new()).resolve(&args(items), flags)
    }

    fn runner(target: Target) -> RunnerPlan {
        match target {
            Target::Runner(plan) => plan,
            Target::Command(node) => panic!("expected runner, got command {}", node.identifier),
        }
    }

    fn command(target: Target) -> CommandNode {
        match target {
            Target::Command(node) => node,
            Target::Runner(plan) => panic!("expected command, got runner {}", plan.name),
        }
    }

    #[test]
    fn global_command_runs_from_config_dir_with_extra_args() {
        let cfg = config();
        let node = command(resolve(&cfg, &["lint", "--fix", "a b"], RunnerFlags::default()).unwrap());
        assert_eq!(node.identifier, "lint");
        assert_eq!(node.dir, PathBuf::from("/repo"));
        assert_eq!(node.commands, vec!["cargo clippy --fix \"a b\""]);

        let fmt = command(resolve(&cfg, &["fmt"], RunnerFlags::default()).unwrap());
        assert_eq!(fmt.dir, PathBuf::from("/repo/tools"));
        assert_eq!(fmt.env, vec![("CHECK".to_string(), "1".to_string())]);
    }

    #[test]
    fn project_command_inherits_project_settings() {
        let cfg = config();
        let node = command(resolve(&cfg, &["web:dev"], RunnerFlags::default()).unwrap());

        assert_eq!(node.identifier, "web:dev");
        assert_eq!(node.dir, PathBuf::from("/repo/web/app"));
        assert_eq!(node.shell.as_deref(), Some("bash"));
        assert_eq!(
            node.env,
            vec![
                ("PORT".to_string(), "3000".to_string()),
                ("PORT".to_string(), "4000".to_string()),
            ]
        );
        assert_eq!(
            node.watch.include,
            vec!["/repo/web/src/**".to_string(), "/repo/web/app/lib/".to_string()]
        );
        assert_eq!(node.watch.exclude, vec!["/repo/web/app/lib/gen".to_string()]);

        let pre = node.hooks.pre.as_ref().unwrap();
        assert_eq!(pre.commands, vec!["echo pre"]);
        assert!(!pre.has_watch());

        let project_pre = node.hooks.project_pre.as_ref().unwrap();
        assert_eq!(project_pre.dir, PathBuf::from("/repo/web"));

        let after = node.hooks.project_after.as_ref().unwrap();
        assert!(after.branches.success.is_some());
        assert!(after.branches.failure.is_some());
        assert!(after.commands.is_empty());
    }

    #[test]
    fn project_with_args_runs_them_in_the_project_dir() {
        let cfg = config();
        let node = command(resolve(&cfg, &["api", "ls", "-la"], RunnerFlags::default()).unwrap());
        assert_eq!(node.identifier, "api");
        assert_eq!(node.dir, PathBuf::from("/repo/api"));
        assert_eq!(node.commands, vec!["ls -la"]);

        let err = resolve(&cfg, &["api"], RunnerFlags::default()).unwrap_err();
        assert!(err.to_string().contains("Missing command to execute in project `api`"));
    }

    #[test]
    fn unknown_targets_are_reported() {
        let cfg = config();
        let err = resolve(&cfg, &["nope"], RunnerFlags::default()).unwrap_err();
        assert!(matches!(err, RunbookError::TargetNotFound(ref t) if t == "nope"));

        let err = resolve(&cfg, &["web:missing"], RunnerFlags::default()).unwrap_err();
        assert!(err.to_string().contains("Command `missing` not found in project `web`"));
    }

    #[test]
    fn runner_entries_get_prefixes_and_cli_flags() {
        let cfg = config();
        let flags = RunnerFlags {
            serial: false,
            dependent: true,
        };
        let plan = runner(resolve(&cfg, &["dev"], flags).unwrap());

        assert_eq!(plan.name, "dev");
        assert!(!plan.inline);
        assert_eq!(plan.executions.len(), 2);

        let web = &plan.executions[0];
        assert_eq!(web.node.prefix.as_ref().unwrap().text(), "web:dev");
        assert!(web.command.dependent);
        assert!(!web.command.serial);

        let api = &plan.executions[1];
        assert_eq!(api.node.prefix.as_ref().unwrap().text(), "backend");
        assert!(api.command.serial);
    }

    #[test]
    fn runner_key_flags_match_base_name_and_expand_wildcards() {
        let cfg = config();
        let plan = runner(resolve(&cfg, &["all"], RunnerFlags::default()).unwrap());

        assert_eq!(plan.name, "all");
        assert!(plan.flags.serial && plan.flags.dependent);
        let cmds: Vec<_> = plan.executions.iter().map(|e| e.command.cmd.as_str()).collect();
        assert_eq!(cmds, vec!["web:build", "web:dev"]);
        assert!(plan.executions.iter().all(|e| e.command.serial && e.command.dependent));
    }

    #[test]
    fn unknown_runner_entries_run_as_literal_lines() {
        let cfg = config();
        let plan = runner(resolve(&cfg, &["literal"], RunnerFlags::default()).unwrap());
        let node = &plan.executions[0].node;
        assert_eq!(node.identifier, "literal");
        assert_eq!(node.dir, PathBuf::from("/repo"));
        assert_eq!(node.commands, vec!["echo hello world"]);

        let err = resolve(&cfg, &["broken"], RunnerFlags::default()).unwrap_err();
        assert!(err.to_string().contains("not found in project `web`"));
    }

    #[test]
    fn inline_runners_need_several_known_commands() {
        let cfg = config();
        let plan = runner(resolve(&cfg, &["lint", "api:start"], RunnerFlags::default()).unwrap());
        assert!(plan.inline);
        assert_eq!(plan.name, INLINE_RUNNER_NAME);
        assert_eq!(plan.executions.len(), 2);

        let single = runner(resolve(&cfg, &["api:*"], RunnerFlags::default()).unwrap());
        assert_eq!(single.executions.len(), 1);

        // Extra args make it a plain command again.
        let node = command(resolve(&cfg, &["lint", "--fix"], RunnerFlags::default()).unwrap());
        assert_eq!(node.commands, vec!["cargo clippy --fix"]);
    }

    #[test]
    fn runner_keys_split_into_name_and_flags() {
        assert_eq!(
            split_runner_key("all[serial, dependent]"),
            ("all".to_string(), vec!["serial".to_string(), "dependent".to_string()])
        );
        assert_eq!(split_runner_key("plain"), ("plain".to_string(), vec![]));
        assert_eq!(split_runner_key("[serial]"), ("[serial]".to_string(), vec![]));
    }
}
