// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::model::{
    AfterSpec, AwaitsSpec, CommandSpec, ConfigFile, PortsSpec, ProjectConfig, RawConfigFile,
    RestartSpec, RunnerEntrySpec, RunnerSpec, WatchSpec,
};
use crate::engine::{PortAwait, RestartPolicy, RunnerCommand};
use crate::errors::{Result, RunbookError};
use crate::types::RestartCondition;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RunbookError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        for (name, command) in &raw.commands {
            validate_command(command, &Owner::Global(name))?;
        }
        for (name, project) in &raw.projects {
            validate_project(name, project)?;
        }

        let mut runners = BTreeMap::new();
        for (key, spec) in &raw.runners {
            runners.insert(key.clone(), parse_runner(key, spec)?);
        }

        Ok(ConfigFile::new_unchecked(raw.commands, raw.projects, runners))
    }
}

/// Who a command belongs to, for error messages.
enum Owner<'a> {
    Global(&'a str),
    Project { project: &'a str, command: &'a str },
}

impl Owner<'_> {
    fn describe(&self) -> String {
        match self {
            Owner::Global(name) => format!("command `{name}`"),
            Owner::Project { project, command } => {
                format!("command `{command}` in project `{project}`")
            }
        }
    }

    fn hook<'b>(&'b self, role: &'b str) -> Owner<'b> {
        match self {
            Owner::Global(_) => Owner::Global(role),
            Owner::Project { project, .. } => Owner::Project {
                project: *project,
                command: role,
            },
        }
    }
}

fn project_owner<'a>(project: &'a str, command: &'a str) -> Owner<'a> {
    Owner::Project { project, command }
}

fn config_error(message: impl Into<String>) -> RunbookError {
    RunbookError::ConfigError(message.into())
}

fn validate_project(name: &str, project: &ProjectConfig) -> Result<()> {
    if project.dir.as_deref().is_none_or(|dir| dir.trim().is_empty()) {
        return Err(config_error(format!(
            "Project `{name}` is missing required `dir` property in configuration"
        )));
    }
    if let Some(shell) = &project.shell {
        validate_shell(shell, &format!("project `{name}`"))?;
    }
    if let Some(watch) = &project.watch {
        validate_watch(watch, &format!("project `{name}`"))?;
    }

    if let Some(pre) = &project.pre {
        validate_command(pre, &project_owner(name, "pre"))?;
    }
    if let Some(post) = &project.post {
        validate_command(post, &project_owner(name, "post"))?;
    }
    if let Some(after) = &project.after {
        validate_after(after, &project_owner(name, "after"))?;
    }
    for (command, spec) in &project.cmds {
        validate_command(spec, &project_owner(name, command))?;
    }
    Ok(())
}

fn validate_command(spec: &CommandSpec, owner: &Owner<'_>) -> Result<()> {
    let table = match spec {
        CommandSpec::Lines(_) => return Ok(()),
        CommandSpec::Table(table) => table,
    };

    if table.run.is_none() {
        return Err(config_error(format!(
            "Missing required `run` field for {}",
            owner.describe()
        )));
    }
    if let Some(shell) = &table.shell {
        validate_shell(shell, &owner.describe())?;
    }
    if let Some(watch) = &table.watch {
        validate_watch(watch, &owner.describe())?;
    }
    if let Some(pre) = &table.pre {
        validate_command(pre, &owner.hook("pre"))?;
    }
    if let Some(post) = &table.post {
        validate_command(post, &owner.hook("post"))?;
    }
    if let Some(after) = &table.after {
        validate_after(after, &owner.hook("after"))?;
    }
    Ok(())
}

fn validate_after(spec: &AfterSpec, owner: &Owner<'_>) -> Result<()> {
    match spec {
        AfterSpec::Command(command) => validate_command(command, owner),
        AfterSpec::Branches(branches) if branches.is_empty() => Err(config_error(format!(
            "Missing required `run` field for {}",
            owner.describe()
        ))),
        AfterSpec::Branches(branches) => {
            let named = [
                ("after.success", &branches.success),
                ("after.failure", &branches.failure),
                ("after.change", &branches.change),
                ("after.always", &branches.always),
            ];
            for (role, branch) in named {
                if let Some(branch) = branch {
                    validate_command(branch, &owner.hook(role))?;
                }
            }
            Ok(())
        }
    }
}

fn validate_shell(shell: &str, owner: &str) -> Result<()> {
    if shell.trim().is_empty() {
        return Err(config_error(format!("Parameter `shell` in {owner} cannot be empty")));
    }
    Ok(())
}

fn validate_watch(watch: &WatchSpec, owner: &str) -> Result<()> {
    let (include, exclude) = watch.split();
    if include.iter().chain(&exclude).any(|p| p.trim().is_empty()) {
        return Err(config_error(format!(
            "Parameter `watch` in {owner} must be a list of Glob patterns"
        )));
    }
    Ok(())
}

fn parse_runner(key: &str, spec: &RunnerSpec) -> Result<Vec<RunnerCommand>> {
    let entries: Vec<RunnerCommand> = match spec {
        RunnerSpec::One(cmd) => vec![RunnerCommand {
            cmd: cmd.clone(),
            ..RunnerCommand::default()
        }],
        RunnerSpec::Many(entries) => entries
            .iter()
            .map(|entry| parse_runner_entry(key, entry))
            .collect::<Result<_>>()?,
    };

    if entries.is_empty() || entries.iter().any(|entry| entry.cmd.trim().is_empty()) {
        return Err(config_error(format!(
            "Runner `{key}` must be defined as a command or a list of commands"
        )));
    }
    Ok(entries)
}

fn parse_runner_entry(runner: &str, entry: &RunnerEntrySpec) -> Result<RunnerCommand> {
    let table = match entry {
        RunnerEntrySpec::Cmd(cmd) => {
            return Ok(RunnerCommand {
                cmd: cmd.clone(),
                ..RunnerCommand::default()
            });
        }
        RunnerEntrySpec::Table(table) => table,
    };

    let cmd = table.cmd.clone().ok_or_else(|| {
        config_error(format!(
            "Runner command in runner `{runner}` must have a `cmd` key"
        ))
    })?;

    Ok(RunnerCommand {
        cmd,
        name: table
            .name
            .as_ref()
            .filter(|name| !name.trim().is_empty())
            .cloned(),
        delay: seconds(runner, "delay", table.delay)?,
        restart: parse_restart(runner, table.restart.as_ref())?,
        awaits: table
            .awaits
            .as_ref()
            .map(|spec| parse_awaits(runner, spec))
            .transpose()?,
        serial: table.serial.unwrap_or(false),
        dependent: table.dependent.unwrap_or(false),
    })
}

fn parse_restart(runner: &str, spec: Option<&RestartSpec>) -> Result<RestartPolicy> {
    let mut policy = RestartPolicy::default();
    let table = match spec {
        None => return Ok(policy),
        Some(RestartSpec::Enabled(enabled)) => {
            policy.enabled = *enabled;
            return Ok(policy);
        }
        Some(RestartSpec::Table(table)) => table,
    };

    policy.enabled = true;
    if let Some(condition) = &table.condition {
        policy.condition = condition.parse::<RestartCondition>().map_err(|_| {
            config_error(format!(
                "Invalid value for parameter `condition` in runner `{runner}`. Must be `always`, `failure`, or `success`"
            ))
        })?;
    }
    if let Some(retries) = table.retries {
        policy.retries = u32::try_from(retries).map_err(|_| {
            config_error(format!(
                "Parameter `retries` in runner `{runner}` must be a non-negative number"
            ))
        })?;
    }
    if table.interval.is_some() {
        policy.interval = seconds(runner, "interval", table.interval)?;
    }
    Ok(policy)
}

/// Durations in seconds: missing or negative means zero, `inf` and `nan`
/// are rejected.
fn seconds(runner: &str, param: &str, value: Option<f64>) -> Result<f64> {
    match value {
        None => Ok(0.0),
        Some(value) if value.is_finite() => Ok(value.max(0.0)),
        Some(value) => Err(config_error(format!(
            "Parameter `{param}` in runner `{runner}` must be a finite number of seconds, got {value}"
        ))),
    }
}

fn parse_awaits(runner: &str, spec: &AwaitsSpec) -> Result<PortAwait> {
    let (raw_ports, timeout) = match spec {
        AwaitsSpec::Port(port) => (vec![*port], 0.0),
        AwaitsSpec::Ports(ports) => (ports.clone(), 0.0),
        AwaitsSpec::Table(table) => {
            let ports = match &table.ports {
                None => Vec::new(),
                Some(PortsSpec::One(port)) => vec![*port],
                Some(PortsSpec::Many(ports)) => ports.clone(),
            };
            (ports, seconds(runner, "timeout", table.timeout)?)
        }
    };

    let ports = raw_ports
        .into_iter()
        .map(|port| {
            u16::try_from(port)
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| config_error(format!("Invalid port specification in `awaits`: {port}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PortAwait { ports, timeout })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(text)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn project_without_dir_is_rejected() {
        let err = parse("[projects.web]\ncmds = { dev = \"npm run dev\" }\n").unwrap_err();
        assert!(err.to_string().contains("missing required `dir`"), "{err}");
    }

    #[test]
    fn command_table_requires_run() {
        let err = parse("[projects.web]\ndir = \"web\"\n[projects.web.cmds.dev]\ndir = \"src\"\n")
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("Missing required `run` field for command `dev` in project `web`"),
            "{err}"
        );
    }

    #[test]
    fn runner_entries_are_parsed() {
        let cfg = parse(
            r#"
            [runners]
            dev = [
                "web:dev",
                { cmd = "api:start", name = "api", delay = 1, serial = true, restart = { condition = "always", retries = 3, interval = 0.5 }, awaits = { ports = [5432], timeout = 10 } },
            ]
            single = "lint"
            "#,
        )
        .unwrap();

        let dev = &cfg.runners["dev"];
        assert_eq!(dev.len(), 2);
        assert_eq!(dev[0].cmd, "web:dev");
        assert!(!dev[0].restart.enabled);

        let api = &dev[1];
        assert_eq!(api.name.as_deref(), Some("api"));
        assert_eq!(api.delay, 1.0);
        assert!(api.serial);
        assert!(api.restart.enabled);
        assert_eq!(api.restart.condition, RestartCondition::Always);
        assert_eq!(api.restart.retries, 3);
        assert_eq!(api.restart.interval, 0.5);
        assert_eq!(
            api.awaits,
            Some(PortAwait {
                ports: vec![5432],
                timeout: 10.0
            })
        );

        assert_eq!(cfg.runners["single"][0].cmd, "lint");
    }

    #[test]
    fn invalid_restart_condition_names_the_runner() {
        let err = parse("[runners]\ndev = [{ cmd = \"x\", restart = { condition = \"never\" } }]\n")
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("Invalid value for parameter `condition` in runner `dev`"),
            "{err}"
        );
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let err = parse("[runners]\ndev = [{ cmd = \"x\", awaits = 70000 }]\n").unwrap_err();
        assert!(err.to_string().contains("Invalid port specification"), "{err}");
    }

    #[test]
    fn non_finite_durations_are_rejected() {
        for (param, entry) in [
            ("timeout", "awaits = { ports = [1], timeout = inf }"),
            ("timeout", "awaits = { ports = [1], timeout = nan }"),
            ("delay", "delay = inf"),
            ("interval", "restart = { interval = -inf }"),
        ] {
            let err = parse(&format!("[runners]\ndev = [{{ cmd = \"x\", {entry} }}]\n"))
                .unwrap_err();
            assert!(
                err.to_string().contains(&format!(
                    "Parameter `{param}` in runner `dev` must be a finite number of seconds"
                )),
                "{entry}: {err}"
            );
        }
    }

    #[test]
    fn huge_finite_timeout_is_accepted() {
        let cfg = parse("[runners]\ndev = [{ cmd = \"x\", awaits = { ports = [1], timeout = 1e300 } }]\n")
            .unwrap();
        assert_eq!(cfg.runners["dev"][0].awaits.as_ref().map(|a| a.timeout), Some(1e300));
    }

    #[test]
    fn empty_runner_is_rejected() {
        let err = parse("[runners]\ndev = []\n").unwrap_err();
        assert!(err.to_string().contains("Runner `dev`"), "{err}");
    }
}
