use std::path::{Path, PathBuf};
use std::sync::Arc;

use runbook::config::{ConfigFile, parse_and_validate};
use runbook::console::PrefixAllocator;
use runbook::engine::{RunnerCommand, RunnerExecution, RunnerPlan};
use runbook::exec::CommandNode;
use runbook::types::RunnerFlags;

/// Parse a TOML snippet into a validated config.
pub fn config_from_toml(text: &str) -> ConfigFile {
    parse_and_validate(text).expect("Failed to build valid config from TOML")
}

/// Builder for [`CommandNode`] trees.
pub struct NodeBuilder {
    node: CommandNode,
}

impl NodeBuilder {
    pub fn new(identifier: &str) -> Self {
        Self {
            node: CommandNode::new(identifier, std::env::temp_dir()),
        }
    }

    /// Shorthand for a node running a single line.
    pub fn line(identifier: &str, line: &str) -> Self {
        Self::new(identifier).run(line)
    }

    pub fn dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.node.dir = PathBuf::from(dir.as_ref());
        self
    }

    pub fn run(mut self, line: &str) -> Self {
        self.node.commands.push(line.to_string());
        self
    }

    pub fn shell(mut self, shell: &str) -> Self {
        self.node.shell = Some(shell.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.node.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn watch(mut self, pattern: &str) -> Self {
        self.node.watch.include.push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.node.watch.exclude.push(pattern.to_string());
        self
    }

    pub fn project_pre(mut self, hook: NodeBuilder) -> Self {
        self.node.hooks.project_pre = Some(Box::new(hook.build()));
        self
    }

    pub fn pre(mut self, hook: NodeBuilder) -> Self {
        self.node.hooks.pre = Some(Box::new(hook.build()));
        self
    }

    pub fn post(mut self, hook: NodeBuilder) -> Self {
        self.node.hooks.post = Some(Box::new(hook.build()));
        self
    }

    pub fn project_post(mut self, hook: NodeBuilder) -> Self {
        self.node.hooks.project_post = Some(Box::new(hook.build()));
        self
    }

    pub fn after(mut self, hook: NodeBuilder) -> Self {
        self.node.hooks.after = Some(Box::new(hook.build()));
        self
    }

    pub fn project_after(mut self, hook: NodeBuilder) -> Self {
        self.node.hooks.project_after = Some(Box::new(hook.build()));
        self
    }

    pub fn on_success(mut self, branch: NodeBuilder) -> Self {
        self.node.branches.success = Some(Box::new(branch.build()));
        self
    }

    pub fn on_failure(mut self, branch: NodeBuilder) -> Self {
        self.node.branches.failure = Some(Box::new(branch.build()));
        self
    }

    pub fn on_change(mut self, branch: NodeBuilder) -> Self {
        self.node.branches.change = Some(Box::new(branch.build()));
        self
    }

    pub fn always(mut self, branch: NodeBuilder) -> Self {
        self.node.branches.always = Some(Box::new(branch.build()));
        self
    }

    pub fn build(self) -> CommandNode {
        self.node
    }

    pub fn build_arc(self) -> Arc<CommandNode> {
        Arc::new(self.node)
    }
}

/// Builder for [`RunnerPlan`]. Entries get log prefixes the same way the
/// resolver hands them out.
pub struct RunnerPlanBuilder {
    plan: RunnerPlan,
    prefixes: Arc<PrefixAllocator>,
}

impl RunnerPlanBuilder {
    pub fn new(name: &str, prefixes: &Arc<PrefixAllocator>) -> Self {
        Self {
            plan: RunnerPlan {
                name: name.to_string(),
                inline: false,
                flags: RunnerFlags::default(),
                executions: Vec::new(),
            },
            prefixes: Arc::clone(prefixes),
        }
    }

    /// Runner-wide flags; like the resolver, they are also applied to every
    /// entry added afterwards.
    pub fn flags(mut self, serial: bool, dependent: bool) -> Self {
        self.plan.flags = RunnerFlags { serial, dependent };
        self
    }

    pub fn entry(mut self, node: NodeBuilder, command: RunnerCommand) -> Self {
        let mut command = command;
        command.serial |= self.plan.flags.serial;
        command.dependent |= self.plan.flags.dependent;

        let mut node = node.build();
        let text = command
            .name
            .clone()
            .unwrap_or_else(|| node.identifier.clone());
        node.prefix = Some(self.prefixes.allocate(&text));

        self.plan.executions.push(RunnerExecution {
            node: Arc::new(node),
            command,
        });
        self
    }

    /// Entry with default settings.
    pub fn simple(self, node: NodeBuilder) -> Self {
        let command = RunnerCommand {
            cmd: node_identifier(&node),
            ..RunnerCommand::default()
        };
        self.entry(node, command)
    }

    pub fn build(self) -> RunnerPlan {
        self.plan
    }
}

fn node_identifier(node: &NodeBuilder) -> String {
    node.node.identifier.clone()
}
