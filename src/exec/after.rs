// src/exec/after.rs

//! After-hook dispatch.
//!
//! A root node may carry a command-level `after` set and a project-level one.
//! Each set runs the branches matching the outcome of the main run:
//!
//! | branch    | runs when                                         |
//! |-----------|---------------------------------------------------|
//! | `success` | the run succeeded                                 |
//! | `failure` | the run did not succeed, including any stop       |
//! | `change`  | the run was stopped by a watch restart            |
//! | `always`  | every time                                        |
//!
//! The set's own commands run only when none of its branches ran.

use tokio_util::sync::CancellationToken;

use crate::console::LogPrefix;
use crate::errors::{Outcome, Result};

use super::executor::{ExecMode, Executor};
use super::node::CommandNode;

impl Executor {
    /// Run the after-hooks of `node` for `outcome`.
    ///
    /// Interruptions inside an after-hook end the chain quietly; only real
    /// after-hook failures are returned.
    pub async fn run_after_hooks(
        &self,
        node: &CommandNode,
        outcome: &Outcome,
        token: &CancellationToken,
        after_change: bool,
    ) -> Result<()> {
        let _pending = node.take_pending_after();
        let engine = self.engine();

        if !node.has_after_hooks() || engine.supervisor().after_hooks_suppressed() {
            return Ok(());
        }
        node.mark_after_executed();

        let prefix = node.prefix.as_ref();
        let sets = [(&node.hooks.after, false), (&node.hooks.project_after, true)];
        for (set, project_level) in sets {
            let Some(set) = set else { continue };
            match self
                .run_after_set(set, prefix, outcome, token, after_change, project_level)
                .await
            {
                Outcome::Success => {}
                Outcome::Interrupted(_) => return Ok(()),
                Outcome::Failed(err) => return Err(err),
            }
        }

        engine
            .console()
            .info(prefix, "After command(s) completed successfully");
        Ok(())
    }

    async fn run_after_set(
        &self,
        set: &CommandNode,
        prefix: Option<&LogPrefix>,
        outcome: &Outcome,
        token: &CancellationToken,
        after_change: bool,
        project_level: bool,
    ) -> Outcome {
        let console = self.engine().console();
        let announce = |kind: &str| {
            let message = if project_level {
                format!("Running project-level `after{kind}` command...")
            } else {
                format!("Running `after{kind}` command...")
            };
            console.info(prefix, &message);
        };

        let failed = !outcome.is_success();
        let branches = [
            (outcome.is_success(), &set.branches.success, ".success"),
            (failed, &set.branches.failure, ".failure"),
            (after_change, &set.branches.change, ".change"),
            (true, &set.branches.always, ".always"),
        ];

        let mut ran_branch = false;
        for (selected, branch, kind) in branches {
            let Some(branch) = branch.as_deref().filter(|_| selected) else {
                continue;
            };
            ran_branch = true;
            announce(kind);
            let result = self
                .run_chain(branch, prefix, token, None, ExecMode::After, true)
                .await;
            if !result.is_success() {
                return result;
            }
        }

        if !ran_branch {
            announce("");
            return self
                .run_chain(set, prefix, token, None, ExecMode::After, true)
                .await;
        }

        Outcome::Success
    }
}
