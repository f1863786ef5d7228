// src/errors.rs

//! Crate-wide error type and the typed run outcome.
//!
//! Every execution path in the engine returns an [`Outcome`] rather than a
//! plain `Result`, so that "this process died because we restarted it" and
//! "this process died because we are shutting down" can never be mistaken
//! for a genuine failure.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunbookError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Command, project or project command `{0}` was not found in configuration")]
    TargetNotFound(String),

    #[error("The command has failed with error `{0}`")]
    SpawnFailed(String),

    #[error("The command has failed with {0}")]
    ExitFailure(String),

    #[error("{role} command failed: {source}")]
    Hook {
        role: HookRole,
        #[source]
        source: Box<RunbookError>,
    },

    #[error(
        "Timeout reached after {timeout} seconds waiting for port {port} to become ready for connection"
    )]
    PortTimeout { port: u16, timeout: String },

    #[error("{0}")]
    RunnerFailure(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunbookError>;

/// Which hook of a command tree produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookRole {
    ProjectPre,
    Pre,
    Post,
    ProjectPost,
}

impl fmt::Display for HookRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HookRole::ProjectPre => "Project `pre`",
            HookRole::Pre => "Command `pre`",
            HookRole::Post => "Command `post`",
            HookRole::ProjectPost => "Project `post`",
        };
        f.write_str(label)
    }
}

/// Reason a run was cut short without being a real failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// The process was stopped because a watched file changed.
    WatchRestart,
    /// The process was stopped because the whole invocation is shutting down.
    Terminated,
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interruption::WatchRestart => f.write_str("restarted by watch mode"),
            Interruption::Terminated => f.write_str("terminated by shutdown"),
        }
    }
}

/// Result of executing one command tree.
#[derive(Debug)]
pub enum Outcome {
    Success,
    Interrupted(Interruption),
    Failed(RunbookError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Outcome::Interrupted(Interruption::Terminated))
    }

    pub fn is_watch_restart(&self) -> bool {
        matches!(self, Outcome::Interrupted(Interruption::WatchRestart))
    }

    /// The genuine error, if any. Interruptions are not errors.
    pub fn error(&self) -> Option<&RunbookError> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Wrap a genuine failure with the hook role that produced it, leaving
    /// interruptions untouched so they keep their meaning across layers.
    pub fn in_hook(self, role: HookRole) -> Outcome {
        match self {
            Outcome::Failed(source) => Outcome::Failed(RunbookError::Hook {
                role,
                source: Box::new(source),
            }),
            other => other,
        }
    }
}

impl From<RunbookError> for Outcome {
    fn from(err: RunbookError) -> Self {
        Outcome::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_wrapping_keeps_interruptions() {
        let restarted = Outcome::Interrupted(Interruption::WatchRestart).in_hook(HookRole::Pre);
        assert!(restarted.is_watch_restart());

        let terminated = Outcome::Interrupted(Interruption::Terminated).in_hook(HookRole::Post);
        assert!(terminated.is_terminated());
    }

    #[test]
    fn hook_wrapping_names_the_role() {
        let failed = Outcome::Failed(RunbookError::ExitFailure("exit code 3".into()))
            .in_hook(HookRole::ProjectPre);
        let msg = failed.error().map(|e| e.to_string()).unwrap_or_default();
        assert_eq!(
            msg,
            "Project `pre` command failed: The command has failed with exit code 3"
        );
    }
}
