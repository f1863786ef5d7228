use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// When a restartable runner entry should be started again.
///
/// - `Failure`: only after the command returned an error (default).
/// - `Success`: only after the command finished without error.
/// - `Always`: regardless of the outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartCondition {
    Always,
    #[default]
    Failure,
    Success,
}

impl RestartCondition {
    /// Whether a run that ended with (`failed = true`) or without an error
    /// should be restarted under this condition.
    pub fn restarts_after(self, failed: bool) -> bool {
        match self {
            RestartCondition::Always => true,
            RestartCondition::Failure => failed,
            RestartCondition::Success => !failed,
        }
    }
}

impl FromStr for RestartCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(RestartCondition::Always),
            "failure" => Ok(RestartCondition::Failure),
            "success" => Ok(RestartCondition::Success),
            other => Err(format!(
                "invalid restart condition: {other} (expected \"always\", \"failure\" or \"success\")"
            )),
        }
    }
}

impl fmt::Display for RestartCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestartCondition::Always => "always",
            RestartCondition::Failure => "failure",
            RestartCondition::Success => "success",
        };
        f.write_str(name)
    }
}

/// Runner-wide sequencing flags, from the CLI (`-s`, `-d`) or from a runner
/// key such as `"dev[serial,dependent]"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerFlags {
    pub serial: bool,
    pub dependent: bool,
}

impl RunnerFlags {
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut flags = RunnerFlags::default();
        for name in names {
            match name.trim() {
                "serial" => flags.serial = true,
                "dependent" => flags.dependent = true,
                _ => {}
            }
        }
        flags
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.serial {
            names.push("serial");
        }
        if self.dependent {
            names.push("dependent");
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        !self.serial && !self.dependent
    }
}

/// Format a number of seconds without trailing zero decimals:
/// `30.0 -> "30"`, `2.5 -> "2.5"`, `0.25 -> "0.2"` (one decimal at most).
pub fn format_seconds(value: f64) -> String {
    if value.fract() == 0.0 {
        return format!("{}", value as i64);
    }
    let formatted = format!("{value:.1}");
    formatted
        .strip_suffix(".0")
        .map(str::to_string)
        .unwrap_or(formatted)
}

/// Seconds as a [`Duration`]. Negative and NaN clamp to zero, anything too
/// large for a `Duration` saturates at [`Duration::MAX`].
pub fn seconds_to_duration(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}
