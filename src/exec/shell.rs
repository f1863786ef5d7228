// src/exec/shell.rs

//! Shell wrapping.
//!
//! Every command line of a node is preceded by an `echo <marker>` so the
//! output pump can print "Executing `<line>`" at the exact point in the
//! stream where the shell reached that line.

use std::collections::HashMap;

use uuid::Uuid;

use crate::errors::{Result, RunbookError};

/// Fully resolved program + arguments for one node, plus the marker lookup
/// table used by the stdout pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// marker -> original command line
    pub markers: HashMap<String, String>,
}

/// Platform default shell: `cmd` on Windows, otherwise `$SHELL`, falling back
/// to `zsh` on macOS and `bash` elsewhere.
pub fn default_shell() -> String {
    if cfg!(windows) {
        return "cmd".to_string();
    }
    match std::env::var("SHELL") {
        Ok(shell) if !shell.trim().is_empty() => shell,
        _ if cfg!(target_os = "macos") => "zsh".to_string(),
        _ => "bash".to_string(),
    }
}

/// Wrap `commands` for `shell` on the current platform.
pub fn wrap(shell: &str, commands: &[String]) -> Result<ShellInvocation> {
    let marker_base = format!("runbookLogId{}", Uuid::new_v4().simple());
    wrap_for(cfg!(windows), shell, commands, &marker_base)
}

pub(crate) fn wrap_for(
    windows: bool,
    shell: &str,
    commands: &[String],
    marker_base: &str,
) -> Result<ShellInvocation> {
    let shell = shell.trim();
    let windows_cmd = windows && shell == "cmd";
    let mut markers = HashMap::new();
    let mut parts: Vec<String> = Vec::new();

    for (idx, line) in commands.iter().enumerate() {
        let marker = format!("{marker_base}_{}", idx + 1);
        markers.insert(marker.clone(), line.clone());

        if windows_cmd {
            if idx > 0 {
                parts.push("&&".to_string());
            }
            parts.extend(["echo".to_string(), marker, "&&".to_string()]);
            let tokens = shlex::split(line).ok_or_else(|| {
                RunbookError::ConfigError(format!("Invalid format for command `{line}`"))
            })?;
            // Keep the raw words when splitting did not change anything so
            // cmd sees the line exactly as written.
            let words: Vec<&str> = line.split(' ').collect();
            if words.len() == tokens.len() {
                parts.extend(words.into_iter().map(str::to_string));
            } else {
                parts.extend(tokens);
            }
        } else {
            parts.push(format!("echo {marker}"));
            parts.push(line.clone());
        }
    }

    let (program, args) = if windows {
        if shell == "powershell" {
            (
                "powershell".to_string(),
                vec!["-Command".to_string(), parts.join(" ; ")],
            )
        } else {
            let mut args = vec!["/C".to_string()];
            args.extend(parts);
            (shell.to_string(), args)
        }
    } else {
        (
            shell.to_string(),
            vec!["-c".to_string(), parts.join(" && ")],
        )
    };

    Ok(ShellInvocation {
        program,
        args,
        markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn posix_joins_markers_and_lines() {
        let inv = wrap_for(false, "bash", &lines(&["make", "make test"]), "ID").unwrap();
        assert_eq!(inv.program, "bash");
        assert_eq!(
            inv.args,
            vec!["-c", "echo ID_1 && make && echo ID_2 && make test"]
        );
        assert_eq!(inv.markers.get("ID_2").map(String::as_str), Some("make test"));
    }

    #[test]
    fn windows_cmd_splits_into_words() {
        let inv = wrap_for(true, "cmd", &lines(&["echo \"a b\"", "dir"]), "ID").unwrap();
        assert_eq!(inv.program, "cmd");
        assert_eq!(
            inv.args,
            vec!["/C", "echo", "ID_1", "&&", "echo", "a b", "&&", "echo", "ID_2", "&&", "dir"]
        );
    }

    #[test]
    fn windows_cmd_rejects_unbalanced_quotes() {
        let err = wrap_for(true, "cmd", &lines(&["echo \"oops"]), "ID").unwrap_err();
        assert!(err.to_string().contains("Invalid format for command `echo \"oops`"));
    }

    #[test]
    fn powershell_uses_semicolons() {
        let inv = wrap_for(true, "powershell", &lines(&["ls"]), "ID").unwrap();
        assert_eq!(inv.program, "powershell");
        assert_eq!(inv.args, vec!["-Command", "echo ID_1 ; ls"]);
    }
}
