// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, RunbookError};
use crate::watch::path_utils::clean_path;

pub const DEFAULT_CONFIG_FILE: &str = "Runbook.toml";

/// Load a configuration file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] for
/// the checked form.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|err| {
        RunbookError::ConfigError(format!(
            "Failed to read configuration file `{}`: {err}",
            path.display()
        ))
    })?;

    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file and run validation.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    ConfigFile::try_from(raw_config)
}

/// Parse and validate config text that did not come from a file.
pub fn parse_and_validate(contents: &str) -> Result<ConfigFile> {
    let raw_config: RawConfigFile = toml::from_str(contents)?;
    ConfigFile::try_from(raw_config)
}

/// Config path from `-f/--file`, else `Runbook.toml` in the working
/// directory. Always absolute.
pub fn config_path(file: Option<&str>) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let path = match file {
        Some(file) if !file.trim().is_empty() => PathBuf::from(file.trim()),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    };
    Ok(clean_path(&cwd.join(path)))
}

/// Directory everything in the config is relative to.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
