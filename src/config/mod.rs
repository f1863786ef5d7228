// src/config/mod.rs

//! Configuration loading, validation and target resolution for runbook.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it and parse runner entries (`validate.rs`).
//! - Resolve CLI targets into command trees and runner plans (`resolve.rs`).

pub mod loader;
pub mod model;
pub mod resolve;
pub mod validate;

pub use loader::{
    DEFAULT_CONFIG_FILE, config_path, config_root_dir, load_and_validate, load_from_path,
    parse_and_validate,
};
pub use model::{ConfigFile, ProjectConfig, RawConfigFile};
pub use resolve::{Resolver, Target};
