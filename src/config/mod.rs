// src/config/mod.rs

//! Configuration loading for `jobwarden`.
//!
//! A TOML file is deserialized into [`model::RawConfigFile`] and then turned
//! into a validated [`model::ConfigFile`] via `TryFrom`. Every section is
//! optional; a missing default config file means built-in defaults.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, resolve_config};
pub use model::{
    ConfigFile, LogConfig, RetentionConfig, SchedulerConfig, ServerConfig, SupervisorConfig,
};
