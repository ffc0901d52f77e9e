//! Configuration Management Module
//!
//! Terminal subsystem settings persisted as JSON in the user's config directory.

pub mod storage;
pub mod types;

pub use storage::{config_dir, terminal_config_file, ConfigError, ConfigStorage};
pub use types::{MonitorConfig, TerminalConfig, CONFIG_VERSION};
