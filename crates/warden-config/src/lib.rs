//! Configuration system for Warden.
//!
//! Provides TOML-based configuration with:
//! - A `[session]` table mapped onto the session manager's runtime config
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
