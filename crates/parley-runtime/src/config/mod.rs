//! Configuration for the Parley runtime.
//!
//! Settings are layered with figment: built-in defaults, profile file, main
//! file, `PARLEY_*` environment variables, then programmatic merges.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    EngineConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, ParleyConfig, SpanEventConfig,
    StorageConfig, StorageKind,
};
pub use validation::validate_config;
