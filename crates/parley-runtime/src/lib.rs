//! Parley Runtime - hosting layer for Parley dialogs.
//!
//! This crate provides:
//! - Turn orchestration with state load/save (`DialogManager`)
//! - Figment-based configuration (`config`)
//! - Logging setup (`logging`)
//! - Scripted conversations for tests (`testing`)
//!
//! ```rust,ignore
//! use parley_runtime::{DialogManager, config, logging};
//!
//! let config = config::load_config()?;
//! logging::init_from_config(&config.logging);
//!
//! let manager = DialogManager::builder(root_dialog)
//!     .config(&config)?
//!     .build()?;
//! let outcome = manager.on_turn(activity).await?;
//! ```
//!
//! `DialogManager` is also a `tower::Service<Activity>`, so hosts can stack
//! timeouts or concurrency limits on top of it.

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod testing;

pub use config::{ConfigError, ConfigLoader, ConfigResult, ParleyConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use manager::{DialogManager, DialogManagerBuilder, TurnOutcome};
pub use testing::{ScriptError, TestAdapter, TestScript};

pub use tracing;
pub use tracing_subscriber;

/// Logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
