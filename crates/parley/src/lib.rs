//! # Parley
//!
//! A rule-driven adaptive dialog engine for conversational bots.
//!
//! ## Overview
//!
//! A bot is a tree of dialogs. Adaptive dialogs hold a sequence of steps and a
//! set of rules; each turn, events raised by the inbound activity bubble from
//! the innermost running dialog outwards, rules claim them and queue steps,
//! and the queued steps run until one waits for the user.
//!
//! ```text
//! ┌──────────┐     ┌───────────────┐     ┌───────────────────────────────┐
//! │ Activity │────▶│ DialogManager │────▶│ AdaptiveDialog "root"         │
//! └──────────┘     │ (load / save) │     │  rules ──▶ queued steps ──┐   │
//!                  └───────┬───────┘     │  ┌─────────────────────────┘   │
//!                          │             │  ▼                             │
//!                          ▼             │ TextInput ─▶ BeginDialog ─▶ …  │
//!                    ┌─────────┐         └───────────────────────────────┘
//!                    │ Storage │
//!                    └─────────┘
//! ```
//!
//! - **Core** (`parley-core`): scoped memory, expressions, the dialog stack
//! - **Adaptive** (`parley-adaptive`): rules, selectors, step sequences, steps
//! - **Runtime** (`parley-runtime`): turn management, configuration, logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use parley::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let root = AdaptiveDialog::builder("root")
//!         .step(TextInput::new("What is your name?").property("user.name"))
//!         .step(SendActivity::new("Hello {user.name}!"))
//!         .build()?;
//!
//!     let manager = DialogManager::builder(root).build()?;
//!     let outcome = manager.on_turn(Activity::message("hi")).await?;
//!     println!("{:?}", outcome.texts());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines

pub use parley_adaptive as adaptive;
pub use parley_core as core;
pub use parley_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use parley::prelude::*;
/// ```
pub mod prelude {
    // Dialogs, rules and steps
    pub use parley_adaptive::prelude::*;

    // Hosting
    pub use parley_runtime::{
        ConfigLoader, DialogManager, ParleyConfig, TestAdapter, TurnOutcome, logging,
    };

    // Storage backends
    pub use parley_core::{FileStorage, MemoryStorage};
}
