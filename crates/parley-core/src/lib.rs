//! # Parley Core
//!
//! The foundation of the Parley dialog engine.
//!
//! This crate owns everything a dialog needs at run time that is not specific
//! to rule-driven dialogs:
//!
//! - **Activities**: inbound and outbound conversational messages ([`Activity`])
//! - **Scoped memory**: path addressed state across the `settings`, `user`,
//!   `conversation`, `turn` and `dialog` scopes ([`MemoryStores`], [`DialogMemory`])
//! - **Expressions**: a small boolean/arithmetic language over memory
//!   ([`Expression`], [`ExpressionEvaluator`])
//! - **Dialogs**: the lifecycle contract ([`Dialog`]), registries ([`DialogSet`])
//!   and stack frames ([`DialogContext`])
//! - **Events**: named signals bubbling through nested frames ([`DialogEvent`])
//! - **Storage**: JSON blob persistence ([`Storage`])
//!
//! ## Turn Flow
//!
//! ```text
//! ┌──────────┐     ┌─────────────┐     ┌───────────────┐     ┌────────┐
//! │ Activity │────▶│ TurnContext │────▶│ DialogContext │────▶│ Dialog │
//! └──────────┘     └─────────────┘     │  (root frame) │     └────────┘
//!                         │            └───────┬───────┘         │
//!                         ▼                    ▼                 ▼
//!                  ┌─────────────┐     ┌───────────────┐   child frames
//!                  │ MemoryStores│◀────│ dialog state  │
//!                  └─────────────┘     └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use parley_core::prelude::*;
//!
//! let dialogs = Arc::new(DialogSet::new().with(Arc::new(Greeter))?);
//! let mut turn = TurnContext::new(Activity::message("hi"));
//! let result = DialogContext::new(&mut turn, dialogs)
//!     .begin_dialog("greeter", None)
//!     .await?;
//! ```

pub mod activity;
pub mod dialog;
pub mod dialog_context;
pub mod dialog_set;
pub mod error;
pub mod event;
pub mod expression;
pub mod memory;
pub mod storage;
pub mod turn;
pub mod value;

pub use activity::{Activity, ActivityType, ChannelAccount};
pub use dialog::{
    ChildFrame, Dialog, DialogInstance, DialogReason, DialogTurnResult, DialogTurnStatus,
};
pub use dialog_context::{DialogContext, ROOT_STACK_POINTER};
pub use dialog_set::DialogSet;
pub use error::{
    DialogError, DialogResult, ExpressionError, ExpressionResult, MemoryError, MemoryResult,
    StorageError, StorageResult,
};
pub use event::{DialogEvent, EventPhase};
pub use expression::{Clause, DefaultEvaluator, Expression, ExpressionEvaluator};
pub use memory::{DialogMemory, MemoryRead, MemoryStores, MemoryView};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use turn::{DEFAULT_STEP_LIMIT, TurnContext};
pub use value::ValueExt;

/// Prelude for common imports.
pub mod prelude {
    pub use super::event::names as events;
    pub use super::{
        Activity, Dialog, DialogContext, DialogError, DialogEvent, DialogReason, DialogResult,
        DialogSet, DialogTurnResult, DialogTurnStatus, MemoryRead, Storage, TurnContext,
        ValueExt,
    };
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
}
