//! The dialog contract.
//!
//! A dialog is a stateless definition shared by every conversation; its
//! per-conversation state lives in a [`DialogInstance`] on a stack owned by
//! the dialog state document. Lifecycle methods receive the
//! [`DialogContext`] whose active instance belongs to the dialog.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Greeter;
//!
//! #[async_trait]
//! impl Dialog for Greeter {
//!     fn id(&self) -> &str {
//!         "greeter"
//!     }
//!
//!     async fn begin_dialog(
//!         &self,
//!         dc: &mut DialogContext<'_>,
//!         _options: Option<Value>,
//!     ) -> DialogResult<DialogTurnResult> {
//!         dc.turn_mut().send_text("hello");
//!         dc.end_dialog(None).await
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dialog_context::DialogContext;
use crate::dialog_set::DialogSet;
use crate::error::DialogResult;
use crate::event::DialogEvent;

/// Persisted state of one running dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogInstance {
    /// Id of the dialog definition.
    pub id: String,
    /// Dialog-owned state.
    #[serde(default)]
    pub state: Value,
}

/// Outcome of a lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogTurnStatus {
    /// The stack was empty; nothing ran.
    Empty,
    /// The active dialog is waiting for the next activity.
    Waiting,
    /// The dialog finished.
    Complete,
    /// The dialog was cancelled.
    Cancelled,
    /// A step sequence made progress and must be continued from the root.
    ///
    /// Root-level entry points loop until a different status comes back.
    Reenter,
}

/// Status plus an optional result value.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogTurnResult {
    /// What happened.
    pub status: DialogTurnStatus,
    /// Value produced by a completed dialog.
    pub result: Option<Value>,
}

impl DialogTurnResult {
    /// Nothing was running.
    pub fn empty() -> Self {
        Self::new(DialogTurnStatus::Empty, None)
    }

    /// The active dialog waits for input.
    pub fn end_of_turn() -> Self {
        Self::new(DialogTurnStatus::Waiting, None)
    }

    /// A dialog completed with `result`.
    pub fn complete(result: Option<Value>) -> Self {
        Self::new(DialogTurnStatus::Complete, result)
    }

    /// Dialogs were cancelled.
    pub fn cancelled() -> Self {
        Self::new(DialogTurnStatus::Cancelled, None)
    }

    /// The root must continue again.
    pub fn reenter() -> Self {
        Self::new(DialogTurnStatus::Reenter, None)
    }

    fn new(status: DialogTurnStatus, result: Option<Value>) -> Self {
        Self { status, result }
    }

    /// Returns `true` while a dialog is still running.
    pub fn is_waiting(&self) -> bool {
        self.status == DialogTurnStatus::Waiting
    }
}

/// Why a dialog is being ended or resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogReason {
    /// A dialog was started.
    BeginCalled,
    /// A dialog was continued.
    ContinueCalled,
    /// A dialog ended normally.
    EndCalled,
    /// A dialog was replaced by another.
    ReplaceCalled,
    /// A dialog was cancelled.
    CancelCalled,
}

/// Nested stack exposed by a container dialog.
#[derive(Clone)]
pub struct ChildFrame {
    /// Dialogs that may run on the nested stack.
    pub dialogs: Arc<DialogSet>,
    /// JSON pointer of the nested stack inside the dialog state document.
    pub stack_pointer: String,
}

/// A unit of conversational behaviour.
#[async_trait]
pub trait Dialog: Send + Sync + 'static {
    /// Unique id within the owning [`DialogSet`].
    fn id(&self) -> &str;

    /// Called when the dialog is pushed onto a stack.
    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> DialogResult<DialogTurnResult>;

    /// Called when a new activity reaches the dialog. Ends it by default.
    async fn continue_dialog(&self, dc: &mut DialogContext<'_>) -> DialogResult<DialogTurnResult> {
        dc.end_dialog(None).await
    }

    /// Called when a dialog this one started has ended. Ends with the child's
    /// result by default.
    async fn resume_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _reason: DialogReason,
        result: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        dc.end_dialog(result).await
    }

    /// Asks the dialog to repeat its last prompt.
    async fn reprompt_dialog(&self, _dc: &mut DialogContext<'_>) -> DialogResult<()> {
        Ok(())
    }

    /// Called right before the dialog's instance is removed from the stack.
    async fn end_dialog(&self, _dc: &mut DialogContext<'_>, _reason: DialogReason) -> DialogResult<()> {
        Ok(())
    }

    /// Leaf-to-root phase of event propagation. Return `true` to handle it.
    async fn on_pre_bubble_event(
        &self,
        _dc: &mut DialogContext<'_>,
        _event: &DialogEvent,
    ) -> DialogResult<bool> {
        Ok(false)
    }

    /// Root-to-leaf phase of event propagation. Return `true` to handle it.
    async fn on_post_bubble_event(
        &self,
        _dc: &mut DialogContext<'_>,
        _event: &DialogEvent,
    ) -> DialogResult<bool> {
        Ok(false)
    }

    /// The nested stack of the active instance, for container dialogs.
    fn child_frame(&self, _dc: &DialogContext<'_>) -> Option<ChildFrame> {
        None
    }

    /// Returns `true` if the dialog owns a `dialog` memory scope for its
    /// children.
    fn is_container(&self) -> bool {
        false
    }

    /// Dialogs that must be registered alongside this one.
    fn dependencies(&self) -> Vec<Arc<dyn Dialog>> {
        Vec::new()
    }
}
