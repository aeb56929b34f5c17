//! Dialog contexts: one stack frame of the running conversation.
//!
//! All dialog stacks of a conversation live in a single JSON document owned by
//! the [`TurnContext`]. The root stack sits at `/stack`; a container dialog
//! keeps the stack of its children inside its own instance state and exposes
//! it through [`Dialog::child_frame`]. A [`DialogContext`] is a view of one of
//! those stacks: a JSON pointer plus the dialogs that may run there, chained
//! to the frame that contains it.
//!
//! ```text
//! /stack ─────────────── root frame       [ adaptive, ... ]
//!   /0/state/_steps/0/dialogStack ─ child  [ text-input ]
//! ```
//!
//! Because frames are addressed by pointer, a context whose owner was ended
//! underneath it simply stops resolving: reads return nothing and writes fail
//! with [`DialogError::StaleContext`].
//!
//! # Turn driving
//!
//! Root-level [`begin_dialog`](DialogContext::begin_dialog) and
//! [`continue_dialog`](DialogContext::continue_dialog) keep continuing the
//! active dialog while it answers [`DialogTurnStatus::Reenter`], bounded by the
//! turn's step limit.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::dialog::{ChildFrame, Dialog, DialogInstance, DialogReason, DialogTurnResult, DialogTurnStatus};
use crate::dialog_set::DialogSet;
use crate::error::{DialogError, DialogResult};
use crate::event::{DialogEvent, EventPhase};
use crate::memory::{DialogMemory, MemoryView};
use crate::turn::TurnContext;

/// JSON pointer of the root stack inside the dialog state document.
pub const ROOT_STACK_POINTER: &str = "/stack";

struct Frame {
    dialogs: Arc<DialogSet>,
    stack_pointer: String,
    parent: Option<Arc<Frame>>,
}

/// A view of one dialog stack for the current turn.
pub struct DialogContext<'a> {
    turn: &'a mut TurnContext,
    frame: Arc<Frame>,
}

impl<'a> DialogContext<'a> {
    /// Creates the root context over `turn`'s dialog state document.
    pub fn new(turn: &'a mut TurnContext, dialogs: Arc<DialogSet>) -> Self {
        Self {
            turn,
            frame: Arc::new(Frame {
                dialogs,
                stack_pointer: ROOT_STACK_POINTER.to_owned(),
                parent: None,
            }),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The turn.
    pub fn turn(&self) -> &TurnContext {
        self.turn
    }

    /// The turn, mutably.
    pub fn turn_mut(&mut self) -> &mut TurnContext {
        self.turn
    }

    /// Dialogs registered on this frame.
    pub fn dialogs(&self) -> &Arc<DialogSet> {
        &self.frame.dialogs
    }

    /// JSON pointer of this frame's stack.
    pub fn stack_pointer(&self) -> &str {
        &self.frame.stack_pointer
    }

    /// Returns `true` for the outermost frame.
    pub fn is_root(&self) -> bool {
        self.frame.parent.is_none()
    }

    fn stack(&self) -> Option<&Vec<Value>> {
        self.turn
            .memory()
            .dialogs
            .pointer(&self.frame.stack_pointer)?
            .as_array()
    }

    fn stack_mut(&mut self) -> DialogResult<&mut Vec<Value>> {
        self.turn
            .memory_mut()
            .dialogs
            .pointer_mut(&self.frame.stack_pointer)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| DialogError::StaleContext(self.frame.stack_pointer.clone()))
    }

    /// Number of instances on this frame's stack.
    pub fn stack_depth(&self) -> usize {
        self.stack().map_or(0, Vec::len)
    }

    /// Copy of the stack, active instance first.
    pub fn stack_instances(&self) -> DialogResult<Vec<DialogInstance>> {
        self.stack()
            .map(|stack| {
                stack
                    .iter()
                    .map(|v| serde_json::from_value(v.clone()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(|err| DialogError::invalid_state(err.to_string()))
            .map(Option::unwrap_or_default)
    }

    /// Id of the active instance.
    pub fn active_dialog_id(&self) -> Option<String> {
        self.stack()?
            .first()?
            .get("id")?
            .as_str()
            .map(str::to_owned)
    }

    /// Definition of the active instance.
    pub fn active_dialog(&self) -> Option<Arc<dyn Dialog>> {
        self.find_dialog(&self.active_dialog_id()?)
    }

    /// JSON pointer of the active instance.
    pub fn active_instance_pointer(&self) -> Option<String> {
        (self.stack_depth() > 0).then(|| format!("{}/0", self.frame.stack_pointer))
    }

    /// State of the active instance.
    pub fn active_state(&self) -> Option<&Value> {
        self.stack()?.first()?.get("state")
    }

    /// Mutable state of the active instance, normalized to an object.
    pub fn active_state_mut(&mut self) -> Option<&mut Value> {
        let instance = self.stack_mut().ok()?.first_mut()?.as_object_mut()?;
        let state = instance.entry("state").or_insert_with(|| json!({}));
        if !state.is_object() {
            *state = json!({});
        }
        Some(state)
    }

    /// `"{depth}:{id}"` of the active instance, or empty.
    ///
    /// Used to detect that the active instance changed across an await.
    pub fn instance_key(&self) -> String {
        match self.active_dialog_id() {
            Some(id) => format!("{}:{}", self.stack_depth(), id),
            None => String::new(),
        }
    }

    /// Finds a dialog on this frame or any enclosing one.
    pub fn find_dialog(&self, id: &str) -> Option<Arc<dyn Dialog>> {
        let mut frame = Some(&self.frame);
        while let Some(current) = frame {
            if let Some(dialog) = current.dialogs.find(id) {
                return Some(dialog);
            }
            frame = current.parent.as_ref();
        }
        None
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    fn with_frame(&mut self, frame: Arc<Frame>) -> DialogContext<'_> {
        DialogContext {
            turn: &mut *self.turn,
            frame,
        }
    }

    fn child_frame(&self) -> Option<Arc<Frame>> {
        let child = self.active_dialog()?.child_frame(self)?;
        Some(Arc::new(Frame {
            dialogs: child.dialogs,
            stack_pointer: child.stack_pointer,
            parent: Some(self.frame.clone()),
        }))
    }

    /// A second handle on this frame, borrowing this one.
    pub fn reborrow(&mut self) -> DialogContext<'_> {
        let frame = self.frame.clone();
        self.with_frame(frame)
    }

    /// Nearest frame, starting with this one and walking outward, whose
    /// context satisfies `predicate`.
    pub fn find_frame(
        &mut self,
        predicate: impl Fn(&DialogContext<'_>) -> bool,
    ) -> Option<DialogContext<'_>> {
        let mut frame = Some(self.frame.clone());
        while let Some(current) = frame {
            if predicate(&self.with_frame(current.clone())) {
                return Some(self.with_frame(current));
            }
            frame = current.parent.clone();
        }
        None
    }

    /// Context of the enclosing frame.
    pub fn parent(&mut self) -> Option<DialogContext<'_>> {
        let parent = self.frame.parent.clone()?;
        Some(self.with_frame(parent))
    }

    /// Context of the outermost frame.
    pub fn root(&mut self) -> DialogContext<'_> {
        let mut frame = self.frame.clone();
        while let Some(parent) = frame.parent.clone() {
            frame = parent;
        }
        self.with_frame(frame)
    }

    /// Context of the active container's nested stack.
    pub fn child(&mut self) -> Option<DialogContext<'_>> {
        let frame = self.child_frame()?;
        Some(self.with_frame(frame))
    }

    /// Context of an explicitly described nested stack.
    pub fn child_with(&mut self, child: ChildFrame) -> DialogContext<'_> {
        let frame = Arc::new(Frame {
            dialogs: child.dialogs,
            stack_pointer: child.stack_pointer,
            parent: Some(self.frame.clone()),
        });
        self.with_frame(frame)
    }

    fn leaf_frame(&mut self) -> Arc<Frame> {
        let mut frame = self.frame.clone();
        loop {
            let dc = self.with_frame(frame.clone());
            match dc.child_frame() {
                Some(child) => frame = child,
                None => return frame,
            }
        }
    }

    // =========================================================================
    // Memory
    // =========================================================================

    /// Instance pointers backing `dialog` and `^`, nearest first.
    ///
    /// A container owns its scope; any other dialog sees the scope of the
    /// frame that contains it. A dialog at the root with no container above
    /// it owns its own scope.
    fn dialog_scopes(&self) -> Vec<String> {
        let mut scopes = Vec::new();
        if let Some(pointer) = self.active_instance_pointer() {
            let owns_scope = self.is_root() || self.active_dialog().is_some_and(|d| d.is_container());
            if owns_scope {
                scopes.push(pointer);
            }
        }
        let dialogs = &self.turn.memory().dialogs;
        let mut frame = self.frame.parent.as_ref();
        while let Some(current) = frame {
            let pointer = format!("{}/0", current.stack_pointer);
            if dialogs.pointer(&pointer).is_some() {
                scopes.push(pointer);
            }
            frame = current.parent.as_ref();
        }
        scopes
    }

    /// Read-write memory as seen from this frame.
    pub fn state(&mut self) -> DialogMemory<'_> {
        let scopes = self.dialog_scopes();
        DialogMemory::new(self.turn.memory_mut(), scopes)
    }

    /// Read-only memory as seen from this frame.
    pub fn memory(&self) -> MemoryView<'_> {
        MemoryView::new(self.turn.memory(), self.dialog_scopes())
    }

    /// Evaluates an expression against this frame's memory.
    pub fn evaluate(&self, expression: &str) -> DialogResult<Value> {
        let evaluator = self.turn.evaluator().clone();
        Ok(evaluator.evaluate(expression, &self.memory())?)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Pushes a new instance of `id` and begins it.
    pub async fn begin_dialog(
        &mut self,
        id: &str,
        options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let dialog = self
            .find_dialog(id)
            .ok_or_else(|| DialogError::DialogNotFound(id.to_owned()))?;
        self.stack_mut()?
            .insert(0, json!({ "id": id, "state": {} }));
        debug!(
            dialog = id,
            depth = self.stack_depth(),
            stack = %self.frame.stack_pointer,
            "Beginning dialog"
        );
        let result = dialog.begin_dialog(self, options).await?;
        self.settle(result).await
    }

    /// Continues the active dialog. Returns [`DialogTurnStatus::Empty`] if the
    /// stack is empty.
    pub async fn continue_dialog(&mut self) -> DialogResult<DialogTurnResult> {
        let result = self.continue_active().await?;
        self.settle(result).await
    }

    async fn continue_active(&mut self) -> DialogResult<DialogTurnResult> {
        let Some(id) = self.active_dialog_id() else {
            return Ok(DialogTurnResult::empty());
        };
        let dialog = self
            .find_dialog(&id)
            .ok_or(DialogError::DialogNotFound(id))?;
        dialog.continue_dialog(self).await
    }

    async fn settle(&mut self, mut result: DialogTurnResult) -> DialogResult<DialogTurnResult> {
        if !self.is_root() {
            return Ok(result);
        }
        let limit = self.turn.step_limit();
        let mut reentries = 0;
        while result.status == DialogTurnStatus::Reenter {
            reentries += 1;
            if reentries > limit {
                return Err(DialogError::StepLimitExceeded(limit));
            }
            trace!(reentries, "Re-entering root dialog");
            result = self.continue_active().await?;
        }
        Ok(result)
    }

    async fn end_active(&mut self, reason: DialogReason) -> DialogResult<()> {
        let Some(id) = self.active_dialog_id() else {
            return Ok(());
        };
        let depth = self.stack_depth();
        if let Some(dialog) = self.find_dialog(&id) {
            dialog.end_dialog(self, reason).await?;
        }
        if self.stack_depth() == depth {
            self.stack_mut()?.remove(0);
        }
        debug!(dialog = %id, ?reason, "Ended dialog");
        Ok(())
    }

    /// Ends the active dialog and resumes the one below it with `result`.
    ///
    /// Returns [`DialogTurnStatus::Complete`] when the stack becomes empty.
    pub async fn end_dialog(&mut self, result: Option<Value>) -> DialogResult<DialogTurnResult> {
        self.end_active(DialogReason::EndCalled).await?;
        let Some(id) = self.active_dialog_id() else {
            return Ok(DialogTurnResult::complete(result));
        };
        let dialog = self
            .find_dialog(&id)
            .ok_or_else(|| DialogError::DialogNotFound(id.clone()))?;
        debug!(dialog = %id, "Resuming dialog");
        dialog
            .resume_dialog(self, DialogReason::EndCalled, result)
            .await
    }

    /// Ends the active dialog and begins `id` in its place.
    pub async fn replace_dialog(
        &mut self,
        id: &str,
        options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        self.end_active(DialogReason::ReplaceCalled).await?;
        self.begin_dialog(id, options).await
    }

    /// Ends every dialog on this frame's stack.
    pub async fn cancel_all_dialogs(&mut self) -> DialogResult<DialogTurnResult> {
        if self.stack_depth() == 0 {
            return Ok(DialogTurnResult::empty());
        }
        while self.stack_depth() > 0 {
            self.end_active(DialogReason::CancelCalled).await?;
        }
        Ok(DialogTurnResult::cancelled())
    }

    /// Asks the active dialog to repeat its prompt.
    pub async fn reprompt_dialog(&mut self) -> DialogResult<()> {
        match self.active_dialog() {
            Some(dialog) => dialog.reprompt_dialog(self).await,
            None => Ok(()),
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Emits an event and reports whether any frame handled it.
    ///
    /// Starting at this frame (or at the deepest active frame when
    /// `from_leaf` is set), the event is offered to each frame's active dialog
    /// in the pre-bubble phase from the start frame outward, then in the
    /// post-bubble phase from the outermost frame back in. A non-bubbling
    /// event only visits the start frame. Propagation stops at the first
    /// handler.
    pub async fn emit_event(
        &mut self,
        name: &str,
        value: Option<Value>,
        bubble: bool,
        from_leaf: bool,
    ) -> DialogResult<bool> {
        let event = DialogEvent::new(name, value, bubble);
        let start = if from_leaf {
            self.leaf_frame()
        } else {
            self.frame.clone()
        };

        let mut frames = vec![start.clone()];
        if bubble {
            let mut frame = start.parent.clone();
            while let Some(current) = frame {
                frame = current.parent.clone();
                frames.push(current);
            }
        }
        trace!(event = name, frames = frames.len(), bubble, "Emitting event");

        for frame in &frames {
            if self.dispatch(frame.clone(), &event, EventPhase::PreBubble).await? {
                return Ok(true);
            }
        }
        for frame in frames.iter().rev() {
            if self.dispatch(frame.clone(), &event, EventPhase::PostBubble).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn dispatch(
        &mut self,
        frame: Arc<Frame>,
        event: &DialogEvent,
        phase: EventPhase,
    ) -> DialogResult<bool> {
        let mut dc = self.with_frame(frame);
        let Some(dialog) = dc.active_dialog() else {
            return Ok(false);
        };
        let handled = match phase {
            EventPhase::PreBubble => dialog.on_pre_bubble_event(&mut dc, event).await?,
            EventPhase::PostBubble => dialog.on_post_bubble_event(&mut dc, event).await?,
        };
        if handled {
            debug!(dialog = dialog.id(), event = %event.name, ?phase, "Event handled");
        }
        Ok(handled)
    }
}

impl std::fmt::Debug for DialogContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogContext")
            .field("stack", &self.frame.stack_pointer)
            .field("depth", &self.stack_depth())
            .field("active", &self.active_dialog_id())
            .finish()
    }
}
