use std::sync::Arc;

use async_trait::async_trait;
use parley_core::event::names;
use parley_core::{
    Dialog, DialogContext, DialogError, DialogReason, DialogResult, DialogTurnResult, ValueExt,
};
use serde_json::{Map, Value};
use tracing::debug;

use super::{evaluate_optional, step_id};
use crate::sequence::{ChangeType, SequenceContext, StepChangeList, StepState};

fn step_states(steps: &[Arc<dyn Dialog>]) -> Vec<StepState> {
    steps.iter().map(|step| StepState::new(step.id())).collect()
}

// ============================================================================
// BeginDialog
// ============================================================================

#[derive(Clone)]
enum Target {
    Unset,
    Id(String),
    Dialog(Arc<dyn Dialog>),
}

/// Starts another dialog and optionally binds its result.
///
/// The target is either a dialog definition, which is registered with the
/// hosting adaptive dialog, or the id of a dialog reachable from the step.
///
/// ```rust,ignore
/// BeginDialog::dialog(profile)
///     .option("name", "user.name")
///     .result_property("user.profile")
/// ```
#[derive(Clone)]
pub struct BeginDialog {
    id: String,
    target: Target,
    options: Vec<(String, String)>,
    result_property: Option<String>,
}

impl BeginDialog {
    /// A step with no target yet.
    pub fn new() -> Self {
        Self {
            id: step_id("BeginDialog"),
            target: Target::Unset,
            options: Vec::new(),
            result_property: None,
        }
    }

    /// Begins `dialog`.
    pub fn dialog(dialog: impl Dialog) -> Self {
        Self::dialog_arc(Arc::new(dialog))
    }

    /// Begins a shared dialog.
    pub fn dialog_arc(dialog: Arc<dyn Dialog>) -> Self {
        Self {
            target: Target::Dialog(dialog),
            ..Self::new()
        }
    }

    /// Begins the dialog registered as `id`.
    pub fn target_id(id: impl Into<String>) -> Self {
        Self {
            target: Target::Id(id.into()),
            ..Self::new()
        }
    }

    /// Passes the value of `expression` as option `name`.
    pub fn option(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.options.push((name.into(), expression.into()));
        self
    }

    /// Binds the dialog's result to `property`.
    pub fn result_property(mut self, property: impl Into<String>) -> Self {
        self.result_property = Some(property.into());
        self
    }

    fn target_dialog_id(&self) -> DialogResult<String> {
        match &self.target {
            Target::Unset => Err(DialogError::MissingTarget {
                step: self.id.clone(),
            }),
            Target::Id(id) => Ok(id.clone()),
            Target::Dialog(dialog) => Ok(dialog.id().to_owned()),
        }
    }

    fn evaluate_options(&self, dc: &DialogContext<'_>) -> Option<Value> {
        if self.options.is_empty() {
            return None;
        }
        let options: Map<String, Value> = self
            .options
            .iter()
            .map(|(name, expression)| {
                let value = evaluate_optional(dc, &self.id, Some(expression));
                (name.clone(), value.unwrap_or(Value::Null))
            })
            .collect();
        Some(Value::Object(options))
    }
}

impl Default for BeginDialog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BeginDialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeginDialog")
            .field("id", &self.id)
            .field("target", &self.target_dialog_id().ok())
            .field("result_property", &self.result_property)
            .finish()
    }
}

#[async_trait]
impl Dialog for BeginDialog {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let target = self.target_dialog_id()?;
        let options = self.evaluate_options(dc);
        debug!(step = %self.id, target = %target, "Beginning target dialog");
        dc.begin_dialog(&target, options).await
    }

    async fn resume_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _reason: DialogReason,
        result: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        if let Some(property) = &self.result_property {
            let mut memory = dc.state();
            match &result {
                Some(value) => memory.set_value(property, value.clone())?,
                None => {
                    memory.remove_value(property)?;
                }
            }
        }
        dc.end_dialog(result).await
    }

    fn dependencies(&self) -> Vec<Arc<dyn Dialog>> {
        match &self.target {
            Target::Dialog(dialog) => vec![dialog.clone()],
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Ending and cancelling
// ============================================================================

/// Ends the hosting adaptive dialog with an optional value.
#[derive(Debug, Clone)]
pub struct EndDialog {
    id: String,
    value: Option<String>,
}

impl EndDialog {
    /// Ends without a value.
    pub fn new() -> Self {
        Self {
            id: step_id("EndDialog"),
            value: None,
        }
    }

    /// Ends with the value of `expression`.
    pub fn value(mut self, expression: impl Into<String>) -> Self {
        self.value = Some(expression.into());
        self
    }
}

impl Default for EndDialog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialog for EndDialog {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let value = evaluate_optional(dc, &self.id, self.value.as_deref());
        let mut sequence = SequenceContext::require(dc, &self.id)?;
        sequence.context().end_dialog(value).await
    }
}

/// Cancels every dialog of the conversation.
///
/// A bubbling `cancelDialog` event is emitted first; if a rule handles it,
/// the step simply ends and nothing is cancelled.
#[derive(Debug, Clone)]
pub struct CancelAllDialogs {
    id: String,
}

impl CancelAllDialogs {
    /// Creates the step.
    pub fn new() -> Self {
        Self {
            id: step_id("CancelAllDialogs"),
        }
    }
}

impl Default for CancelAllDialogs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialog for CancelAllDialogs {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        if dc.emit_event(names::CANCEL_DIALOG, None, true, false).await? {
            debug!(step = %self.id, "Cancellation handled by a rule");
            return dc.end_dialog(None).await;
        }
        debug!(step = %self.id, "Cancelling all dialogs");
        dc.root().cancel_all_dialogs().await
    }
}

/// Waits for the next activity.
#[derive(Debug, Clone)]
pub struct EndTurn {
    id: String,
}

impl EndTurn {
    /// Creates the step.
    pub fn new() -> Self {
        Self {
            id: step_id("EndTurn"),
        }
    }
}

impl Default for EndTurn {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialog for EndTurn {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        _dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        Ok(DialogTurnResult::end_of_turn())
    }
}

// ============================================================================
// Events
// ============================================================================

/// Emits a custom event and ends with whether it was handled.
///
/// The event starts at the hosting adaptive dialog, so its rules see it even
/// when it does not bubble.
#[derive(Debug, Clone)]
pub struct EmitEvent {
    id: String,
    name: String,
    value: Option<String>,
    bubble: bool,
}

impl EmitEvent {
    /// Emits `name` without a value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: step_id("EmitEvent"),
            name: name.into(),
            value: None,
            bubble: false,
        }
    }

    /// Sends the value of `expression` as the payload.
    pub fn value(mut self, expression: impl Into<String>) -> Self {
        self.value = Some(expression.into());
        self
    }

    /// Lets enclosing dialogs see the event.
    pub fn bubble(mut self, bubble: bool) -> Self {
        self.bubble = bubble;
        self
    }
}

#[async_trait]
impl Dialog for EmitEvent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let value = evaluate_optional(dc, &self.id, self.value.as_deref());
        let handled = if dc.is_root() {
            dc.emit_event(&self.name, value, self.bubble, false).await?
        } else {
            match dc.parent() {
                Some(mut host) => host.emit_event(&self.name, value, self.bubble, false).await?,
                None => false,
            }
        };
        debug!(step = %self.id, event = %self.name, handled, "Emitted event");
        dc.end_dialog(Some(Value::Bool(handled))).await
    }
}

// ============================================================================
// Sequence editing
// ============================================================================

/// Queues one of two branches in front of the hosting sequence.
#[derive(Clone)]
pub struct IfCondition {
    id: String,
    condition: String,
    steps: Vec<Arc<dyn Dialog>>,
    else_steps: Vec<Arc<dyn Dialog>>,
}

impl IfCondition {
    /// Branches on `condition`. Evaluation failures count as false.
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            id: step_id("IfCondition"),
            condition: condition.into(),
            steps: Vec::new(),
            else_steps: Vec::new(),
        }
    }

    /// Adds a step run when the condition holds.
    pub fn step(mut self, step: impl Dialog) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Adds a step run when it does not.
    pub fn else_step(mut self, step: impl Dialog) -> Self {
        self.else_steps.push(Arc::new(step));
        self
    }
}

impl std::fmt::Debug for IfCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IfCondition")
            .field("id", &self.id)
            .field("condition", &self.condition)
            .field("steps", &self.steps.len())
            .field("else_steps", &self.else_steps.len())
            .finish()
    }
}

#[async_trait]
impl Dialog for IfCondition {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let holds = evaluate_optional(dc, &self.id, Some(&self.condition))
            .is_some_and(|v| v.is_truthy());
        let branch = if holds { &self.steps } else { &self.else_steps };
        debug!(step = %self.id, condition = %self.condition, holds, "Evaluated condition");
        if !branch.is_empty() {
            SequenceContext::require(dc, &self.id)?
                .queue_changes(StepChangeList::new(ChangeType::InsertSteps, step_states(branch)))?;
        }
        dc.end_dialog(None).await
    }

    fn dependencies(&self) -> Vec<Arc<dyn Dialog>> {
        self.steps.iter().chain(&self.else_steps).cloned().collect()
    }
}

/// Queues an arbitrary edit of the hosting sequence.
#[derive(Clone)]
pub struct EditSteps {
    id: String,
    change_type: ChangeType,
    steps: Vec<Arc<dyn Dialog>>,
    tags: Vec<String>,
}

impl EditSteps {
    /// An edit of the given type.
    pub fn new(change_type: ChangeType) -> Self {
        Self {
            id: step_id("EditSteps"),
            change_type,
            steps: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Adds a step to the edit.
    pub fn step(mut self, step: impl Dialog) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Tag filter for [`ChangeType::InsertStepsBeforeTags`].
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

impl std::fmt::Debug for EditSteps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSteps")
            .field("id", &self.id)
            .field("change_type", &self.change_type)
            .field("steps", &self.steps.iter().map(|s| s.id()).collect::<Vec<_>>())
            .field("tags", &self.tags)
            .finish()
    }
}

#[async_trait]
impl Dialog for EditSteps {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let changes = StepChangeList::new(self.change_type, step_states(&self.steps))
            .before_tags(self.tags.clone());
        SequenceContext::require(dc, &self.id)?.queue_changes(changes)?;
        dc.end_dialog(None).await
    }

    fn dependencies(&self) -> Vec<Arc<dyn Dialog>> {
        self.steps.clone()
    }
}
