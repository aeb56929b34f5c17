//! The adaptive dialog driver.
//!
//! An [`AdaptiveDialog`] owns a step sequence and a list of [`Rule`]s. Events
//! reaching it are matched against the rules; the winning rule queues its
//! steps, which run on the following continuation.
//!
//! # Event processing
//!
//! Each event is offered to the rules first. When no rule fires, the default
//! processing for the event may synthesize a follow-up event, which is routed
//! locally (pre then post phase) in turn:
//!
//! ```text
//! beginDialog ─pre─▶ declared steps? ── yes ─▶ queue them
//!                          │ no
//!                          ▼
//! activityReceived ─pre─▶ recognize ─▶ recognizedIntent
//!                  ─post─▶ no steps left ─▶ unknownIntent
//! recognizeUtterance ─pre─▶ recognize
//! ```
//!
//! The chain is walked with an explicit agenda rather than recursion.
//!
//! # Continuation
//!
//! ```text
//! apply queued changes ─▶ front step running? ── yes ─▶ continue it
//!                               │ no                       │
//!                               ▼                          ▼
//!                         begin it ──────────────▶ finished? ─▶ pop, Reenter
//! ```
//!
//! Finishing a step returns [`DialogTurnStatus::Reenter`] so the root context
//! continues again and the next step starts from a fresh call chain.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::event::names;
use parley_core::turn::paths;
use parley_core::{
    ActivityType, ChildFrame, Dialog, DialogContext, DialogError, DialogEvent, DialogReason,
    DialogResult, DialogSet, DialogTurnResult, DialogTurnStatus, EventPhase, Expression,
    MemoryRead, TurnContext,
};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::generator::{ActiveGenerator, LanguageGenerator};
use crate::recognizer::{Recognizer, RecognizerResult};
use crate::rule::Rule;
use crate::selector::{MostSpecificSelector, TriggerSelector};
use crate::sequence::{ChangeType, STEPS_KEY, SequenceContext, StepChangeList, StepState};

/// Memory property receiving the dialog's result by default.
pub const DEFAULT_RESULT_PROPERTY: &str = "dialog.result";

/// Narrowed recognizer results of this turn, by dialog id.
#[derive(Debug, Default)]
struct Recognized(HashMap<String, Value>);

const OPTIONS_KEY: &str = "options";
const RESULT_KEY: &str = "result";

/// Outcome of default processing for one event phase.
enum Fallback {
    Handled,
    Unhandled,
    Emit(DialogEvent),
}

/// A dialog driven by rules and a mutable step sequence.
pub struct AdaptiveDialog {
    id: String,
    steps: Vec<Arc<dyn Dialog>>,
    rules: Vec<Rule>,
    recognizer: Option<Arc<dyn Recognizer>>,
    generator: Option<Arc<dyn LanguageGenerator>>,
    selector: Box<dyn TriggerSelector>,
    auto_end_dialog: bool,
    default_result_property: String,
    dialogs: Arc<DialogSet>,
}

impl AdaptiveDialog {
    /// Starts building an adaptive dialog.
    pub fn builder(id: impl Into<String>) -> AdaptiveDialogBuilder {
        AdaptiveDialogBuilder::new(id)
    }

    /// The rules, in registration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Dialogs available to the steps of this dialog.
    pub fn dialogs(&self) -> &Arc<DialogSet> {
        &self.dialogs
    }

    // ─── Event processing ────────────────────────────────────────────────────

    fn sequence_missing(&self) -> DialogError {
        DialogError::invalid_state(format!("adaptive dialog '{}' has no step sequence", self.id))
    }

    /// Runs the rule selector for `event` and queues the winner's steps.
    fn select_and_queue(
        &self,
        dc: &mut DialogContext<'_>,
        event: &DialogEvent,
    ) -> DialogResult<bool> {
        dc.state().set_value(paths::DIALOG_EVENT, event.to_value())?;
        let evaluator = dc.turn().evaluator().clone();
        let candidates = self.selector.select(&dc.memory(), evaluator.as_ref());
        let Some((index, rule)) = candidates
            .first()
            .and_then(|&index| self.rules.get(index).map(|rule| (index, rule)))
        else {
            trace!(dialog = %self.id, event = %event.name, "No rule matched");
            return Ok(false);
        };
        debug!(
            dialog = %self.id,
            event = %event.name,
            rule = index,
            trigger = ?rule.trigger(),
            candidates = candidates.len(),
            "Rule selected"
        );
        SequenceContext::current(dc)
            .ok_or_else(|| self.sequence_missing())?
            .queue_changes(rule.changes(event))?;
        if !dc.turn().activity_processed() {
            dc.turn_mut().mark_interrupted();
        }
        Ok(true)
    }

    /// Recognizes the inbound message once per turn and stores the narrowed
    /// result at `turn.recognized`.
    async fn recognize_once(&self, dc: &mut DialogContext<'_>) -> DialogResult<Value> {
        let cached = dc
            .turn()
            .state_ref::<Recognized>()
            .and_then(|recognized| recognized.0.get(&self.id))
            .cloned();
        let recognized = match cached {
            Some(recognized) => {
                trace!(dialog = %self.id, "Reusing recognition");
                recognized
            }
            None => {
                let recognized = self.recognize(dc.turn()).await.to_value();
                dc.turn_mut()
                    .state_or_default::<Recognized>()
                    .0
                    .insert(self.id.clone(), recognized.clone());
                recognized
            }
        };
        dc.state().set_value(paths::RECOGNIZED, recognized.clone())?;
        Ok(recognized)
    }

    async fn recognize(&self, turn: &TurnContext) -> RecognizerResult {
        let text = turn.activity().text();
        let Some(recognizer) = &self.recognizer else {
            return RecognizerResult::none(text);
        };
        match recognizer.recognize(turn).await {
            Ok(result) => result,
            Err(err) => {
                warn!(dialog = %self.id, error = %err, "Recognizer failed; treating as no intent");
                RecognizerResult::none(text)
            }
        }
    }

    async fn fallback(
        &self,
        dc: &mut DialogContext<'_>,
        event: &DialogEvent,
        phase: EventPhase,
    ) -> DialogResult<Fallback> {
        match (phase, event.name.as_str()) {
            (EventPhase::PreBubble, names::BEGIN_DIALOG) => {
                if !self.steps.is_empty() {
                    let steps = self.steps.iter().map(|step| StepState::new(step.id())).collect();
                    SequenceContext::current(dc)
                        .ok_or_else(|| self.sequence_missing())?
                        .queue_changes(StepChangeList::new(ChangeType::InsertSteps, steps))?;
                    return Ok(Fallback::Handled);
                }
                if dc.turn().activity_processed() {
                    return Ok(Fallback::Unhandled);
                }
                let activity = serde_json::to_value(dc.turn().activity()).ok();
                Ok(Fallback::Emit(DialogEvent::new(names::ACTIVITY_RECEIVED, activity, false)))
            }
            (EventPhase::PreBubble, names::ACTIVITY_RECEIVED) => {
                let activity = dc.turn().activity();
                match activity.kind {
                    ActivityType::Message => {
                        let recognized = self.recognize_once(dc).await?;
                        Ok(Fallback::Emit(DialogEvent::new(
                            names::RECOGNIZED_INTENT,
                            Some(recognized),
                            false,
                        )))
                    }
                    ActivityType::Event => match &activity.name {
                        Some(name) => Ok(Fallback::Emit(DialogEvent::new(
                            name.clone(),
                            activity.value.clone(),
                            false,
                        ))),
                        None => Ok(Fallback::Unhandled),
                    },
                    _ => Ok(Fallback::Unhandled),
                }
            }
            (EventPhase::PreBubble, names::RECOGNIZE_UTTERANCE) => {
                if !dc.turn().activity().is_message() {
                    return Ok(Fallback::Unhandled);
                }
                self.recognize_once(dc).await?;
                Ok(Fallback::Handled)
            }
            (EventPhase::PostBubble, names::ACTIVITY_RECEIVED) => {
                if !dc.turn().activity().is_message() {
                    return Ok(Fallback::Unhandled);
                }
                let idle = SequenceContext::current(dc).is_some_and(|sequence| {
                    sequence.steps().is_empty() && sequence.pending_changes() == 0
                });
                if idle {
                    Ok(Fallback::Emit(DialogEvent::new(
                        names::UNKNOWN_INTENT,
                        dc.memory().get_value(paths::RECOGNIZED),
                        false,
                    )))
                } else {
                    Ok(Fallback::Unhandled)
                }
            }
            _ => Ok(Fallback::Unhandled),
        }
    }

    /// Works through `agenda`, last entry first, until something handles it.
    async fn process(
        &self,
        dc: &mut DialogContext<'_>,
        mut agenda: Vec<(DialogEvent, EventPhase)>,
    ) -> DialogResult<bool> {
        while let Some((event, phase)) = agenda.pop() {
            if self.select_and_queue(dc, &event)? {
                return Ok(true);
            }
            match self.fallback(dc, &event, phase).await? {
                Fallback::Handled => return Ok(true),
                Fallback::Unhandled => {}
                Fallback::Emit(next) => {
                    trace!(dialog = %self.id, from = %event.name, event = %next.name, "Synthesized event");
                    agenda.push((next.clone(), EventPhase::PostBubble));
                    agenda.push((next, EventPhase::PreBubble));
                }
            }
        }
        Ok(false)
    }

    /// Routes a non-bubbling event through both phases of this dialog only.
    async fn emit_local(
        &self,
        dc: &mut DialogContext<'_>,
        event: DialogEvent,
    ) -> DialogResult<bool> {
        let agenda = vec![
            (event.clone(), EventPhase::PostBubble),
            (event, EventPhase::PreBubble),
        ];
        self.process(dc, agenda).await
    }

    // ─── Step continuation ───────────────────────────────────────────────────

    async fn continue_steps(&self, dc: &mut DialogContext<'_>) -> DialogResult<DialogTurnResult> {
        if dc.turn().is_cancelled() {
            return Err(DialogError::Cancelled);
        }
        let front = {
            let mut sequence = SequenceContext::current(dc).ok_or_else(|| self.sequence_missing())?;
            sequence.apply_changes()?;
            sequence.steps().into_iter().next()
        };
        if let Some(generator) = &self.generator {
            dc.turn_mut().set_state(ActiveGenerator(generator.clone()));
        }

        let Some(front) = front else {
            if self.auto_end_dialog {
                let result = dc.memory().get_value(&self.default_result_property);
                debug!(dialog = %self.id, "Sequence empty; ending dialog");
                return dc.end_dialog(result).await;
            }
            return Ok(DialogTurnResult::end_of_turn());
        };

        let key = dc.instance_key();
        let result = {
            let mut child = dc.child().ok_or_else(|| self.sequence_missing())?;
            if child.stack_depth() == 0 {
                trace!(dialog = %self.id, step = %front.dialog_id, "Beginning step");
                child.begin_dialog(&front.dialog_id, front.options).await?
            } else {
                child.continue_dialog().await?
            }
        };
        let step_count = dc.turn().step_count() + 1;
        dc.turn_mut()
            .memory_mut_view()
            .set_value(paths::STEP_COUNT, json!(step_count))?;

        if matches!(result.status, DialogTurnStatus::Waiting | DialogTurnStatus::Reenter)
            || dc.instance_key() != key
        {
            return Ok(result);
        }
        if let Some(mut sequence) = SequenceContext::current(dc) {
            sequence.end_current_step().await?;
        }
        Ok(DialogTurnResult::reenter())
    }
}

impl std::fmt::Debug for AdaptiveDialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveDialog")
            .field("id", &self.id)
            .field("steps", &self.steps.iter().map(|s| s.id()).collect::<Vec<_>>())
            .field("rules", &self.rules.len())
            .field("recognizer", &self.recognizer.is_some())
            .field("generator", &self.generator.is_some())
            .field("auto_end_dialog", &self.auto_end_dialog)
            .field("default_result_property", &self.default_result_property)
            .finish()
    }
}

#[async_trait]
impl Dialog for AdaptiveDialog {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let seed = options.as_ref().and_then(|o| o.get("value")).cloned();
        let state = dc
            .active_state_mut()
            .ok_or_else(|| DialogError::StaleContext(self.id.clone()))?;
        state[OPTIONS_KEY] = options.clone().unwrap_or(Value::Null);
        state[STEPS_KEY] = json!([]);
        if let Some(seed) = seed {
            state[RESULT_KEY] = seed;
        }

        let handled = self
            .emit_local(dc, DialogEvent::new(names::BEGIN_DIALOG, options, false))
            .await?;
        trace!(dialog = %self.id, handled, "Processed beginDialog");
        dc.turn_mut().mark_activity_processed();
        self.continue_steps(dc).await
    }

    async fn continue_dialog(&self, dc: &mut DialogContext<'_>) -> DialogResult<DialogTurnResult> {
        self.continue_steps(dc).await
    }

    async fn resume_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _reason: DialogReason,
        _result: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        self.reprompt_dialog(dc).await?;
        Ok(DialogTurnResult::end_of_turn())
    }

    async fn reprompt_dialog(&self, dc: &mut DialogContext<'_>) -> DialogResult<()> {
        let event = DialogEvent::new(names::REPROMPT_DIALOG, None, false);
        if self.emit_local(dc, event).await? {
            return Ok(());
        }
        match dc.child() {
            Some(mut child) => child.reprompt_dialog().await,
            None => Ok(()),
        }
    }

    async fn end_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        reason: DialogReason,
    ) -> DialogResult<()> {
        if let Some(mut child) = dc.child() {
            child.cancel_all_dialogs().await?;
        }
        if let Some(mut sequence) = SequenceContext::current(dc) {
            sequence.discard_changes();
        }
        trace!(dialog = %self.id, ?reason, "Adaptive dialog ending");
        Ok(())
    }

    async fn on_pre_bubble_event(
        &self,
        dc: &mut DialogContext<'_>,
        event: &DialogEvent,
    ) -> DialogResult<bool> {
        self.process(dc, vec![(event.clone(), EventPhase::PreBubble)]).await
    }

    async fn on_post_bubble_event(
        &self,
        dc: &mut DialogContext<'_>,
        event: &DialogEvent,
    ) -> DialogResult<bool> {
        self.process(dc, vec![(event.clone(), EventPhase::PostBubble)]).await
    }

    fn child_frame(&self, dc: &DialogContext<'_>) -> Option<ChildFrame> {
        let has_step = dc
            .active_state()
            .and_then(|state| state.get(STEPS_KEY))
            .and_then(Value::as_array)
            .is_some_and(|steps| !steps.is_empty());
        if !has_step {
            return None;
        }
        let instance = dc.active_instance_pointer()?;
        Some(ChildFrame {
            dialogs: self.dialogs.clone(),
            stack_pointer: format!("{instance}/state/{STEPS_KEY}/0/dialogStack"),
        })
    }

    fn is_container(&self) -> bool {
        true
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`AdaptiveDialog`].
///
/// ```rust,ignore
/// let root = AdaptiveDialog::builder("root")
///     .recognizer(RegexRecognizer::new().intent("Help", r"(?i)help")?)
///     .rule(Rule::on_intent("Help").step(SendActivity::new("I can keep a list.")))
///     .rule(Rule::on_unknown_intent().step(SendActivity::new("Sorry?")))
///     .build()?;
/// ```
pub struct AdaptiveDialogBuilder {
    id: String,
    steps: Vec<Arc<dyn Dialog>>,
    rules: Vec<Rule>,
    recognizer: Option<Arc<dyn Recognizer>>,
    generator: Option<Arc<dyn LanguageGenerator>>,
    selector: Option<Box<dyn TriggerSelector>>,
    auto_end_dialog: bool,
    default_result_property: String,
}

impl AdaptiveDialogBuilder {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
            rules: Vec::new(),
            recognizer: None,
            generator: None,
            selector: None,
            auto_end_dialog: true,
            default_result_property: DEFAULT_RESULT_PROPERTY.to_owned(),
        }
    }

    /// Appends a step run when the dialog begins.
    pub fn step(mut self, step: impl Dialog) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Appends a shared step.
    pub fn step_arc(mut self, step: Arc<dyn Dialog>) -> Self {
        self.steps.push(step);
        self
    }

    /// Adds a rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Sets the recognizer used for inbound messages.
    pub fn recognizer(mut self, recognizer: impl Recognizer + 'static) -> Self {
        self.recognizer = Some(Arc::new(recognizer));
        self
    }

    /// Sets the generator installed while this dialog's steps run.
    pub fn generator(mut self, generator: impl LanguageGenerator + 'static) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    /// Replaces the [`MostSpecificSelector`] default.
    pub fn selector(mut self, selector: impl TriggerSelector + 'static) -> Self {
        self.selector = Some(Box::new(selector));
        self
    }

    /// Whether the dialog ends once its sequence runs out. Defaults to `true`.
    pub fn auto_end_dialog(mut self, auto_end: bool) -> Self {
        self.auto_end_dialog = auto_end;
        self
    }

    /// Property whose value becomes the dialog's result.
    pub fn default_result_property(mut self, property: impl Into<String>) -> Self {
        self.default_result_property = property.into();
        self
    }

    /// Registers every step and compiles the rules.
    pub fn build(self) -> DialogResult<AdaptiveDialog> {
        let mut dialogs = DialogSet::new();
        for step in self
            .steps
            .iter()
            .chain(self.rules.iter().flat_map(|rule| rule.step_dialogs()))
        {
            dialogs.add(step.clone())?;
        }

        let conditions = self
            .rules
            .iter()
            .map(Rule::condition)
            .collect::<Result<Vec<Expression>, _>>()?;
        let mut selector = self
            .selector
            .unwrap_or_else(|| Box::new(MostSpecificSelector::new()));
        selector.initialize(&conditions);

        debug!(
            dialog = %self.id,
            steps = self.steps.len(),
            rules = self.rules.len(),
            registered = dialogs.len(),
            "Built adaptive dialog"
        );
        Ok(AdaptiveDialog {
            id: self.id,
            steps: self.steps,
            rules: self.rules,
            recognizer: self.recognizer,
            generator: self.generator,
            selector,
            auto_end_dialog: self.auto_end_dialog,
            default_result_property: self.default_result_property,
            dialogs: Arc::new(dialogs),
        })
    }
}
