//! Step sequences and their change queue.
//!
//! An adaptive dialog keeps the steps it still has to run in its instance
//! state under [`STEPS_KEY`]. The front step is the current one; its own
//! dialog stack (`dialogStack`) holds the running step instance and anything
//! that step started.
//!
//! Rules never edit the sequence directly. They queue a [`StepChangeList`]
//! which is applied, in queued order, at the start of the next continuation:
//!
//! | Change                  | Effect on the sequence                         |
//! |-------------------------|------------------------------------------------|
//! | `InsertSteps`           | splice at the front                            |
//! | `InsertStepsBeforeTags` | splice before the first step with a given tag  |
//! | `AppendSteps`           | push to the end                                |
//! | `EndSequence`           | clear                                          |
//! | `ReplaceSequence`       | clear, then push                               |
//!
//! Queued lists are turn-scoped: they live in the [`TurnContext`] keyed by the
//! owning instance, never in persisted state.
//!
//! [`TurnContext`]: parley_core::TurnContext

use std::collections::{BTreeMap, HashMap};

use parley_core::event::names;
use parley_core::{DialogContext, DialogError, DialogResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, trace};

/// Reserved instance-state key holding the step sequence.
pub const STEPS_KEY: &str = "_steps";

/// How a [`StepChangeList`] edits the sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// Splice before the current step.
    #[default]
    InsertSteps,
    /// Splice before the first step carrying one of the list's tags.
    InsertStepsBeforeTags,
    /// Push to the end.
    AppendSteps,
    /// Drop every step.
    EndSequence,
    /// Drop every step, then push.
    ReplaceSequence,
}

/// One pending step of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    /// Id of the step dialog to begin.
    pub dialog_id: String,
    /// Options passed when the step begins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    /// Tags used by `InsertStepsBeforeTags`.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Stack of the running step instance.
    #[serde(default)]
    pub dialog_stack: Vec<Value>,
}

impl StepState {
    /// A fresh step for `dialog_id`.
    pub fn new(dialog_id: impl Into<String>) -> Self {
        Self {
            dialog_id: dialog_id.into(),
            options: None,
            tags: Vec::new(),
            dialog_stack: Vec::new(),
        }
    }

    /// Sets begin options.
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Adds a tag.
    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|tag| tags.contains(tag))
    }
}

/// A proposed edit of a step sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepChangeList {
    /// How to edit.
    pub change_type: ChangeType,
    /// Steps to add.
    #[serde(default)]
    pub steps: Vec<StepState>,
    /// Tag filter for [`ChangeType::InsertStepsBeforeTags`].
    #[serde(default)]
    pub tags: Vec<String>,
    /// Memory assignments (full path to value) written before the edit.
    #[serde(default)]
    pub turn: BTreeMap<String, Value>,
}

impl StepChangeList {
    /// A change list of the given type.
    pub fn new(change_type: ChangeType, steps: Vec<StepState>) -> Self {
        Self {
            change_type,
            steps,
            ..Self::default()
        }
    }

    /// Sets the tag filter.
    pub fn before_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Adds a memory assignment applied with the change.
    pub fn assign(mut self, path: impl Into<String>, value: Value) -> Self {
        self.turn.insert(path.into(), value);
        self
    }

    /// Applies the edit to `steps`.
    pub fn apply_to(self, steps: &mut Vec<StepState>) {
        match self.change_type {
            ChangeType::InsertSteps => {
                steps.splice(0..0, self.steps);
            }
            ChangeType::InsertStepsBeforeTags => {
                let at = steps
                    .iter()
                    .position(|step| step.has_any_tag(&self.tags))
                    .unwrap_or(steps.len());
                steps.splice(at..at, self.steps);
            }
            ChangeType::AppendSteps => steps.extend(self.steps),
            ChangeType::EndSequence => steps.clear(),
            ChangeType::ReplaceSequence => {
                steps.clear();
                steps.extend(self.steps);
            }
        }
    }
}

/// Change lists queued this turn, keyed by owning instance.
#[derive(Debug, Default)]
struct PendingChanges(HashMap<String, Vec<StepChangeList>>);

/// Returns `true` if the frame's active instance owns a step sequence.
pub fn is_sequence(dc: &DialogContext<'_>) -> bool {
    dc.active_state()
        .and_then(|state| state.get(STEPS_KEY))
        .is_some_and(Value::is_array)
}

/// A dialog context whose active dialog owns a step sequence.
pub struct SequenceContext<'d> {
    dc: DialogContext<'d>,
}

impl<'d> SequenceContext<'d> {
    /// Wraps `dc` if its active instance owns a sequence.
    pub fn new(dc: DialogContext<'d>) -> Option<Self> {
        is_sequence(&dc).then_some(Self { dc })
    }

    /// The sequence owned by the frame of `dc` itself.
    pub fn current(dc: &'d mut DialogContext<'_>) -> Option<Self> {
        Self::new(dc.reborrow())
    }

    /// The nearest sequence at or above `dc`.
    pub fn nearest(dc: &'d mut DialogContext<'_>) -> Option<Self> {
        dc.find_frame(is_sequence).map(|dc| Self { dc })
    }

    /// The nearest sequence at or above `dc`, or
    /// [`DialogError::NotInSequence`] naming `step`.
    pub fn require(dc: &'d mut DialogContext<'_>, step: &str) -> DialogResult<Self> {
        Self::nearest(dc).ok_or_else(|| DialogError::NotInSequence {
            step: step.to_owned(),
        })
    }

    /// The context of the owning frame.
    pub fn context(&mut self) -> &mut DialogContext<'d> {
        &mut self.dc
    }

    fn key(&self) -> DialogResult<String> {
        let pointer = self
            .dc
            .active_instance_pointer()
            .ok_or_else(|| DialogError::StaleContext(self.dc.stack_pointer().to_owned()))?;
        let id = self.dc.active_dialog_id().unwrap_or_default();
        Ok(format!("{pointer}#{id}"))
    }

    /// The pending steps, current first.
    pub fn steps(&self) -> Vec<StepState> {
        self.dc
            .active_state()
            .and_then(|state| state.get(STEPS_KEY))
            .and_then(|steps| serde_json::from_value(steps.clone()).ok())
            .unwrap_or_default()
    }

    fn store_steps(&mut self, steps: Vec<StepState>) -> DialogResult<()> {
        let value = serde_json::to_value(steps)
            .map_err(|err| DialogError::invalid_state(err.to_string()))?;
        let pointer = self.dc.stack_pointer().to_owned();
        let state = self
            .dc
            .active_state_mut()
            .ok_or(DialogError::StaleContext(pointer))?;
        state[STEPS_KEY] = value;
        Ok(())
    }

    /// Queues a change list for the next continuation.
    pub fn queue_changes(&mut self, changes: StepChangeList) -> DialogResult<()> {
        let key = self.key()?;
        debug!(
            sequence = %key,
            change = ?changes.change_type,
            steps = changes.steps.len(),
            "Queued step changes"
        );
        self.dc
            .turn_mut()
            .state_or_default::<PendingChanges>()
            .0
            .entry(key)
            .or_default()
            .push(changes);
        Ok(())
    }

    /// Number of change lists waiting for this sequence.
    pub fn pending_changes(&self) -> usize {
        let Ok(key) = self.key() else {
            return 0;
        };
        self.dc
            .turn()
            .state_ref::<PendingChanges>()
            .and_then(|pending| pending.0.get(&key))
            .map_or(0, Vec::len)
    }

    /// Drops every change list waiting for this sequence.
    pub fn discard_changes(&mut self) {
        if let Ok(key) = self.key()
            && let Some(pending) = self.dc.turn_mut().state_mut::<PendingChanges>()
        {
            pending.0.remove(&key);
        }
    }

    /// Applies every queued change list in order. Returns `true` if any was
    /// applied.
    pub fn apply_changes(&mut self) -> DialogResult<bool> {
        let key = self.key()?;
        let queued = self
            .dc
            .turn_mut()
            .state_mut::<PendingChanges>()
            .and_then(|pending| pending.0.remove(&key))
            .unwrap_or_default();
        if queued.is_empty() {
            return Ok(false);
        }

        let mut steps = self.steps();
        for mut changes in queued {
            let assignments = std::mem::take(&mut changes.turn);
            let mut memory = self.dc.state();
            for (path, value) in assignments {
                memory.set_value(&path, value)?;
            }
            trace!(sequence = %key, change = ?changes.change_type, "Applying step changes");
            changes.apply_to(&mut steps);
        }
        debug!(sequence = %key, steps = steps.len(), "Applied step changes");
        self.store_steps(steps)?;
        Ok(true)
    }

    /// Pops the current step. When the sequence becomes empty with no changes
    /// pending, a local, non-bubbling `sequenceEnded` event is emitted and
    /// `true` returned.
    pub async fn end_current_step(&mut self) -> DialogResult<bool> {
        let mut steps = self.steps();
        if steps.is_empty() {
            return Ok(true);
        }
        let ended = steps.remove(0);
        trace!(step = %ended.dialog_id, remaining = steps.len(), "Ended step");
        let empty = steps.is_empty() && self.pending_changes() == 0;
        self.store_steps(steps)?;
        if empty {
            self.dc
                .emit_event(names::SEQUENCE_ENDED, Some(json!({})), false, false)
                .await?;
        }
        Ok(empty)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::{Activity, DialogSet, TurnContext};

    use super::*;

    fn ids(steps: &[StepState]) -> Vec<&str> {
        steps.iter().map(|s| s.dialog_id.as_str()).collect()
    }

    fn plan(names: &[&str]) -> Vec<StepState> {
        names.iter().map(|name| StepState::new(*name)).collect()
    }

    #[test]
    fn test_insert_and_append() {
        let mut steps = plan(&["a", "b"]);
        StepChangeList::new(ChangeType::InsertSteps, plan(&["x", "y"])).apply_to(&mut steps);
        assert_eq!(ids(&steps), ["x", "y", "a", "b"]);
        StepChangeList::new(ChangeType::AppendSteps, plan(&["z"])).apply_to(&mut steps);
        assert_eq!(ids(&steps), ["x", "y", "a", "b", "z"]);
    }

    #[test]
    fn test_insert_before_tags() {
        let mut steps = vec![
            StepState::new("a"),
            StepState::new("b").tagged("confirm"),
            StepState::new("c").tagged("confirm"),
        ];
        StepChangeList::new(ChangeType::InsertStepsBeforeTags, plan(&["x"]))
            .before_tags(vec!["confirm".into()])
            .apply_to(&mut steps);
        assert_eq!(ids(&steps), ["a", "x", "b", "c"]);

        StepChangeList::new(ChangeType::InsertStepsBeforeTags, plan(&["y"]))
            .before_tags(vec!["missing".into()])
            .apply_to(&mut steps);
        assert_eq!(ids(&steps), ["a", "x", "b", "c", "y"]);
    }

    #[test]
    fn test_end_and_replace() {
        let mut steps = plan(&["a", "b"]);
        StepChangeList::new(ChangeType::ReplaceSequence, plan(&["r"])).apply_to(&mut steps);
        assert_eq!(ids(&steps), ["r"]);
        StepChangeList::new(ChangeType::EndSequence, plan(&["ignored"])).apply_to(&mut steps);
        assert!(steps.is_empty());
    }

    #[test]
    fn test_sequential_application_is_order_preserving() {
        let lists = vec![
            StepChangeList::new(ChangeType::AppendSteps, plan(&["1"])),
            StepChangeList::new(ChangeType::InsertSteps, plan(&["2"])),
            StepChangeList::new(ChangeType::AppendSteps, plan(&["3"])),
        ];
        let mut steps = plan(&["a"]);
        for list in lists {
            list.apply_to(&mut steps);
        }
        assert_eq!(ids(&steps), ["2", "a", "1", "3"]);
    }

    #[test]
    fn test_step_state_serialization() {
        let value = serde_json::to_value(StepState::new("SendActivity#1").tagged("t")).unwrap();
        assert_eq!(
            value,
            json!({ "dialogId": "SendActivity#1", "tags": ["t"], "dialogStack": [] })
        );
        let back: StepState = serde_json::from_value(json!({ "dialogId": "x" })).unwrap();
        assert_eq!(back, StepState::new("x"));
    }

    #[tokio::test]
    async fn test_queued_changes_are_stored_in_frame() {
        let mut turn = TurnContext::new(Activity::message("hi"))
            .with_dialog_state(json!({ "stack": [{ "id": "root", "state": { "_steps": [] } }] }));
        let mut dc = DialogContext::new(&mut turn, Arc::new(DialogSet::new()));
        let mut sequence = SequenceContext::current(&mut dc).unwrap();

        sequence
            .queue_changes(StepChangeList::new(ChangeType::AppendSteps, plan(&["a", "b"])))
            .unwrap();
        assert_eq!(sequence.pending_changes(), 1);
        assert!(sequence.apply_changes().unwrap());
        assert_eq!(sequence.pending_changes(), 0);
        assert_eq!(ids(&sequence.steps()), ["a", "b"]);

        assert!(!sequence.end_current_step().await.unwrap());
        assert_eq!(ids(&sequence.steps()), ["b"]);
        assert!(!sequence.apply_changes().unwrap());
    }
}
