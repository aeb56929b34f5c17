//! Rules: a trigger plus the steps to run when it fires.
//!
//! Every trigger compiles to one boolean [`Expression`] over
//! `turn.dialogEvent`, conjoined with the rule's optional constraint. The
//! selector only ever sees those expressions.
//!
//! # Example
//!
//! ```rust,ignore
//! let add = Rule::on_intent("AddItem")
//!     .entity("item")
//!     .constraint("count(user.todos) < 10")
//!     .step(EditArray::push("user.todos", "turn.recognized.entities.item[0]"))
//!     .step(SendActivity::new("Added {turn.recognized.entities.item[0]}"));
//! ```

use std::sync::Arc;

use parley_core::event::names;
use parley_core::expression::Expression;
use parley_core::turn::paths;
use parley_core::{Dialog, DialogEvent, ExpressionResult};

use crate::sequence::{ChangeType, StepChangeList, StepState};

const EVENT_NAME: &str = "turn.dialogEvent.name";
const EVENT_VALUE: &str = "turn.dialogEvent.value";

/// What makes a rule a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Any of the named events.
    Event(Vec<String>),
    /// A `recognizedIntent` event for `intent`, carrying every listed entity.
    Intent {
        /// Intent name.
        intent: String,
        /// Entities that must be present.
        entities: Vec<String>,
    },
    /// The `unknownIntent` fallback.
    UnknownIntent,
    /// A bare condition evaluated for whatever event is being routed.
    Condition(String),
}

impl Trigger {
    fn expression(&self) -> ExpressionResult<Expression> {
        let event_is = |name: &str| Expression::path(EVENT_NAME).equals(Expression::literal(name));
        Ok(match self {
            Self::Event(names) => Expression::any(names.iter().map(|name| event_is(name))),
            Self::Intent { intent, entities } => Expression::all(
                [
                    event_is(names::RECOGNIZED_INTENT),
                    Expression::path(format!("{EVENT_VALUE}.intent"))
                        .equals(Expression::literal(intent.as_str())),
                ]
                .into_iter()
                .chain(entities.iter().map(|entity| {
                    Expression::call(
                        "exists",
                        vec![Expression::path(format!("{EVENT_VALUE}.entities.{entity}"))],
                    )
                })),
            ),
            Self::UnknownIntent => event_is(names::UNKNOWN_INTENT),
            Self::Condition(text) => Expression::parse(text)?,
        })
    }
}

/// A trigger, an optional constraint and the steps queued when it fires.
#[derive(Clone)]
pub struct Rule {
    trigger: Trigger,
    constraint: Option<String>,
    steps: Vec<Arc<dyn Dialog>>,
    change_type: ChangeType,
    tag: Option<String>,
    before_tags: Vec<String>,
}

impl Rule {
    /// A rule for `trigger` with no steps.
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            constraint: None,
            steps: Vec::new(),
            change_type: ChangeType::InsertSteps,
            tag: None,
            before_tags: Vec::new(),
        }
    }

    /// Fires on any of the named events.
    pub fn on_event<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Trigger::Event(names.into_iter().map(Into::into).collect()))
    }

    /// Fires when `intent` is recognized.
    pub fn on_intent(intent: impl Into<String>) -> Self {
        Self::new(Trigger::Intent {
            intent: intent.into(),
            entities: Vec::new(),
        })
    }

    /// Fires when nothing else handled a message and no steps are pending.
    pub fn on_unknown_intent() -> Self {
        Self::new(Trigger::UnknownIntent)
    }

    /// Fires whenever `condition` holds.
    pub fn on_condition(condition: impl Into<String>) -> Self {
        Self::new(Trigger::Condition(condition.into()))
    }

    /// Requires an entity for intent triggers. Ignored by other triggers.
    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        if let Trigger::Intent { entities, .. } = &mut self.trigger {
            entities.push(entity.into());
        }
        self
    }

    /// Adds a condition that must also hold.
    pub fn constraint(mut self, condition: impl Into<String>) -> Self {
        self.constraint = Some(condition.into());
        self
    }

    /// Appends a step.
    pub fn step(mut self, step: impl Dialog) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Appends an already shared step.
    pub fn step_arc(mut self, step: Arc<dyn Dialog>) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends several steps.
    pub fn steps(mut self, steps: impl IntoIterator<Item = Arc<dyn Dialog>>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// How the steps are merged into the sequence. Defaults to
    /// [`ChangeType::InsertSteps`].
    pub fn change_type(mut self, change_type: ChangeType) -> Self {
        self.change_type = change_type;
        self
    }

    /// Tags every queued step.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Tag filter for [`ChangeType::InsertStepsBeforeTags`].
    pub fn before_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.before_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// The trigger.
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// The rule's steps.
    pub fn step_dialogs(&self) -> &[Arc<dyn Dialog>] {
        &self.steps
    }

    /// The full condition: trigger and constraint.
    pub fn condition(&self) -> ExpressionResult<Expression> {
        let trigger = self.trigger.expression()?;
        Ok(match &self.constraint {
            Some(constraint) => trigger.and(Expression::parse(constraint)?),
            None => trigger,
        })
    }

    /// The change list queued when the rule fires for `event`.
    ///
    /// Intent rules carry the recognized result so that `turn.recognized`
    /// reflects the intent that fired when the steps run.
    pub fn changes(&self, event: &DialogEvent) -> StepChangeList {
        let steps = self
            .steps
            .iter()
            .map(|step| {
                let state = StepState::new(step.id());
                match &self.tag {
                    Some(tag) => state.tagged(tag.as_str()),
                    None => state,
                }
            })
            .collect();
        let changes =
            StepChangeList::new(self.change_type, steps).before_tags(self.before_tags.clone());
        match (&self.trigger, &event.value) {
            (Trigger::Intent { .. }, Some(recognized)) => {
                changes.assign(paths::RECOGNIZED, recognized.clone())
            }
            _ => changes,
        }
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("trigger", &self.trigger)
            .field("constraint", &self.constraint)
            .field("steps", &self.steps.iter().map(|s| s.id()).collect::<Vec<_>>())
            .field("change_type", &self.change_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::SendActivity;
    use serde_json::json;

    fn matches(rule: &Rule, memory: serde_json::Value) -> bool {
        rule.condition().unwrap().evaluate(&memory).unwrap() == json!(true)
    }

    #[test]
    fn test_intent_condition() {
        let rule = Rule::on_intent("Add").entity("item");
        assert_eq!(
            rule.condition().unwrap().to_string(),
            "((turn.dialogEvent.name == 'recognizedIntent') && \
             (turn.dialogEvent.value.intent == 'Add')) && \
             exists(turn.dialogEvent.value.entities.item)"
        );
        let event = |entities| {
            json!({ "turn": { "dialogEvent": {
                "name": "recognizedIntent",
                "value": { "intent": "Add", "entities": entities }
            } } })
        };
        assert!(matches(&rule, event(json!({ "item": ["milk"] }))));
        assert!(!matches(&rule, event(json!({}))));
    }

    #[test]
    fn test_event_and_constraint() {
        let rule = Rule::on_event(["a", "b"]).constraint("user.ready");
        let memory = |name, ready| {
            json!({ "turn": { "dialogEvent": { "name": name } }, "user": { "ready": ready } })
        };
        assert!(matches(&rule, memory("b", true)));
        assert!(!matches(&rule, memory("b", false)));
        assert!(!matches(&rule, memory("c", true)));
    }

    #[test]
    fn test_invalid_condition_is_reported() {
        assert!(Rule::on_condition("user.a ==").condition().is_err());
        assert!(Rule::on_unknown_intent().constraint("((").condition().is_err());
    }

    #[test]
    fn test_changes_carry_tags_and_recognized() {
        let rule = Rule::on_intent("Help")
            .step(SendActivity::new("help"))
            .change_type(ChangeType::InsertStepsBeforeTags)
            .tag("help")
            .before_tags(["confirm"]);
        let recognized = json!({ "intent": "Help", "score": 1.0 });
        let event = DialogEvent::new(names::RECOGNIZED_INTENT, Some(recognized.clone()), false);
        let changes = rule.changes(&event);
        assert_eq!(changes.change_type, ChangeType::InsertStepsBeforeTags);
        assert_eq!(changes.tags, ["confirm"]);
        assert_eq!(changes.steps.len(), 1);
        assert_eq!(changes.steps[0].tags, ["help"]);
        assert_eq!(changes.turn.get(paths::RECOGNIZED), Some(&recognized));
    }
}
