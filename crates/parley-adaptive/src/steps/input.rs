//! Prompting steps.
//!
//! An input binds one value to a property. It first looks for a value that is
//! already known, in order: the `value` expression, the bound property,
//! `dialog.value`. The first non-null candidate that converts wins and the
//! input completes without prompting. Otherwise it prompts and waits.
//!
//! ```text
//! begin ──known──▶ bind, end
//!   │
//!   └─▶ prompt ──▶ wait ──text──▶ recognized? ──yes──▶ bind, end
//!                    ▲                 │
//!                    └── re-prompt ◀───┴── no (until max_turn_count)
//! ```
//!
//! While waiting the input claims every inbound message in the pre-bubble
//! phase, so the hosting dialog's rules only see it when
//! `allow_interruptions` evaluates to true. The host recognizes the message
//! first, so the condition can test `turn.recognized`. An input continued
//! after other steps already ran this turn was interrupted; it re-prompts
//! instead of consuming the message.

use async_trait::async_trait;
use parley_core::event::names;
use parley_core::{
    Dialog, DialogContext, DialogEvent, DialogResult, DialogTurnResult, MemoryRead, ValueExt,
};
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::{evaluate_optional, render, step_id};

const TURN_COUNT_KEY: &str = "turnCount";

/// Converts user text, and values found in memory, into an input's value.
pub trait InputKind: Default + Send + Sync + 'static {
    /// Kind name used in step ids.
    const NAME: &'static str;

    /// Parses message text. `None` means the text is not acceptable.
    fn recognize(&self, text: &str) -> Option<Value>;

    /// Converts a value found in memory.
    fn coerce(&self, value: Value) -> Option<Value> {
        match value {
            Value::String(text) => self.recognize(&text),
            other => self.recognize(&other.to_display_string()),
        }
    }
}

/// Any non-blank text, trimmed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextKind;

impl InputKind for TextKind {
    const NAME: &'static str = "TextInput";

    fn recognize(&self, text: &str) -> Option<Value> {
        let text = text.trim();
        (!text.is_empty()).then(|| Value::String(text.to_owned()))
    }
}

/// A number. Integer mode truncates fractions and rejects values outside the
/// `i64` range.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberKind {
    integer: bool,
}

impl InputKind for NumberKind {
    const NAME: &'static str = "NumberInput";

    fn recognize(&self, text: &str) -> Option<Value> {
        let text = text.trim();
        if let Ok(n) = text.parse::<i64>() {
            return Some(json!(n));
        }
        let n = text.parse::<f64>().ok().filter(|n| n.is_finite())?;
        if self.integer {
            truncate(n).map(Value::from)
        } else {
            Some(json!(n))
        }
    }

    fn coerce(&self, value: Value) -> Option<Value> {
        match value {
            Value::Number(n) if self.integer => match n.as_i64() {
                Some(i) => Some(json!(i)),
                None => n.as_f64().and_then(truncate).map(Value::from),
            },
            Value::Number(n) => Some(Value::Number(n)),
            Value::String(text) => self.recognize(&text),
            _ => None,
        }
    }
}

fn truncate(n: f64) -> Option<i64> {
    let n = n.trunc();
    (n >= i64::MIN as f64 && n < i64::MAX as f64).then_some(n as i64)
}

/// Prompts for text.
pub type TextInput = Input<TextKind>;

/// Prompts for a number.
pub type NumberInput = Input<NumberKind>;

/// A step that prompts until it has a value for its property.
#[derive(Debug, Clone)]
pub struct Input<K: InputKind> {
    id: String,
    kind: K,
    prompt: String,
    invalid_prompt: Option<String>,
    property: Option<String>,
    value: Option<String>,
    always_prompt: bool,
    allow_interruptions: String,
    max_turn_count: Option<u32>,
    default_value: Option<Value>,
}

impl<K: InputKind> Input<K> {
    /// An input that sends `prompt` when it needs a value.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: step_id(K::NAME),
            kind: K::default(),
            prompt: prompt.into(),
            invalid_prompt: None,
            property: None,
            value: None,
            always_prompt: false,
            allow_interruptions: "false".to_owned(),
            max_turn_count: None,
            default_value: None,
        }
    }

    /// Binds the value to `property`.
    pub fn property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Expression consulted for an initial value.
    pub fn value(mut self, expression: impl Into<String>) -> Self {
        self.value = Some(expression.into());
        self
    }

    /// Prompt sent after unrecognized input.
    pub fn invalid_prompt(mut self, template: impl Into<String>) -> Self {
        self.invalid_prompt = Some(template.into());
        self
    }

    /// Prompts even when a value is already known.
    pub fn always_prompt(mut self, always: bool) -> Self {
        self.always_prompt = always;
        self
    }

    /// Condition under which the hosting dialog's rules see messages sent
    /// while the input waits.
    pub fn allow_interruptions(mut self, condition: impl Into<String>) -> Self {
        self.allow_interruptions = condition.into();
        self
    }

    /// Gives up after `turns` unrecognized messages.
    pub fn max_turn_count(mut self, turns: u32) -> Self {
        self.max_turn_count = Some(turns);
        self
    }

    /// Value bound when the input gives up.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    fn known_value(&self, dc: &DialogContext<'_>) -> Option<Value> {
        let memory = dc.memory();
        let candidates = [
            evaluate_optional(dc, &self.id, self.value.as_deref()),
            self.property.as_deref().and_then(|p| memory.get_value(p)),
            memory.get_value("dialog.value"),
        ];
        let found = candidates.into_iter().flatten().find(|v| !v.is_null())?;
        self.kind.coerce(found)
    }

    async fn bind(
        &self,
        dc: &mut DialogContext<'_>,
        value: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        if let (Some(property), Some(value)) = (&self.property, &value) {
            dc.state().set_value(property, value.clone())?;
        }
        debug!(step = %self.id, property = ?self.property, "Input bound");
        dc.end_dialog(value).await
    }

    fn send_prompt(&self, dc: &mut DialogContext<'_>, invalid: bool) -> DialogResult<()> {
        let template = match (&self.invalid_prompt, invalid) {
            (Some(invalid), true) => invalid,
            _ => &self.prompt,
        };
        let text = render(dc, template)?;
        dc.turn_mut().send_text(text);
        Ok(())
    }

    fn bump_turn_count(&self, dc: &mut DialogContext<'_>) -> u32 {
        let Some(state) = dc.active_state_mut() else {
            return 0;
        };
        let count = state
            .get(TURN_COUNT_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
            + 1;
        state[TURN_COUNT_KEY] = json!(count);
        count
    }
}

#[async_trait]
impl<K: InputKind> Dialog for Input<K> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        if !self.always_prompt
            && let Some(value) = self.known_value(dc)
        {
            trace!(step = %self.id, "Input already satisfied");
            return self.bind(dc, Some(value)).await;
        }
        self.send_prompt(dc, false)?;
        Ok(DialogTurnResult::end_of_turn())
    }

    async fn continue_dialog(&self, dc: &mut DialogContext<'_>) -> DialogResult<DialogTurnResult> {
        if !dc.turn().activity().is_message() {
            return Ok(DialogTurnResult::end_of_turn());
        }
        if dc.turn().interrupted() || dc.turn().step_count() > 0 {
            trace!(step = %self.id, "Input interrupted; re-prompting");
            self.send_prompt(dc, false)?;
            return Ok(DialogTurnResult::end_of_turn());
        }

        let turns = self.bump_turn_count(dc);
        let text = dc.turn().activity().text().to_owned();
        if let Some(value) = self.kind.recognize(&text) {
            dc.turn_mut().mark_activity_processed();
            return self.bind(dc, Some(value)).await;
        }
        if self.max_turn_count.is_some_and(|max| turns >= max) {
            debug!(step = %self.id, turns, "Input gave up");
            return self.bind(dc, self.default_value.clone()).await;
        }
        self.send_prompt(dc, true)?;
        Ok(DialogTurnResult::end_of_turn())
    }

    async fn reprompt_dialog(&self, dc: &mut DialogContext<'_>) -> DialogResult<()> {
        self.send_prompt(dc, false)
    }

    async fn on_pre_bubble_event(
        &self,
        dc: &mut DialogContext<'_>,
        event: &DialogEvent,
    ) -> DialogResult<bool> {
        if !event.is(names::ACTIVITY_RECEIVED) || !dc.turn().activity().is_message() {
            return Ok(false);
        }
        if self.allow_interruptions != "false"
            && let Some(mut host) = dc.parent()
        {
            host.emit_event(names::RECOGNIZE_UTTERANCE, None, false, false)
                .await?;
        }
        let allowed = dc
            .evaluate(&self.allow_interruptions)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        Ok(!allowed)
    }
}

impl Input<NumberKind> {
    /// Truncates recognized numbers to integers.
    pub fn integer(mut self) -> Self {
        self.kind.integer = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::AdaptiveDialog;
    use crate::steps::SendActivity;
    use crate::testing::Harness;

    #[test]
    fn test_text_kind() {
        assert_eq!(TextKind.recognize("  Carlos "), Some(json!("Carlos")));
        assert_eq!(TextKind.recognize("   "), None);
        assert_eq!(TextKind.coerce(json!(42)), Some(json!("42")));
    }

    #[test]
    fn test_number_kind() {
        let float = NumberKind::default();
        assert_eq!(float.recognize("42"), Some(json!(42)));
        assert_eq!(float.recognize(" 2.5 "), Some(json!(2.5)));
        assert_eq!(float.recognize("two"), None);
        assert_eq!(float.recognize("NaN"), None);

        let integer = NumberKind { integer: true };
        assert_eq!(integer.recognize("2.9"), Some(json!(2)));
        assert_eq!(integer.coerce(json!(-3.7)), Some(json!(-3)));
        assert_eq!(integer.coerce(json!("7")), Some(json!(7)));
        assert_eq!(integer.coerce(json!(true)), None);
        assert_eq!(integer.recognize("1e30"), None);
        assert_eq!(integer.recognize("-1e19"), None);
        assert_eq!(integer.coerce(json!(u64::MAX)), None);
        assert_eq!(float.recognize("1e30"), Some(json!(1e30)));
    }

    #[test]
    fn test_ids_follow_kind() {
        assert!(TextInput::new("?").id().starts_with("TextInput#"));
        assert!(NumberInput::new("?").integer().id().starts_with("NumberInput#"));
    }

    fn age_dialog() -> AdaptiveDialog {
        AdaptiveDialog::builder("root")
            .step(
                NumberInput::new("Age?")
                    .property("user.age")
                    .integer()
                    .invalid_prompt("A number, please.")
                    .max_turn_count(2)
                    .default_value(json!(0)),
            )
            .step(SendActivity::new("Age {user.age}"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_number_input_recognizes() {
        let mut harness = Harness::new(age_dialog());
        assert_eq!(harness.send("hi").await, ["Age?"]);
        assert_eq!(harness.send("42.9").await, ["Age 42"]);
        assert_eq!(harness.user()["age"], json!(42));
    }

    #[tokio::test]
    async fn test_integer_input_rejects_out_of_range() {
        let mut harness = Harness::new(age_dialog());
        harness.send("hi").await;
        assert_eq!(harness.send("1e30").await, ["A number, please."]);
        assert!(harness.user().get("age").is_none());
        assert_eq!(harness.send("31").await, ["Age 31"]);
    }

    #[tokio::test]
    async fn test_number_input_gives_up() {
        let mut harness = Harness::new(age_dialog());
        harness.send("hi").await;
        assert_eq!(harness.send("abc").await, ["A number, please."]);
        assert_eq!(harness.send("xyz").await, ["Age 0"]);
    }

    #[tokio::test]
    async fn test_value_expression_skips_prompt() {
        let root = AdaptiveDialog::builder("root")
            .step(TextInput::new("City?").property("user.city").value("'Lisbon'"))
            .step(SendActivity::new("{user.city}"))
            .build()
            .unwrap();
        let mut harness = Harness::new(root);
        assert_eq!(harness.send("hi").await, ["Lisbon"]);
    }

    #[tokio::test]
    async fn test_always_prompt() {
        let root = AdaptiveDialog::builder("root")
            .step(TextInput::new("City?").property("user.city").value("'Lisbon'").always_prompt(true))
            .build()
            .unwrap();
        let mut harness = Harness::new(root);
        assert_eq!(harness.send("hi").await, ["City?"]);
        harness.send("Porto").await;
        assert_eq!(harness.user()["city"], json!("Porto"));
    }
}
