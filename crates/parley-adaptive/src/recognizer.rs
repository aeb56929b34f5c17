//! Recognizers turn an inbound message into intents and entities.
//!
//! The engine always narrows a [`RecognizerResult`] to its top intent before
//! routing it as a `recognizedIntent` event; the narrowed form is what rules
//! and steps see at `turn.recognized`:
//!
//! ```text
//! { "text": "add milk", "intent": "AddItem", "score": 1.0,
//!   "intents": { "AddItem": 1.0 }, "entities": { "item": ["milk"] } }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use parley_core::{DialogError, DialogResult, TurnContext};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::trace;

/// Intent reported when nothing matched.
pub const NONE_INTENT: &str = "None";

/// Output of a recognizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognizerResult {
    /// The recognized text.
    pub text: String,
    /// Intent scores.
    pub intents: BTreeMap<String, f64>,
    /// Entities by name; each value is an array of occurrences.
    pub entities: Map<String, Value>,
}

impl RecognizerResult {
    /// A result with no intents.
    pub fn none(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// The highest scoring intent. Ties go to the first name in sort order.
    pub fn top_intent(&self) -> Option<(&str, f64)> {
        self.intents
            .iter()
            .fold(None, |best: Option<(&str, f64)>, (name, &score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((name.as_str(), score)),
            })
    }

    /// The narrowed memory form stored at `turn.recognized`.
    pub fn to_value(&self) -> Value {
        let (intent, score) = self.top_intent().unwrap_or((NONE_INTENT, 0.0));
        json!({
            "text": self.text,
            "intent": intent,
            "score": score,
            "intents": { intent: score },
            "entities": self.entities,
        })
    }
}

/// Produces intents and entities for a turn.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognizes the turn's inbound activity.
    async fn recognize(&self, turn: &TurnContext) -> DialogResult<RecognizerResult>;
}

/// Matches the message text against an ordered list of patterns.
///
/// The first matching pattern wins with a score of `1.0`; its named capture
/// groups become entities.
///
/// ```rust,ignore
/// let recognizer = RegexRecognizer::new()
///     .intent("AddItem", r"(?i)^add (?P<item>.+)$")?
///     .intent("Help", r"(?i)\bhelp\b")?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RegexRecognizer {
    patterns: Vec<(String, Regex)>,
}

impl RegexRecognizer {
    /// Creates an empty recognizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an intent pattern.
    pub fn intent(mut self, intent: impl Into<String>, pattern: &str) -> DialogResult<Self> {
        let regex = Regex::new(pattern).map_err(|err| {
            DialogError::invalid_configuration(format!("invalid pattern '{pattern}': {err}"))
        })?;
        self.patterns.push((intent.into(), regex));
        Ok(self)
    }

    /// Recognizes `text` without a turn.
    pub fn recognize_text(&self, text: &str) -> RecognizerResult {
        let mut result = RecognizerResult::none(text);
        let Some((intent, captures, regex)) = self
            .patterns
            .iter()
            .find_map(|(intent, regex)| regex.captures(text).map(|c| (intent, c, regex)))
        else {
            trace!(text, "No pattern matched");
            return result;
        };
        result.intents.insert(intent.clone(), 1.0);
        for name in regex.capture_names().flatten() {
            if let Some(found) = captures.name(name) {
                result
                    .entities
                    .insert(name.to_owned(), json!([found.as_str().trim()]));
            }
        }
        trace!(text, intent = %intent, "Pattern matched");
        result
    }
}

#[async_trait]
impl Recognizer for RegexRecognizer {
    async fn recognize(&self, turn: &TurnContext) -> DialogResult<RecognizerResult> {
        Ok(self.recognize_text(turn.activity().text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Activity;

    fn todo_recognizer() -> RegexRecognizer {
        RegexRecognizer::new()
            .intent("AddItem", r"(?i)^add (?P<item>.+)$")
            .unwrap()
            .intent("Help", r"(?i)\bhelp\b")
            .unwrap()
            .intent("Greeting", r"(?i)^(hi|hello)\b")
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_pattern_wins_with_entities() {
        let turn = TurnContext::new(Activity::message("Add  milk "));
        let result = todo_recognizer().recognize(&turn).await.unwrap();
        assert_eq!(result.top_intent(), Some(("AddItem", 1.0)));
        assert_eq!(result.entities["item"], json!(["milk"]));
        assert_eq!(result.intents.len(), 1);
    }

    #[test]
    fn test_no_match_narrows_to_none() {
        let result = todo_recognizer().recognize_text("what?");
        assert_eq!(result.top_intent(), None);
        assert_eq!(
            result.to_value(),
            json!({
                "text": "what?",
                "intent": "None",
                "score": 0.0,
                "intents": { "None": 0.0 },
                "entities": {}
            })
        );
    }

    #[test]
    fn test_top_intent_prefers_highest_score() {
        let mut result = RecognizerResult::none("x");
        result.intents.insert("A".into(), 0.4);
        result.intents.insert("B".into(), 0.9);
        result.intents.insert("C".into(), 0.9);
        assert_eq!(result.top_intent(), Some(("B", 0.9)));
        assert_eq!(result.to_value()["intents"], json!({ "B": 0.9 }));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = RegexRecognizer::new().intent("Bad", "(").unwrap_err();
        assert!(matches!(err, DialogError::InvalidConfiguration(_)));
    }
}
