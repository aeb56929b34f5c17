//! Language generation.
//!
//! Steps that produce text go through a [`LanguageGenerator`]. An adaptive
//! dialog configured with a generator installs it as the turn's
//! [`ActiveGenerator`] before running its steps, so every step below it,
//! including steps of nested dialogs without a generator of their own, renders
//! through it. Without one the [`TemplateGenerator`] is used.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use parley_core::{DialogError, DialogResult, ExpressionEvaluator, MemoryRead, TurnContext, ValueExt};
use tracing::debug;

/// Renders templates against memory.
pub trait LanguageGenerator: Send + Sync {
    /// Renders `template`.
    fn generate(
        &self,
        template: &str,
        memory: &dyn MemoryRead,
        evaluator: &dyn ExpressionEvaluator,
    ) -> DialogResult<String>;
}

/// The generator installed for the current turn.
#[derive(Clone)]
pub struct ActiveGenerator(pub Arc<dyn LanguageGenerator>);

/// The generator steps should use this turn.
pub fn generator_for(turn: &TurnContext) -> Arc<dyn LanguageGenerator> {
    match turn.state_ref::<ActiveGenerator>() {
        Some(active) => active.0.clone(),
        None => Arc::new(TemplateGenerator::new()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expression(String),
}

fn parse_template(template: &str) -> DialogResult<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                text.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                text.push('}');
            }
            '{' => {
                let mut expression = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => expression.push(c),
                        None => {
                            return Err(DialogError::invalid_configuration(format!(
                                "unclosed '{{' in template '{template}'"
                            )));
                        }
                    }
                }
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Expression(expression.trim().to_owned()));
            }
            '}' => {
                return Err(DialogError::invalid_configuration(format!(
                    "unmatched '}}' in template '{template}'"
                )));
            }
            c => text.push(c),
        }
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

/// Replaces `{expression}` with the evaluated value.
///
/// Absent values and evaluation failures render as the empty string. `{{` and
/// `}}` produce literal braces.
#[derive(Debug, Default)]
pub struct TemplateGenerator {
    cache: RwLock<HashMap<String, Arc<Vec<Segment>>>>,
}

impl TemplateGenerator {
    /// Creates a generator.
    pub fn new() -> Self {
        Self::default()
    }

    fn segments(&self, template: &str) -> DialogResult<Arc<Vec<Segment>>> {
        if let Some(segments) = self.cache.read().get(template) {
            return Ok(segments.clone());
        }
        let segments = Arc::new(parse_template(template)?);
        self.cache
            .write()
            .insert(template.to_owned(), segments.clone());
        Ok(segments)
    }
}

impl LanguageGenerator for TemplateGenerator {
    fn generate(
        &self,
        template: &str,
        memory: &dyn MemoryRead,
        evaluator: &dyn ExpressionEvaluator,
    ) -> DialogResult<String> {
        let mut out = String::with_capacity(template.len());
        for segment in self.segments(template)?.iter() {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expression(expression) => match evaluator.evaluate(expression, memory) {
                    Ok(value) => out.push_str(&value.to_display_string()),
                    Err(err) => {
                        debug!(expression = %expression, error = %err, "Template expression failed");
                    }
                },
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{Activity, DefaultEvaluator};
    use serde_json::json;

    fn render(template: &str) -> DialogResult<String> {
        let memory = json!({ "user": { "name": "Carlos", "todos": ["a", "b"] } });
        TemplateGenerator::new().generate(template, &memory, &DefaultEvaluator::new())
    }

    #[test]
    fn test_expressions_are_substituted() {
        assert_eq!(
            render("Hello {user.name}, nice to meet you!").unwrap(),
            "Hello Carlos, nice to meet you!"
        );
        assert_eq!(
            render("You have {count(user.todos)} items: {join(user.todos, ', ')}").unwrap(),
            "You have 2 items: a, b"
        );
    }

    #[test]
    fn test_absent_and_failing_render_empty() {
        assert_eq!(render("[{user.missing}]").unwrap(), "[]");
        assert_eq!(render("[{nope()}]").unwrap(), "[]");
    }

    #[test]
    fn test_brace_escapes() {
        assert_eq!(render("{{user.name}} is {user.name}").unwrap(), "{user.name} is Carlos");
        assert!(render("broken {user.name").is_err());
        assert!(render("broken }").is_err());
    }

    #[test]
    fn test_active_generator_overrides_default() {
        struct Shout;

        impl LanguageGenerator for Shout {
            fn generate(
                &self,
                template: &str,
                _: &dyn MemoryRead,
                _: &dyn ExpressionEvaluator,
            ) -> DialogResult<String> {
                Ok(template.to_uppercase())
            }
        }

        let mut turn = TurnContext::new(Activity::message("x"));
        let evaluator = DefaultEvaluator::new();
        let memory = json!({});
        assert_eq!(generator_for(&turn).generate("hi", &memory, &evaluator).unwrap(), "hi");
        turn.set_state(ActiveGenerator(Arc::new(Shout)));
        assert_eq!(generator_for(&turn).generate("hi", &memory, &evaluator).unwrap(), "HI");
    }
}
