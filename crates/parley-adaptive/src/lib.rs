//! # Parley Adaptive
//!
//! Rule-driven dialogs for the Parley dialog engine.
//!
//! An [`AdaptiveDialog`] reacts to events instead of following a fixed script:
//!
//! - **Rules** pair a trigger with steps ([`Rule`], [`Trigger`])
//! - **Selectors** pick the rule that fires ([`TriggerSelector`],
//!   [`MostSpecificSelector`])
//! - **Sequences** hold the steps still to run and the edits queued against
//!   them ([`SequenceContext`], [`StepChangeList`])
//! - **Recognizers** turn messages into intents ([`Recognizer`],
//!   [`RegexRecognizer`])
//! - **Generators** render reply templates ([`LanguageGenerator`],
//!   [`TemplateGenerator`])
//! - **Steps** are the built-in building blocks ([`steps`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use parley_adaptive::prelude::*;
//!
//! let root = AdaptiveDialog::builder("root")
//!     .recognizer(RegexRecognizer::new().intent("Greeting", r"(?i)^(hi|hello)")?)
//!     .rule(Rule::on_intent("Greeting").step(SendActivity::new("Hello!")))
//!     .rule(Rule::on_unknown_intent().step(SendActivity::new("Sorry, I did not get that.")))
//!     .build()?;
//! ```

pub mod adaptive;
pub mod generator;
pub mod recognizer;
pub mod rule;
pub mod selector;
pub mod sequence;
pub mod steps;

#[cfg(test)]
pub(crate) mod testing;

pub use adaptive::{AdaptiveDialog, AdaptiveDialogBuilder, DEFAULT_RESULT_PROPERTY};
pub use generator::{ActiveGenerator, LanguageGenerator, TemplateGenerator};
pub use recognizer::{NONE_INTENT, Recognizer, RecognizerResult, RegexRecognizer};
pub use rule::{Rule, Trigger};
pub use selector::{FirstSelector, MostSpecificSelector, TriggerSelector, TrueSelector};
pub use sequence::{ChangeType, STEPS_KEY, SequenceContext, StepChangeList, StepState};

/// Prelude for building adaptive dialogs.
pub mod prelude {
    pub use super::steps::{
        ArrayChange, BeginDialog, CancelAllDialogs, DeleteProperty, EditArray, EditSteps,
        EmitEvent, EndDialog, EndTurn, IfCondition, LogStep, NumberInput, SendActivity,
        SetProperty, TextInput,
    };
    pub use super::{
        AdaptiveDialog, ChangeType, LanguageGenerator, Recognizer, RecognizerResult,
        RegexRecognizer, Rule, TemplateGenerator, Trigger, TriggerSelector,
    };
    pub use parley_core::prelude::*;
}
