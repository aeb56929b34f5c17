//! Built-in steps.
//!
//! Steps are ordinary [`Dialog`]s. They run on the dialog stack of the current
//! entry of an adaptive dialog's sequence, so a step can start child dialogs
//! the same way any dialog does. Expressions configured on steps are
//! evaluated against the memory of the step's context, where `dialog` is the
//! state of the hosting adaptive dialog.
//!
//! | Step               | Effect                                                   |
//! |--------------------|----------------------------------------------------------|
//! | [`SendActivity`]   | renders a template and sends it                          |
//! | [`LogStep`]        | renders a template into the trace log                    |
//! | [`TextInput`]      | prompts for text and binds it to a property              |
//! | [`NumberInput`]    | prompts for a number and binds it to a property          |
//! | [`SetProperty`]    | writes an evaluated value                                |
//! | [`DeleteProperty`] | removes a property                                       |
//! | [`EditArray`]      | push / pop / take / remove / clear on an array property  |
//! | [`BeginDialog`]    | starts another dialog and binds its result               |
//! | [`EndDialog`]      | ends the hosting adaptive dialog                         |
//! | [`CancelAllDialogs`] | cancels every dialog of the conversation               |
//! | [`EndTurn`]        | waits for the next activity                              |
//! | [`EmitEvent`]      | emits a custom event                                     |
//! | [`IfCondition`]    | queues one of two branches                               |
//! | [`EditSteps`]      | edits the hosting sequence                               |
//!
//! Step ids are generated as `"{Kind}#{n}"` from a process-wide counter, so a
//! program that builds its dialogs in the same order gets the same ids on
//! every start. Persisted sequences refer to steps by these ids.
//!
//! [`Dialog`]: parley_core::Dialog

mod flow;
mod input;
mod property;
mod send;

use std::sync::atomic::{AtomicUsize, Ordering};

use parley_core::{DialogContext, DialogResult};
use serde_json::Value;
use tracing::debug;

use crate::generator::generator_for;

pub use flow::{
    BeginDialog, CancelAllDialogs, EditSteps, EmitEvent, EndDialog, EndTurn, IfCondition,
};
pub use input::{Input, InputKind, NumberInput, NumberKind, TextInput, TextKind};
pub use property::{ArrayChange, DeleteProperty, EditArray, SetProperty};
pub use send::{LogStep, SendActivity};

static NEXT_STEP: AtomicUsize = AtomicUsize::new(1);

/// Generates a step id for `kind`.
pub(crate) fn step_id(kind: &str) -> String {
    format!("{kind}#{}", NEXT_STEP.fetch_add(1, Ordering::Relaxed))
}

/// Evaluates an optional expression, treating failures as no value.
pub(crate) fn evaluate_optional(
    dc: &DialogContext<'_>,
    step: &str,
    expression: Option<&str>,
) -> Option<Value> {
    let expression = expression?;
    match dc.evaluate(expression) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(err) => {
            debug!(step, expression, error = %err, "Expression produced no value");
            None
        }
    }
}

/// Renders a template with the turn's generator.
pub(crate) fn render(dc: &DialogContext<'_>, template: &str) -> DialogResult<String> {
    let generator = generator_for(dc.turn());
    let evaluator = dc.turn().evaluator().clone();
    generator.generate(template, &dc.memory(), evaluator.as_ref())
}
