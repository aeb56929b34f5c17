//! Dialog tree of the to-do bot.
//!
//! ```text
//! root
//! ├── steps: ask-name (first visit only), greeting
//! └── rules
//!     ├── Add [item]    push item
//!     ├── Add           prompt for item, push it
//!     ├── Remove item   remove item, report
//!     ├── Show          list items
//!     ├── Clear         empty the list
//!     ├── Help          usage
//!     ├── Cancel        drop whatever is in progress
//!     └── unknownIntent fallback reply
//! ```

use parley::prelude::*;

const ITEM: &str = "turn.recognized.entities.item[0]";

const HELP: &str = "You can say:\n  \
    add <item>     put something on your list\n  \
    remove <item>  take it off again\n  \
    show           see your list\n  \
    clear          start over\n  \
    cancel         stop what we're doing";

fn recognizer() -> DialogResult<RegexRecognizer> {
    RegexRecognizer::new()
        .intent("Add", r"(?i)^add(?:\s+(?P<item>.+))?$")?
        .intent("Remove", r"(?i)^(?:remove|delete|done)\s+(?P<item>.+)$")?
        .intent("Show", r"(?i)^(?:show|list)(?:\s+.*)?$")?
        .intent("Clear", r"(?i)^clear(?:\s+.*)?$")?
        .intent("Help", r"(?i)^(?:help|\?)$")?
        .intent("Cancel", r"(?i)^(?:cancel|never\s*mind|stop)$")
}

fn ask_name() -> DialogResult<AdaptiveDialog> {
    AdaptiveDialog::builder("ask-name")
        .step(
            TextInput::new("Hi, I'm {settings.bot_name}. What should I call you?")
                .property("dialog.name"),
        )
        .step(EndDialog::new().value("dialog.name"))
        .build()
}

/// Builds the root dialog.
pub fn root() -> DialogResult<AdaptiveDialog> {
    let cancellable = "turn.recognized.intent == 'Cancel'";

    AdaptiveDialog::builder("todo")
        .recognizer(recognizer()?)
        .auto_end_dialog(false)
        .step(
            IfCondition::new("!exists(user.name)")
                .step(BeginDialog::dialog(ask_name()?).result_property("user.name")),
        )
        .step(SendActivity::new(
            "Hello {user.name}! Type 'help' to see what I can do.",
        ))
        .rule(
            Rule::on_intent("Add")
                .entity("item")
                .step(EditArray::push("user.todos", ITEM))
                .step(LogStep::new("Added {turn.recognized.entities.item[0]}"))
                .step(SendActivity::new(
                    "Added {turn.recognized.entities.item[0]}. That makes {count(user.todos)}.",
                )),
        )
        .rule(
            Rule::on_intent("Add")
                .step(
                    TextInput::new("What should I add?")
                        .property("dialog.item")
                        .allow_interruptions(cancellable),
                )
                .step(EditArray::push("user.todos", "dialog.item"))
                .step(SendActivity::new(
                    "Added {dialog.item}. That makes {count(user.todos)}.",
                ))
                .step(DeleteProperty::new("dialog.item")),
        )
        .rule(
            Rule::on_intent("Remove")
                .step(EditArray::remove("user.todos", ITEM).result_property("turn.removed"))
                .step(
                    IfCondition::new("turn.removed")
                        .step(SendActivity::new("Removed {turn.recognized.entities.item[0]}."))
                        .else_step(SendActivity::new(
                            "{turn.recognized.entities.item[0]} isn't on your list.",
                        )),
                ),
        )
        .rule(
            Rule::on_intent("Show").step(
                IfCondition::new("empty(user.todos)")
                    .step(SendActivity::new("Your list is empty."))
                    .else_step(SendActivity::new("Your list: {join(user.todos, ', ')}")),
            ),
        )
        .rule(
            Rule::on_intent("Clear")
                .step(EditArray::new(ArrayChange::Clear, "user.todos"))
                .step(SendActivity::new("Cleared your list.")),
        )
        .rule(Rule::on_intent("Help").step(SendActivity::new(HELP)))
        .rule(
            Rule::on_intent("Cancel")
                .step(SendActivity::new("Okay, never mind."))
                .step(EditSteps::new(ChangeType::EndSequence)),
        )
        .rule(Rule::on_unknown_intent().step(SendActivity::new(
            "Sorry, I didn't get that. Type 'help' for options.",
        )))
        .build()
}
