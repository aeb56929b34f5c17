//! End-to-end conversations through `DialogManager`.

use std::sync::Arc;

use parley_adaptive::prelude::*;
use parley_core::MemoryStorage;
use parley_runtime::{DialogManager, RuntimeError, TestAdapter};

fn adapter(root: AdaptiveDialog) -> TestAdapter {
    TestAdapter::new(DialogManager::builder(root).build().unwrap())
}

#[tokio::test]
async fn test_hello_planning() {
    let root = AdaptiveDialog::builder("planning")
        .rule(Rule::on_unknown_intent().step(SendActivity::new("Hello Planning!")))
        .build()
        .unwrap();

    adapter(root)
        .script()
        .send("hi")
        .expect("Hello Planning!")
        .expect_none()
        .send("anything")
        .expect("Hello Planning!")
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_name_prompt_persists_user_state() {
    let root = AdaptiveDialog::builder("root")
        .step(TextInput::new("What is your name?").property("user.name"))
        .step(SendActivity::new("Hello {user.name}, nice to meet you!"))
        .build()
        .unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let manager = DialogManager::builder(root)
        .storage(storage.clone())
        .build()
        .unwrap();

    TestAdapter::new(manager.clone())
        .script()
        .send("hi")
        .expect("What is your name?")
        .send("Carlos")
        .expect("Hello Carlos, nice to meet you!")
        .run()
        .await
        .unwrap();

    // Same user, new conversation: the name is already known.
    TestAdapter::new(manager)
        .conversation("later")
        .script()
        .send("hi")
        .expect("Hello Carlos, nice to meet you!")
        .run()
        .await
        .unwrap();

    let user = storage.load("test/users/user").await.unwrap().unwrap();
    assert_eq!(user, json!({ "name": "Carlos" }));
}

#[tokio::test]
async fn test_nested_dialog_by_id() {
    let ask_name = AdaptiveDialog::builder("ask-name")
        .step(TextInput::new("Name?").property("dialog.name"))
        .step(EndDialog::new().value("dialog.name"))
        .build()
        .unwrap();
    let root = AdaptiveDialog::builder("root")
        .step(BeginDialog::target_id("ask-name").result_property("user.name"))
        .step(SendActivity::new("Welcome, {user.name}."))
        .build()
        .unwrap();
    let manager = DialogManager::builder(root)
        .dialog(ask_name)
        .build()
        .unwrap();

    TestAdapter::new(manager)
        .script()
        .send("hello")
        .expect("Name?")
        .expect_none()
        .send("Ann")
        .expect("Welcome, Ann.")
        .expect_none()
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unregistered_target_fails_turn() {
    let root = AdaptiveDialog::builder("root")
        .step(BeginDialog::target_id("missing"))
        .build()
        .unwrap();
    let adapter = adapter(root);

    let err = adapter.send("hi").await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Dialog(DialogError::DialogNotFound(ref id)) if id == "missing"
    ));
}

fn todo_bot() -> AdaptiveDialog {
    let item = "turn.recognized.entities.item[0]";
    AdaptiveDialog::builder("todo")
        .recognizer(
            RegexRecognizer::new()
                .intent("Add", r"(?i)^add(?: (?P<item>.+))?$")
                .unwrap()
                .intent("Remove", r"(?i)^remove (?P<item>.+)$")
                .unwrap()
                .intent("Show", r"(?i)^show$")
                .unwrap()
                .intent("Clear", r"(?i)^clear$")
                .unwrap(),
        )
        .rule(
            Rule::on_intent("Add")
                .entity("item")
                .step(EditArray::push("user.todos", item))
                .step(SendActivity::new("Added {turn.recognized.entities.item[0]}")),
        )
        .rule(
            Rule::on_intent("Add")
                .step(TextInput::new("What should I add?").property("dialog.item"))
                .step(EditArray::push("user.todos", "dialog.item"))
                .step(SendActivity::new("Added {dialog.item}")),
        )
        .rule(
            Rule::on_intent("Remove")
                .step(EditArray::remove("user.todos", item).result_property("dialog.removed"))
                .step(
                    IfCondition::new("dialog.removed")
                        .step(SendActivity::new("Removed {turn.recognized.entities.item[0]}"))
                        .else_step(SendActivity::new("Not on the list")),
                ),
        )
        .rule(Rule::on_intent("Show").step(SendActivity::new("Todos: {join(user.todos, ', ')}")))
        .rule(
            Rule::on_intent("Clear")
                .step(EditArray::new(ArrayChange::Clear, "user.todos"))
                .step(SendActivity::new("Cleared")),
        )
        .rule(Rule::on_unknown_intent().step(SendActivity::new("Try add, remove, show or clear.")))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_todo_list() {
    let storage = Arc::new(MemoryStorage::new());
    let manager = DialogManager::builder(todo_bot())
        .storage(storage.clone())
        .build()
        .unwrap();

    TestAdapter::new(manager)
        .script()
        .send("add milk")
        .expect("Added milk")
        .send("add")
        .expect("What should I add?")
        .send("eggs")
        .expect("Added eggs")
        .send("show")
        .expect("Todos: milk, eggs")
        .send("remove milk")
        .expect("Removed milk")
        .send("remove bread")
        .expect("Not on the list")
        .send("show")
        .expect("Todos: eggs")
        .send("dance")
        .expect("Try add, remove, show or clear.")
        .send("clear")
        .expect("Cleared")
        .run()
        .await
        .unwrap();

    let user = storage.load("test/users/user").await.unwrap().unwrap();
    assert_eq!(user["todos"], json!([]));
}

#[tokio::test]
async fn test_cancel_interrupts_prompt() {
    let root = AdaptiveDialog::builder("root")
        .recognizer(RegexRecognizer::new().intent("Cancel", r"(?i)^cancel$").unwrap())
        .step(
            TextInput::new("Where to?")
                .property("dialog.city")
                .allow_interruptions("turn.recognized.intent == 'Cancel'"),
        )
        .step(SendActivity::new("Booked {dialog.city}"))
        .rule(
            Rule::on_intent("Cancel")
                .step(SendActivity::new("Okay, cancelled."))
                .step(CancelAllDialogs::new()),
        )
        .build()
        .unwrap();
    let adapter = adapter(root);

    assert_eq!(adapter.send("book").await.unwrap(), ["Where to?"]);
    let outcome = adapter
        .send_activity(Activity::message("cancel"))
        .await
        .unwrap();
    assert_eq!(outcome.texts(), ["Okay, cancelled."]);
    assert_eq!(outcome.status, DialogTurnStatus::Cancelled);

    adapter
        .script()
        .send("book")
        .expect("Where to?")
        .send("Oslo")
        .expect("Booked Oslo")
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_event_activity_routes_to_event_rule() {
    let root = AdaptiveDialog::builder("root")
        .rule(Rule::on_event(["reminder"]).step(SendActivity::new("Reminder received")))
        .rule(Rule::on_unknown_intent().step(SendActivity::new("unknown")))
        .build()
        .unwrap();
    let adapter = adapter(root);

    let outcome = adapter
        .send_activity(Activity::event("reminder", Some(json!({ "at": "09:00" }))))
        .await
        .unwrap();
    assert_eq!(outcome.texts(), ["Reminder received"]);
}

#[tokio::test]
async fn test_rule_queued_after_current_steps() {
    let root = AdaptiveDialog::builder("root")
        .recognizer(RegexRecognizer::new().intent("Tip", r"(?i)^tip$").unwrap())
        .step(
            TextInput::new("Pick a color")
                .property("dialog.color")
                .allow_interruptions("true"),
        )
        .step(SendActivity::new("You picked {dialog.color}"))
        .rule(
            Rule::on_intent("Tip")
                .change_type(ChangeType::AppendSteps)
                .step(SendActivity::new("Tip: blue is popular")),
        )
        .build()
        .unwrap();

    adapter(root)
        .script()
        .send("start")
        .expect("Pick a color")
        .send("tip")
        .expect("Pick a color")
        .send("red")
        .expect("You picked red")
        .expect("Tip: blue is popular")
        .run()
        .await
        .unwrap();
}
