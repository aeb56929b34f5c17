//! Turn driver for unit tests.

use std::sync::Arc;

use parley_core::event::names;
use parley_core::{
    Activity, Dialog, DialogContext, DialogResult, DialogSet, DialogTurnResult, TurnContext,
};
use serde_json::{Value, json};

/// Runs turns against one root dialog, carrying state between them.
pub(crate) struct Harness {
    dialogs: Arc<DialogSet>,
    root: String,
    user: Value,
    conversation: Value,
    dialog_state: Value,
}

impl Harness {
    pub(crate) fn new(root: impl Dialog) -> Self {
        let root: Arc<dyn Dialog> = Arc::new(root);
        let id = root.id().to_owned();
        Self {
            dialogs: Arc::new(DialogSet::new().with(root).unwrap()),
            root: id,
            user: json!({}),
            conversation: json!({}),
            dialog_state: json!({ "stack": [] }),
        }
    }

    pub(crate) fn user(&self) -> &Value {
        &self.user
    }

    pub(crate) fn stack(&self) -> Vec<Value> {
        self.dialog_state["stack"]
            .as_array()
            .cloned()
            .unwrap_or_default()
    }

    /// Sends a message and returns the reply texts.
    pub(crate) async fn send(&mut self, text: &str) -> Vec<String> {
        self.turn(Activity::message(text)).await.unwrap().1
    }

    pub(crate) async fn turn(
        &mut self,
        activity: Activity,
    ) -> DialogResult<(DialogTurnResult, Vec<String>)> {
        let mut turn = TurnContext::new(activity)
            .with_user_state(self.user.clone())
            .with_conversation_state(self.conversation.clone())
            .with_dialog_state(self.dialog_state.clone());

        let result = {
            let mut dc = DialogContext::new(&mut turn, self.dialogs.clone());
            if dc.stack_depth() == 0 {
                dc.begin_dialog(&self.root, None).await?
            } else {
                let activity = serde_json::to_value(dc.turn().activity()).ok();
                dc.emit_event(names::ACTIVITY_RECEIVED, activity, true, true)
                    .await?;
                dc.turn_mut().mark_activity_processed();
                dc.continue_dialog().await?
            }
        };

        let replies = turn
            .take_responses()
            .iter()
            .map(|reply| reply.text().to_owned())
            .collect();
        let memory = turn.into_memory();
        self.user = memory.user;
        self.conversation = memory.conversation;
        self.dialog_state = memory.dialogs;
        Ok((result, replies))
    }
}
