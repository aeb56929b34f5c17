//! Scripted conversations for tests.
//!
//! ```rust,ignore
//! let adapter = TestAdapter::new(manager);
//! adapter
//!     .script()
//!     .send("hi")
//!     .expect("What is your name?")
//!     .send("Carlos")
//!     .expect("Hello Carlos, nice to meet you!")
//!     .run()
//!     .await?;
//! ```
//!
//! Each `expect` consumes the oldest unconsumed reply. Replies that no
//! `expect` consumed are dropped at the next `send`.

use std::collections::VecDeque;

use parley_core::{Activity, ChannelAccount};
use thiserror::Error;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::manager::{DialogManager, TurnOutcome};

/// Sends activities to a [`DialogManager`] from one test user in one
/// conversation.
#[derive(Debug, Clone)]
pub struct TestAdapter {
    manager: DialogManager,
    channel_id: String,
    user: ChannelAccount,
    conversation: ChannelAccount,
}

impl TestAdapter {
    pub fn new(manager: DialogManager) -> Self {
        Self {
            manager,
            channel_id: "test".to_owned(),
            user: ChannelAccount::new("user"),
            conversation: ChannelAccount::new("conversation"),
        }
    }

    /// Sends as a different user.
    pub fn user(mut self, id: impl Into<String>) -> Self {
        self.user = ChannelAccount::new(id);
        self
    }

    /// Talks in a different conversation.
    pub fn conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation = ChannelAccount::new(id);
        self
    }

    pub fn manager(&self) -> &DialogManager {
        &self.manager
    }

    /// Addresses `activity` from this adapter's user and conversation.
    pub fn address(&self, activity: Activity) -> Activity {
        activity.with_address(
            self.channel_id.clone(),
            self.user.clone(),
            self.conversation.clone(),
        )
    }

    /// Runs one turn.
    pub async fn send_activity(&self, activity: Activity) -> RuntimeResult<TurnOutcome> {
        self.manager.on_turn(self.address(activity)).await
    }

    /// Sends a message and returns the reply texts.
    pub async fn send(&self, text: &str) -> RuntimeResult<Vec<String>> {
        let outcome = self.send_activity(Activity::message(text)).await?;
        Ok(outcome
            .responses
            .iter()
            .map(|reply| reply.text().to_owned())
            .collect())
    }

    /// Starts a send/expect script.
    pub fn script(&self) -> TestScript<'_> {
        TestScript {
            adapter: self,
            steps: Vec::new(),
        }
    }
}

/// A mismatch between a script and the conversation it drove.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error(transparent)]
    Turn(#[from] RuntimeError),

    #[error("step {step}: expected {expected:?}, got {actual:?}")]
    Mismatch {
        step: usize,
        expected: String,
        actual: Option<String>,
    },

    #[error("step {step}: expected no reply, got {actual:?}")]
    Unexpected { step: usize, actual: String },
}

#[derive(Debug)]
enum ScriptStep {
    Send(Activity),
    Expect(String),
    ExpectNone,
}

/// A send/expect script built by [`TestAdapter::script`].
#[derive(Debug)]
pub struct TestScript<'a> {
    adapter: &'a TestAdapter,
    steps: Vec<ScriptStep>,
}

impl TestScript<'_> {
    /// Sends a message.
    pub fn send(self, text: &str) -> Self {
        self.send_activity(Activity::message(text))
    }

    /// Sends any activity.
    pub fn send_activity(mut self, activity: Activity) -> Self {
        self.steps.push(ScriptStep::Send(activity));
        self
    }

    /// Expects the next reply to be `text`.
    pub fn expect(mut self, text: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Expect(text.into()));
        self
    }

    /// Expects every reply of the last turn to have been consumed.
    pub fn expect_none(mut self) -> Self {
        self.steps.push(ScriptStep::ExpectNone);
        self
    }

    pub async fn run(self) -> Result<(), ScriptError> {
        let mut replies = VecDeque::new();
        for (step, action) in self.steps.into_iter().enumerate() {
            match action {
                ScriptStep::Send(activity) => {
                    debug!(step, text = activity.text(), "Script send");
                    let outcome = self.adapter.send_activity(activity).await?;
                    replies = outcome.responses.into_iter().collect();
                }
                ScriptStep::Expect(expected) => {
                    let actual = replies.pop_front().map(|reply| reply.text().to_owned());
                    if actual.as_deref() != Some(expected.as_str()) {
                        return Err(ScriptError::Mismatch {
                            step,
                            expected,
                            actual,
                        });
                    }
                }
                ScriptStep::ExpectNone => {
                    if let Some(reply) = replies.pop_front() {
                        return Err(ScriptError::Unexpected {
                            step,
                            actual: reply.text().to_owned(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_adaptive::prelude::*;

    fn echo() -> DialogManager {
        let root = AdaptiveDialog::builder("root")
            .step(TextInput::new("Say something").property("dialog.said"))
            .step(SendActivity::new("You said {dialog.said}"))
            .build()
            .unwrap();
        DialogManager::builder(root).build().unwrap()
    }

    #[tokio::test]
    async fn test_script_passes() {
        TestAdapter::new(echo())
            .script()
            .send("hi")
            .expect("Say something")
            .expect_none()
            .send("ping")
            .expect("You said ping")
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_script_reports_mismatch() {
        let err = TestAdapter::new(echo())
            .script()
            .send("hi")
            .expect("Something else")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Mismatch { step: 1, ref actual, .. } if actual.as_deref() == Some("Say something")
        ));
    }

    #[tokio::test]
    async fn test_users_are_separate() {
        let manager = echo();
        let ada = TestAdapter::new(manager.clone()).user("ada").conversation("ada");
        let bob = TestAdapter::new(manager).user("bob").conversation("bob");

        assert_eq!(ada.send("hi").await.unwrap(), ["Say something"]);
        assert_eq!(bob.send("hi").await.unwrap(), ["Say something"]);
        assert_eq!(ada.send("one").await.unwrap(), ["You said one"]);
        assert_eq!(bob.send("two").await.unwrap(), ["You said two"]);
    }
}
