//! Turn orchestration.
//!
//! [`DialogManager`] owns a root dialog and a [`Storage`] backend. Each call to
//! [`on_turn`](DialogManager::on_turn):
//!
//! ```text
//! load user + conversation ──▶ TurnContext ──▶ begin root (empty stack)
//!                                         └──▶ activityReceived, continue (otherwise)
//!                                                        │
//!             save user + conversation ◀── success ◀─────┘
//! ```
//!
//! State is saved only when the turn succeeds. Turns that share a user or a
//! conversation are serialized: the user lock is taken first, then the
//! conversation lock. Unrelated turns run concurrently.
//!
//! The conversation blob is `{ "state": <conversation scope>, "dialogs":
//! { "stack": [...] } }`; the user blob is the user scope itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use parley_core::event::names;
use parley_core::{
    Activity, Dialog, DialogContext, DialogError, DialogResult, DialogSet, DialogTurnResult,
    DialogTurnStatus, ExpressionEvaluator, FileStorage, MemoryStorage, Storage, TurnContext,
    DEFAULT_STEP_LIMIT,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::{ParleyConfig, StorageKind, validate_config};
use crate::error::RuntimeResult;

/// What a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Status of the root dialog after the turn.
    pub status: DialogTurnStatus,
    /// Value the root dialog completed with, if it completed.
    pub result: Option<Value>,
    /// Activities sent during the turn, in order.
    pub responses: Vec<Activity>,
}

impl TurnOutcome {
    /// Texts of the responses.
    pub fn texts(&self) -> Vec<&str> {
        self.responses.iter().map(Activity::text).collect()
    }
}

struct Inner {
    dialogs: Arc<DialogSet>,
    root: String,
    storage: Arc<dyn Storage>,
    settings: Arc<Value>,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    step_limit: usize,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Runs turns for a root dialog, loading and saving state around each.
///
/// Cloning is cheap; clones share dialogs, storage and state locks.
#[derive(Clone)]
pub struct DialogManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DialogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogManager")
            .field("root", &self.inner.root)
            .field("step_limit", &self.inner.step_limit)
            .finish_non_exhaustive()
    }
}

impl DialogManager {
    /// Starts building a manager around `root`.
    pub fn builder(root: impl Dialog) -> DialogManagerBuilder {
        DialogManagerBuilder::new(Arc::new(root))
    }

    /// Id of the root dialog.
    pub fn root_id(&self) -> &str {
        &self.inner.root
    }

    /// The storage backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    /// Processes one inbound activity.
    pub async fn on_turn(&self, activity: Activity) -> RuntimeResult<TurnOutcome> {
        self.on_turn_with_cancellation(activity, CancellationToken::new())
            .await
    }

    /// Processes one inbound activity, giving up between steps once `token`
    /// is cancelled.
    pub async fn on_turn_with_cancellation(
        &self,
        activity: Activity,
        token: CancellationToken,
    ) -> RuntimeResult<TurnOutcome> {
        let user_key = activity.user_storage_key();
        let conversation_key = activity.conversation_storage_key();
        let user_lock = self.state_lock(&user_key);
        let conversation_lock = self.state_lock(&conversation_key);
        let span = info_span!(
            "turn",
            conversation = %conversation_key,
            kind = ?activity.kind,
        );

        let outcome = {
            let _user = user_lock.lock().await;
            let _conversation = conversation_lock.lock().await;
            self.run_turn(activity, token).instrument(span).await
        };

        drop((user_lock, conversation_lock));
        self.inner
            .locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        outcome
    }

    fn state_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .locks
            .lock()
            .entry(key.to_owned())
            .or_default()
            .clone()
    }

    async fn run_turn(
        &self,
        activity: Activity,
        token: CancellationToken,
    ) -> RuntimeResult<TurnOutcome> {
        let inner = &self.inner;
        let user_key = activity.user_storage_key();
        let conversation_key = activity.conversation_storage_key();

        let mut stored = inner
            .storage
            .read(&[user_key.clone(), conversation_key.clone()])
            .await?;
        let user = stored.remove(&user_key).unwrap_or_else(|| json!({}));
        let mut conversation = stored.remove(&conversation_key).unwrap_or_default();
        let mut take = |field: &str| {
            conversation
                .get_mut(field)
                .map(Value::take)
                .unwrap_or_default()
        };
        let (conversation_state, dialog_state) = (take("state"), take("dialogs"));
        debug!(user = %user_key, "Turn state loaded");

        let mut turn = TurnContext::new(activity)
            .with_settings(inner.settings.clone())
            .with_user_state(user)
            .with_conversation_state(conversation_state)
            .with_dialog_state(dialog_state)
            .with_cancellation(token)
            .with_step_limit(inner.step_limit);
        if let Some(evaluator) = &inner.evaluator {
            turn = turn.with_evaluator(evaluator.clone());
        }

        let result = match drive(&mut turn, &inner.dialogs, &inner.root).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "Turn failed; state not saved");
                return Err(err.into());
            }
        };

        let responses = turn.take_responses();
        let memory = turn.into_memory();
        inner
            .storage
            .write(HashMap::from([
                (user_key, memory.user),
                (
                    conversation_key,
                    json!({ "state": memory.conversation, "dialogs": memory.dialogs }),
                ),
            ]))
            .await?;

        info!(
            status = ?result.status,
            responses = responses.len(),
            "Turn complete"
        );
        Ok(TurnOutcome {
            status: result.status,
            result: result.result,
            responses,
        })
    }
}

/// Begins the root on an empty stack; otherwise offers the activity to the
/// active dialogs, leaf first, and continues the stack.
async fn drive(
    turn: &mut TurnContext,
    dialogs: &Arc<DialogSet>,
    root: &str,
) -> DialogResult<DialogTurnResult> {
    let mut dc = DialogContext::new(turn, dialogs.clone());
    if dc.stack_depth() == 0 {
        debug!(root, "Beginning root dialog");
        return dc.begin_dialog(root, None).await;
    }

    let activity = serde_json::to_value(dc.turn().activity()).ok();
    let handled = dc
        .emit_event(names::ACTIVITY_RECEIVED, activity, true, true)
        .await?;
    debug!(handled, "Activity routed");
    dc.turn_mut().mark_activity_processed();
    dc.continue_dialog().await
}

impl Service<Activity> for DialogManager {
    type Response = TurnOutcome;
    type Error = crate::RuntimeError;
    type Future = BoxFuture<'static, RuntimeResult<TurnOutcome>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, activity: Activity) -> Self::Future {
        let manager = self.clone();
        async move { manager.on_turn(activity).await }.boxed()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`DialogManager`].
pub struct DialogManagerBuilder {
    root: Arc<dyn Dialog>,
    dialogs: Vec<Arc<dyn Dialog>>,
    storage: Option<Arc<dyn Storage>>,
    settings: Value,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    step_limit: usize,
}

impl DialogManagerBuilder {
    fn new(root: Arc<dyn Dialog>) -> Self {
        Self {
            root,
            dialogs: Vec::new(),
            storage: None,
            settings: json!({}),
            evaluator: None,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    /// Registers an extra dialog that steps can begin by id.
    pub fn dialog(mut self, dialog: impl Dialog) -> Self {
        self.dialogs.push(Arc::new(dialog));
        self
    }

    /// Storage backend. Defaults to [`MemoryStorage`].
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Values readable through the `settings` memory scope.
    pub fn settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    /// Expression evaluator used for conditions and templates. Defaults to
    /// the built-in evaluator.
    pub fn evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Upper bound on root re-entries per turn.
    pub fn step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Applies engine limits, settings and the storage backend from `config`.
    pub fn config(mut self, config: &ParleyConfig) -> RuntimeResult<Self> {
        validate_config(config)?;
        self.step_limit = config.engine.max_steps_per_turn;
        self.settings = config.settings.clone();
        let storage: Arc<dyn Storage> = match (config.storage.kind, &config.storage.path) {
            (StorageKind::File, Some(path)) => Arc::new(FileStorage::new(path)),
            _ => Arc::new(MemoryStorage::new()),
        };
        self.storage = Some(storage);
        Ok(self)
    }

    /// Registers the dialogs and creates the manager.
    ///
    /// Fails on duplicate dialog ids or an empty root id.
    pub fn build(self) -> RuntimeResult<DialogManager> {
        let root = self.root.id().to_owned();
        let mut dialogs = DialogSet::new();
        dialogs.add(self.root)?;
        for dialog in self.dialogs {
            dialogs.add(dialog)?;
        }
        if root.is_empty() {
            return Err(DialogError::invalid_configuration("root dialog id is empty").into());
        }

        info!(root = %root, dialogs = dialogs.len(), "Dialog manager ready");
        Ok(DialogManager {
            inner: Arc::new(Inner {
                dialogs: Arc::new(dialogs),
                root,
                storage: self
                    .storage
                    .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
                settings: Arc::new(self.settings),
                evaluator: self.evaluator,
                step_limit: self.step_limit,
                locks: Mutex::new(HashMap::new()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageKind;
    use crate::testing::TestAdapter;
    use parley_adaptive::prelude::*;
    use parley_core::ChannelAccount;
    use tower::ServiceExt;

    struct Flaky;

    #[async_trait]
    impl Dialog for Flaky {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn begin_dialog(
            &self,
            dc: &mut DialogContext<'_>,
            _options: Option<Value>,
        ) -> DialogResult<DialogTurnResult> {
            dc.state().set_value("user.touched", json!(true))?;
            Err(DialogError::invalid_state("boom"))
        }
    }

    fn name_bot() -> AdaptiveDialog {
        AdaptiveDialog::builder("root")
            .step(TextInput::new("Name?").property("user.name"))
            .step(SendActivity::new("Hi {user.name}"))
            .build()
            .unwrap()
    }

    fn activity(conversation: &str, text: &str) -> Activity {
        Activity::message(text).with_address(
            "test",
            ChannelAccount::new("user"),
            ChannelAccount::new(conversation),
        )
    }

    #[tokio::test]
    async fn test_failed_turn_is_not_saved() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = DialogManager::builder(Flaky)
            .storage(storage.clone())
            .build()
            .unwrap();

        let result = manager.on_turn(activity("c1", "hi")).await;
        assert!(matches!(result, Err(crate::RuntimeError::Dialog(_))));
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_blob_layout() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = DialogManager::builder(name_bot())
            .storage(storage.clone())
            .build()
            .unwrap();

        let outcome = manager.on_turn(activity("c1", "hi")).await.unwrap();
        assert_eq!(outcome.status, DialogTurnStatus::Waiting);
        assert_eq!(outcome.texts(), ["Name?"]);

        let blob = storage
            .load("test/conversations/c1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blob["dialogs"]["stack"][0]["id"], "root");
        assert!(blob["state"].is_object());

        let outcome = manager.on_turn(activity("c1", "Ada")).await.unwrap();
        assert_eq!(outcome.texts(), ["Hi Ada"]);
        assert_eq!(outcome.status, DialogTurnStatus::Complete);
        let user = storage.load("test/users/user").await.unwrap().unwrap();
        assert_eq!(user["name"], "Ada");
    }

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let manager = DialogManager::builder(name_bot()).build().unwrap();

        let (a, b) = tokio::join!(
            manager.on_turn(activity("a", "hi")),
            manager.on_turn(activity("b", "hi")),
        );
        assert_eq!(a.unwrap().texts(), ["Name?"]);
        assert_eq!(b.unwrap().texts(), ["Name?"]);

        let a = manager.on_turn(activity("a", "Ada")).await.unwrap();
        assert_eq!(a.texts(), ["Hi Ada"]);
        assert!(manager.inner.locks.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_same_user_turns_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let root = AdaptiveDialog::builder("root")
            .step(EditArray::push("user.visits", "turn.activity.conversation.id"))
            .build()
            .unwrap();
        let manager = DialogManager::builder(root)
            .storage(Arc::new(FileStorage::new(dir.path())))
            .build()
            .unwrap();

        let turns = (0..16).map(|n| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.on_turn(activity(&format!("conv{n}"), "hi")).await })
        });
        for result in futures::future::join_all(turns).await {
            result.unwrap().unwrap();
        }

        let user = manager.storage().load("test/users/user").await.unwrap().unwrap();
        let mut visits: Vec<String> = serde_json::from_value(user["visits"].clone()).unwrap();
        visits.sort();
        let mut expected: Vec<String> = (0..16).map(|n| format!("conv{n}")).collect();
        expected.sort();
        assert_eq!(visits, expected);
        assert!(manager.inner.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_service_call() {
        let manager = DialogManager::builder(name_bot()).build().unwrap();
        let outcome = manager.oneshot(activity("c1", "hi")).await.unwrap();
        assert_eq!(outcome.texts(), ["Name?"]);
    }

    #[tokio::test]
    async fn test_settings_scope() {
        let config = ParleyConfig {
            settings: json!({ "bot_name": "Tess" }),
            ..ParleyConfig::default()
        };
        let root = AdaptiveDialog::builder("root")
            .step(SendActivity::new("I am {settings.bot_name}"))
            .build()
            .unwrap();
        let manager = DialogManager::builder(root)
            .config(&config)
            .unwrap()
            .build()
            .unwrap();

        let adapter = TestAdapter::new(manager);
        assert_eq!(adapter.send("hi").await.unwrap(), ["I am Tess"]);
    }

    #[tokio::test]
    async fn test_config_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ParleyConfig::default();
        config.storage.kind = StorageKind::File;
        config.storage.path = Some(dir.path().to_path_buf());

        let manager = DialogManager::builder(name_bot())
            .config(&config)
            .unwrap()
            .build()
            .unwrap();
        manager.on_turn(activity("c1", "hi")).await.unwrap();
        manager.on_turn(activity("c1", "Ada")).await.unwrap();

        let reopened = FileStorage::new(dir.path());
        let user = reopened.load("test/users/user").await.unwrap().unwrap();
        assert_eq!(user["name"], "Ada");
    }

    #[tokio::test]
    async fn test_cancelled_turn() {
        let manager = DialogManager::builder(name_bot()).build().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = manager
            .on_turn_with_cancellation(activity("c1", "hi"), token)
            .await;
        assert!(matches!(
            result,
            Err(crate::RuntimeError::Dialog(DialogError::Cancelled))
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let first = AdaptiveDialog::builder("other").build().unwrap();
        let second = AdaptiveDialog::builder("other").build().unwrap();
        let result = DialogManager::builder(name_bot())
            .dialog(first)
            .dialog(second)
            .build();
        assert!(matches!(
            result,
            Err(crate::RuntimeError::Dialog(DialogError::DuplicateDialogId(_)))
        ));
    }
}
