//! Per-turn context.
//!
//! A [`TurnContext`] is created for every inbound activity and owns everything
//! the turn touches:
//!
//! - the inbound [`Activity`] and the outbound responses,
//! - the [`MemoryStores`] loaded for the user and conversation,
//! - the expression evaluator and the cancellation token,
//! - a type-keyed scratch map that components use to share turn-scoped
//!   values such as pending step changes.
//!
//! Dialog contexts borrow the turn mutably; there is exactly one writer at a
//! time.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::activity::Activity;
use crate::expression::{DefaultEvaluator, ExpressionEvaluator};
use crate::memory::{DialogMemory, MemoryRead, MemoryStores, MemoryView};
use crate::value::ValueExt;

/// Well-known paths in the `turn` scope.
pub mod paths {
    /// The event currently being routed to rules.
    pub const DIALOG_EVENT: &str = "turn.dialogEvent";
    /// The narrowed recognizer result of the inbound message.
    pub const RECOGNIZED: &str = "turn.recognized";
    /// Number of step continuations run so far this turn.
    pub const STEP_COUNT: &str = "turn.stepCount";
    /// Set once the inbound activity has been routed and consumed.
    pub const ACTIVITY_PROCESSED: &str = "turn.activityProcessed";
    /// Set when a rule claimed the inbound activity away from the active step.
    pub const INTERRUPTED: &str = "turn.interrupted";
}

/// Default cap on root re-entries within one turn.
pub const DEFAULT_STEP_LIMIT: usize = 256;

/// Everything one turn reads and writes.
pub struct TurnContext {
    activity: Activity,
    responses: Vec<Activity>,
    memory: MemoryStores,
    evaluator: Arc<dyn ExpressionEvaluator>,
    cancellation: CancellationToken,
    step_limit: usize,
    state: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl TurnContext {
    /// Creates a context for `activity` with empty stores.
    ///
    /// The activity is seeded into memory at `turn.activity`.
    pub fn new(activity: Activity) -> Self {
        let memory = MemoryStores {
            turn: json!({ "activity": serde_json::to_value(&activity).unwrap_or(Value::Null) }),
            ..MemoryStores::default()
        };
        Self {
            activity,
            responses: Vec::new(),
            memory,
            evaluator: Arc::new(DefaultEvaluator::new()),
            cancellation: CancellationToken::new(),
            step_limit: DEFAULT_STEP_LIMIT,
            state: HashMap::new(),
        }
    }

    /// Sets the read-only settings scope.
    pub fn with_settings(mut self, settings: Arc<Value>) -> Self {
        self.memory.settings = settings;
        self
    }

    /// Sets the loaded user scope.
    pub fn with_user_state(mut self, user: Value) -> Self {
        self.memory.user = if user.is_object() { user } else { json!({}) };
        self
    }

    /// Sets the loaded conversation scope.
    pub fn with_conversation_state(mut self, conversation: Value) -> Self {
        self.memory.conversation = if conversation.is_object() {
            conversation
        } else {
            json!({})
        };
        self
    }

    /// Sets the loaded dialog state document.
    pub fn with_dialog_state(mut self, dialogs: Value) -> Self {
        self.memory.dialogs = if dialogs.get("stack").is_some_and(Value::is_array) {
            dialogs
        } else {
            json!({ "stack": [] })
        };
        self
    }

    /// Replaces the expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Uses `token` for cooperative cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Caps root re-entries within the turn.
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit.max(1);
        self
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// The inbound activity.
    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Backing stores of every scope.
    pub fn memory(&self) -> &MemoryStores {
        &self.memory
    }

    /// Mutable backing stores.
    pub fn memory_mut(&mut self) -> &mut MemoryStores {
        &mut self.memory
    }

    /// Read-only memory view with no dialog scope.
    pub fn memory_view(&self) -> MemoryView<'_> {
        MemoryView::new(&self.memory, Vec::new())
    }

    /// Read-write memory view with no dialog scope.
    pub fn memory_mut_view(&mut self) -> DialogMemory<'_> {
        DialogMemory::new(&mut self.memory, Vec::new())
    }

    /// The expression evaluator.
    pub fn evaluator(&self) -> &Arc<dyn ExpressionEvaluator> {
        &self.evaluator
    }

    /// The turn's cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Maximum number of root re-entries.
    pub fn step_limit(&self) -> usize {
        self.step_limit
    }

    /// Returns `true` once the inbound activity has been routed.
    pub fn activity_processed(&self) -> bool {
        self.memory_view()
            .get_value(paths::ACTIVITY_PROCESSED)
            .is_some_and(|v| v.is_truthy())
    }

    /// Marks the inbound activity as routed.
    pub fn mark_activity_processed(&mut self) {
        if let Some(turn) = self.memory.turn.as_object_mut() {
            turn.insert("activityProcessed".to_owned(), Value::Bool(true));
        }
    }

    /// Returns `true` once a rule has claimed the inbound activity.
    pub fn interrupted(&self) -> bool {
        self.memory_view()
            .get_value(paths::INTERRUPTED)
            .is_some_and(|v| v.is_truthy())
    }

    /// Records that a rule claimed the inbound activity.
    pub fn mark_interrupted(&mut self) {
        if let Some(turn) = self.memory.turn.as_object_mut() {
            turn.insert("interrupted".to_owned(), Value::Bool(true));
        }
    }

    /// Number of step continuations run so far this turn.
    pub fn step_count(&self) -> u64 {
        self.memory_view()
            .get_value(paths::STEP_COUNT)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// Consumes the context, returning its stores.
    pub fn into_memory(self) -> MemoryStores {
        self.memory
    }

    // ─── Responses ────────────────────────────────────────────────────────────

    /// Queues an outbound activity.
    pub fn send_activity(&mut self, activity: Activity) {
        debug!(
            kind = ?activity.kind,
            text = activity.text.as_deref().unwrap_or_default(),
            "Sending activity"
        );
        self.responses.push(activity);
    }

    /// Queues a text reply to the inbound activity.
    pub fn send_text(&mut self, text: impl Into<String>) {
        let reply = self.activity.reply(text);
        self.send_activity(reply);
    }

    /// Activities sent so far.
    pub fn responses(&self) -> &[Activity] {
        &self.responses
    }

    /// Drains the activities sent so far.
    pub fn take_responses(&mut self) -> Vec<Activity> {
        std::mem::take(&mut self.responses)
    }

    // ─── Turn state ───────────────────────────────────────────────────────────

    /// Stores a turn-scoped value. One value per type; later calls overwrite.
    pub fn set_state<T: Send + Sync + 'static>(&mut self, value: T) {
        self.state.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a clone of a turn-scoped value.
    pub fn get_state<T: Clone + 'static>(&self) -> Option<T> {
        self.state
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Borrows a turn-scoped value.
    pub fn state_ref<T: 'static>(&self) -> Option<&T> {
        self.state
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns a mutable reference to a turn-scoped value.
    pub fn state_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.state
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Returns the turn-scoped value of type `T`, inserting the default first.
    pub fn state_or_default<T: Default + Send + Sync + 'static>(&mut self) -> &mut T {
        let slot = self
            .state
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
        if !slot.is::<T>() {
            *slot = Box::new(T::default());
        }
        match slot.downcast_mut::<T>() {
            Some(value) => value,
            None => unreachable!("slot holds a T"),
        }
    }

    /// Returns `true` if a value of type `T` is stored.
    pub fn has_state<T: 'static>(&self) -> bool {
        self.state.contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns a turn-scoped value.
    pub fn take_state<T: 'static>(&mut self) -> Option<T> {
        self.state
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }
}

impl std::fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnContext")
            .field("activity", &self.activity)
            .field("responses", &self.responses.len())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRead;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter(u32);

    #[test]
    fn test_activity_seeded_into_turn_memory() {
        let turn = TurnContext::new(Activity::message("hello"));
        assert_eq!(
            turn.memory_view().get_value("turn.activity.text"),
            Some(json!("hello"))
        );
    }

    #[test]
    fn test_turn_state_map() {
        let mut turn = TurnContext::new(Activity::message("x"));
        assert!(!turn.has_state::<Counter>());
        turn.state_or_default::<Counter>().0 += 2;
        turn.state_or_default::<Counter>().0 += 1;
        assert_eq!(turn.get_state::<Counter>(), Some(Counter(3)));
        assert_eq!(turn.take_state::<Counter>(), Some(Counter(3)));
        assert!(turn.state_mut::<Counter>().is_none());
    }

    #[test]
    fn test_send_text_replies_to_inbound() {
        let mut turn = TurnContext::new(Activity::message("x"));
        turn.send_text("one");
        turn.send_text("two");
        let texts: Vec<_> = turn.take_responses().into_iter().filter_map(|a| a.text).collect();
        assert_eq!(texts, ["one", "two"]);
        assert!(turn.responses().is_empty());
    }

    #[test]
    fn test_turn_flags() {
        let mut turn = TurnContext::new(Activity::message("x"));
        assert!(!turn.activity_processed());
        assert_eq!(turn.step_count(), 0);
        turn.mark_activity_processed();
        turn.memory_mut_view().set_value(paths::STEP_COUNT, json!(3)).unwrap();
        assert!(turn.activity_processed());
        assert_eq!(turn.step_count(), 3);

        assert!(!turn.interrupted());
        turn.mark_interrupted();
        assert!(turn.interrupted());
    }

    #[test]
    fn test_invalid_loaded_state_is_normalized() {
        let turn = TurnContext::new(Activity::message("x"))
            .with_user_state(json!("garbage"))
            .with_dialog_state(json!({ "nope": 1 }));
        assert_eq!(turn.memory().user, json!({}));
        assert_eq!(turn.memory().dialogs, json!({ "stack": [] }));
    }
}
