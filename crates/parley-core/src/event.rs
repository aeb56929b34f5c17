//! Dialog events.
//!
//! Events travel through the frames of a turn. A bubbling event is offered to
//! every frame from the leaf outward during the pre-bubble phase, then from
//! the root inward during the post-bubble phase; the first frame that handles
//! it stops propagation.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Built-in event names.
pub mod names {
    /// A dialog was started.
    pub const BEGIN_DIALOG: &str = "beginDialog";
    /// The active dialog was asked to repeat its prompt.
    pub const REPROMPT_DIALOG: &str = "repromptDialog";
    /// A new activity arrived for the turn.
    pub const ACTIVITY_RECEIVED: &str = "activityReceived";
    /// A waiting input asks its host to recognize the message before the
    /// host sees `activityReceived`.
    pub const RECOGNIZE_UTTERANCE: &str = "recognizeUtterance";
    /// A recognizer produced a result for a message.
    pub const RECOGNIZED_INTENT: &str = "recognizedIntent";
    /// Nothing handled a message and there are no steps to run.
    pub const UNKNOWN_INTENT: &str = "unknownIntent";
    /// A step sequence ran out of steps.
    pub const SEQUENCE_ENDED: &str = "sequenceEnded";
    /// Cancellation was requested.
    pub const CANCEL_DIALOG: &str = "cancelDialog";
}

/// Propagation phase in which a frame sees an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPhase {
    /// Leaf to root.
    PreBubble,
    /// Root to leaf.
    PostBubble,
}

/// A named event with an optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogEvent {
    /// Event name.
    pub name: String,
    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Whether ancestor frames see the event.
    pub bubble: bool,
}

impl DialogEvent {
    /// Creates an event.
    pub fn new(name: impl Into<String>, value: Option<Value>, bubble: bool) -> Self {
        Self {
            name: name.into(),
            value,
            bubble,
        }
    }

    /// Returns `true` if the event has the given name.
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    /// Memory representation stored at `turn.dialogEvent`.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "value": self.value.clone().unwrap_or(Value::Null),
            "bubble": self.bubble,
        })
    }
}
