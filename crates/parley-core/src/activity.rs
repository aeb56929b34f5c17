//! Inbound and outbound conversational activities.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of an [`Activity`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    /// A text message.
    #[default]
    Message,
    /// A named event carrying a value.
    Event,
    /// Members joined or left the conversation.
    ConversationUpdate,
    /// The channel ended the conversation.
    EndOfConversation,
    /// Typing indicator.
    Typing,
    /// Diagnostic trace emitted by the bot.
    Trace,
}

/// A participant or conversation reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAccount {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChannelAccount {
    /// Creates an account with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// A single unit of conversational traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// What kind of activity this is.
    #[serde(rename = "type")]
    pub kind: ActivityType,
    /// Channel-assigned identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Channel the activity travels on.
    #[serde(default)]
    pub channel_id: String,
    /// Sender.
    #[serde(default)]
    pub from: ChannelAccount,
    /// Receiver.
    #[serde(default)]
    pub recipient: ChannelAccount,
    /// Conversation the activity belongs to.
    #[serde(default)]
    pub conversation: ChannelAccount,
    /// Message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Event name for [`ActivityType::Event`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Id of the activity this one answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

impl Activity {
    /// Creates a message activity.
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            kind: ActivityType::Message,
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Creates an event activity.
    pub fn event(name: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            kind: ActivityType::Event,
            name: Some(name.into()),
            value,
            ..Self::default()
        }
    }

    /// Sets the channel, sender and conversation addressing.
    pub fn with_address(
        mut self,
        channel_id: impl Into<String>,
        from: ChannelAccount,
        conversation: ChannelAccount,
    ) -> Self {
        self.channel_id = channel_id.into();
        self.from = from;
        self.conversation = conversation;
        self
    }

    /// Returns `true` for message activities.
    pub fn is_message(&self) -> bool {
        self.kind == ActivityType::Message
    }

    /// Message text, or the empty string.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// Creates a message addressed back to the sender of this activity.
    pub fn reply(&self, text: impl Into<String>) -> Self {
        Self {
            kind: ActivityType::Message,
            channel_id: self.channel_id.clone(),
            from: self.recipient.clone(),
            recipient: self.from.clone(),
            conversation: self.conversation.clone(),
            text: Some(text.into()),
            reply_to_id: self.id.clone(),
            ..Self::default()
        }
    }

    /// Storage key of the user this activity comes from.
    pub fn user_storage_key(&self) -> String {
        format!("{}/users/{}", self.channel_id, self.from.id)
    }

    /// Storage key of the conversation this activity belongs to.
    pub fn conversation_storage_key(&self) -> String {
        format!("{}/conversations/{}", self.channel_id, self.conversation.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_swaps_addressing() {
        let inbound = Activity {
            id: Some("1".into()),
            recipient: ChannelAccount::new("bot"),
            ..Activity::message("hi")
        }
        .with_address("test", ChannelAccount::new("ada"), ChannelAccount::new("c1"));

        let reply = inbound.reply("hello");
        assert_eq!(reply.from.id, "bot");
        assert_eq!(reply.recipient.id, "ada");
        assert_eq!(reply.conversation.id, "c1");
        assert_eq!(reply.reply_to_id.as_deref(), Some("1"));
        assert_eq!(reply.text(), "hello");
    }

    #[test]
    fn test_serialized_shape() {
        let activity = Activity::event("tick", Some(json!(3)));
        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["name"], "tick");
        assert_eq!(value["value"], 3);
        assert!(value.get("text").is_none());
    }

    #[test]
    fn test_storage_keys() {
        let activity = Activity::message("x").with_address(
            "console",
            ChannelAccount::new("u1"),
            ChannelAccount::new("c9"),
        );
        assert_eq!(activity.user_storage_key(), "console/users/u1");
        assert_eq!(activity.conversation_storage_key(), "console/conversations/c9");
    }
}
