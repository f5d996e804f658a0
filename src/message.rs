//! Conversation messages.
//!
//! A conversation is an ordered list of [`ChatMessage`]s. While a run is active
//! the last message (role [`Role::Agent`]) is the *open* message: the stream
//! ingestor mutates it in place until the run reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream::citations::Citation;

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Investigator input.
    User,
    /// Agent response.
    Agent,
}

/// A tool invocation reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the agent runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool/function name.
    #[serde(default, alias = "name")]
    pub tool_name: String,
    /// Arguments the tool was invoked with.
    #[serde(default, alias = "arguments", skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
    /// Tool output, once the call has completed.
    #[serde(default, alias = "result", skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    /// Set when the tool reported a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_error: Option<bool>,
    /// Timing and token metrics for the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
}

/// Reference to an image, video, or audio artifact produced during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

/// A single reasoning step streamed by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Side data attached to an agent message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_steps: Option<Vec<ReasoningStep>>,
    /// Knowledge-base references, kept in the upstream shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Normalized citations, frozen when the run completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub images: Vec<MediaRef>,
    #[serde(default)]
    pub videos: Vec<MediaRef>,
    #[serde(default)]
    pub audio: Vec<MediaRef>,
    #[serde(default)]
    pub extra_data: ExtraData,
    /// Set when the run that produced this message failed.
    #[serde(default)]
    pub streaming_error: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    /// Create an empty agent placeholder.
    #[must_use]
    pub fn agent_placeholder() -> Self {
        Self::new(Role::Agent, String::new())
    }

    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            images: Vec::new(),
            videos: Vec::new(),
            audio: Vec::new(),
            extra_data: ExtraData::default(),
            streaming_error: false,
            created_at: Utc::now(),
        }
    }

    /// Insert a tool call, replacing an earlier entry with the same id.
    pub fn upsert_tool_call(&mut self, call: ToolCall) {
        let existing = call.tool_call_id.as_ref().and_then(|id| {
            self.tool_calls
                .iter_mut()
                .find(|c| c.tool_call_id.as_ref() == Some(id))
        });
        match existing {
            Some(slot) => *slot = call,
            None => self.tool_calls.push(call),
        }
    }

    /// Mark this message as failed and show `text` in its place.
    pub fn mark_error(&mut self, text: impl Into<String>) {
        self.streaming_error = true;
        self.content = text.into();
    }
}

/// Ordered message history owned by the submission controller.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user message followed by an empty agent placeholder.
    pub fn begin_exchange(&mut self, user_text: impl Into<String>) {
        self.messages.push(ChatMessage::user(user_text));
        self.messages.push(ChatMessage::agent_placeholder());
    }

    /// The open agent message, if the last message is from the agent.
    pub fn open_message_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages
            .last_mut()
            .filter(|m| m.role == Role::Agent)
    }

    /// The open agent message, inserting an empty placeholder if there is none.
    pub fn open_or_insert(&mut self) -> &mut ChatMessage {
        if self.messages.last().is_none_or(|m| m.role != Role::Agent) {
            self.messages.push(ChatMessage::agent_placeholder());
        }
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }

    /// Drop the last exchange if its agent reply failed.
    ///
    /// Removes the error-marked agent message and the user message right before
    /// it, so a retry does not pile up stale failed turns. Returns whether
    /// anything was removed.
    pub fn remove_failed_exchange(&mut self) -> bool {
        let failed = self
            .messages
            .last()
            .is_some_and(|m| m.role == Role::Agent && m.streaming_error);
        if !failed {
            return false;
        }
        self.messages.pop();
        if self.messages.last().is_some_and(|m| m.role == Role::User) {
            self.messages.pop();
        }
        true
    }

    /// All messages in order.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_exchange_appends_pair() {
        let mut conv = Conversation::new();
        conv.begin_exchange("Halo");

        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages()[0].role, Role::User);
        assert_eq!(conv.messages()[1].role, Role::Agent);
        assert!(conv.messages()[1].content.is_empty());
    }

    #[test]
    fn test_remove_failed_exchange() {
        let mut conv = Conversation::new();
        conv.begin_exchange("pertama");
        conv.open_message_mut().unwrap().content = "ok".into();
        conv.begin_exchange("kedua");
        conv.open_message_mut().unwrap().mark_error("gagal");

        assert!(conv.remove_failed_exchange());
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.last().unwrap().content, "ok");

        // A healthy tail is left alone.
        assert!(!conv.remove_failed_exchange());
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn test_upsert_tool_call_by_id() {
        let mut msg = ChatMessage::agent_placeholder();
        msg.upsert_tool_call(ToolCall {
            tool_call_id: Some("t1".into()),
            tool_name: "search_putusan".into(),
            ..Default::default()
        });
        msg.upsert_tool_call(ToolCall {
            tool_call_id: Some("t1".into()),
            tool_name: "search_putusan".into(),
            content: Some(serde_json::json!("3 hasil")),
            ..Default::default()
        });

        assert_eq!(msg.tool_calls.len(), 1);
        assert!(msg.tool_calls[0].content.is_some());
    }

    #[test]
    fn test_open_message_requires_agent_tail() {
        let mut conv = Conversation::new();
        assert!(conv.open_message_mut().is_none());
        conv.begin_exchange("x y z");
        assert!(conv.open_message_mut().is_some());
    }
}
