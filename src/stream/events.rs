//! Run event model.
//!
//! The agent playground reports progress as a sequence of JSON objects, each
//! tagged by an `event` field. [`RunEvent`] is the closed set of kinds this
//! client understands; every kind shares the same optional payload record.
//!
//! # Example
//!
//! ```rust
//! use penyidik_ai::stream::events::RunEvent;
//!
//! let event = RunEvent::decode(r#"{"event":"RunResponseContent","content":"Sanksi"}"#)
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(event.event_name(), "RunResponseContent");
//! assert_eq!(event.payload().content_text(), Some("Sanksi"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::message::{ExtraData, MediaRef, ToolCall};

/// Fields an event may carry. Which ones are present depends on the kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunEventPayload {
    /// Text delta/buffer, or structured output on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Epoch seconds or a timestamp string, depending on the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolCall>>,
    /// Single tool descriptor on tool-call start/completion events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<MediaRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos: Option<Vec<MediaRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<MediaRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<ExtraData>,
    /// Citation data in whatever shape the backend chose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    /// Error detail; usually a string, sometimes an object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// HTTP-like status, as a number or numeric string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

impl RunEventPayload {
    /// Content as plain text, when it is a string.
    #[must_use]
    pub fn content_text(&self) -> Option<&str> {
        self.content.as_ref().and_then(serde_json::Value::as_str)
    }

    /// Status as a number, accepting `400` and `"400"`.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self.status.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Best text describing an error: `error`, then `content`, then `reason`.
    #[must_use]
    pub fn error_text(&self) -> String {
        let error = match &self.error {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::String(_) | serde_json::Value::Null) | None => None,
            Some(v) => Some(v.to_string()),
        };
        error
            .or_else(|| match &self.content {
                Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(v @ serde_json::Value::Object(_)) => Some(v.to_string()),
                _ => None,
            })
            .or_else(|| self.reason.clone())
            .unwrap_or_default()
    }

    /// Decode payload fields, dropping any field whose value has the wrong
    /// shape instead of rejecting the whole event.
    fn from_fields(fields: Map<String, Value>) -> Self {
        let value = Value::Object(fields);
        if let Ok(payload) = Self::deserialize(&value) {
            return payload;
        }
        let Value::Object(fields) = value else {
            return Self::default();
        };

        let mut dropped = Vec::new();
        let kept: Map<String, Value> = fields
            .into_iter()
            .filter(|(key, field)| {
                let single = Value::Object(Map::from_iter([(key.clone(), field.clone())]));
                let ok = Self::deserialize(&single).is_ok();
                if !ok {
                    dropped.push(key.clone());
                }
                ok
            })
            .collect();
        tracing::warn!(fields = ?dropped, "Dropping mistyped run event fields");
        Self::deserialize(&Value::Object(kept)).unwrap_or_default()
    }
}

/// A decoded run event.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted(RunEventPayload),
    /// Content buffer; sent as `RunResponse` or `RunResponseContent`.
    RunResponseContent(RunEventPayload),
    RunCompleted(RunEventPayload),
    RunError(RunEventPayload),
    ToolCallStarted(RunEventPayload),
    ToolCallCompleted(RunEventPayload),
    ReasoningStarted(RunEventPayload),
    ReasoningStep(RunEventPayload),
    ReasoningCompleted(RunEventPayload),
    AccessingKnowledge(RunEventPayload),
    MemoryUpdateStarted(RunEventPayload),
    MemoryUpdateCompleted(RunEventPayload),
    RunPaused(RunEventPayload),
    RunContinued(RunEventPayload),
    RunCancelled(RunEventPayload),
}

impl RunEvent {
    /// Build an event from its wire tag. Unknown tags yield `None`.
    #[must_use]
    pub fn from_tag(tag: &str, payload: RunEventPayload) -> Option<Self> {
        let event = match tag {
            "RunStarted" => Self::RunStarted(payload),
            "RunResponse" | "RunResponseContent" => Self::RunResponseContent(payload),
            "RunCompleted" => Self::RunCompleted(payload),
            "RunError" => Self::RunError(payload),
            "ToolCallStarted" => Self::ToolCallStarted(payload),
            "ToolCallCompleted" => Self::ToolCallCompleted(payload),
            "ReasoningStarted" => Self::ReasoningStarted(payload),
            "ReasoningStep" => Self::ReasoningStep(payload),
            "ReasoningCompleted" => Self::ReasoningCompleted(payload),
            "AccessingKnowledge" => Self::AccessingKnowledge(payload),
            "MemoryUpdateStarted" => Self::MemoryUpdateStarted(payload),
            "MemoryUpdateCompleted" => Self::MemoryUpdateCompleted(payload),
            "RunPaused" => Self::RunPaused(payload),
            "RunContinued" => Self::RunContinued(payload),
            "RunCancelled" => Self::RunCancelled(payload),
            _ => return None,
        };
        Some(event)
    }

    /// Decode one JSON frame.
    ///
    /// Returns `Ok(None)` for well-formed frames with an unrecognised tag.
    /// Fails with [`Error::Decode`] when the frame is not a JSON object or has
    /// no string `event` tag. Mistyped payload fields are dropped, not fatal.
    pub fn decode(frame: &str) -> Result<Option<Self>> {
        let value: Value = serde_json::from_str(frame).map_err(|e| Error::Decode(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(Error::Decode("frame is not a JSON object".to_string()));
        };
        let tag = match fields.remove("event") {
            Some(Value::String(tag)) => tag,
            Some(other) => return Err(Error::Decode(format!("non-string event tag: {other}"))),
            None => return Err(Error::Decode("missing event tag".to_string())),
        };

        let event = Self::from_tag(&tag, RunEventPayload::from_fields(fields));
        if event.is_none() {
            tracing::debug!(event = %tag, "Ignoring unknown run event");
        }
        Ok(event)
    }

    /// Wire tag for this event.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RunStarted(_) => "RunStarted",
            Self::RunResponseContent(_) => "RunResponseContent",
            Self::RunCompleted(_) => "RunCompleted",
            Self::RunError(_) => "RunError",
            Self::ToolCallStarted(_) => "ToolCallStarted",
            Self::ToolCallCompleted(_) => "ToolCallCompleted",
            Self::ReasoningStarted(_) => "ReasoningStarted",
            Self::ReasoningStep(_) => "ReasoningStep",
            Self::ReasoningCompleted(_) => "ReasoningCompleted",
            Self::AccessingKnowledge(_) => "AccessingKnowledge",
            Self::MemoryUpdateStarted(_) => "MemoryUpdateStarted",
            Self::MemoryUpdateCompleted(_) => "MemoryUpdateCompleted",
            Self::RunPaused(_) => "RunPaused",
            Self::RunContinued(_) => "RunContinued",
            Self::RunCancelled(_) => "RunCancelled",
        }
    }

    #[must_use]
    pub fn payload(&self) -> &RunEventPayload {
        match self {
            Self::RunStarted(p)
            | Self::RunResponseContent(p)
            | Self::RunCompleted(p)
            | Self::RunError(p)
            | Self::ToolCallStarted(p)
            | Self::ToolCallCompleted(p)
            | Self::ReasoningStarted(p)
            | Self::ReasoningStep(p)
            | Self::ReasoningCompleted(p)
            | Self::AccessingKnowledge(p)
            | Self::MemoryUpdateStarted(p)
            | Self::MemoryUpdateCompleted(p)
            | Self::RunPaused(p)
            | Self::RunContinued(p)
            | Self::RunCancelled(p) => p,
        }
    }

    /// Whether this event ends the run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted(_) | Self::RunError(_) | Self::RunCancelled(_)
        )
    }

    /// Encode as a wire frame (JSON object with the `event` tag).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self.payload())
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "event".to_string(),
                serde_json::Value::String(self.event_name().to_string()),
            );
        }
        value
    }
}
