//! Stream ingestion.
//!
//! [`StreamIngestor`] consumes the [`RunEvent`]s of a single run, in arrival
//! order, and folds them into the open agent message and the
//! [`StreamingStatus`] record held in a [`ChatState`].
//!
//! # Modules
//!
//! - [`events`]: the closed event model and its wire decoding
//! - [`codec`]: splitting the response body into JSON frames
//! - [`accumulator`]: content de-duplication
//! - [`status`]: phase state machine
//! - [`citations`]: citation normalization
//! - [`classify`]: error taxonomy and session invalidation policy
//!
//! # Example
//!
//! ```rust
//! use penyidik_ai::stream::{ChatState, StreamIngestor, RunResult};
//! use penyidik_ai::stream::events::RunEvent;
//!
//! let mut state = ChatState::default();
//! state.conversation.begin_exchange("Apa sanksi untuk pelanggaran SNI?");
//!
//! let mut ingestor = StreamIngestor::new(&mut state, Default::default(), "Apa sanksi");
//! for frame in [
//!     r#"{"event":"RunStarted","session_id":"s-1"}"#,
//!     r#"{"event":"RunResponseContent","content":"Sanksi"}"#,
//!     r#"{"event":"RunResponseContent","content":"Sanksi untuk..."}"#,
//!     r#"{"event":"RunCompleted","content":""}"#,
//! ] {
//!     if let Some(event) = RunEvent::decode(frame).unwrap() {
//!         ingestor.apply(event);
//!     }
//! }
//! let outcome = ingestor.finish();
//! assert_eq!(outcome.content, "Sanksi untuk...");
//! assert!(matches!(outcome.result, RunResult::Completed));
//! ```

pub mod accumulator;
pub mod citations;
pub mod classify;
pub mod codec;
pub mod events;
pub mod status;

use serde::Serialize;

use crate::error::Error;
use crate::message::{ChatMessage, Conversation, ReasoningStep, ToolCall};
use crate::session::{SessionRecord, SessionState, SessionStore};

use accumulator::{ContentAccumulator, OverlapPolicy};
use citations::{Citation, CitationInput};
use classify::Classification;
use events::{RunEvent, RunEventPayload};
use status::{StreamPhase, StreamingStatus};

/// Shown when a run finishes without producing any content.
pub const NO_CONTENT_PLACEHOLDER: &str = "Tidak ada konten yang diterima dari agen.";

/// Shown when the server cancels a run before any content arrived.
pub const CANCELLED_PLACEHOLDER: &str = "Proses dihentikan oleh agen sebelum menghasilkan jawaban.";

/// Everything a run mutates. Owned by the submission controller.
#[derive(Debug, Default)]
pub struct ChatState {
    pub conversation: Conversation,
    pub status: StreamingStatus,
    pub session: SessionState,
    pub sessions: SessionStore,
    /// True between submission start and cleanup.
    pub is_streaming: bool,
}

impl ChatState {
    /// Drop the current session and its stored entry.
    pub fn invalidate_session(&mut self) {
        let Some(session_id) = self.session.clear() else {
            return;
        };
        tracing::warn!(session_id = %session_id, "Invalidating session after request error");
        if let Err(e) = self.sessions.remove(&session_id) {
            tracing::error!(session_id = %session_id, error = %e, "Failed to remove session record");
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunResult {
    Completed,
    Errored(Classification),
    Cancelled { reason: Option<String> },
}

/// Terminal result of a run, handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub citations: Vec<Citation>,
    pub citations_count: usize,
    pub session_id: Option<String>,
    pub result: RunResult,
}

impl RunOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.result, RunResult::Completed)
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.result, RunResult::Errored(_))
    }
}

/// Folds the events of one run into a [`ChatState`].
#[derive(Debug)]
pub struct StreamIngestor<'a> {
    state: &'a mut ChatState,
    accumulator: ContentAccumulator,
    /// Opening message, used to title a newly seen session.
    session_title: String,
    result: Option<RunResult>,
}

impl<'a> StreamIngestor<'a> {
    /// Start ingesting a run into `state`.
    ///
    /// The open agent message is created if the conversation does not end
    /// with one.
    pub fn new(state: &'a mut ChatState, policy: OverlapPolicy, session_title: &str) -> Self {
        state.conversation.open_or_insert();
        state.status.reset();
        Self {
            state,
            accumulator: ContentAccumulator::new(policy),
            session_title: session_title.to_string(),
            result: None,
        }
    }

    /// Whether a terminal event or failure has been applied.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.result.is_some()
    }

    #[must_use]
    pub fn status(&self) -> &StreamingStatus {
        &self.state.status
    }

    /// Apply one event.
    pub fn apply(&mut self, event: RunEvent) {
        let name = event.event_name();
        let Some(phase) = self.state.status.advance(&event) else {
            tracing::warn!(event = name, "Ignoring event after terminal state");
            return;
        };
        if event.is_terminal() {
            tracing::info!(event = name, run_id = ?event.payload().run_id, "Terminal run event");
        } else {
            tracing::debug!(event = name, phase = ?phase, "Run event applied");
        }

        match event {
            RunEvent::RunStarted(p) => self.on_run_started(&p),
            RunEvent::RunResponseContent(p) => self.on_content(&p),
            RunEvent::RunCompleted(p) => self.on_completed(&p),
            RunEvent::RunError(p) => self.on_error(&p),
            RunEvent::ToolCallStarted(p) | RunEvent::ToolCallCompleted(p) => self.on_tool(&p),
            RunEvent::ReasoningStarted(p) | RunEvent::ReasoningCompleted(p) => {
                self.merge_side_fields(&p);
                self.start_segment();
            }
            RunEvent::ReasoningStep(p) => self.on_reasoning_step(&p),
            RunEvent::AccessingKnowledge(p) => self.merge_side_fields(&p),
            RunEvent::MemoryUpdateStarted(_) | RunEvent::MemoryUpdateCompleted(_) => {}
            RunEvent::RunPaused(p) | RunEvent::RunContinued(p) => {
                tracing::info!(event = name, run_id = ?p.run_id, "Run pause state changed");
            }
            RunEvent::RunCancelled(p) => self.on_cancelled(&p),
        }
    }

    /// Finish after the stream closed.
    ///
    /// Without a terminal event the run counts as completed: the streaming
    /// error mark, if any, is removed.
    pub fn finish(mut self) -> RunOutcome {
        if self.result.is_none() {
            tracing::info!("Stream closed without terminal event; treating as completed");
            let open = self.state.conversation.open_or_insert();
            open.streaming_error = false;
            self.complete(&RunEventPayload::default());
        }
        self.state.status.current_chunk = None;
        self.outcome()
    }

    /// Record a failure raised outside the event stream (transport, timeout,
    /// abort). Ignored if the run already ended.
    pub fn fail(&mut self, err: &Error) -> Classification {
        let classification = classify::classify_error(err);
        if self.result.is_some() {
            tracing::warn!(error = %err, "Failure after terminal state; keeping outcome");
            return classification;
        }
        tracing::error!(error = %err, kind = ?classification.kind, "Run failed");
        self.apply_error(classification.clone());
        classification
    }

    fn on_run_started(&mut self, p: &RunEventPayload) {
        self.accumulator.reset();
        self.capture_session(p);
        self.state.status.current_model.clone_from(&p.model);
        self.state.status.error_message = None;
        self.state.conversation.open_or_insert().streaming_error = false;
        tracing::info!(
            session_id = ?p.session_id,
            run_id = ?p.run_id,
            model = ?p.model,
            "Run started"
        );
    }

    fn on_content(&mut self, p: &RunEventPayload) {
        self.capture_session(p);
        if let Some(text) = p.content_text() {
            let open = self.state.conversation.open_or_insert();
            let unique = self.accumulator.apply(&mut open.content, text);
            self.state.status.current_chunk = Some(unique);
        } else if p.content.is_some() {
            tracing::debug!("Structured content in content event; deferring to completion");
        }
        if p.model.is_some() {
            self.state.status.current_model.clone_from(&p.model);
        }
        self.merge_side_fields(p);
    }

    fn on_tool(&mut self, p: &RunEventPayload) {
        self.merge_side_fields(p);
        let tool = p
            .tool
            .clone()
            .or_else(|| p.tools.as_ref().and_then(|t| t.last().cloned()));
        if let Some(tool) = tool {
            tracing::info!(tool = %tool.tool_name, tool_call_id = ?tool.tool_call_id, "Tool call");
            self.state.status.tool_name = Some(tool.tool_name.clone());
            self.state.conversation.open_or_insert().upsert_tool_call(tool);
        }
        self.start_segment();
    }

    fn on_reasoning_step(&mut self, p: &RunEventPayload) {
        let step = p
            .content
            .as_ref()
            .filter(|c| c.is_object())
            .and_then(|c| serde_json::from_value::<ReasoningStep>(c.clone()).ok());
        let open = self.state.conversation.open_or_insert();
        if let Some(step) = step {
            open.extra_data
                .reasoning_steps
                .get_or_insert_with(Vec::new)
                .push(step);
        }
        self.merge_side_fields(p);
    }

    fn on_completed(&mut self, p: &RunEventPayload) {
        self.merge_side_fields(p);
        let open = self.state.conversation.open_or_insert();
        match &p.content {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                open.content.clone_from(s);
            }
            Some(v @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
                open.content = serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string());
            }
            _ => {}
        }
        self.complete(p);
    }

    /// Finalize content and citations, and mark the run completed.
    fn complete(&mut self, p: &RunEventPayload) {
        let open = self.state.conversation.open_or_insert();
        if open.content.trim().is_empty() {
            tracing::warn!(run_id = ?p.run_id, "Run completed without any content");
            open.content = NO_CONTENT_PLACEHOLDER.to_string();
        }

        // Blank completion content means the streamed text is the answer.
        let content_value = p
            .content
            .clone()
            .filter(|c| match c {
                serde_json::Value::String(s) => !s.trim().is_empty(),
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => true,
                _ => false,
            })
            .unwrap_or_else(|| serde_json::Value::String(open.content.clone()));
        let references = p
            .extra_data
            .as_ref()
            .and_then(|e| e.references.as_deref())
            .filter(|r| !r.is_empty())
            .or(open.extra_data.references.as_deref());
        let normalized = citations::extract(&CitationInput {
            citations: p.citations.as_ref(),
            references,
            content: Some(&content_value),
        });

        if !normalized.citations.is_empty() {
            open.extra_data.citations = Some(normalized.citations.clone());
        }
        let status = &mut self.state.status;
        status.citations = normalized.citations;
        status.citations_count = normalized.count;
        if p.metrics.is_some() {
            status.processing_metrics.clone_from(&p.metrics);
        }
        status.set_phase(StreamPhase::Completed);
        self.result = Some(RunResult::Completed);

        tracing::info!(
            content_length = open.content.len(),
            citations = status.citations_count,
            tool_calls = open.tool_calls.len(),
            "Run completed"
        );
    }

    fn on_error(&mut self, p: &RunEventPayload) {
        let text = p.error_text();
        let classification = classify::classify_text(&text, p.status_code());
        tracing::error!(
            status = ?classification.status,
            invalidate_session = classification.invalidate_session,
            error = %text,
            "Run error event"
        );
        self.apply_error(classification);
    }

    fn apply_error(&mut self, classification: Classification) {
        self.state
            .conversation
            .open_or_insert()
            .mark_error(classification.user_message.clone());
        self.state.status.error_message = Some(classification.user_message.clone());
        self.state.status.set_phase(StreamPhase::Errored);
        if classification.invalidate_session {
            self.state.invalidate_session();
        }
        self.result = Some(RunResult::Errored(classification));
    }

    fn on_cancelled(&mut self, p: &RunEventPayload) {
        let reason = p.reason.clone().or_else(|| p.content_text().map(ToString::to_string));
        tracing::info!(reason = ?reason, "Run cancelled by server");
        let open = self.state.conversation.open_or_insert();
        if open.content.trim().is_empty() {
            open.content = CANCELLED_PLACEHOLDER.to_string();
        }
        self.result = Some(RunResult::Cancelled { reason });
    }

    fn capture_session(&mut self, p: &RunEventPayload) {
        let Some(session_id) = p.session_id.as_deref().filter(|s| !s.is_empty()) else {
            return;
        };
        if self.state.session.current() == Some(session_id) {
            return;
        }
        self.state.session.init(session_id);
        let record = SessionRecord::new(session_id, &self.session_title);
        if let Err(e) = self.state.sessions.insert_if_absent(record) {
            tracing::error!(session_id = %session_id, error = %e, "Failed to record session");
        }
    }

    /// Overwrite side fields of the open message with non-empty event values.
    fn merge_side_fields(&mut self, p: &RunEventPayload) {
        let open = self.state.conversation.open_or_insert();
        merge_list(&mut open.tool_calls, p.tools.as_ref());
        merge_list(&mut open.images, p.images.as_ref());
        merge_list(&mut open.videos, p.videos.as_ref());
        merge_list(&mut open.audio, p.audio.as_ref());

        let Some(extra) = &p.extra_data else {
            return;
        };
        if extra.metadata.as_ref().is_some_and(|m| !m.is_null()) {
            open.extra_data.metadata.clone_from(&extra.metadata);
        }
        if extra.reasoning_steps.as_ref().is_some_and(|s| !s.is_empty()) {
            open.extra_data.reasoning_steps.clone_from(&extra.reasoning_steps);
        }
        if let Some(refs) = extra.references.as_ref().filter(|r| !r.is_empty()) {
            open.extra_data.references = Some(refs.clone());
            self.state.status.references.clone_from(refs);
        }
    }

    fn start_segment(&mut self) {
        let open = self.state.conversation.open_or_insert();
        self.accumulator.start_segment(&open.content);
    }

    fn outcome(&mut self) -> RunOutcome {
        let session_id = self.state.session.current().map(ToString::to_string);
        let citations = self.state.status.citations.clone();
        let citations_count = self.state.status.citations_count;
        let open: &ChatMessage = self.state.conversation.open_or_insert();
        RunOutcome {
            content: open.content.clone(),
            tool_calls: open.tool_calls.clone(),
            citations,
            citations_count,
            session_id,
            result: self.result.clone().unwrap_or(RunResult::Completed),
        }
    }
}

fn merge_list<T: Clone>(target: &mut Vec<T>, incoming: Option<&Vec<T>>) {
    if let Some(items) = incoming.filter(|i| !i.is_empty()) {
        target.clone_from(items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> RunEvent {
        RunEvent::decode(&value.to_string()).unwrap().unwrap()
    }

    fn ingest(state: &mut ChatState, events: Vec<serde_json::Value>) -> RunOutcome {
        state.conversation.begin_exchange("pertanyaan uji");
        let mut ingestor = StreamIngestor::new(state, OverlapPolicy::default(), "pertanyaan uji");
        for e in events {
            ingestor.apply(event(e));
        }
        ingestor.finish()
    }

    #[test]
    fn test_scenario_completed_with_empty_content() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({"event": "RunStarted", "session_id": "s-1"}),
                json!({"event": "RunResponseContent", "content": "Sanksi"}),
                json!({"event": "RunResponseContent", "content": "Sanksi untuk..."}),
                json!({"event": "RunCompleted", "content": ""}),
            ],
        );
        assert_eq!(outcome.content, "Sanksi untuk...");
        assert!(state.status.has_completed());
        assert_eq!(state.session.current(), Some("s-1"));
        assert_eq!(state.sessions.records()[0].title, "pertanyaan uji");
    }

    #[test]
    fn test_exact_resend() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({"event": "RunResponseContent", "content": "A"}),
                json!({"event": "RunResponseContent", "content": "AB"}),
                json!({"event": "RunResponseContent", "content": "AB"}),
                json!({"event": "RunCompleted"}),
            ],
        );
        assert_eq!(outcome.content, "AB");
    }

    #[test]
    fn test_completed_content_overrides_accumulated() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({"event": "RunResponseContent", "content": "draf"}),
                json!({"event": "RunCompleted", "content": "Jawaban final"}),
            ],
        );
        assert_eq!(outcome.content, "Jawaban final");
    }

    #[test]
    fn test_structured_completion_is_serialized() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![json!({"event": "RunCompleted", "content": {"pasal": 120}})],
        );
        assert!(outcome.content.contains("\"pasal\": 120"));
    }

    #[test]
    fn test_empty_result_placeholder() {
        let mut state = ChatState::default();
        let outcome = ingest(&mut state, vec![json!({"event": "RunCompleted"})]);
        assert_eq!(outcome.content, NO_CONTENT_PLACEHOLDER);
        assert!(outcome.is_completed());
    }

    #[test]
    fn test_stream_close_without_terminal() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({"event": "RunStarted"}),
                json!({"event": "RunResponseContent", "content": "X"}),
            ],
        );
        assert_eq!(outcome.content, "X");
        assert!(!state.conversation.last().unwrap().streaming_error);
        assert!(state.status.has_completed());
    }

    #[test]
    fn test_error_400_invalidates_session() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({"event": "RunStarted", "session_id": "s-bad"}),
                json!({
                    "event": "RunError",
                    "content": "<Response [400]> contents.parts must not be empty"
                }),
            ],
        );
        assert!(outcome.is_error());
        assert_eq!(state.session.current(), None);
        assert!(!state.sessions.contains("s-bad"));
        let last = state.conversation.last().unwrap();
        assert!(last.streaming_error);
        assert!(!state.status.has_completed());
    }

    #[test]
    fn test_error_with_mistyped_side_field() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({"event": "RunStarted", "session_id": "s-tanggal"}),
                json!({
                    "event": "RunError",
                    "content": "<Response [400]> contents.parts must not be empty",
                    "created_at": "2025-01-01T00:00:00Z",
                    "metrics": null,
                    "tools": {"bukan": "daftar"}
                }),
            ],
        );
        assert!(outcome.is_error());
        assert!(state.status.has_errored());
        assert_eq!(state.session.current(), None);
        assert!(!state.sessions.contains("s-tanggal"));
    }

    #[test]
    fn test_empty_buffer_between_deltas() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({"event": "RunStarted"}),
                json!({"event": "RunResponseContent", "content": "Sanksi"}),
                json!({"event": "RunResponseContent", "content": ""}),
                json!({"event": "RunResponseContent", "content": "Sanksi untuk..."}),
                json!({"event": "RunCompleted", "content": ""}),
            ],
        );
        assert_eq!(outcome.content, "Sanksi untuk...");
    }

    #[test]
    fn test_embedded_chunk_counted_from_streamed_text() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({
                    "event": "RunResponseContent",
                    "content": r#"Hasil: {"content": "Pasal 120 ayat 1", "meta_data": {"chunk": 2}} selesai."#
                }),
                json!({"event": "RunCompleted", "content": ""}),
            ],
        );
        assert!(outcome.is_completed());
        assert_eq!(outcome.citations_count, 1);
    }

    #[test]
    fn test_terminal_states_are_exclusive() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({"event": "RunCancelled", "reason": "stop"}),
                json!({"event": "RunCompleted", "content": "telat"}),
                json!({"event": "RunError", "content": "<Response [500]>"}),
            ],
        );
        assert!(matches!(outcome.result, RunResult::Cancelled { .. }));
        let flags = [
            state.status.has_completed(),
            state.conversation.last().unwrap().streaming_error,
            state.status.is_cancelled(),
        ];
        assert_eq!(flags.iter().filter(|f| **f).count(), 1);
    }

    #[test]
    fn test_citations_frozen_on_completion() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({"event": "RunResponseContent", "content": "Menurut UU"}),
                json!({
                    "event": "RunCompleted",
                    "citations": [{"title": "UU 20/2014", "url": "https://peraturan.go.id/uu-20"}],
                    "extra_data": {"references": [{"name": "lain.pdf", "content": "x"}]}
                }),
            ],
        );
        assert_eq!(outcome.citations_count, 1);
        assert_eq!(outcome.citations[0].title, "UU 20/2014");
        let frozen = state.conversation.last().unwrap().extra_data.citations.clone();
        assert_eq!(frozen.unwrap(), outcome.citations);
    }

    #[test]
    fn test_tool_calls_and_segments() {
        let mut state = ChatState::default();
        let outcome = ingest(
            &mut state,
            vec![
                json!({"event": "RunStarted"}),
                json!({"event": "RunResponseContent", "content": "Mencari. "}),
                json!({"event": "ToolCallStarted", "tool": {"tool_call_id": "t1", "tool_name": "cari_putusan"}}),
                json!({"event": "ToolCallCompleted", "tool": {"tool_call_id": "t1", "tool_name": "cari_putusan", "content": "2 hasil"}}),
                json!({"event": "RunResponseContent", "content": "Mencari. "}),
                json!({"event": "RunCompleted"}),
            ],
        );
        // After a tool boundary the same text is new output, not a resend.
        assert_eq!(outcome.content, "Mencari. Mencari. ");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(state.status.tool_name.as_deref(), Some("cari_putusan"));
    }

    #[test]
    fn test_reasoning_steps_collected() {
        let mut state = ChatState::default();
        ingest(
            &mut state,
            vec![
                json!({"event": "ReasoningStarted"}),
                json!({"event": "ReasoningStep", "content": {"title": "Identifikasi pasal", "confidence": 0.8}}),
                json!({"event": "ReasoningCompleted"}),
                json!({"event": "RunCompleted", "content": "ok"}),
            ],
        );
        let steps = state
            .conversation
            .last()
            .unwrap()
            .extra_data
            .reasoning_steps
            .clone()
            .unwrap();
        assert_eq!(steps[0].title.as_deref(), Some("Identifikasi pasal"));
    }

    #[test]
    fn test_fail_marks_open_message() {
        let mut state = ChatState::default();
        state.conversation.begin_exchange("halo agen");
        let mut ingestor = StreamIngestor::new(&mut state, OverlapPolicy::default(), "halo agen");
        let c = ingestor.fail(&Error::StreamRead(std::io::Error::other("reset")));
        assert_eq!(c.user_message, classify::TRANSPORT_MESSAGE);
        let outcome = ingestor.finish();
        assert!(outcome.is_error());
        assert!(state.conversation.last().unwrap().streaming_error);
        assert!(!state.status.has_completed());
    }
}
