//! Run phase tracking and the side-channel status record.
//!
//! The phase is a single enum value, so two "active" indicators can never be
//! on at once. The boolean accessors on [`StreamingStatus`] are derived from it.

use serde::Serialize;

use super::citations::Citation;
use super::events::RunEvent;

/// Current stage of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    #[default]
    Idle,
    Thinking,
    Reasoning,
    CallingTool,
    AccessingKnowledge,
    UpdatingMemory,
    StreamingContent,
    Paused,
    Completed,
    Errored,
    Cancelled,
}

impl StreamPhase {
    /// Completed, errored, and cancelled are final for a run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

/// Status record driving progress indicators.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamingStatus {
    phase: StreamPhase,
    /// Phase to return to after a knowledge lookup.
    #[serde(skip)]
    knowledge_resume: Option<StreamPhase>,
    /// Phase to return to on `RunContinued`. Kept apart from the lookup slot
    /// so a lookup during a pause cannot overwrite it.
    #[serde(skip)]
    pause_resume: Option<StreamPhase>,
    pub citations: Vec<Citation>,
    pub citations_count: usize,
    pub references: Vec<serde_json::Value>,
    pub tool_name: Option<String>,
    pub current_model: Option<String>,
    pub processing_metrics: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Preview of the latest content chunk. Only set while streaming content.
    pub current_chunk: Option<String>,
}

impl StreamingStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Compute and apply the phase change caused by `event`.
    ///
    /// Returns the new phase, or `None` when the run is already terminal and
    /// the event must be ignored.
    pub fn advance(&mut self, event: &RunEvent) -> Option<StreamPhase> {
        if self.phase.is_terminal() {
            return None;
        }

        // A knowledge lookup lasts until the next event of any other kind.
        if self.phase == StreamPhase::AccessingKnowledge
            && !matches!(event, RunEvent::AccessingKnowledge(_))
        {
            self.phase = self.knowledge_resume.take().unwrap_or(StreamPhase::Thinking);
        }

        let next = match event {
            RunEvent::RunStarted(_)
            | RunEvent::ToolCallCompleted(_)
            | RunEvent::ReasoningCompleted(_)
            | RunEvent::MemoryUpdateCompleted(_) => StreamPhase::Thinking,
            RunEvent::ReasoningStarted(_) | RunEvent::ReasoningStep(_) => StreamPhase::Reasoning,
            RunEvent::ToolCallStarted(_) => StreamPhase::CallingTool,
            RunEvent::AccessingKnowledge(_) => {
                if self.phase != StreamPhase::AccessingKnowledge {
                    self.knowledge_resume = Some(self.phase);
                }
                StreamPhase::AccessingKnowledge
            }
            RunEvent::MemoryUpdateStarted(_) => StreamPhase::UpdatingMemory,
            RunEvent::RunPaused(_) => {
                if self.phase != StreamPhase::Paused {
                    self.pause_resume = Some(self.phase);
                }
                StreamPhase::Paused
            }
            RunEvent::RunContinued(_) => {
                if self.phase == StreamPhase::Paused {
                    match self.pause_resume.take() {
                        Some(StreamPhase::Idle) | None => StreamPhase::Thinking,
                        Some(prior) => prior,
                    }
                } else {
                    self.phase
                }
            }
            RunEvent::RunResponseContent(_) => StreamPhase::StreamingContent,
            RunEvent::RunCompleted(_) => StreamPhase::Completed,
            RunEvent::RunError(_) => StreamPhase::Errored,
            RunEvent::RunCancelled(_) => StreamPhase::Cancelled,
        };

        self.set_phase(next);
        Some(next)
    }

    /// Move to `phase`, clearing the content preview when leaving streaming.
    pub fn set_phase(&mut self, phase: StreamPhase) {
        if phase != StreamPhase::StreamingContent {
            self.current_chunk = None;
        }
        if phase.is_terminal() {
            self.knowledge_resume = None;
            self.pause_resume = None;
        }
        self.phase = phase;
    }

    /// Reset for a new run. Citations and metrics from the last run are dropped.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_thinking(&self) -> bool {
        self.phase == StreamPhase::Thinking
    }

    pub fn is_reasoning_active(&self) -> bool {
        self.phase == StreamPhase::Reasoning
    }

    pub fn is_calling_tool(&self) -> bool {
        self.phase == StreamPhase::CallingTool
    }

    pub fn is_accessing_knowledge(&self) -> bool {
        self.phase == StreamPhase::AccessingKnowledge
    }

    pub fn is_memory_update_started(&self) -> bool {
        self.phase == StreamPhase::UpdatingMemory
    }

    pub fn is_paused(&self) -> bool {
        self.phase == StreamPhase::Paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase == StreamPhase::Cancelled
    }

    pub fn has_completed(&self) -> bool {
        self.phase == StreamPhase::Completed
    }

    pub fn has_errored(&self) -> bool {
        self.phase == StreamPhase::Errored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::RunEventPayload;

    fn ev(tag: &str) -> RunEvent {
        RunEvent::from_tag(tag, RunEventPayload::default()).unwrap()
    }

    fn run(tags: &[&str]) -> StreamingStatus {
        let mut status = StreamingStatus::new();
        for tag in tags {
            status.advance(&ev(tag));
        }
        status
    }

    #[test]
    fn test_tool_call_round_trip() {
        let status = run(&["RunStarted", "ToolCallStarted"]);
        assert!(status.is_calling_tool());
        let status = run(&["RunStarted", "ToolCallStarted", "ToolCallCompleted"]);
        assert!(status.is_thinking());
    }

    #[test]
    fn test_accessing_knowledge_reverts_on_next_event() {
        let mut status = run(&["RunStarted", "ReasoningStarted", "AccessingKnowledge"]);
        assert!(status.is_accessing_knowledge());

        // Reverts to reasoning, then the step keeps it there.
        status.advance(&ev("ReasoningStep"));
        assert!(status.is_reasoning_active());
    }

    #[test]
    fn test_pause_resumes_prior_phase() {
        let mut status = run(&["RunStarted", "ToolCallStarted", "RunPaused"]);
        assert!(status.is_paused());
        status.advance(&ev("RunContinued"));
        assert!(status.is_calling_tool());
    }

    #[test]
    fn test_knowledge_lookup_during_pause() {
        let mut status = run(&["RunStarted", "ToolCallStarted", "RunPaused", "AccessingKnowledge"]);
        assert!(status.is_accessing_knowledge());
        status.advance(&ev("RunContinued"));
        assert!(status.is_calling_tool());
    }

    #[test]
    fn test_terminal_is_sticky() {
        let mut status = run(&["RunStarted", "RunCancelled"]);
        assert!(status.is_cancelled());
        assert_eq!(status.advance(&ev("RunCompleted")), None);
        assert!(status.is_cancelled());
        assert!(!status.has_completed());
    }

    #[test]
    fn test_chunk_preview_cleared_on_phase_change() {
        let mut status = run(&["RunStarted", "RunResponseContent"]);
        status.current_chunk = Some("Sanksi".into());
        status.advance(&ev("ToolCallStarted"));
        assert!(status.current_chunk.is_none());
    }

    #[test]
    fn test_memory_update_returns_to_thinking() {
        let status = run(&["RunStarted", "MemoryUpdateStarted"]);
        assert!(status.is_memory_update_started());
        let status = run(&["RunStarted", "MemoryUpdateStarted", "MemoryUpdateCompleted"]);
        assert!(status.is_thinking());
    }
}
