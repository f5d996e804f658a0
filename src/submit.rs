//! Submission entry point.
//!
//! [`ChatController`] owns the conversation, status, and session state and
//! runs one submission at a time: validate, append the exchange, open the
//! transport stream, and feed every event to a [`StreamIngestor`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::client::{AgentTransport, Attachment, RunRequest};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::message::Conversation;
use crate::session::{SessionState, SessionStore};
use crate::stream::accumulator::OverlapPolicy;
use crate::stream::status::StreamingStatus;
use crate::stream::{ChatState, RunOutcome, StreamIngestor};

/// Sent in place of a too-short message when files are attached.
pub const DEFAULT_ATTACHMENT_MESSAGE: &str = "Tolong analisis file yang saya lampirkan.";

/// Default wall-clock limit for one run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Resolves the investigator's user id.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_id(&self) -> Result<String>;
}

/// Identity taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    #[must_use]
    pub fn new(user_id: Option<String>) -> Self {
        Self { user_id }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentity {
    async fn user_id(&self) -> Result<String> {
        self.user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::Validation("user id tidak dikonfigurasi".to_string()))
    }
}

/// Runtime settings for submissions.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub agent_id: String,
    pub min_message_chars: usize,
    pub overlap_policy: OverlapPolicy,
    pub run_timeout: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            agent_id: "penyidik".to_string(),
            min_message_chars: 3,
            overlap_policy: OverlapPolicy::default(),
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

impl From<&AppConfig> for ChatSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            agent_id: cfg.api.agent_id.clone(),
            min_message_chars: cfg.chat.min_message_chars,
            overlap_policy: cfg.chat.overlap_policy,
            run_timeout: Duration::from_secs(cfg.api.timeout_secs),
        }
    }
}

/// What the investigator submitted.
#[derive(Debug, Clone, Default)]
pub struct SubmissionInput {
    pub message: String,
    pub files: Vec<Attachment>,
}

impl SubmissionInput {
    #[must_use]
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            files: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_files(mut self, files: Vec<Attachment>) -> Self {
        self.files = files;
        self
    }
}

/// Aborts the run in flight. Obtained before submitting.
#[derive(Debug, Clone)]
pub struct AbortHandle(CancellationToken);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.cancel();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Clears the streaming flag and retires the abort token on every exit path.
struct StreamingGuard<'a> {
    state: &'a mut ChatState,
    abort_slot: &'a mut CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl<'a> StreamingGuard<'a> {
    fn new(state: &'a mut ChatState, abort_slot: &'a mut CancellationToken) -> Self {
        state.is_streaming = true;
        let cancel_on_drop = abort_slot.clone().drop_guard();
        Self {
            state,
            abort_slot,
            _cancel_on_drop: cancel_on_drop,
        }
    }
}

impl Drop for StreamingGuard<'_> {
    fn drop(&mut self) {
        self.state.is_streaming = false;
        *self.abort_slot = CancellationToken::new();
        tracing::debug!("Streaming cleanup complete");
    }
}

/// Drives submissions against an agent transport.
pub struct ChatController {
    state: ChatState,
    transport: Arc<dyn AgentTransport>,
    identity: Arc<dyn IdentityProvider>,
    settings: ChatSettings,
    /// Token for the next (or current) run.
    abort: CancellationToken,
    /// Generated once when identity resolution fails.
    anonymous_id: Option<String>,
}

impl std::fmt::Debug for ChatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatController")
            .field("state", &self.state)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatController {
    #[must_use]
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        identity: Arc<dyn IdentityProvider>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            state: ChatState::default(),
            transport,
            identity,
            settings,
            abort: CancellationToken::new(),
            anonymous_id: None,
        }
    }

    /// Use a persistent session list.
    #[must_use]
    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.state.sessions = sessions;
        self
    }

    /// Continue an existing session.
    #[must_use]
    pub fn with_session(mut self, session: SessionState) -> Self {
        self.state.session = session;
        self
    }

    #[must_use]
    pub fn state(&self) -> &ChatState {
        &self.state
    }

    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.state.conversation
    }

    #[must_use]
    pub fn status(&self) -> &StreamingStatus {
        &self.state.status
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.state.session.current()
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.state.sessions
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming
    }

    /// Handle that aborts the next run started by this controller.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort.clone())
    }

    /// Drop all messages and reset the status record.
    pub fn clear_history(&mut self) {
        tracing::info!(messages = self.state.conversation.len(), "Clearing chat history");
        self.state.conversation.clear();
        self.state.status.reset();
    }

    /// Forget the current session so the next run opens a new one.
    pub fn new_session(&mut self) {
        if let Some(previous) = self.state.session.clear() {
            tracing::info!(previous_session = %previous, "Starting new session");
        }
    }

    /// Submit a message and stream the agent's reply into the conversation.
    ///
    /// Returns `Err` only for local validation failures, which never reach the
    /// network. Every other failure is written onto the agent message and
    /// reported through [`RunOutcome::result`].
    pub async fn handle_stream_response(
        &mut self,
        input: SubmissionInput,
        agent_id: Option<&str>,
    ) -> Result<RunOutcome> {
        let message = self.prepare_message(&input)?;
        let agent_id = agent_id.unwrap_or(&self.settings.agent_id).to_string();
        let user_id = self.resolve_user_id().await;

        if self.state.conversation.remove_failed_exchange() {
            tracing::debug!("Removed previous failed exchange");
        }
        self.state.conversation.begin_exchange(message.clone());

        let request = RunRequest::new(
            message.clone(),
            agent_id,
            self.state.session.request_value(),
            user_id,
        )
        .with_files(input.files);
        if let Err(e) = request.validate() {
            tracing::warn!(error = %e, "Run request rejected before sending");
            if let Some(open) = self.state.conversation.open_message_mut() {
                open.mark_error(e.to_string());
            }
            return Err(e);
        }

        let token = self.abort.clone();
        let run_timeout = self.settings.run_timeout;
        let policy = self.settings.overlap_policy;
        let transport = Arc::clone(&self.transport);

        let mut guard = StreamingGuard::new(&mut self.state, &mut self.abort);
        let mut ingestor = StreamIngestor::new(&mut *guard.state, policy, &message);

        let run = async {
            tokio::select! {
                () = token.cancelled() => Err(Error::Aborted),
                r = drive(transport.as_ref(), request, &mut ingestor) => r,
            }
        };
        let result = match tokio::time::timeout(run_timeout, run).await {
            Ok(r) => r,
            Err(_elapsed) => Err(Error::Timeout(run_timeout.as_secs())),
        };

        if let Err(e) = result {
            ingestor.fail(&e);
        }
        let outcome = ingestor.finish();
        drop(guard);

        tracing::info!(
            session_id = ?outcome.session_id,
            result = ?outcome.result,
            content_length = outcome.content.len(),
            "Submission finished"
        );
        Ok(outcome)
    }

    fn prepare_message(&self, input: &SubmissionInput) -> Result<String> {
        let trimmed = input.message.trim();
        let min = self.settings.min_message_chars;
        if trimmed.chars().count() >= min {
            return Ok(trimmed.to_string());
        }
        if !input.files.is_empty() {
            return Ok(DEFAULT_ATTACHMENT_MESSAGE.to_string());
        }
        Err(Error::Validation(format!(
            "Pesan terlalu pendek. Tulis minimal {min} karakter."
        )))
    }

    async fn resolve_user_id(&mut self) -> String {
        match self.identity.user_id().await {
            Ok(id) if !id.trim().is_empty() => id,
            other => {
                if let Some(id) = &self.anonymous_id {
                    return id.clone();
                }
                let id = format!("anon-{}", uuid::Uuid::new_v4());
                match other {
                    Err(e) => tracing::warn!(error = %e, user_id = %id, "Identity unavailable; using anonymous id"),
                    Ok(_) => tracing::warn!(user_id = %id, "Empty identity; using anonymous id"),
                }
                self.anonymous_id = Some(id.clone());
                id
            }
        }
    }
}

/// Open the run and apply events until the stream ends or the run is terminal.
async fn drive(
    transport: &dyn AgentTransport,
    request: RunRequest,
    ingestor: &mut StreamIngestor<'_>,
) -> Result<()> {
    let mut events = transport.open_run(request).await?;
    while let Some(event) = events.next().await {
        ingestor.apply(event?);
        if ingestor.is_terminal() {
            tracing::debug!("Terminal event received; closing stream");
            break;
        }
    }
    Ok(())
}
