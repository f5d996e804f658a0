//! HTTP transport for agent runs.
//!
//! [`PlaygroundClient`] posts a multipart run request to the agent playground
//! endpoint and turns the streamed response body into [`RunEvent`]s.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use url::Url;

use crate::error::{Error, Result};
use crate::stream::codec::JsonFrameCodec;
use crate::stream::events::RunEvent;

/// Stream of decoded run events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RunEvent>> + Send>>;

/// A file sent along with a run request.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl Attachment {
    /// Build an attachment from memory, guessing the MIME type from the name.
    #[must_use]
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            file_name,
            mime_type,
            data: data.into(),
        }
    }

    /// Read an attachment from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map_or_else(|| "lampiran".to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self::new(file_name, data))
    }
}

/// Outgoing run request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub message: String,
    pub agent_id: String,
    pub stream: bool,
    pub monitor: bool,
    /// Empty asks the backend to open a new session.
    pub session_id: String,
    pub user_id: String,
    pub files: Vec<Attachment>,
}

impl RunRequest {
    /// Streaming request with the fixed `stream=true, monitor=false` flags.
    #[must_use]
    pub fn new(
        message: impl Into<String>,
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            agent_id: agent_id.into(),
            stream: true,
            monitor: false,
            session_id: session_id.into(),
            user_id: user_id.into(),
            files: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_files(mut self, files: Vec<Attachment>) -> Self {
        self.files = files;
        self
    }

    /// Check required fields. `session_id` may be empty.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("message", &self.message),
            ("agent_id", &self.agent_id),
            ("user_id", &self.user_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "Kolom wajib `{field}` kosong; permintaan tidak dikirim."
                )));
            }
        }
        if !self.stream {
            return Err(Error::Validation(
                "Permintaan harus menggunakan mode streaming.".to_string(),
            ));
        }
        Ok(())
    }

    fn into_form(self) -> Result<Form> {
        let mut form = Form::new()
            .text("message", self.message)
            .text("agent_id", self.agent_id)
            .text("stream", self.stream.to_string())
            .text("monitor", self.monitor.to_string())
            .text("session_id", self.session_id)
            .text("user_id", self.user_id);
        for file in self.files {
            let part = Part::bytes(file.data.to_vec())
                .file_name(file.file_name)
                .mime_str(&file.mime_type)?;
            form = form.part("files", part);
        }
        Ok(form)
    }
}

/// Opens agent runs and yields their events.
#[async_trait::async_trait]
pub trait AgentTransport: Send + Sync {
    /// Start a run.
    ///
    /// Fails before yielding anything when the request cannot be sent or the
    /// service answers with a non-success status. Errors inside the stream
    /// are transport failures of a run already in progress.
    async fn open_run(&self, req: RunRequest) -> Result<EventStream>;
}

/// Transport for the agent playground HTTP API.
#[derive(Debug, Clone)]
pub struct PlaygroundClient {
    http: reqwest::Client,
    base_url: Url,
}

impl PlaygroundClient {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    /// `{base}/v1/playground/agents/{agent_id}/runs`
    pub fn runs_url(&self, agent_id: &str) -> Result<Url> {
        let endpoint = format!(
            "{}/v1/playground/agents/{}/runs",
            self.base_url.as_str().trim_end_matches('/'),
            agent_id
        );
        Ok(Url::parse(&endpoint)?)
    }
}

#[async_trait::async_trait]
impl AgentTransport for PlaygroundClient {
    async fn open_run(&self, req: RunRequest) -> Result<EventStream> {
        req.validate()?;
        let url = self.runs_url(&req.agent_id)?;
        tracing::info!(
            url = %url,
            session_id = %req.session_id,
            files = req.files.len(),
            "Opening agent run"
        );

        let resp = self.http.post(url).multipart(req.into_form()?).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %message, "Agent run rejected");
            return Err(Error::ServerStatus {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));
        Ok(Box::pin(decode_events(body)))
    }
}

/// Decode a raw response body into run events.
///
/// Unknown event tags are dropped; malformed frames are logged and skipped.
pub fn decode_events<S>(body: S) -> impl Stream<Item = Result<RunEvent>> + Send
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    async_stream::try_stream! {
        let frames = FramedRead::new(StreamReader::new(body), JsonFrameCodec::new());
        futures::pin_mut!(frames);
        while let Some(frame) = frames.next().await {
            let frame = frame.map_err(|e| match e {
                Error::Io(io) => Error::StreamRead(io),
                other => other,
            })?;
            match RunEvent::decode(&frame) {
                Ok(Some(event)) => yield event,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, frame_len = frame.len(), "Skipping malformed event frame");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures::stream::iter(
            parts
                .iter()
                .copied()
                .map(|p: &'static str| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_decode_events_skips_bad_frames() {
        let body = chunks(&[
            "data: {\"event\":\"RunStarted\",\"session_id\":\"s\"}\n\n",
            "{\"event\":\"Mystery\"}{\"event\":\"RunResp",
            "onseContent\",\"content\":\"A\"}\n",
            "{\"event\":42}\n",
            "{\"event\":\"RunCompleted\"}",
        ]);
        let events: Vec<_> = decode_events(body).collect().await;
        let names: Vec<_> = events
            .iter()
            .map(|e| e.as_ref().unwrap().event_name())
            .collect();
        assert_eq!(names, ["RunStarted", "RunResponseContent", "RunCompleted"]);
    }

    #[tokio::test]
    async fn test_read_failure_is_stream_error() {
        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"event\":\"RunStarted\"}")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let events: Vec<_> = decode_events(body).collect().await;
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(Error::StreamRead(_))));
    }

    #[test]
    fn test_validate_required_fields() {
        let ok = RunRequest::new("halo", "agen", "", "u-1");
        assert!(ok.validate().is_ok());

        let missing_user = RunRequest::new("halo", "agen", "", " ");
        assert!(missing_user.validate().unwrap_err().is_validation());

        let missing_agent = RunRequest::new("halo", "", "s-1", "u-1");
        assert!(missing_agent.validate().is_err());
    }

    #[test]
    fn test_runs_url() {
        let client = PlaygroundClient::new("http://localhost:7777/").unwrap();
        assert_eq!(
            client.runs_url("penyidik").unwrap().as_str(),
            "http://localhost:7777/v1/playground/agents/penyidik/runs"
        );
    }

    #[test]
    fn test_attachment_mime_guess() {
        let a = Attachment::new("bukti.pdf", b"%PDF".to_vec());
        assert_eq!(a.mime_type, "application/pdf");
        let b = Attachment::new("catatan", b"x".to_vec());
        assert_eq!(b.mime_type, "application/octet-stream");
    }
}
