//! Penyidik AI streaming client
//!
//! Client side of the investigator assistant: submits a question to an agent
//! run endpoint, ingests the streamed run events, and reconciles them into a
//! conversation with tool calls, reasoning steps, and normalized citations.
//!
//! # Architecture
//!
//! - **Transport**: multipart POST, response body split into JSON frames
//! - **Ingestion**: closed event model folded into the open agent message
//! - **Status**: single-phase state machine driving progress indicators
//! - **Sessions**: explicit current-session state plus a persistent list
//!
//! # Modules
//!
//! - [`client`]: transport trait and the playground HTTP client
//! - [`stream`]: event model, frame codec, and the stream ingestor
//! - [`submit`]: submission entry point, abort, and timeout handling
//! - [`message`]: conversation messages
//! - [`session`]: session state and store
//! - [`config`]: layered configuration

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod stream;
pub mod submit;

pub use client::{AgentTransport, Attachment, PlaygroundClient, RunRequest};
pub use error::{Error, Result};
pub use stream::{ChatState, RunOutcome, RunResult, StreamIngestor};
pub use submit::{ChatController, ChatSettings, IdentityProvider, StaticIdentity, SubmissionInput};
