//! Session tracking.
//!
//! The backend identifies a conversation by an opaque session id. This module
//! keeps that id as explicit state owned by the caller, plus a persistent list
//! of known sessions.
//!
//! # Architecture
//!
//! - [`SessionState`]: the session the next run continues (or none)
//! - [`SessionStore`]: `{session_id, title, created_at}` records, newest first
//!
//! # Example
//!
//! ```rust
//! use penyidik_ai::session::{SessionRecord, SessionState, SessionStore};
//!
//! let mut store = SessionStore::in_memory();
//! let mut state = SessionState::new();
//!
//! state.init("sess-1");
//! store.insert_if_absent(SessionRecord::new("sess-1", "Halo")).unwrap();
//! assert_eq!(store.len(), 1);
//! ```

mod state;
mod store;

pub use state::SessionState;
pub use store::{SessionRecord, SessionStore};
