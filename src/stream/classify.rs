//! Error classification and session-invalidation policy.
//!
//! Error events from the agent backend are free text that often embeds the
//! status of an upstream model call (`<Response [400]>`, `status code 429`).
//! [`classify_text`] pulls the status out, picks the user-facing message, and
//! decides whether the session has to be dropped.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::error::Error;

static STATUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"<Response \[(\d{3})\]>",
        r"(?i)status(?:[ _]code)?\s*[:=]?\s*(\d{3})\b",
        r"(?i)\bHTTP(?:/\d(?:\.\d)?)?\s+(\d{3})\b",
        r"(?i)\b(\d{3})\s+(?:Bad Request|Unauthorized|Forbidden|Not Found|Too Many Requests|Internal Server Error|Bad Gateway|Service Unavailable)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid status pattern"))
    .collect()
});

/// Markers of a request whose parameters are permanently broken.
const CORRUPTED_REQUEST_MARKERS: &[&str] = &[
    "invalid argument",
    "invalid_argument",
    "contents.parts must not be empty",
    "empty parts",
];

/// Failure class of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transport,
    ServerStatus,
    Timeout,
    Aborted,
    /// Error text without a recognisable status.
    Unclassified,
}

/// Outcome of classifying an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    /// Localized message shown in place of the failed reply.
    pub user_message: String,
    /// Drop the current session so the next run starts a fresh one.
    pub invalidate_session: bool,
}

/// Message shown for network failures.
pub const TRANSPORT_MESSAGE: &str =
    "Tidak dapat terhubung ke layanan AI. Periksa koneksi Anda dan coba lagi.";

/// Message shown when the client aborts a run.
pub const ABORTED_MESSAGE: &str = "Permintaan dibatalkan.";

/// Find an HTTP status embedded in error text.
#[must_use]
pub fn find_status(text: &str) -> Option<u16> {
    STATUS_PATTERNS.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .filter(|s| (100..600).contains(s))
    })
}

fn has_corruption_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    CORRUPTED_REQUEST_MARKERS.iter().any(|m| lower.contains(m))
}

/// User-facing message for a status code.
#[must_use]
pub fn status_message(status: u16) -> String {
    match status {
        400 => "Permintaan tidak valid. Sesi percakapan telah direset, silakan kirim ulang pertanyaan Anda."
            .to_string(),
        401 => "Sesi autentikasi Anda telah berakhir. Silakan masuk kembali.".to_string(),
        403 => "Akses ditolak. Anda tidak memiliki izin untuk menggunakan agen ini.".to_string(),
        429 => "Terlalu banyak permintaan ke layanan AI. Tunggu beberapa saat lalu coba lagi."
            .to_string(),
        500 => "Terjadi kesalahan pada server AI. Silakan coba lagi nanti.".to_string(),
        s if (400..500).contains(&s) => {
            format!("Permintaan ditolak oleh layanan AI (kode {s}).")
        }
        s if (500..600).contains(&s) => {
            format!("Layanan AI sedang tidak tersedia (kode {s}). Silakan coba lagi nanti.")
        }
        s => format!("Layanan AI mengembalikan status tak terduga (kode {s})."),
    }
}

/// Message for the wall-clock guard.
#[must_use]
pub fn timeout_message(limit: Duration) -> String {
    let minutes = limit.as_secs().div_ceil(60).max(1);
    format!(
        "Waktu pemrosesan habis setelah {minutes} menit. Silakan coba lagi atau persingkat pertanyaan Anda."
    )
}

/// Classify the text of a `RunError` event (or an error response body).
#[must_use]
pub fn classify_text(text: &str, explicit_status: Option<u16>) -> Classification {
    let corrupted = has_corruption_marker(text);
    let status = explicit_status
        .or_else(|| find_status(text))
        .or_else(|| corrupted.then_some(400));

    match status {
        Some(status) => Classification {
            kind: ErrorKind::ServerStatus,
            status: Some(status),
            user_message: status_message(status),
            invalidate_session: (400..500).contains(&status),
        },
        None => {
            let detail: String = text.trim().chars().take(200).collect();
            Classification {
                kind: ErrorKind::Unclassified,
                status: None,
                user_message: if detail.is_empty() {
                    "Terjadi kesalahan saat memproses permintaan.".to_string()
                } else {
                    format!("Terjadi kesalahan saat memproses permintaan: {detail}")
                },
                invalidate_session: false,
            }
        }
    }
}

/// Classify a crate error raised at the submission boundary.
#[must_use]
pub fn classify_error(err: &Error) -> Classification {
    match err {
        Error::Validation(msg) => Classification {
            kind: ErrorKind::Validation,
            status: None,
            user_message: msg.clone(),
            invalidate_session: false,
        },
        Error::ServerStatus { message, .. } => classify_text(message, err.status()),
        Error::Transport(e) if err.status().is_some() => classify_text(&e.to_string(), err.status()),
        Error::Timeout(secs) => Classification {
            kind: ErrorKind::Timeout,
            status: None,
            user_message: timeout_message(Duration::from_secs(*secs)),
            invalidate_session: false,
        },
        Error::Aborted => Classification {
            kind: ErrorKind::Aborted,
            status: None,
            user_message: ABORTED_MESSAGE.to_string(),
            invalidate_session: false,
        },
        _ => Classification {
            kind: ErrorKind::Transport,
            status: None,
            user_message: TRANSPORT_MESSAGE.to_string(),
            invalidate_session: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_parts_400_invalidates() {
        let text = "Error from model: <Response [400]> {\"error\": {\"message\": \"* GenerateContentRequest.contents: contents.parts must not be empty.\"}}";
        let c = classify_text(text, None);
        assert_eq!(c.kind, ErrorKind::ServerStatus);
        assert_eq!(c.status, Some(400));
        assert!(c.invalidate_session);
    }

    #[test]
    fn test_marker_without_status_is_400() {
        let c = classify_text("Request contains an invalid argument.", None);
        assert_eq!(c.status, Some(400));
        assert!(c.invalidate_session);
    }

    #[test]
    fn test_status_variants() {
        assert_eq!(find_status("status code 429 from upstream"), Some(429));
        assert_eq!(find_status("HTTP/1.1 503 Service Unavailable"), Some(503));
        assert_eq!(find_status("401 Unauthorized"), Some(401));
        assert_eq!(find_status("tidak ada kode"), None);
    }

    #[test]
    fn test_distinct_messages_per_status() {
        let codes = [400u16, 401, 403, 429, 500, 404, 502];
        let messages: std::collections::HashSet<_> =
            codes.iter().map(|c| status_message(*c)).collect();
        assert_eq!(messages.len(), codes.len());
    }

    #[test]
    fn test_5xx_keeps_session() {
        let c = classify_text("upstream failed <Response [500]>", None);
        assert!(!c.invalidate_session);
    }

    #[test]
    fn test_classify_timeout_and_abort() {
        let c = classify_error(&Error::Timeout(600));
        assert_eq!(c.kind, ErrorKind::Timeout);
        assert!(c.user_message.contains("10 menit"));
        assert_eq!(classify_error(&Error::Aborted).kind, ErrorKind::Aborted);
    }

    #[test]
    fn test_server_status_error_uses_status() {
        let err = Error::ServerStatus {
            status: 403,
            message: "forbidden".into(),
        };
        assert_eq!(err.status(), Some(403));
        let c = classify_error(&err);
        assert_eq!(c.status, Some(403));
        assert!(c.invalidate_session);
        assert_eq!(classify_error(&Error::Decode("x".into())).kind, ErrorKind::Transport);
    }

    #[test]
    fn test_unclassified_text() {
        let c = classify_text("model overloaded", None);
        assert_eq!(c.kind, ErrorKind::Unclassified);
        assert!(c.user_message.contains("model overloaded"));
    }
}
