//! Content de-duplication for cumulative upstream buffers.
//!
//! The agent backend resends overlapping buffers rather than pure deltas: each
//! content event usually carries everything produced so far in the current
//! segment. The accumulator strips the previously seen buffer as a prefix and
//! appends only the new suffix.

use serde::Deserialize;

/// What to do when a buffer does not extend the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Treat the buffer as a restarted segment and replace that segment's text.
    ReplaceOnReset,
    /// Append the whole buffer. Never loses text, may duplicate it.
    ///
    /// This also covers backends that send plain deltas instead of
    /// cumulative buffers.
    #[default]
    AppendOnReset,
}

/// Folds content buffers into the open message's text.
#[derive(Debug, Clone, Default)]
pub struct ContentAccumulator {
    policy: OverlapPolicy,
    last_seen: String,
    /// Byte offset in the message where the current segment starts.
    segment_start: usize,
}

impl ContentAccumulator {
    #[must_use]
    pub fn new(policy: OverlapPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Apply `incoming` to `content` and return the text that was appended.
    ///
    /// With [`OverlapPolicy::ReplaceOnReset`] a non-extending buffer truncates
    /// `content` back to the segment start before appending; the returned
    /// string is then the full new segment.
    ///
    /// An empty buffer carries nothing and leaves all state untouched.
    pub fn apply(&mut self, content: &mut String, incoming: &str) -> String {
        if incoming.is_empty() {
            return String::new();
        }
        let unique = if let Some(suffix) = incoming.strip_prefix(self.last_seen.as_str()) {
            suffix.to_string()
        } else {
            match self.policy {
                OverlapPolicy::ReplaceOnReset => {
                    tracing::debug!(
                        previous_len = self.last_seen.len(),
                        incoming_len = incoming.len(),
                        "Content buffer does not extend previous; replacing segment"
                    );
                    let start = self.segment_start.min(content.len());
                    content.truncate(start);
                    incoming.to_string()
                }
                OverlapPolicy::AppendOnReset => incoming.to_string(),
            }
        };

        content.push_str(&unique);
        self.last_seen.clear();
        self.last_seen.push_str(incoming);
        unique
    }

    /// Start a new segment at the current end of `content`.
    ///
    /// Called at tool and reasoning boundaries, after which upstream restarts
    /// its cumulative buffer.
    pub fn start_segment(&mut self, content: &str) {
        self.last_seen.clear();
        self.segment_start = content.len();
    }

    /// Forget all state; used when a new run begins.
    pub fn reset(&mut self) {
        self.last_seen.clear();
        self.segment_start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(policy: OverlapPolicy, chunks: &[&str]) -> String {
        let mut acc = ContentAccumulator::new(policy);
        let mut content = String::new();
        for chunk in chunks {
            acc.apply(&mut content, chunk);
        }
        content
    }

    #[test]
    fn test_extending_buffers_equal_longest() {
        let chunks = ["Sanksi", "Sanksi untuk", "Sanksi untuk pelanggaran SNI"];
        assert_eq!(
            fold(OverlapPolicy::ReplaceOnReset, &chunks),
            "Sanksi untuk pelanggaran SNI"
        );
    }

    #[test]
    fn test_exact_resend_is_not_duplicated() {
        assert_eq!(fold(OverlapPolicy::ReplaceOnReset, &["A", "AB", "AB"]), "AB");
        assert_eq!(fold(OverlapPolicy::AppendOnReset, &["A", "AB", "AB"]), "AB");
    }

    #[test]
    fn test_reset_buffer_policies() {
        assert_eq!(fold(OverlapPolicy::ReplaceOnReset, &["Halo", "Hai"]), "Hai");
        assert_eq!(fold(OverlapPolicy::AppendOnReset, &["Halo", "Hai"]), "HaloHai");
    }

    #[test]
    fn test_segment_boundary_preserves_earlier_text() {
        let mut acc = ContentAccumulator::new(OverlapPolicy::ReplaceOnReset);
        let mut content = String::new();
        acc.apply(&mut content, "Mencari pasal. ");
        acc.start_segment(&content);
        acc.apply(&mut content, "Ditemukan");
        acc.apply(&mut content, "Ditemukan 2 pasal");
        assert_eq!(content, "Mencari pasal. Ditemukan 2 pasal");

        // A reset inside the second segment never eats the first one.
        acc.apply(&mut content, "Ada");
        assert_eq!(content, "Mencari pasal. Ada");
    }

    #[test]
    fn test_plain_deltas_append_by_default() {
        assert_eq!(
            fold(OverlapPolicy::default(), &["Sanksi", " untuk", " pelanggaran"]),
            "Sanksi untuk pelanggaran"
        );
    }

    #[test]
    fn test_empty_buffer_keeps_prefix_state() {
        let chunks = ["Sanksi", "", "Sanksi untuk..."];
        assert_eq!(fold(OverlapPolicy::AppendOnReset, &chunks), "Sanksi untuk...");
        assert_eq!(fold(OverlapPolicy::ReplaceOnReset, &chunks), "Sanksi untuk...");
    }

    #[test]
    fn test_apply_returns_unique_suffix() {
        let mut acc = ContentAccumulator::default();
        let mut content = String::new();
        assert_eq!(acc.apply(&mut content, "ab"), "ab");
        assert_eq!(acc.apply(&mut content, "abcd"), "cd");
    }
}
