//! Frame codec for the agent-run response body.
//!
//! The playground endpoint is not consistent about framing: depending on the
//! deployment the body is SSE (`data: {...}\n\n`), newline-delimited JSON, or
//! JSON objects written back to back with no separator at all. [`JsonFrameCodec`]
//! accepts all three by scanning for balanced top-level objects and skipping
//! SSE field lines it does not need.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Splits a byte stream into complete JSON object texts.
#[derive(Debug, Default)]
pub struct JsonFrameCodec {
    /// Bytes of the current object already scanned without finding its end.
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonFrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn reset_scan(&mut self) {
        self.scanned = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    /// Drop whitespace, SSE prefixes, and non-JSON lines from the front of `src`.
    ///
    /// Returns `false` when more input is needed to decide what the front is.
    fn skip_preamble(src: &mut BytesMut) -> bool {
        loop {
            let ws = src
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            src.advance(ws);

            match src.first() {
                None => return false,
                Some(b'{') => return true,
                Some(_) => {}
            }

            if src.starts_with(b"data:") {
                src.advance(b"data:".len());
                continue;
            }

            // `event:`, `id:`, `retry:`, comments, `[DONE]`, or stray text:
            // discard up to the end of the line.
            match src.iter().position(|b| *b == b'\n') {
                Some(nl) => {
                    let line = String::from_utf8_lossy(&src[..nl]).trim().to_string();
                    if !line.is_empty() && !is_sse_field(&line) && line != "[DONE]" {
                        tracing::debug!(line = %line, "Skipping non-JSON line in run stream");
                    }
                    src.advance(nl + 1);
                }
                // Wait for the rest of the line; it may still turn into `data:`.
                None => return false,
            }
        }
    }
}

/// Join a multi-line SSE event back into one JSON text by dropping the
/// `data:` prefix of each continuation line. JSON strings cannot hold raw
/// newlines, so every line start lies outside a string.
fn strip_continuations(frame: &str) -> String {
    if !frame.contains('\n') {
        return frame.to_string();
    }
    frame
        .split('\n')
        .map(|line| {
            let trimmed = line.trim_start();
            trimmed
                .strip_prefix("data:")
                .map_or(line, |rest| rest.strip_prefix(' ').unwrap_or(rest))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_sse_field(line: &str) -> bool {
    line.starts_with(':')
        || line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
}

impl Decoder for JsonFrameCodec {
    type Item = String;
    type Error = crate::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.scanned == 0 && !Self::skip_preamble(src) {
            return Ok(None);
        }

        let mut end = None;
        for (offset, byte) in src[self.scanned..].iter().enumerate() {
            let idx = self.scanned + offset;
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if *byte == b'\\' {
                    self.escaped = true;
                } else if *byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        end = Some(idx + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(end) => {
                let frame = src.split_to(end);
                self.reset_scan();
                Ok(Some(strip_continuations(&String::from_utf8_lossy(&frame))))
            }
            None => {
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        let leftover = String::from_utf8_lossy(src).trim().to_string();
        if !leftover.is_empty() && leftover != "[DONE]" {
            tracing::warn!(
                bytes = leftover.len(),
                "Run stream closed with an incomplete frame; discarding"
            );
        }
        src.clear();
        self.reset_scan();
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(input: &str) -> Vec<String> {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame);
        }
        if let Some(frame) = codec.decode_eof(&mut buf).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn test_concatenated_objects() {
        let frames = drain(r#"{"event":"RunStarted"}{"event":"RunCompleted","content":"a}b"}"#);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], r#"{"event":"RunCompleted","content":"a}b"}"#);
    }

    #[test]
    fn test_sse_framing() {
        let frames = drain(
            "event: message\ndata: {\"event\":\"RunStarted\"}\n\n: keepalive\ndata: [DONE]\n\n",
        );
        assert_eq!(frames, vec![r#"{"event":"RunStarted"}"#.to_string()]);
    }

    #[test]
    fn test_ndjson_with_nested_and_escapes() {
        let frames = drain(
            "{\"a\":{\"b\":[1,2]},\"s\":\"q\\\"{\"}\n{\"event\":\"RunPaused\"}\n",
        );
        assert_eq!(frames.len(), 2);
        assert!(frames[0].ends_with("\"}"));
    }

    #[test]
    fn test_object_split_across_reads() {
        let mut codec = JsonFrameCodec::new();
        let mut buf = BytesMut::from(&b"data: {\"event\":\"RunRes"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ponseContent\",\"content\":\"Sanksi\"}\n\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.contains("Sanksi"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_multi_line_data_event() {
        let frames = drain(
            "data: {\"event\":\"RunResponseContent\",\ndata: \"content\":\"baris: data: tetap\"\ndata:}\n\n",
        );
        assert_eq!(frames.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["event"], "RunResponseContent");
        assert_eq!(value["content"], "baris: data: tetap");
    }

    #[test]
    fn test_truncated_tail_is_dropped() {
        let frames = drain(r#"{"event":"RunStarted"}{"event":"RunRes"#);
        assert_eq!(frames.len(), 1);
    }
}
