//! Incremental decoder for the streaming generation response.
//!
//! The response body is a sequence of `data: {json}` lines (server-sent event
//! framing). Network chunks do not respect line boundaries, so the decoder
//! keeps the trailing partial line and joins it with the next chunk. Buffering
//! is done on bytes, which also keeps multi-byte characters intact when a
//! chunk splits them.

use super::normalizer::StreamFrame;
use thiserror::Error;

/// Longest line buffered while waiting for its terminator.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Longest excerpt of an offending line kept in an error message.
const EXCERPT_CHARS: usize = 120;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("stream line is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("unrecognized stream line: {0}")]
    UnrecognizedLine(String),

    #[error("malformed frame {excerpt:?}: {source}")]
    MalformedFrame {
        excerpt: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed {event:?} message: {source}")]
    MalformedMessage {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("line exceeds {MAX_LINE_BYTES} bytes without a terminator")]
    LineTooLong,
}

pub(crate) fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(EXCERPT_CHARS).collect();
        cut.push('…');
        cut
    }
}

/// Parse the JSON body of one frame.
pub fn parse_frame(json: &str) -> Result<StreamFrame, DecodeError> {
    serde_json::from_str(json).map_err(|source| DecodeError::MalformedFrame {
        excerpt: excerpt(json),
        source,
    })
}

/// Decode one complete line. `None` for lines that carry no frame.
fn decode_line(raw: &[u8]) -> Option<Result<StreamFrame, DecodeError>> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim_end_matches('\r'),
        Err(e) => return Some(Err(e.into())),
    };

    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }

    let json = if let Some(rest) = line.strip_prefix("data:") {
        rest.strip_prefix(' ').unwrap_or(rest)
    } else if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
    {
        return None;
    } else if line.trim_start().starts_with('{') {
        line
    } else {
        return Some(Err(DecodeError::UnrecognizedLine(excerpt(line))));
    };

    if json.trim().is_empty() {
        return None;
    }
    Some(parse_frame(json))
}

/// Splits a chunked byte stream into decoded frames.
///
/// Frames are returned in arrival order. A malformed line yields an error in
/// its position and decoding continues with the next line.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamFrame, DecodeError>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(frame) = decode_line(&self.buffer[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "Discarding oversized partial stream line"
            );
            self.buffer.clear();
            frames.push(Err(DecodeError::LineTooLong));
        }

        frames
    }

    /// Decode whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<Result<StreamFrame, DecodeError>> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_frames(results: Vec<Result<StreamFrame, DecodeError>>) -> Vec<StreamFrame> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = FrameDecoder::new();

        let first = decoder.push(br#"data: {"type":"it"#);
        assert!(first.is_empty());
        assert!(decoder.pending() > 0);

        let second = decoder.push(
            br#"em","slot_id":"A1","card":{"name":"Dawn"}}
"#,
        );
        let frames = ok_frames(second);

        assert_eq!(frames.len(), 1);
        match &frames[0] {
            StreamFrame::Item(n) => {
                assert_eq!(n.slot_id.as_deref(), Some("A1"));
                assert_eq!(n.item.name, "Dawn");
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_sse_blank_lines_and_comments() {
        let mut decoder = FrameDecoder::new();
        let body = b": keep-alive\r\nevent: message\r\ndata: {\"type\":\"status\",\"message\":\"Starting\"}\r\n\r\ndata: {\"type\":\"complete\"}\n\n";

        let frames = ok_frames(decoder.push(body));

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], StreamFrame::Status { .. }));
        assert!(matches!(frames[1], StreamFrame::Complete { .. }));
    }

    #[test]
    fn test_malformed_frame_does_not_stop_decoding() {
        let mut decoder = FrameDecoder::new();
        let body = b"data: {not json}\ndata: {\"type\":\"mystery\"}\ndata: {\"type\":\"complete\"}\n";

        let results = decoder.push(body);

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], Err(DecodeError::MalformedFrame { .. })));
        assert!(matches!(results[1], Err(DecodeError::MalformedFrame { .. })));
        assert!(matches!(results[2], Ok(StreamFrame::Complete { .. })));
    }

    #[test]
    fn test_multibyte_character_split() {
        let line = "data: {\"type\":\"status\",\"message\":\"Über\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        let frames = ok_frames(decoder.push(&line[split..]));

        assert_eq!(
            frames,
            vec![StreamFrame::Status {
                message: "Über".to_string(),
                theme: None
            }]
        );
    }

    #[test]
    fn test_bare_json_and_unknown_lines() {
        let mut decoder = FrameDecoder::new();
        let results = decoder.push(b"{\"type\":\"complete\"}\nHTTP/1.1 oops\n");

        assert!(matches!(results[0], Ok(StreamFrame::Complete { .. })));
        assert!(matches!(results[1], Err(DecodeError::UnrecognizedLine(_))));
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"complete\"}").is_empty());

        assert!(matches!(
            decoder.finish(),
            Some(Ok(StreamFrame::Complete { .. }))
        ));
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "x".repeat(500);
        assert_eq!(excerpt(&long).chars().count(), EXCERPT_CHARS + 1);
        assert_eq!(excerpt("short"), "short");
    }
}
