//! Wire Framing
//!
//! Each message is `<decimal byte length>:<json payload>`, with messages
//! concatenated back to back. Decoding buffers partial reads; any malformed
//! frame is fatal for the connection and the buffer is never resynchronized.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Default upper bound on a single payload (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 20;

/// Longest accepted length header, in digits.
const MAX_HEADER_DIGITS: usize = 20;

/// Framing errors. All of them end the connection.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Length header is empty, not decimal, or too long.
    #[error("Invalid length header {0:?}")]
    InvalidHeader(String),

    /// Declared payload exceeds the configured limit.
    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Declared size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Payload is not valid JSON.
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Incremental decoder for one connection's inbound byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame: usize,
    failed: bool,
}

impl FrameDecoder {
    /// Create a decoder with a payload size limit.
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
            failed: false,
        }
    }

    /// Append bytes from one read.
    pub fn extend(&mut self, chunk: &[u8]) {
        if !self.failed {
            self.buffer.extend_from_slice(chunk);
        }
    }

    /// Bytes buffered but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete message, if one is buffered.
    ///
    /// After an error the buffer is discarded and every later call returns
    /// `Ok(None)`.
    pub fn next_message(&mut self) -> Result<Option<Value>, FrameError> {
        if self.failed {
            return Ok(None);
        }
        match self.try_decode() {
            Ok(message) => Ok(message),
            Err(e) => {
                self.failed = true;
                self.buffer = Vec::new();
                Err(e)
            }
        }
    }

    /// Iterate over every complete message currently buffered.
    pub fn messages(&mut self) -> impl Iterator<Item = Result<Value, FrameError>> + '_ {
        std::iter::from_fn(move || self.next_message().transpose())
    }

    fn try_decode(&mut self) -> Result<Option<Value>, FrameError> {
        let Some(colon) = self.buffer.iter().position(|b| *b == b':') else {
            if self.buffer.len() > MAX_HEADER_DIGITS || !self.buffer.iter().all(u8::is_ascii_digit) {
                return Err(FrameError::InvalidHeader(header_text(&self.buffer)));
            }
            return Ok(None);
        };

        let header = &self.buffer[..colon];
        if header.is_empty() || header.len() > MAX_HEADER_DIGITS || !header.iter().all(u8::is_ascii_digit) {
            return Err(FrameError::InvalidHeader(header_text(header)));
        }
        let size: usize = header_text(header)
            .parse()
            .map_err(|_| FrameError::InvalidHeader(header_text(header)))?;
        if size > self.max_frame {
            return Err(FrameError::TooLarge {
                size,
                limit: self.max_frame,
            });
        }

        let start = colon + 1;
        let end = start + size;
        if self.buffer.len() < end {
            return Ok(None);
        }

        let message = serde_json::from_slice(&self.buffer[start..end])?;
        self.buffer.drain(..end);
        Ok(Some(message))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

fn header_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_HEADER_DIGITS + 1)]).into_owned()
}

/// Serialize a message into one frame.
pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let payload = serde_json::to_vec(message)?;
    let mut frame = format!("{}:", payload.len()).into_bytes();
    frame.extend_from_slice(&payload);
    Ok(frame)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<Value> {
        decoder.messages().collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame(&json!({"me": "bob"})).unwrap();
        assert_eq!(frame, b"12:{\"me\":\"bob\"}");
    }

    #[test]
    fn test_length_counts_bytes_not_chars() {
        let frame = encode_frame(&json!({"me": "ü"})).unwrap();
        assert!(frame.starts_with(b"11:"));

        let mut decoder = FrameDecoder::default();
        decoder.extend(&frame);
        assert_eq!(decode_all(&mut decoder), vec![json!({"me": "ü"})]);
    }

    #[test]
    fn test_partial_reads_are_buffered() {
        let frame = encode_frame(&json!({"ready": 0})).unwrap();
        let mut decoder = FrameDecoder::default();

        for byte in &frame[..frame.len() - 1] {
            decoder.extend(std::slice::from_ref(byte));
            assert!(decoder.next_message().unwrap().is_none());
        }
        decoder.extend(&frame[frame.len() - 1..]);
        assert_eq!(decoder.next_message().unwrap(), Some(json!({"ready": 0})));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_multiple_messages_in_one_chunk() {
        let mut chunk = encode_frame(&json!({"pass": {}})).unwrap();
        chunk.extend(encode_frame(&json!({"claim": {"source": 0, "target": 1}})).unwrap());
        chunk.extend(b"5:{\"a\"");

        let mut decoder = FrameDecoder::default();
        decoder.extend(&chunk);

        assert_eq!(
            decode_all(&mut decoder),
            vec![json!({"pass": {}}), json!({"claim": {"source": 0, "target": 1}})]
        );
        assert_eq!(decoder.pending(), 6);
    }

    #[test]
    fn test_invalid_header_is_fatal() {
        let mut decoder = FrameDecoder::default();
        decoder.extend(b"x1:{}");
        assert!(matches!(decoder.next_message(), Err(FrameError::InvalidHeader(_))));

        // State is discarded; nothing more is produced.
        decoder.extend(b"2:{}");
        assert!(decoder.next_message().unwrap().is_none());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_negative_and_empty_headers() {
        let mut decoder = FrameDecoder::default();
        decoder.extend(b"-2:{}");
        assert!(decoder.next_message().is_err());

        let mut decoder = FrameDecoder::default();
        decoder.extend(b":{}");
        assert!(decoder.next_message().is_err());
    }

    #[test]
    fn test_garbage_without_colon_detected_early() {
        let mut decoder = FrameDecoder::default();
        decoder.extend(b"{\"me\"");
        assert!(matches!(decoder.next_message(), Err(FrameError::InvalidHeader(_))));

        let mut decoder = FrameDecoder::default();
        decoder.extend(b"123456789012345678901");
        assert!(decoder.next_message().is_err());
    }

    #[test]
    fn test_invalid_json_is_fatal() {
        let mut decoder = FrameDecoder::default();
        decoder.extend(b"3:{x}");
        assert!(matches!(decoder.next_message(), Err(FrameError::Json(_))));
    }

    #[test]
    fn test_zero_length_is_invalid_json() {
        let mut decoder = FrameDecoder::default();
        decoder.extend(b"0:");
        assert!(matches!(decoder.next_message(), Err(FrameError::Json(_))));
    }

    #[test]
    fn test_oversized_frame_rejected_before_payload_arrives() {
        let mut decoder = FrameDecoder::new(16);
        decoder.extend(b"17:");
        assert!(matches!(
            decoder.next_message(),
            Err(FrameError::TooLarge { size: 17, limit: 16 })
        ));
    }
}
