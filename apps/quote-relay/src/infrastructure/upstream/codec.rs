//! Stream Codec Module
//!
//! Decodes the upstream `application/stream+json` body: one JSON object per
//! line. Bytes arrive in arbitrary chunks, so partial lines are buffered
//! until their newline shows up.
//!
//! A line holding a JSON array is accepted too and yields one quote per
//! element, which also covers upstreams that answer with a plain
//! `application/json` array.

use crate::application::ports::SourceError;
use crate::domain::quote::Quote;

/// Default limit for a single record, in bytes.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 256 * 1024;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid record format.
    #[error("invalid record format: {0}")]
    InvalidFormat(String),

    /// A record exceeded the configured size limit.
    #[error("record exceeds {limit} bytes")]
    RecordTooLarge {
        /// Configured limit.
        limit: usize,
    },
}

impl From<CodecError> for SourceError {
    fn from(err: CodecError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Line-delimited JSON decoder.
#[derive(Debug)]
pub struct NdjsonCodec {
    buffer: Vec<u8>,
    max_record_bytes: usize,
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_BYTES)
    }
}

impl NdjsonCodec {
    /// Create a codec with the given per-record size limit.
    #[must_use]
    pub const fn new(max_record_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_record_bytes,
        }
    }

    /// Feed a chunk of body bytes and decode every line it completes.
    ///
    /// # Errors
    ///
    /// Returns an error on the first line that fails to decode, or if the
    /// pending partial line grows past the size limit.
    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Quote>, CodecError> {
        let mut quotes = Vec::new();
        self.decode_into(chunk, &mut quotes)?;
        Ok(quotes)
    }

    /// Like [`decode_chunk`](Self::decode_chunk), but appends to `out` as it
    /// goes so records preceding a bad line are kept.
    ///
    /// # Errors
    ///
    /// Same as `decode_chunk`. `out` holds every record decoded before the
    /// failing line.
    pub fn decode_into(&mut self, chunk: &[u8], out: &mut Vec<Quote>) -> Result<(), CodecError> {
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.buffer.is_empty() {
                self.check_len(head.len())?;
                out.extend(decode_line(head)?);
            } else {
                self.check_len(self.buffer.len() + head.len())?;
                self.buffer.extend_from_slice(head);
                let line = std::mem::take(&mut self.buffer);
                out.extend(decode_line(&line)?);
            }
        }

        if !rest.is_empty() {
            self.check_len(self.buffer.len() + rest.len())?;
            self.buffer.extend_from_slice(rest);
        }

        Ok(())
    }

    /// Decode whatever is left once the body has ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailing bytes are not a valid record.
    pub fn finish(&mut self) -> Result<Vec<Quote>, CodecError> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }

    /// Bytes of an incomplete line currently buffered.
    #[must_use]
    pub const fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    const fn check_len(&self, len: usize) -> Result<(), CodecError> {
        if len > self.max_record_bytes {
            return Err(CodecError::RecordTooLarge {
                limit: self.max_record_bytes,
            });
        }
        Ok(())
    }
}

/// Decode a single line into zero or more quotes.
fn decode_line(line: &[u8]) -> Result<Vec<Quote>, CodecError> {
    let trimmed = line.trim_ascii();

    match trimmed.first() {
        None => Ok(vec![]),
        Some(b'{') => Ok(vec![serde_json::from_slice::<Quote>(trimmed)?]),
        Some(b'[') => Ok(serde_json::from_slice::<Vec<Quote>>(trimmed)?),
        Some(_) => {
            let preview = String::from_utf8_lossy(&trimmed[..trimmed.len().min(50)]);
            Err(CodecError::InvalidFormat(format!(
                "expected JSON object or array, got: {preview}..."
            )))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const BODY: &str = concat!(
        "{\"symbol\":\"ABC\",\"price\":10.0}\n",
        "{\"symbol\":\"XYZ\",\"price\":20.5}\n",
        "\r\n",
        "{\"symbol\":\"QRS\",\"price\":1.25}\r\n",
    );

    fn symbols(quotes: &[Quote]) -> Vec<String> {
        quotes
            .iter()
            .map(|q| q.symbol().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn decodes_complete_lines() {
        let mut codec = NdjsonCodec::default();
        let quotes = codec.decode_chunk(BODY.as_bytes()).unwrap();

        assert_eq!(symbols(&quotes), vec!["ABC", "XYZ", "QRS"]);
        assert_eq!(codec.pending_bytes(), 0);
    }

    #[test]
    fn buffers_partial_line() {
        let mut codec = NdjsonCodec::default();

        let first = codec.decode_chunk(b"{\"symbol\":\"AB").unwrap();
        assert!(first.is_empty());
        assert_eq!(codec.pending_bytes(), 13);

        let second = codec.decode_chunk(b"C\",\"price\":1}\n{\"sym").unwrap();
        assert_eq!(symbols(&second), vec!["ABC"]);
        assert_eq!(codec.pending_bytes(), 5);
    }

    #[test]
    fn finish_decodes_unterminated_record() {
        let mut codec = NdjsonCodec::default();
        assert!(codec.decode_chunk(b"{\"symbol\":\"END\"}").unwrap().is_empty());

        let tail = codec.finish().unwrap();
        assert_eq!(symbols(&tail), vec!["END"]);
        assert!(codec.finish().unwrap().is_empty());
    }

    #[test]
    fn array_line_yields_each_element() {
        let mut codec = NdjsonCodec::default();
        let quotes = codec
            .decode_chunk(b"[{\"symbol\":\"A\"},{\"symbol\":\"B\"}]\n")
            .unwrap();
        assert_eq!(symbols(&quotes), vec!["A", "B"]);
    }

    #[test]
    fn multi_line_array_is_rejected() {
        let mut codec = NdjsonCodec::default();
        assert!(codec.decode_chunk(b"[\n").is_err());
    }

    #[test]
    fn malformed_record_is_an_error() {
        let mut codec = NdjsonCodec::default();
        let err = codec.decode_chunk(b"{\"symbol\":\n").unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn decode_into_keeps_records_before_failure() {
        let mut codec = NdjsonCodec::default();
        let mut out = Vec::new();
        let result = codec.decode_into(b"{\"symbol\":\"A\"}\n{\"symbol\":\"B\"}\nnope\n", &mut out);

        assert!(result.is_err());
        assert_eq!(symbols(&out), vec!["A", "B"]);
    }

    #[test]
    fn non_json_line_is_invalid_format() {
        let mut codec = NdjsonCodec::default();
        let err = codec.decode_chunk(b"data: hello\n").unwrap_err();
        assert!(matches!(err, CodecError::InvalidFormat(_)));
    }

    #[test]
    fn array_of_scalars_is_an_error() {
        let mut codec = NdjsonCodec::default();
        assert!(codec.decode_chunk(b"[1,2,3]\n").is_err());
    }

    #[test]
    fn oversized_record_is_rejected() {
        let mut codec = NdjsonCodec::new(16);
        let err = codec
            .decode_chunk(b"{\"symbol\":\"ABCDEFGHIJ\"}\n")
            .unwrap_err();
        assert!(matches!(err, CodecError::RecordTooLarge { limit: 16 }));
    }

    #[test]
    fn oversized_partial_record_is_rejected() {
        let mut codec = NdjsonCodec::new(16);
        assert!(codec.decode_chunk(b"{\"symbol\":").is_ok());
        assert!(codec.decode_chunk(b"\"ABCDEFGHIJ").is_err());
    }

    #[test]
    fn codec_error_maps_to_decode() {
        let err: SourceError = CodecError::InvalidFormat("x".into()).into();
        assert_eq!(err.kind(), "decode");
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_output(cuts in proptest::collection::vec(0..BODY.len(), 0..8)) {
            let bytes = BODY.as_bytes();
            let mut cuts = cuts;
            cuts.sort_unstable();
            cuts.dedup();

            let mut codec = NdjsonCodec::default();
            let mut quotes = Vec::new();
            let mut start = 0;
            for cut in cuts {
                quotes.extend(codec.decode_chunk(&bytes[start..cut]).unwrap());
                start = cut;
            }
            quotes.extend(codec.decode_chunk(&bytes[start..]).unwrap());
            quotes.extend(codec.finish().unwrap());

            prop_assert_eq!(symbols(&quotes), vec!["ABC", "XYZ", "QRS"]);
        }
    }
}
