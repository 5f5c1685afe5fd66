// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Chunked reply protocol.
//!
//! A successful result is serialized to JSON text with every non-ASCII
//! character escaped as `\uXXXX`, and split into envelopes whose bodies are
//! consecutive slices of that text, at most `chunk_size` characters each.
//! The stream always ends with an envelope carrying an empty string body.
//! Error replies are sent as a single envelope holding the raw body,
//! followed by the same terminator.
//!
//! On the calling side [`ChunkAssembler`] concatenates the slices in
//! arrival order and decodes the result once the terminator shows up.

use std::io;

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::Formatter;
use tracing::trace;

use crate::envelope::Envelope;
use crate::errors::RpcError;
use crate::status;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Compact JSON formatter escaping every non-ASCII character, so that the
/// output is ASCII and one byte is one character
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let bytes = fragment.as_bytes();
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if c.is_ascii() {
                continue;
            }
            writer.write_all(&bytes[start..i])?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(&bytes[start..])
    }
}

/// Serialize a reply body to ASCII-only JSON text
pub fn to_ascii_json(body: &Value) -> Result<String, RpcError> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, AsciiFormatter);
    body.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(RpcError::internal)
}

/// Ordered sequence of envelopes making up one reply
#[derive(Debug)]
pub struct ReplyStream {
    status: u16,
    state: StreamState,
    size: usize,
}

#[derive(Debug)]
enum StreamState {
    // serialized result and offset of the next slice
    Data { text: String, pos: usize },
    // one raw envelope still to send
    Single(Value),
    Terminator,
    Done,
}

impl ReplyStream {
    /// Stream for a successful result
    pub fn ok(body: &Value, chunk_size: usize) -> Result<Self, RpcError> {
        let text = to_ascii_json(body)?;
        trace!(len = text.len(), chunk_size, "serialized reply");

        Ok(ReplyStream {
            status: status::OK,
            state: StreamState::Data { text, pos: 0 },
            size: chunk_size.max(1),
        })
    }

    /// Unchunked stream carrying a status and a raw body
    pub fn single(status: u16, body: Value) -> Self {
        ReplyStream {
            status,
            state: StreamState::Single(body),
            size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn error(err: &RpcError) -> Self {
        ReplyStream::single(err.status(), err.body())
    }

    pub fn status(&self) -> u16 {
        self.status
    }
}

impl Iterator for ReplyStream {
    type Item = Envelope;

    fn next(&mut self) -> Option<Envelope> {
        match std::mem::replace(&mut self.state, StreamState::Done) {
            StreamState::Data { text, pos } => {
                if pos >= text.len() {
                    self.state = StreamState::Done;
                    return Some(Envelope::terminator(self.status));
                }
                // the text is ASCII, any offset is a char boundary
                let end = text.len().min(pos + self.size);
                let envelope = Envelope::new(self.status, &text[pos..end]);
                self.state = StreamState::Data { text, pos: end };
                Some(envelope)
            }
            StreamState::Single(body) => {
                self.state = StreamState::Terminator;
                Some(Envelope::new(self.status, body))
            }
            StreamState::Terminator => Some(Envelope::terminator(self.status)),
            StreamState::Done => None,
        }
    }
}

/// Progress of a reassembly
#[derive(Debug, PartialEq)]
pub enum Assembly {
    Pending,
    Complete(Value),
}

/// Client-side reassembly of a chunked reply
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    buffer: String,
    chunks: usize,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        ChunkAssembler::default()
    }

    /// Number of data chunks received so far
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn push(&mut self, envelope: Envelope) -> Result<Assembly, RpcError> {
        // an error status aborts the call, even in the middle of a stream
        if !envelope.is_ok() {
            return Err(RpcError::Remote {
                status: envelope.status,
                body: envelope.body,
            });
        }

        match envelope.body {
            Value::String(s) if s.is_empty() => {
                trace!(chunks = self.chunks, len = self.buffer.len(), "reply complete");
                let value = serde_json::from_str(&self.buffer)
                    .map_err(|e| RpcError::InvalidReply(e.to_string()))?;
                Ok(Assembly::Complete(value))
            }
            Value::String(s) => {
                self.buffer.push_str(&s);
                self.chunks += 1;
                Ok(Assembly::Pending)
            }
            // plain envelope from a counterpart that does not chunk
            other if self.chunks == 0 => Ok(Assembly::Complete(other)),
            _ => Err(RpcError::InvalidReply(
                "non-text chunk inside a chunked reply".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data_bodies(stream: ReplyStream) -> (Vec<String>, usize) {
        let mut bodies = Vec::new();
        let mut terminators = 0;
        for env in stream {
            assert_eq!(env.status, 200);
            if env.is_terminator() {
                terminators += 1;
            } else {
                assert_eq!(terminators, 0, "data after terminator");
                bodies.push(env.body.as_str().unwrap().to_string());
            }
        }
        (bodies, terminators)
    }

    #[test]
    fn test_small_reply_is_one_chunk() {
        let body = json!({"foo": "bar"});
        let (bodies, terminators) = data_bodies(ReplyStream::ok(&body, DEFAULT_CHUNK_SIZE).unwrap());

        assert_eq!(bodies, vec![r#"{"foo":"bar"}"#.to_string()]);
        assert_eq!(terminators, 1);
    }

    #[test]
    fn test_chunk_count_and_concatenation() {
        let body = json!({"list": (0..200).collect::<Vec<u32>>(), "name": "chunky"});
        let serialized = serde_json::to_string(&body).unwrap();
        let len = serialized.len();

        for size in [1, 2, 3, 7, 64, len - 1, len, len + 1, 10 * len] {
            let (bodies, terminators) = data_bodies(ReplyStream::ok(&body, size).unwrap());
            assert_eq!(bodies.len(), len.div_ceil(size), "chunk size {}", size);
            assert_eq!(terminators, 1);
            assert!(bodies.iter().all(|b| !b.is_empty() && b.len() <= size));
            assert_eq!(bodies.concat(), serialized);
        }
    }

    #[test]
    fn test_non_ascii_is_escaped() {
        let body = json!({"clé": "ñ🦀"});
        let text = to_ascii_json(&body).unwrap();
        assert_eq!(text, r#"{"cl\u00e9":"\u00f1\ud83e\udd80"}"#);
        assert!(text.is_ascii());
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), body);
    }

    #[test]
    fn test_non_ascii_chunk_count() {
        let body = json!("ññññññññññ");
        // ten six-character escapes between two quotes
        let len = 62;
        assert_eq!(to_ascii_json(&body).unwrap().len(), len);

        for size in [1, 5] {
            let (bodies, terminators) = data_bodies(ReplyStream::ok(&body, size).unwrap());
            assert_eq!(bodies.len(), len.div_ceil(size), "chunk size {}", size);
            assert_eq!(terminators, 1);
            assert!(bodies.iter().all(|b| !b.is_empty() && b.len() <= size));

            let mut assembler = ChunkAssembler::new();
            for b in &bodies {
                assembler.push(Envelope::new(200, b.as_str())).unwrap();
            }
            assert_eq!(
                assembler.push(Envelope::terminator(200)).unwrap(),
                Assembly::Complete(body.clone())
            );
        }
    }

    #[test]
    fn test_error_stream_is_not_chunked() {
        let err = RpcError::remote(123, "FOO");
        let envelopes: Vec<Envelope> = ReplyStream::error(&err).collect();
        assert_eq!(
            envelopes,
            vec![Envelope::new(123, "FOO"), Envelope::terminator(123)]
        );
    }

    #[test]
    fn test_assembler_round_trip() {
        let body = json!(["a", 1, {"b": null}, "ünïcödé"]);
        let mut assembler = ChunkAssembler::new();
        let mut result = None;

        for env in ReplyStream::ok(&body, 3).unwrap() {
            if let Assembly::Complete(v) = assembler.push(env).unwrap() {
                result = Some(v);
            }
        }

        assert_eq!(result, Some(body));
        assert!(assembler.chunks() > 1);
    }

    #[test]
    fn test_assembler_aborts_on_late_error() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(
            assembler.push(Envelope::new(200, "[1,")).unwrap(),
            Assembly::Pending
        );

        let err = assembler.push(Envelope::new(500, "boom")).unwrap_err();
        assert_eq!(err, RpcError::remote(500, "boom"));
    }

    #[test]
    fn test_assembler_plain_envelope() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(
            assembler.push(Envelope::new(200, json!({"foo": "bar"}))).unwrap(),
            Assembly::Complete(json!({"foo": "bar"}))
        );
    }

    #[test]
    fn test_assembler_invalid_stream() {
        let mut assembler = ChunkAssembler::new();
        assert!(matches!(
            assembler.push(Envelope::terminator(200)),
            Err(RpcError::InvalidReply(_))
        ));

        let mut assembler = ChunkAssembler::new();
        assembler.push(Envelope::new(200, "[1")).unwrap();
        assert!(matches!(
            assembler.push(Envelope::new(200, json!(2))),
            Err(RpcError::InvalidReply(_))
        ));
    }
}
