//! Newline-delimited JSON stream processing.
//!
//! Streaming responses arrive as one JSON object per line:
//! ```text
//! {"message":{"role":"assistant","content":"The"},"done":false}
//! {"message":{"role":"assistant","content":" sky"},"done":false}
//! {"message":{"role":"assistant","content":""},"done":true,"eval_count":2}
//! ```
//!
//! Lines are split on raw bytes before decoding, so a multi-byte character
//! straddling two network chunks is reassembled intact.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

use crate::client::ClientError;

/// Extension trait for `reqwest::Response` to read NDJSON bodies.
pub trait NdjsonResponseExt {
    /// Convert the response into a stream of parsed JSON records.
    fn ndjson(self) -> impl Stream<Item = Result<Value, ClientError>> + Send;
}

impl NdjsonResponseExt for reqwest::Response {
    fn ndjson(self) -> impl Stream<Item = Result<Value, ClientError>> + Send {
        ndjson_records(self.bytes_stream())
    }
}

/// Split a byte stream into parsed NDJSON records.
///
/// Blank lines are skipped and a final line without a trailing newline is still
/// parsed. The stream ends after the first error, whether the byte stream failed
/// or a line was not valid JSON.
pub fn ndjson_records<S, E>(bytes: S) -> impl Stream<Item = Result<Value, ClientError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    stream::unfold(
        (Box::pin(bytes), BytesMut::new(), false),
        |(mut bytes, mut buffer, mut ended)| async move {
            loop {
                // Emit any complete line already buffered
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line = buffer.split_to(pos + 1);
                    if let Some(record) = parse_ndjson_line(&line) {
                        if record.is_err() {
                            buffer.clear();
                            ended = true;
                        }
                        return Some((record, (bytes, buffer, ended)));
                    }
                }

                if ended {
                    if buffer.is_empty() {
                        return None;
                    }
                    let line = buffer.split();
                    return parse_ndjson_line(&line).map(|record| (record, (bytes, buffer, ended)));
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        buffer.clear();
                        return Some((Err(e.into()), (bytes, buffer, true)));
                    }
                    None => ended = true,
                }
            }
        },
    )
}

/// Parse one NDJSON line. Returns `None` for blank lines.
///
/// # Example
/// ```
/// use ollama_chat::ndjson::parse_ndjson_line;
///
/// let record = parse_ndjson_line(b"{\"done\":true}\n").unwrap().unwrap();
/// assert_eq!(record["done"], true);
/// assert!(parse_ndjson_line(b"  \r\n").is_none());
/// ```
pub fn parse_ndjson_line(line: &[u8]) -> Option<Result<Value, ClientError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_slice(line).map_err(ClientError::from))
}
