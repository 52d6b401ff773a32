//! `Content-Length` framing for JSON-RPC over stdio
//!
//! The decoder accumulates bytes in the `FramedRead` buffer and yields one
//! JSON value per complete frame, so partial and coalesced writes both work.
//! Bad frames are logged and dropped; the stream keeps going.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::error::LumenError;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";
/// Largest body accepted from a server
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct LspCodec;

impl LspCodec {
    pub fn new() -> Self {
        Self
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// Extract the body length from a header block. Lines that are not
/// `Content-Length` (other headers, stray log output) are ignored.
fn parse_content_length(header: &[u8]) -> std::result::Result<usize, String> {
    let text = String::from_utf8_lossy(header);
    let mut length = None;
    for line in text.split('\n') {
        let Some((name, value)) = line.trim_end_matches('\r').split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let value = value.trim();
            let parsed = value
                .parse::<usize>()
                .map_err(|_| format!("invalid Content-Length '{}'", value))?;
            if parsed > MAX_FRAME_LEN {
                return Err(format!(
                    "Content-Length {} exceeds limit of {} bytes",
                    parsed, MAX_FRAME_LEN
                ));
            }
            length = Some(parsed);
        }
    }
    length.ok_or_else(|| format!("missing Content-Length in header {:?}", text.trim()))
}

impl Decoder for LspCodec {
    type Item = Value;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Value>> {
        loop {
            let Some(header_end) = find_terminator(src) else {
                return Ok(None);
            };
            let body_start = header_end + HEADER_TERMINATOR.len();

            let length = match parse_content_length(&src[..header_end]) {
                Ok(length) => length,
                Err(reason) => {
                    warn!("{}", LumenError::protocol(reason));
                    src.advance(body_start);
                    continue;
                }
            };

            let Some(frame_len) = body_start.checked_add(length) else {
                warn!("{}", LumenError::protocol("Content-Length overflows frame size"));
                src.advance(body_start);
                continue;
            };
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }

            src.advance(body_start);
            let body = src.split_to(length);
            match serde_json::from_slice::<Value>(&body) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    warn!("{}", LumenError::protocol(format!("invalid JSON body: {}", e)));
                    continue;
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Value>> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None => {
                if !buf.is_empty() {
                    debug!("Discarding {} trailing bytes at end of stream", buf.len());
                    buf.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Value> for LspCodec {
    type Error = io::Error;

    fn encode(&mut self, message: Value, dst: &mut BytesMut) -> io::Result<()> {
        let body = serde_json::to_vec(&message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(body: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
    }

    #[test]
    fn test_message_split_across_two_chunks() {
        let body = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
        let raw = frame(body);
        let header_len = raw.find("\r\n\r\n").unwrap() + 4;
        let split = header_len + 10;

        let mut codec = LspCodec::new();
        let mut buf = BytesMut::from(&raw.as_bytes()[..split]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&raw.as_bytes()[split..]);
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(message["method"], "initialized");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_coalesced_messages() {
        let raw = format!(
            "{}{}",
            frame(r#"{"jsonrpc":"2.0","id":1,"result":null}"#),
            frame(r#"{"jsonrpc":"2.0","id":2,"result":true}"#)
        );

        let mut codec = LspCodec::new();
        let mut buf = BytesMut::from(raw.as_bytes());
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(second["id"], 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_header_split_mid_line() {
        let raw = frame(r#"{"id":7}"#);
        let mut codec = LspCodec::new();
        let mut buf = BytesMut::from(&raw.as_bytes()[..8]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&raw.as_bytes()[8..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap()["id"], 7);
    }

    #[test]
    fn test_extra_headers_and_case() {
        let body = r#"{"id":3}"#;
        let raw = format!(
            "content-length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n{}",
            body.len(),
            body
        );
        let mut buf = BytesMut::from(raw.as_bytes());
        assert_eq!(LspCodec::new().decode(&mut buf).unwrap().unwrap()["id"], 3);
    }

    #[test]
    fn test_log_noise_before_header_is_skipped() {
        let raw = format!("server starting...\n{}", frame(r#"{"id":4}"#));
        let mut buf = BytesMut::from(raw.as_bytes());
        assert_eq!(LspCodec::new().decode(&mut buf).unwrap().unwrap()["id"], 4);
    }

    #[test]
    fn test_bad_frames_are_discarded() {
        let raw = format!(
            "Content-Length: abc\r\n\r\n{}{}",
            frame("{not json}"),
            frame(r#"{"id":5}"#)
        );
        let mut buf = BytesMut::from(raw.as_bytes());
        assert_eq!(LspCodec::new().decode(&mut buf).unwrap().unwrap()["id"], 5);
    }

    #[test]
    fn test_oversized_content_length_is_discarded() {
        for length in [usize::MAX, 1usize << 62, MAX_FRAME_LEN + 1] {
            let raw = format!("Content-Length: {}\r\n\r\n{}", length, frame(r#"{"id":6}"#));
            let mut buf = BytesMut::from(raw.as_bytes());
            let message = LspCodec::new().decode(&mut buf).unwrap().unwrap();
            assert_eq!(message["id"], 6);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_encode_frames_body() {
        let mut buf = BytesMut::new();
        LspCodec::new()
            .encode(json!({"jsonrpc": "2.0", "method": "exit"}), &mut buf)
            .unwrap();
        let text = String::from_utf8(buf.to_vec()).unwrap();
        let (header, body) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(header, format!("Content-Length: {}", body.len()));
        assert_eq!(serde_json::from_str::<Value>(body).unwrap()["method"], "exit");
    }
}
