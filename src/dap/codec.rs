//! `Content-Length` framing for debug-protocol messages.
//!
//! Each message is a header block terminated by `\r\n\r\n` followed by a
//! UTF-8 JSON body of exactly `Content-Length` bytes:
//!
//! ```text
//! Content-Length: 59\r\n
//! \r\n
//! {"seq":1,"type":"request","command":"initialize","arguments":{}}
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Largest body accepted from the client: 16 MiB.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Largest header block accepted before the body.
const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Framing codec for debug-protocol streams.
#[derive(Debug, Default)]
pub struct DapCodec {
    pending_body: Option<usize>,
}

impl DapCodec {
    /// Create a codec with no partially decoded frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for DapCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let body_len = if let Some(len) = self.pending_body {
            len
        } else {
            let Some(end) = src
                .windows(HEADER_TERMINATOR.len())
                .position(|w| w == HEADER_TERMINATOR)
            else {
                if src.len() > MAX_HEADER_BYTES {
                    return Err(AppError::Protocol("header block too large".into()));
                }
                return Ok(None);
            };
            let header = std::str::from_utf8(&src[..end])
                .map_err(|_| AppError::Protocol("header is not valid utf-8".into()))?;
            let len = content_length(header)?;
            if len > MAX_BODY_BYTES {
                return Err(AppError::Protocol(format!(
                    "body too large: {len} bytes exceeds {MAX_BODY_BYTES}"
                )));
            }
            src.advance(end + HEADER_TERMINATOR.len());
            self.pending_body = Some(len);
            len
        };

        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }

        self.pending_body = None;
        let body = src.split_to(body_len);
        String::from_utf8(body.to_vec())
            .map(Some)
            .map_err(|_| AppError::Protocol("body is not valid utf-8".into()))
    }
}

impl Encoder<String> for DapCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        let header = format!("Content-Length: {}\r\n\r\n", item.len());
        dst.reserve(header.len() + item.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}

fn content_length(header: &str) -> Result<usize> {
    header
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .ok_or_else(|| AppError::Protocol("missing Content-Length header".into()))
        .and_then(|(_, value)| {
            value
                .trim()
                .parse()
                .map_err(|_| AppError::Protocol(format!("invalid Content-Length: {value}")))
        })
}
