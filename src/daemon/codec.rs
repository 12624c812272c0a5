//! Line codec for runner process streams.
//!
//! Frames on raw bytes with [`tokio_util::codec::AnyDelimiterCodec`] split
//! on `\n`, with a maximum line length so an unterminated or runaway line
//! from the runner cannot exhaust memory. Lines are converted to text
//! lossily: device logs interleaved on these streams are not guaranteed to
//! be UTF-8, and a bad byte must not cost the rest of the stream. Both the
//! protocol stream (stdout) and the diagnostic stream (stderr) are framed
//! with this codec; outbound commands are encoded as `item\n` in the other
//! direction.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum line length accepted from the runner: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited codec for runner process streams.
///
/// Inbound lines longer than [`MAX_LINE_BYTES`] are discarded with a
/// warning and decoding resumes at the next newline. Invalid UTF-8 is
/// replaced with `U+FFFD`. Neither is surfaced as an error: `FramedRead`
/// ends the stream after any decoder error, which would look like runner
/// EOF. I/O errors map to [`AppError::Io`].
#[derive(Debug)]
pub struct DaemonCodec(AnyDelimiterCodec);

impl DaemonCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(AnyDelimiterCodec::new_with_max_length(
            b"\n".to_vec(),
            b"\n".to_vec(),
            MAX_LINE_BYTES,
        ))
    }
}

impl Default for DaemonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for DaemonCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src) {
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => discarded(),
                other => return other.map(|line| line.map(to_text)).map_err(map_codec_error),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src) {
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => discarded(),
                other => return other.map(|line| line.map(to_text)).map_err(map_codec_error),
            }
        }
    }
}

impl Encoder<String> for DaemonCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn to_text(line: Bytes) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
    String::from_utf8_lossy(line).into_owned()
}

fn discarded() {
    warn!(max_bytes = MAX_LINE_BYTES, "discarding oversized runner line");
}

fn map_codec_error(e: AnyDelimiterCodecError) -> AppError {
    match e {
        AnyDelimiterCodecError::MaxChunkLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        AnyDelimiterCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
