//! NDJSON codec for kernel streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving kernel cannot make the daemon buffer an unterminated line
//! without bound. An over-long line is discarded up to its newline and
//! surfaces as [`KernelFrame::Oversized`]; the stream keeps going.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::config::DEFAULT_MAX_MESSAGE_BYTES;
use crate::{AppError, Result};

/// Default maximum line length accepted from a kernel: 1 MiB.
pub const MAX_LINE_BYTES: usize = DEFAULT_MAX_MESSAGE_BYTES;

/// One decoded unit of a kernel stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelFrame {
    /// A complete line without its terminator.
    Line(String),
    /// A line longer than the limit was dropped.
    Oversized {
        /// Limit the line exceeded, in bytes.
        limit: usize,
    },
}

/// Line codec used for both directions of the kernel protocol.
///
/// I/O errors map to [`AppError::Io`]. Outbound strings are encoded as
/// `item\n`.
#[derive(Debug)]
pub struct KernelCodec {
    lines: LinesCodec,
    limit: usize,
}

impl KernelCodec {
    /// Create a new `KernelCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec accepting lines of at most `limit` bytes.
    #[must_use]
    pub fn with_max_length(limit: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(limit),
            limit,
        }
    }

    /// Configured line limit in bytes.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.limit
    }

    fn frame(
        &self,
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<KernelFrame>> {
        match decoded {
            Ok(line) => Ok(line.map(KernelFrame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Ok(Some(KernelFrame::Oversized { limit: self.limit }))
            }
            Err(LinesCodecError::Io(err)) => Err(AppError::Io(err.to_string())),
        }
    }
}

impl Default for KernelCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for KernelCodec {
    type Item = KernelFrame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.lines.decode(src);
        self.frame(decoded)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.lines.decode_eof(src);
        self.frame(decoded)
    }
}

impl Encoder<String> for KernelCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.lines.encode(item, dst).map_err(|err| match err {
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Kernel(format!("line too long: exceeded {} bytes", self.limit))
            }
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        })
    }
}
