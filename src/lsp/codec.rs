//! `Content-Length`-framed message codec for LSP stdio transports.
//!
//! The decoder is push-based: raw bytes go in, complete JSON payloads come
//! out, partial frames stay buffered. Malformed headers skip to the next
//! header terminator so a single corrupt frame cannot wedge the stream.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::lsp::message::RpcMessage;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Upper bound on a single message body. A corrupt or hostile header must
/// not be able to request an unbounded allocation.
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Incremental decoder for one child's stdout stream.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder { buf: Vec::new() }
    }

    /// Appends freshly-read bytes to the internal buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extracts the next complete payload, if one is buffered.
    ///
    /// Headers that lack a parseable `Content-Length` are skipped past their
    /// terminator and decoding resyncs on the following frame.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let header_end = find_subslice(&self.buf, HEADER_TERMINATOR)?;
            let body_start = header_end + HEADER_TERMINATOR.len();

            let length = match parse_content_length(&self.buf[..header_end]) {
                Some(length) if length <= MAX_FRAME_SIZE => length,
                Some(length) => {
                    warn!("dropping frame with oversized Content-Length {length}");
                    self.buf.drain(..body_start);
                    continue;
                }
                None => {
                    warn!(
                        "malformed LSP frame header, resyncing: {:?}",
                        String::from_utf8_lossy(&self.buf[..header_end.min(128)])
                    );
                    self.buf.drain(..body_start);
                    continue;
                }
            };

            if self.buf.len() < body_start + length {
                // Body not fully buffered yet.
                return None;
            }

            let payload = self.buf[body_start..body_start + length].to_vec();
            self.buf.drain(..body_start + length);
            return Some(payload);
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(header_block: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header_block).ok()?;
    for line in text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse::<usize>().ok();
            }
        }
    }
    None
}

/// Serializes a message and writes it with its framing header. The header
/// carries the byte length of the payload, not its character count.
pub async fn write_message<W>(writer: &mut W, message: &RpcMessage) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = serde_json::to_vec(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}
