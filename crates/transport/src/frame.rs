//! Frame demultiplexer for the multiplexed attach stream.
//!
//! A worker's output arrives as a sequence of frames, each an 8-byte header
//! followed by a payload:
//!
//! ```text
//! byte 0     channel tag (1 = primary, 2 = diagnostic)
//! bytes 1-3  unused
//! bytes 4-7  payload length, big-endian u32
//! ```
//!
//! [`read_message`] pulls frames until the primary channel holds one
//! newline-terminated record, or the stream ends. Diagnostic payloads are
//! logged and collected on the side; they never reach the message text.
//! Truncation is a termination condition here, never an error. The caller
//! decides whether the text it got back is a usable reply.

use tokio::io::{AsyncRead, AsyncReadExt};

pub const HEADER_LEN: usize = 8;

const TAG_PRIMARY: u8 = 1;
const TAG_DIAGNOSTIC: u8 = 2;

/// Logical channel a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// The worker's protocol output
    Primary,
    /// Side log output (the worker's stderr)
    Diagnostic,
    /// Any other tag; the payload is skipped
    Unknown(u8),
}

impl Channel {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            TAG_PRIMARY => Self::Primary,
            TAG_DIAGNOSTIC => Self::Diagnostic,
            other => Self::Unknown(other),
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Primary => TAG_PRIMARY,
            Self::Diagnostic => TAG_DIAGNOSTIC,
            Self::Unknown(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel: Channel,
    pub length: u32,
}

impl FrameHeader {
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Self {
        Self {
            channel: Channel::from_tag(bytes[0]),
            length: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let len = self.length.to_be_bytes();
        [self.channel.tag(), 0, 0, 0, len[0], len[1], len[2], len[3]]
    }
}

/// One logical message reassembled from primary-channel frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemuxedMessage {
    /// Primary-channel text, lossily decoded and whitespace-trimmed
    pub text: String,

    /// Diagnostic lines seen while assembling, in arrival order
    pub diagnostics: Vec<String>,

    /// True when assembly ended on a newline rather than on stream end
    pub complete: bool,
}

/// Read frames from `reader` until one newline-terminated primary record is
/// assembled or the stream ends.
///
/// `worker` only labels log output.
pub async fn read_message<R>(reader: &mut R, worker: &str) -> DemuxedMessage
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut primary: Vec<u8> = Vec::new();
    let mut diagnostics = Vec::new();
    let mut complete = false;

    loop {
        let mut header = [0u8; HEADER_LEN];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                tracing::warn!(worker = %worker, error = %e, "Read failed while waiting for frame header");
                break;
            }
        }
        let header = FrameHeader::parse(header);

        let (payload, eof) = read_payload(reader, header.length as usize, worker).await;

        match header.channel {
            Channel::Primary => primary.extend_from_slice(&payload),
            Channel::Diagnostic => {
                for line in String::from_utf8_lossy(&payload).lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    tracing::info!(worker = %worker, "[stderr] {line}");
                    diagnostics.push(line.to_string());
                }
            }
            Channel::Unknown(tag) => {
                tracing::trace!(worker = %worker, tag, len = payload.len(), "Skipping frame with unknown channel tag");
            }
        }

        if eof {
            break;
        }
        if primary.last() == Some(&b'\n') {
            complete = true;
            break;
        }
    }

    DemuxedMessage {
        text: String::from_utf8_lossy(&primary).trim().to_string(),
        diagnostics,
        complete,
    }
}

/// Read up to `len` bytes, tolerating short reads. Returns the bytes actually
/// received and whether the stream ended first. The buffer grows with the
/// data, not with the declared length.
async fn read_payload<R>(reader: &mut R, len: usize, worker: &str) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    if let Err(e) = (&mut *reader).take(len as u64).read_to_end(&mut buf).await {
        tracing::warn!(worker = %worker, error = %e, "Read failed mid-frame");
        return (buf, true);
    }
    if buf.len() < len {
        tracing::debug!(worker = %worker, expected = len, received = buf.len(), "Stream closed mid-frame");
        return (buf, true);
    }
    (buf, false)
}

/// Encode one frame (header plus payload).
pub fn encode_frame(channel: Channel, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        channel,
        length: payload.len() as u32,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}
