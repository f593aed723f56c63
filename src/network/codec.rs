//! Byte-stream framing codec for the control link.
//!
//! Both directions of the duplex link speak the same frame layout:
//! a 1-byte message kind, a 4-byte little-endian payload length
//! (header-exclusive, but including any kind-specific extra header such as
//! the snapshot's width/height prefix), then exactly that many payload bytes.
//!
//! # Design Rationale
//!
//! - **Resumable decoding**: the link is a stream, so a frame may arrive split
//!   across arbitrarily many reads. [`WireDecoder`] buffers until one full
//!   frame is available and never blocks waiting for a second message.
//! - **Bounded payloads**: a declared length above the configured ceiling is a
//!   [`WireError::PayloadTooLarge`], not an allocation of attacker-chosen
//!   size and not a crash.
//! - **Unknown kinds are survivable**: the decoder hands back the raw kind
//!   byte; callers report unknown kinds and keep the connection open.

use std::collections::VecDeque;
use std::fmt;

/// Size of the fixed frame header: 1 kind byte + 4 length bytes.
pub const HEADER_LEN: usize = 5;

/// Default payload ceiling: one uncompressed 1920x1080 RGBA video frame plus
/// the 8-byte width/height prefix, with a little slack for JSON payloads.
pub const DEFAULT_MAX_PAYLOAD: usize = 1920 * 1080 * 4 + 64;

/// A single decoded wire frame: the raw kind byte and its payload.
///
/// Interpretation of the payload (JSON object, or binary for snapshots) is the
/// job of [`messages`](crate::network::messages); the codec is kind-agnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    /// The raw kind byte. Stable small integers, see the message enums.
    pub kind: u8,
    /// The payload bytes, header-exclusive.
    pub payload: Vec<u8>,
}

/// Errors produced while framing or deframing the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WireError {
    /// The declared payload length exceeds the configured ceiling.
    PayloadTooLarge {
        /// The length the peer declared.
        declared: usize,
        /// The configured ceiling.
        ceiling: usize,
    },
    /// A payload handed to the encoder exceeds the configured ceiling.
    EncodeTooLarge {
        /// The payload length that was requested.
        len: usize,
        /// The configured ceiling.
        ceiling: usize,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLarge { declared, ceiling } => {
                write!(
                    f,
                    "declared payload length {declared} exceeds ceiling {ceiling}"
                )
            }
            Self::EncodeTooLarge { len, ceiling } => {
                write!(f, "payload length {len} exceeds encode ceiling {ceiling}")
            }
        }
    }
}

impl std::error::Error for WireError {}

/// Encodes one frame into a new `Vec<u8>`.
///
/// # Errors
///
/// Returns [`WireError::EncodeTooLarge`] if the payload exceeds `max_payload`.
/// Encoding never partially writes.
pub fn encode_frame(kind: u8, payload: &[u8], max_payload: usize) -> Result<Vec<u8>, WireError> {
    if payload.len() > max_payload {
        return Err(WireError::EncodeTooLarge {
            len: payload.len(),
            ceiling: max_payload,
        });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(kind);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Resumable stream decoder.
///
/// Feed raw bytes with [`extend`](WireDecoder::extend) as they arrive, then
/// drain complete frames with [`poll_frame`](WireDecoder::poll_frame) until it
/// returns `Ok(None)` (need more bytes).
#[derive(Debug)]
pub struct WireDecoder {
    buffer: VecDeque<u8>,
    max_payload: usize,
}

impl WireDecoder {
    /// Creates a decoder with the [`DEFAULT_MAX_PAYLOAD`] ceiling.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Creates a decoder with a custom payload ceiling.
    #[must_use]
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            max_payload,
        }
    }

    /// Appends freshly received bytes to the internal buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied());
    }

    /// Number of bytes currently buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(frame))` when a full frame was buffered, `Ok(None)`
    /// when more bytes are needed, and `Err` when the peer declared an
    /// impossible length. After a [`WireError::PayloadTooLarge`] the offending
    /// header has been consumed; the caller decides whether the stream is
    /// still trustworthy (policy here is to drop the connection's buffered
    /// remainder and resync on reconnect).
    pub fn poll_frame(&mut self) -> Result<Option<WireFrame>, WireError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek the header without consuming; the length bytes may wrap the
        // VecDeque's ring boundary so copy them out.
        let mut header = [0u8; HEADER_LEN];
        for (i, slot) in header.iter_mut().enumerate() {
            match self.buffer.get(i) {
                Some(b) => *slot = *b,
                None => return Ok(None),
            }
        }
        let kind = header[0];
        let declared = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;

        if declared > self.max_payload {
            // Consume the poisoned header so repeated polls don't loop on it.
            self.buffer.drain(..HEADER_LEN);
            return Err(WireError::PayloadTooLarge {
                declared,
                ceiling: self.max_payload,
            });
        }

        if self.buffer.len() < HEADER_LEN + declared {
            return Ok(None);
        }

        self.buffer.drain(..HEADER_LEN);
        let payload: Vec<u8> = self.buffer.drain(..declared).collect();
        Ok(Some(WireFrame { kind, payload }))
    }

    /// Discards all buffered bytes. Used when the underlying connection is
    /// replaced: stale partial frames from the old connection must not be
    /// stitched onto bytes from the new one.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

impl Default for WireDecoder {
    fn default() -> Self {
        Self::new()
    }
}
