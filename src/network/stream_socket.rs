//! Reconnecting duplex byte-stream transport.
//!
//! Wraps one stream connection behind a mutex so any thread can send or poll,
//! and transparently replaces the connection when an operation fails. The
//! policy is fail-fast: one immediate reconnect attempt per failed operation,
//! then the error surfaces to the caller — no background retry loop, no
//! buffering of unsent messages. A message that fails to send is lost; the
//! protocol's command/snapshot exchange tolerates that.
//!
//! Replacing the connection always resets the frame decoder, so a partial
//! frame from the dead connection is never stitched onto bytes from the new
//! one.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ChorusError;
use crate::network::codec::{encode_frame, WireDecoder, WireError, WireFrame, DEFAULT_MAX_PAYLOAD};

/// Produces fresh connections for [`ReconnectingSocket`].
///
/// The returned stream must be non-blocking: `read` returns
/// [`io::ErrorKind::WouldBlock`] when no bytes are available rather than
/// stalling the caller's tick.
pub trait StreamConnector {
    /// The connection type produced.
    type Stream: Read + Write;

    /// Establishes one new connection.
    fn connect(&self) -> io::Result<Self::Stream>;
}

/// Connects over TCP to a fixed address, non-blocking with Nagle disabled
/// (the link carries small latency-sensitive frames).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// Creates a connector for `address` (`host:port`).
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl StreamConnector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> io::Result<TcpStream> {
        let addr = self
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing"))?;
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }
}

struct Inner<S> {
    stream: Option<S>,
    decoder: WireDecoder,
    read_buf: Vec<u8>,
}

/// A mutex-guarded framed duplex socket that survives connection loss.
pub struct ReconnectingSocket<C: StreamConnector> {
    connector: C,
    max_payload: usize,
    inner: Mutex<Inner<C::Stream>>,
}

impl<C: StreamConnector> ReconnectingSocket<C> {
    /// Creates a disconnected socket; the first operation connects.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self::with_max_payload(connector, DEFAULT_MAX_PAYLOAD)
    }

    /// Creates a disconnected socket with a custom payload ceiling.
    #[must_use]
    pub fn with_max_payload(connector: C, max_payload: usize) -> Self {
        Self {
            connector,
            max_payload,
            inner: Mutex::new(Inner {
                stream: None,
                decoder: WireDecoder::with_max_payload(max_payload),
                read_buf: vec![0u8; 64 * 1024],
            }),
        }
    }

    /// Whether a connection is currently held. Advisory: the peer may have
    /// gone away without this side noticing yet.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.lock().stream.is_some()
    }

    /// Drops the current connection, if any. The next operation reconnects.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.stream = None;
        inner.decoder.reset();
    }

    fn ensure_connected(connector: &C, inner: &mut Inner<C::Stream>) -> Result<(), ChorusError> {
        if inner.stream.is_none() {
            debug!("establishing connection");
            let stream = connector
                .connect()
                .map_err(|e| ChorusError::connection(format!("connect failed: {e}")))?;
            inner.decoder.reset();
            inner.stream = Some(stream);
        }
        Ok(())
    }

    fn write_frame(inner: &mut Inner<C::Stream>, bytes: &[u8]) -> io::Result<()> {
        match inner.stream.as_mut() {
            Some(stream) => {
                stream.write_all(bytes)?;
                stream.flush()
            }
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Sends one frame. On a write failure the connection is replaced once
    /// and the frame re-sent; a second failure surfaces as a connection
    /// error and the frame is lost.
    pub fn send(&self, kind: u8, payload: &[u8]) -> Result<(), ChorusError> {
        let bytes = encode_frame(kind, payload, self.max_payload)
            .map_err(|e| ChorusError::protocol(e.to_string()))?;

        let mut inner = self.inner.lock();
        Self::ensure_connected(&self.connector, &mut inner)?;
        match Self::write_frame(&mut inner, &bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(kind, error = %e, "send failed, replacing connection");
                inner.stream = None;
                Self::ensure_connected(&self.connector, &mut inner)?;
                Self::write_frame(&mut inner, &bytes).map_err(|e| {
                    inner.stream = None;
                    ChorusError::connection(format!("send failed after reconnect: {e}"))
                })
            }
        }
    }

    /// Polls for the next complete frame without blocking.
    ///
    /// Returns `Ok(None)` when no full frame is available yet. Connection
    /// loss detected here (EOF or a read error) drops the connection and
    /// returns a connection error; the next call reconnects. A peer that
    /// declares an impossible payload length is treated the same way — the
    /// stream position can no longer be trusted.
    pub fn poll_frame(&self) -> Result<Option<WireFrame>, ChorusError> {
        let mut inner = self.inner.lock();

        // Drain anything already buffered before touching the stream.
        match inner.decoder.poll_frame() {
            Ok(Some(frame)) => return Ok(Some(frame)),
            Ok(None) => {}
            Err(e) => return Err(Self::poisoned(&mut inner, &e)),
        }

        Self::ensure_connected(&self.connector, &mut inner)?;
        let mut buf = std::mem::take(&mut inner.read_buf);
        let read = match inner.stream.as_mut() {
            Some(stream) => stream.read(&mut buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        };
        let result = match read {
            Ok(0) => {
                warn!("peer closed the connection");
                inner.stream = None;
                inner.decoder.reset();
                Err(ChorusError::connection("peer closed the connection"))
            }
            Ok(n) => {
                let (chunk, _) = buf.split_at(n);
                inner.decoder.extend(chunk);
                match inner.decoder.poll_frame() {
                    Ok(frame) => Ok(frame),
                    Err(e) => Err(Self::poisoned(&mut inner, &e)),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                warn!(error = %e, "read failed, dropping connection");
                inner.stream = None;
                inner.decoder.reset();
                Err(ChorusError::connection(format!("read failed: {e}")))
            }
        };
        inner.read_buf = buf;
        result
    }

    fn poisoned<S>(inner: &mut Inner<S>, error: &WireError) -> ChorusError {
        warn!(error = %error, "unframeable stream, dropping connection");
        inner.stream = None;
        inner.decoder.reset();
        ChorusError::protocol(error.to_string())
    }
}

impl<C: StreamConnector> std::fmt::Debug for ReconnectingSocket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingSocket")
            .field("connected", &self.is_connected())
            .field("max_payload", &self.max_payload)
            .finish_non_exhaustive()
    }
}
