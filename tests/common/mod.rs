//! Shared test infrastructure: an in-memory duplex pipe that implements
//! [`StreamConnector`], with scripted connection failures and a kill switch
//! so reconnect behavior can be exercised deterministically and without
//! binding real ports.

#![allow(dead_code)] // not every test file uses every helper

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use chorus_control::{Contributor, StreamConnector};

/// The shared state behind both ends of a pipe pair.
struct PipeState {
    /// Bumped by [`PipeHandle::kill`]; streams from older generations fail.
    generation: u64,
    /// Connect attempts to refuse before succeeding again.
    refuse_connects: u32,
    /// Total successful connects, across both ends.
    connects: u32,
    a_to_b: VecDeque<u8>,
    b_to_a: VecDeque<u8>,
}

/// Which end of the pipe a connector hands out streams for.
#[derive(Clone, Copy)]
enum End {
    A,
    B,
}

/// One live connection on one end of the pipe. Non-blocking: reads return
/// `WouldBlock` when the peer has written nothing.
pub struct PipeStream {
    state: Arc<Mutex<PipeState>>,
    end: End,
    generation: u64,
}

impl PipeStream {
    fn state(&self) -> io::Result<std::sync::MutexGuard<'_, PipeState>> {
        let state = self.state.lock().unwrap();
        if state.generation != self.generation {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        Ok(state)
    }
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state()?;
        let queue = match self.end {
            End::A => &mut state.b_to_a,
            End::B => &mut state.a_to_b,
        };
        if queue.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = queue.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = queue.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state()?;
        let queue = match self.end {
            End::A => &mut state.a_to_b,
            End::B => &mut state.b_to_a,
        };
        queue.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Connector for one end of the pipe.
pub struct PipeConnector {
    state: Arc<Mutex<PipeState>>,
    end: End,
}

impl StreamConnector for PipeConnector {
    type Stream = PipeStream;

    fn connect(&self) -> io::Result<PipeStream> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        state.connects += 1;
        Ok(PipeStream {
            state: Arc::clone(&self.state),
            end: self.end,
            generation: state.generation,
        })
    }
}

/// Test-side control over a pipe pair.
#[derive(Clone)]
pub struct PipeHandle {
    state: Arc<Mutex<PipeState>>,
}

impl PipeHandle {
    /// Kills every live connection and discards in-flight bytes, like a
    /// dropped TCP link. The next connect succeeds with a clean stream.
    pub fn kill(&self) {
        let mut state = self.state.lock().unwrap();
        state.generation += 1;
        state.a_to_b.clear();
        state.b_to_a.clear();
    }

    /// Makes the next `n` connect attempts (either end) fail.
    pub fn refuse_next_connects(&self, n: u32) {
        self.state.lock().unwrap().refuse_connects = n;
    }

    /// Total successful connects across both ends.
    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    /// Bytes currently in flight from end A to end B.
    pub fn pending_a_to_b(&self) -> usize {
        self.state.lock().unwrap().a_to_b.len()
    }

    /// Bytes currently in flight from end B to end A.
    pub fn pending_b_to_a(&self) -> usize {
        self.state.lock().unwrap().b_to_a.len()
    }

    /// Injects raw bytes into the A→B direction, as if end A had written
    /// them. Lets tests put malformed traffic on the wire that the typed
    /// API refuses to produce.
    pub fn inject_a_to_b(&self, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .a_to_b
            .extend(bytes.iter().copied());
    }
}

/// Creates a connected pipe: `(end_a, end_b, handle)`. By convention the
/// game session takes end A and the controller end B, but the pipe is
/// symmetric.
pub fn pipe_pair() -> (PipeConnector, PipeConnector, PipeHandle) {
    let state = Arc::new(Mutex::new(PipeState {
        generation: 0,
        refuse_connects: 0,
        connects: 0,
        a_to_b: VecDeque::new(),
        b_to_a: VecDeque::new(),
    }));
    (
        PipeConnector {
            state: Arc::clone(&state),
            end: End::A,
        },
        PipeConnector {
            state: Arc::clone(&state),
            end: End::B,
        },
        PipeHandle { state },
    )
}

/// Installs a tracing subscriber honoring `RUST_LOG`, writing through the
/// test harness's capture. Safe to call from every test; first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shorthand for a contributor whose display name derives from the id.
pub fn contributor(id: &str) -> Contributor {
    Contributor::new(id, format!("name-{id}"))
}

/// Extracts just the ids from a contributor list, for compact assertions.
pub fn ids(contributors: &[Contributor]) -> Vec<String> {
    contributors.iter().map(|c| c.id.clone()).collect()
}
