// ShoulderLink - wearable posture feedback link
// Copyright (c) The ShoulderLink developers
//
// Licensed under the MIT license.
// See LICENSE file for details.


//! Transport abstraction module
//!
//! A [`Transport`] is a raw, exclusively owned byte pipe to the device; a
//! [`Connector`] knows which endpoints to probe and how to open them.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// Byte pipe to one device
pub trait Transport: Send {
    /// Write all bytes
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read whatever arrives within the transport timeout.
    ///
    /// Returns 0 when nothing arrived; an `Err` means the pipe is broken.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard unread input
    fn clear_input(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }
}

/// A candidate place to find the device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    /// Device node or symlink
    Path(String),
    /// Numbered COM port (1-based)
    ComPort(u8),
}

impl Endpoint {
    /// Name to hand to the OS
    pub fn port_name(&self) -> String {
        match self {
            Endpoint::Path(path) => path.clone(),
            Endpoint::ComPort(n) => format!("COM{}", n),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.port_name())
    }
}

/// Candidate endpoints in probing order for this platform
pub fn default_candidates() -> Vec<Endpoint> {
    if cfg!(windows) {
        (1..=16).map(Endpoint::ComPort).collect()
    } else {
        let mut candidates = vec![Endpoint::Path("/dev/arduino_leonardo".to_string())];
        candidates.extend((0..5).map(|n| Endpoint::Path(format!("/dev/ttyACM{}", n))));
        candidates
    }
}

/// Opens transports to candidate endpoints
pub trait Connector {
    /// Endpoints to probe, first choice first
    fn candidates(&self) -> Vec<Endpoint>;

    /// Open one endpoint
    fn open(&mut self, endpoint: &Endpoint) -> io::Result<Box<dyn Transport>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    incoming: VecDeque<u8>,
    outgoing: Vec<u8>,
    closed: bool,
}

/// In-memory transport for tests and local loopback.
///
/// Clones share the same buffers, so a test can keep a handle while the
/// connection manager owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue bytes for the reader
    pub fn push_incoming(&self, bytes: &[u8]) {
        self.lock().incoming.extend(bytes.iter().copied());
    }

    /// Take everything written so far
    pub fn take_outgoing(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().outgoing)
    }

    pub fn pending_incoming(&self) -> usize {
        self.lock().incoming.len()
    }

    /// Simulate the cable being pulled
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "transport closed")
}

impl Transport for MemoryTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(broken_pipe());
        }
        state.outgoing.extend_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(broken_pipe());
        }
        let n = buf.len().min(state.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(broken_pipe());
        }
        state.incoming.clear();
        Ok(())
    }
}

/// Transport wrapper that loses incoming bytes at a fixed rate
#[derive(Debug)]
pub struct LossyTransport<T> {
    inner: T,
    loss_rate: f32,
    rng_state: u64,
    dropped: u64,
}

impl<T: Transport> LossyTransport<T> {
    /// Wrap `inner`, dropping each received byte with probability `loss_rate` (0.0-1.0)
    pub fn new(inner: T, loss_rate: f32) -> Self {
        Self {
            inner,
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng_state: 12345,
            dropped: 0,
        }
    }

    /// Simple PRNG for deterministic testing
    fn next_random(&mut self) -> f32 {
        self.rng_state = self.rng_state.wrapping_mul(1103515245).wrapping_add(12345);
        ((self.rng_state >> 16) & 0x7fff) as f32 / 32767.0
    }

    /// Bytes lost so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        let mut kept = 0;
        for i in 0..n {
            if self.next_random() < self.loss_rate {
                self.dropped += 1;
                continue;
            }
            buf[kept] = buf[i];
            kept += 1;
        }
        Ok(kept)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.inner.clear_input()
    }
}

#[cfg(feature = "serial")]
pub use serial::{SerialConnector, SerialTransport};

#[cfg(feature = "serial")]
mod serial {
    use super::{Connector, Endpoint, Transport};
    use serialport::{ClearBuffer, SerialPort};
    use std::io;
    use std::time::Duration;

    /// Serial port transport
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Open `endpoint` at `baud_rate` (8N1) with DTR and RTS asserted
        pub fn open(endpoint: &Endpoint, baud_rate: u32, timeout: Duration) -> io::Result<Self> {
            let mut port = serialport::new(endpoint.port_name(), baud_rate)
                .timeout(timeout)
                .open()?;
            port.write_data_terminal_ready(true)?;
            port.write_request_to_send(true)?;
            Ok(Self { port })
        }
    }

    impl Transport for SerialTransport {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            io::Write::write_all(&mut self.port, bytes)?;
            io::Write::flush(&mut self.port)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match io::Read::read(&mut self.port, buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(e),
            }
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.port.clear(ClearBuffer::Input)?;
            Ok(())
        }
    }

    /// Probes serial endpoints
    #[derive(Debug, Clone)]
    pub struct SerialConnector {
        candidates: Vec<Endpoint>,
        baud_rate: u32,
        timeout: Duration,
    }

    impl SerialConnector {
        pub fn new(candidates: Vec<Endpoint>, baud_rate: u32, timeout: Duration) -> Self {
            Self {
                candidates,
                baud_rate,
                timeout,
            }
        }
    }

    impl Connector for SerialConnector {
        fn candidates(&self) -> Vec<Endpoint> {
            self.candidates.clone()
        }

        fn open(&mut self, endpoint: &Endpoint) -> io::Result<Box<dyn Transport>> {
            let transport = SerialTransport::open(endpoint, self.baud_rate, self.timeout)?;
            Ok(Box::new(transport))
        }
    }
}
