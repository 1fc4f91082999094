//! Self-healing point-to-point links.
//!
//! A device link owns one ordered byte-stream connection to exactly one
//! counterpart and cycles `Disconnected -> Connecting -> Connected`,
//! reconnecting forever after a fixed delay. Each connected cycle writes
//! the current outbound snapshot and reads one inbound frame. Failures are
//! classified explicitly: a malformed frame is dropped and the connection
//! stays up; an I/O failure, timeout or zero-byte read tears the link down.
//!
//! This module holds the pieces shared by every link (state, outcome and
//! error types, event history) plus the serial implementation used for
//! peripheral controllers. The socket links live in [`crate::server`] and
//! [`crate::surface`] on the async runtime.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::{self, FrameCodec, ProtocolError, MAX_FRAME_SIZE};
use crate::store::Store;
use crate::topology::{Partition, PeripheralId};

/// Delay between reconnection attempts on any link.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Read/write timeout on serial links.
pub const SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Read/write timeout on socket links.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(3);

pub const SERIAL_BAUD: u32 = 115_200;

const MAX_LINK_EVENTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("peer closed the connection")]
    Closed,
    #[error("i/o timed out")]
    Timeout,
    #[error("i/o failure: {0}")]
    Io(io::Error),
    #[error("serial port failure: {0}")]
    Serial(#[from] serialport::Error),
    #[error("outbound frame rejected: {0}")]
    Encode(#[from] ProtocolError),
}

/// Result of one exchange cycle, consumed by the reconnect loop.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Frame exchanged and applied to the store.
    Exchanged,
    /// Inbound frame was malformed and dropped; the link stays up.
    FrameDropped,
    /// The connection is gone; tear down and reconnect after the delay.
    Fatal(LinkError),
}

/// Sort a raw I/O error into the recoverable taxonomy.
pub fn classify_io(err: io::Error) -> LinkError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkError::Timeout,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => LinkError::Closed,
        _ => LinkError::Io(err),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LinkEvent {
    /// Milliseconds since the link was created.
    pub at_ms: u64,
    pub state: LinkState,
}

/// Bounded history of state transitions, kept per link for diagnostics.
#[derive(Debug)]
pub struct LinkEvents {
    started: Instant,
    events: heapless::Vec<LinkEvent, MAX_LINK_EVENTS>,
}

impl LinkEvents {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            events: heapless::Vec::new(),
        }
    }

    pub fn record(&mut self, state: LinkState) {
        let event = LinkEvent {
            at_ms: self.started.elapsed().as_millis() as u64,
            state,
        };
        if self.events.is_full() {
            self.events.remove(0);
        }
        let _ = self.events.push(event);
    }

    pub fn state(&self) -> LinkState {
        self.events
            .last()
            .map_or(LinkState::Disconnected, |event| event.state)
    }

    pub fn history(&self) -> &[LinkEvent] {
        &self.events
    }
}

impl Default for LinkEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Serial device link to one peripheral controller.
///
/// Runs on its own OS thread: serial reads block with a fixed timeout, so
/// the link never touches the async runtime. The partition it writes into
/// follows the identifier declared in each inbound frame, which lets a
/// peripheral reassign its role at runtime.
pub struct SerialLink {
    store: Arc<Store>,
    port_name: String,
    device: PeripheralId,
    codec: FrameCodec,
    rx_buffer: Vec<u8>,
    events: LinkEvents,
}

impl SerialLink {
    pub fn new(store: Arc<Store>, port_name: impl Into<String>, device: PeripheralId) -> Self {
        Self {
            store,
            port_name: port_name.into(),
            device,
            codec: FrameCodec::new(),
            rx_buffer: Vec::with_capacity(512),
            events: LinkEvents::new(),
        }
    }

    /// Partition this link currently exchanges data for.
    pub fn device(&self) -> PeripheralId {
        self.device
    }

    pub fn events(&self) -> &LinkEvents {
        &self.events
    }

    /// Start the link's thread; it reconnects forever and never returns.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn run(mut self) {
        loop {
            self.events.record(LinkState::Connecting);
            info!(port = %self.port_name, device = %self.device, "opening serial link");
            let mut port = match serialport::new(self.port_name.as_str(), SERIAL_BAUD)
                .timeout(SERIAL_TIMEOUT)
                .open()
            {
                Ok(port) => port,
                Err(err) => {
                    debug!(port = %self.port_name, %err, "serial open failed");
                    self.events.record(LinkState::Disconnected);
                    thread::sleep(RECONNECT_DELAY);
                    continue;
                }
            };
            self.events.record(LinkState::Connected);
            info!(port = %self.port_name, device = %self.device, "serial link up");

            loop {
                match self.exchange(&mut port) {
                    CycleOutcome::Exchanged | CycleOutcome::FrameDropped => {}
                    CycleOutcome::Fatal(err) => {
                        warn!(port = %self.port_name, %err, "serial link lost");
                        break;
                    }
                }
            }

            self.events.record(LinkState::Disconnected);
            self.rx_buffer.clear();
            drop(port);
            thread::sleep(RECONNECT_DELAY);
        }
    }

    /// One exchange cycle: write the outbound snapshot, read one frame,
    /// apply it. Generic over the transport so tests can drive it with an
    /// in-memory stream.
    pub fn exchange<T: Read + Write>(&mut self, port: &mut T) -> CycleOutcome {
        let outbound = self.store.snapshot(Partition::Peripheral(self.device));
        let frame = match self.codec.encode(&outbound) {
            Ok(frame) => frame,
            Err(err) => return CycleOutcome::Fatal(err.into()),
        };
        if let Err(err) = port
            .write_all(frame.as_bytes())
            .and_then(|()| port.write_all(b"\n"))
            .and_then(|()| port.flush())
        {
            return CycleOutcome::Fatal(classify_io(err));
        }

        let line = match self.read_line(port) {
            Ok(line) => line,
            Err(err) => return CycleOutcome::Fatal(err),
        };
        if line.trim().is_empty() {
            return CycleOutcome::FrameDropped;
        }
        match protocol::decode_peripheral(&line) {
            Ok((device, snapshot)) => {
                if device != self.device {
                    info!(from = %self.device, to = %device, "link re-targeted by frame identifier");
                    self.device = device;
                }
                self.store.set_bulk(Partition::Peripheral(device), snapshot);
                CycleOutcome::Exchanged
            }
            Err(err) => {
                warn!(device = %self.device, %err, "dropping malformed frame");
                CycleOutcome::FrameDropped
            }
        }
    }

    fn read_line<T: Read>(&mut self, port: &mut T) -> Result<String, LinkError> {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(pos) = self.rx_buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.rx_buffer.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            // A peer that never terminates a frame must not grow the buffer
            // without bound; the partial garbage is dropped.
            if self.rx_buffer.len() > MAX_FRAME_SIZE {
                self.rx_buffer.clear();
            }
            match port.read(&mut chunk) {
                Ok(0) => return Err(LinkError::Closed),
                Ok(n) => self.rx_buffer.extend_from_slice(&chunk[..n]),
                Err(err) => return Err(classify_io(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_splits_fatal_kinds() {
        assert!(matches!(
            classify_io(io::Error::new(io::ErrorKind::TimedOut, "t")),
            LinkError::Timeout
        ));
        assert!(matches!(
            classify_io(io::Error::new(io::ErrorKind::ConnectionReset, "r")),
            LinkError::Closed
        ));
        assert!(matches!(
            classify_io(io::Error::new(io::ErrorKind::Other, "x")),
            LinkError::Io(_)
        ));
    }

    #[test]
    fn event_history_is_bounded() {
        let mut events = LinkEvents::new();
        for _ in 0..(MAX_LINK_EVENTS * 2) {
            events.record(LinkState::Connecting);
            events.record(LinkState::Disconnected);
        }
        assert_eq!(events.history().len(), MAX_LINK_EVENTS);
        assert_eq!(events.state(), LinkState::Disconnected);
    }
}
