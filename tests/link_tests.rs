use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use rovlink::link::{CycleOutcome, LinkError, SerialLink};
use rovlink::store::{Scalar, Snapshot, Store};
use rovlink::topology::{Partition, PeripheralId, Topology};

/// In-memory transport standing in for a serial port: scripted inbound
/// bytes, captured outbound bytes. EOF on the inbound side reads as a
/// zero-byte read, exactly like a vanished peer.
struct ScriptedPort {
    rx: Cursor<Vec<u8>>,
    tx: Vec<u8>,
}

impl ScriptedPort {
    fn new(inbound: &[u8]) -> Self {
        Self {
            rx: Cursor::new(inbound.to_vec()),
            tx: Vec::new(),
        }
    }

    fn sent_lines(&self) -> Vec<Snapshot> {
        self.tx
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).expect("outbound frames are valid JSON"))
            .collect()
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.rx.read(buf)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Transport whose reads always time out.
struct StalledPort;

impl Read for StalledPort {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::TimedOut, "stalled"))
    }
}

impl Write for StalledPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn thruster_link(store: &Arc<Store>) -> SerialLink {
    SerialLink::new(Arc::clone(store), "mock", PeripheralId::Thrusters)
}

#[test]
fn exchange_writes_snapshot_and_applies_reply() {
    let store = Arc::new(Store::new(Topology::vehicle()));
    store.set(Partition::Surface, "Thr_FP", Scalar::Int(1600));

    let mut port = ScriptedPort::new(b"{\"deviceID\": \"PCU_T\", \"status_T\": 1, \"Sen_IMU_X\": 0.5}\n");
    let mut link = thruster_link(&store);

    assert!(matches!(link.exchange(&mut port), CycleOutcome::Exchanged));

    // Outbound carried the thrusters' current actuator state.
    let sent = port.sent_lines();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["Thr_FP"], Scalar::Int(1600));

    // Inbound telemetry landed in the device slot and the surface mirror.
    assert_eq!(
        store.get(Partition::Peripheral(PeripheralId::Thrusters), "Sen_IMU_X"),
        Some(Scalar::Float(0.5))
    );
    assert_eq!(store.snapshot(Partition::Surface)["status_T"], Scalar::Int(1));
}

#[test]
fn malformed_frame_is_dropped_and_link_continues() {
    let store = Arc::new(Store::new(Topology::vehicle()));
    let mut port = ScriptedPort::new(
        b"this is not json\n{\"deviceID\": \"PCU_T\", \"status_T\": 2}\n",
    );
    let mut link = thruster_link(&store);

    // Bad frame: dropped, connection not torn down.
    assert!(matches!(link.exchange(&mut port), CycleOutcome::FrameDropped));
    // Next cycle on the same connection processes the good frame.
    assert!(matches!(link.exchange(&mut port), CycleOutcome::Exchanged));
    assert_eq!(store.snapshot(Partition::Surface)["status_T"], Scalar::Int(2));
}

#[test]
fn frame_without_device_id_is_dropped() {
    let store = Arc::new(Store::new(Topology::vehicle()));
    let mut port = ScriptedPort::new(b"{\"status_T\": 1}\n");
    let mut link = thruster_link(&store);

    assert!(matches!(link.exchange(&mut port), CycleOutcome::FrameDropped));
    assert!(store.snapshot(Partition::Surface).is_empty());
}

#[test]
fn link_retargets_to_declared_device() {
    let store = Arc::new(Store::new(Topology::vehicle()));
    store.set(Partition::Surface, "Thr_M", Scalar::Int(1550));

    let mut port = ScriptedPort::new(
        b"{\"deviceID\": \"PCU_M\", \"status_M\": 1}\n{\"deviceID\": \"PCU_M\", \"status_M\": 1}\n",
    );
    let mut link = thruster_link(&store);

    assert!(matches!(link.exchange(&mut port), CycleOutcome::Exchanged));
    assert_eq!(link.device(), PeripheralId::Micro);
    assert_eq!(
        store.get(Partition::Peripheral(PeripheralId::Micro), "status_M"),
        Some(Scalar::Int(1))
    );

    // The next outbound snapshot follows the new identity.
    assert!(matches!(link.exchange(&mut port), CycleOutcome::Exchanged));
    let sent = link_sent_after_retarget(&port);
    assert_eq!(sent["Thr_M"], Scalar::Int(1550));
}

fn link_sent_after_retarget(port: &ScriptedPort) -> Snapshot {
    port.sent_lines().pop().expect("second outbound frame")
}

#[test]
fn zero_byte_read_is_fatal() {
    let store = Arc::new(Store::new(Topology::vehicle()));
    let mut port = ScriptedPort::new(b"");
    let mut link = thruster_link(&store);

    match link.exchange(&mut port) {
        CycleOutcome::Fatal(LinkError::Closed) => {}
        other => panic!("expected fatal closed, got {other:?}"),
    }
}

#[test]
fn read_timeout_is_fatal() {
    let store = Arc::new(Store::new(Topology::vehicle()));
    let mut link = thruster_link(&store);

    match link.exchange(&mut StalledPort) {
        CycleOutcome::Fatal(LinkError::Timeout) => {}
        other => panic!("expected fatal timeout, got {other:?}"),
    }
}
