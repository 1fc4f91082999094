//! Wire format shared by every link: one JSON object per line.
//!
//! An outbound frame is a flat key/value object serialized into a bounded,
//! preallocated buffer and terminated by `\n`. Inbound frames from
//! peripherals additionally carry a `deviceID` field naming the sender;
//! frames from the control station are plain key/value subsets.

use arrayvec::ArrayString;
use thiserror::Error;

use crate::store::{Scalar, Snapshot};
use crate::topology::{PeripheralId, DEVICE_ID_FIELD};

/// Upper bound on a single encoded frame, matching the receive window used
/// on every link.
pub const MAX_FRAME_SIZE: usize = 4096;

pub type FrameBuffer = ArrayString<MAX_FRAME_SIZE>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame is not a flat JSON object")]
    InvalidJson,
    #[error("encoded frame exceeds {MAX_FRAME_SIZE} bytes")]
    FrameTooLarge,
    #[error("peripheral frame carries no {DEVICE_ID_FIELD} field")]
    MissingDeviceId,
    #[error("unknown device identifier `{0}`")]
    UnknownDeviceId(String),
    #[error("snapshot serialization failed")]
    Encode,
}

/// Serializes snapshots into a reused bounded buffer.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: FrameBuffer,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            buffer: ArrayString::new(),
        }
    }

    /// Encode one outbound frame, without the trailing newline.
    pub fn encode(&mut self, snapshot: &Snapshot) -> Result<&str, ProtocolError> {
        let json = serde_json::to_string(snapshot).map_err(|_| ProtocolError::Encode)?;
        if json.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge);
        }
        self.buffer.clear();
        self.buffer.push_str(&json);
        Ok(&self.buffer)
    }
}

/// Decode one inbound line into a snapshot. Nested values, arrays and
/// non-object payloads are all rejected as invalid.
pub fn decode_snapshot(line: &str) -> Result<Snapshot, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge);
    }
    serde_json::from_str::<Snapshot>(trimmed).map_err(|_| ProtocolError::InvalidJson)
}

/// Decode a peripheral frame: a snapshot plus the mandatory `deviceID`
/// field, which is stripped from the returned mapping.
pub fn decode_peripheral(line: &str) -> Result<(PeripheralId, Snapshot), ProtocolError> {
    let mut snapshot = decode_snapshot(line)?;
    let id = match snapshot.remove(DEVICE_ID_FIELD) {
        Some(Scalar::Text(id)) => id,
        Some(_) | None => return Err(ProtocolError::MissingDeviceId),
    };
    let device =
        PeripheralId::from_wire(&id).ok_or(ProtocolError::UnknownDeviceId(id))?;
    Ok((device, snapshot))
}
