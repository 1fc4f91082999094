//! Surface-station side of the control link.
//!
//! A client that dials the vehicle and keeps a send-then-receive exchange
//! running: each cycle uploads the safeguarded uplink snapshot and applies
//! the returned telemetry to the local store. Connection loss of any kind
//! degrades to a silent retry loop; the operator only ever sees a gap in
//! the data.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::link::{classify_io, LinkError, RECONNECT_DELAY, SOCKET_TIMEOUT};
use crate::protocol::{self, FrameCodec};
use crate::store::Store;
use crate::topology::Partition;

pub struct Connection {
    store: Arc<Store>,
    addr: String,
    codec: FrameCodec,
}

impl Connection {
    pub fn new(store: Arc<Store>, addr: impl Into<String>) -> Self {
        Self {
            store,
            addr: addr.into(),
            codec: FrameCodec::new(),
        }
    }

    /// Dial-exchange-retry loop. Runs for process lifetime.
    pub async fn run(mut self) {
        loop {
            info!(addr = %self.addr, "connecting to vehicle");
            let stream = match TcpStream::connect(self.addr.as_str()).await {
                Ok(stream) => stream,
                Err(_) => {
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            info!(addr = %self.addr, "vehicle link up, starting data exchange");

            let err = self.session(stream).await;
            warn!(addr = %self.addr, %err, "vehicle link lost");
            sleep(RECONNECT_DELAY).await;
        }
    }

    /// Exchange cycles over one established connection; returns the fatal
    /// error that ended it.
    async fn session(&mut self, stream: TcpStream) -> LinkError {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            let snapshot = self.store.transmit_snapshot(Partition::Surface);
            let frame = match self.codec.encode(&snapshot) {
                Ok(frame) => frame,
                Err(err) => return err.into(),
            };
            let write = async {
                write_half.write_all(frame.as_bytes()).await?;
                write_half.write_all(b"\n").await
            };
            match timeout(SOCKET_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return classify_io(err),
                Err(_) => return LinkError::Timeout,
            }

            line.clear();
            match timeout(SOCKET_TIMEOUT, reader.read_line(&mut line)).await {
                Ok(Ok(0)) => return LinkError::Closed,
                Ok(Ok(_)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match protocol::decode_snapshot(trimmed) {
                        Ok(telemetry) => self.store.set_bulk(Partition::Surface, telemetry),
                        Err(err) => warn!(%err, raw = trimmed, "dropping malformed telemetry frame"),
                    }
                }
                Ok(Err(err)) => return classify_io(err),
                Err(_) => return LinkError::Timeout,
            }
        }
    }
}
