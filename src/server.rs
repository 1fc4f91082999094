//! Vehicle-side dispatch server.
//!
//! Owns the control-station listener plus one serial link per peripheral,
//! all sharing a single store handle. The listener serves exactly one
//! client at a time: each connected station drives an inner loop of
//! receive-then-reply exchange cycles until the connection dies, at which
//! point the actuator fail-safe runs and the server goes straight back to
//! listening. Re-accepting is the only reconnect mechanism on this side;
//! the peripherals keep exchanging regardless of client presence.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::VehicleConfig;
use crate::link::{classify_io, LinkError, SerialLink, RECONNECT_DELAY, SOCKET_TIMEOUT};
use crate::protocol::{self, FrameCodec};
use crate::store::Store;
use crate::topology::Partition;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind control listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

pub struct DispatchServer {
    store: Arc<Store>,
    listener: TcpListener,
    #[allow(dead_code)]
    links: Vec<JoinHandle<()>>,
}

impl DispatchServer {
    /// Bind the control listener and start every peripheral link on its own
    /// thread. A bind failure here is unrecoverable: without the listener
    /// the vehicle can never be commanded, so startup must fail loudly.
    pub async fn start(store: Arc<Store>, config: &VehicleConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "control listener ready");
        }

        let links = config
            .serial
            .iter()
            .map(|endpoint| {
                SerialLink::new(Arc::clone(&store), endpoint.path.as_str(), endpoint.device)
                    .spawn()
            })
            .collect();

        Ok(Self {
            store,
            listener,
            links,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs for process lifetime.
    pub async fn serve(self) {
        loop {
            info!("waiting for a control station");
            let (stream, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    error!(%err, "accept failed");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            info!(%peer, "control station connected");

            let err = serve_client(&self.store, stream).await;
            warn!(%peer, %err, "control station link lost");

            // Fail-safe: the operator is gone, so every actuator idles
            // until a station reconnects.
            self.store.set_defaults();
        }
    }
}

/// Exchange cycles with one connected station. Returns the fatal error
/// that ended the session; malformed frames never do.
async fn serve_client(store: &Store, stream: TcpStream) -> LinkError {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let mut codec = FrameCodec::new();

    loop {
        line.clear();
        match timeout(SOCKET_TIMEOUT, reader.read_line(&mut line)).await {
            Ok(Ok(0)) => return LinkError::Closed,
            Ok(Ok(_)) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    match protocol::decode_snapshot(trimmed) {
                        Ok(snapshot) => store.set_bulk(Partition::Surface, snapshot),
                        Err(err) => warn!(%err, raw = trimmed, "dropping malformed control frame"),
                    }
                }
            }
            Ok(Err(err)) => return classify_io(err),
            Err(_) => return LinkError::Timeout,
        }

        let snapshot = store.transmit_snapshot(Partition::Surface);
        let frame = match codec.encode(&snapshot) {
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
    }
}
