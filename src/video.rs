//! Video frame transport, one TCP stream per camera.
//!
//! Frames are opaque byte blobs produced by an out-of-core camera driver
//! behind [`FrameSource`]. The vehicle sends one frame followed by the
//! end-of-frame marker and waits for a single acknowledgement before the
//! next frame, so exactly one frame is ever in flight; the surface side
//! accumulates bytes until the marker and swaps the completed frame into a
//! latest-frame buffer for the GUI. Both ends reconnect with the same
//! discipline as the data links.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::link::{classify_io, LinkError, RECONNECT_DELAY, SOCKET_TIMEOUT};

/// Marks the end of one encoded frame on the wire. The sender is
/// ack-gated, so the marker can only ever appear at the end of the
/// receiver's accumulated buffer.
pub const FRAME_END: &[u8] = b"<frame-end>";

/// Reply sent by the receiver to release the next frame.
pub const FRAME_ACK: &[u8] = b"ACK";

/// Pause between polls of an idle frame source.
const IDLE_SOURCE_DELAY: Duration = Duration::from_millis(10);

/// Source of encoded frames. Implemented by the camera driver, which is
/// outside this crate; tests use scripted sources.
pub trait FrameSource: Send {
    /// Next encoded frame, or `None` when no frame is available yet.
    fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// Vehicle-side frame server for a single camera.
pub struct VideoServer {
    listener: TcpListener,
    source: Box<dyn FrameSource>,
}

impl VideoServer {
    pub async fn bind(addr: &str, source: Box<dyn FrameSource>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, source })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop: one viewer at a time, back to listening on any error.
    pub async fn serve(mut self) {
        loop {
            info!("video stream waiting for a client");
            let (mut stream, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "video accept failed");
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            info!(%peer, "video client connected");
            let err = stream_frames(self.source.as_mut(), &mut stream).await;
            info!(%peer, %err, "video client gone");
        }
    }
}

async fn stream_frames(source: &mut dyn FrameSource, stream: &mut TcpStream) -> LinkError {
    let mut ack = [0u8; 128];
    loop {
        let Some(frame) = source.next_frame() else {
            sleep(IDLE_SOURCE_DELAY).await;
            continue;
        };

        let write = async {
            stream.write_all(&frame).await?;
            stream.write_all(FRAME_END).await
        };
        match timeout(SOCKET_TIMEOUT, write).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return classify_io(err),
            Err(_) => return LinkError::Timeout,
        }

        // One message releases the next frame.
        match timeout(SOCKET_TIMEOUT, stream.read(&mut ack)).await {
            Ok(Ok(0)) => return LinkError::Closed,
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return classify_io(err),
            Err(_) => return LinkError::Timeout,
        }
    }
}

/// Surface-side receiver holding the latest complete frame.
#[derive(Clone)]
pub struct VideoFeed {
    addr: String,
    latest: Arc<Mutex<Option<Vec<u8>>>>,
    frames: Arc<AtomicU64>,
}

impl VideoFeed {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            latest: Arc::new(Mutex::new(None)),
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Latest complete frame, if any has arrived yet.
    pub fn latest(&self) -> Option<Vec<u8>> {
        self.latest.lock().clone()
    }

    /// Total complete frames received since startup.
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Dial-receive-retry loop. Runs for process lifetime; callers keep a
    /// clone for [`VideoFeed::latest`].
    pub async fn run(self) {
        loop {
            let mut stream = match TcpStream::connect(self.addr.as_str()).await {
                Ok(stream) => stream,
                Err(_) => {
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            info!(addr = %self.addr, "video feed up");
            let err = self.session(&mut stream).await;
            warn!(addr = %self.addr, %err, "video feed lost");
            sleep(RECONNECT_DELAY).await;
        }
    }

    async fn session(&self, stream: &mut TcpStream) -> LinkError {
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match timeout(SOCKET_TIMEOUT, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => return LinkError::Closed,
                Ok(Ok(n)) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if buffer.ends_with(FRAME_END) {
                        buffer.truncate(buffer.len() - FRAME_END.len());
                        *self.latest.lock() = Some(std::mem::take(&mut buffer));
                        self.frames.fetch_add(1, Ordering::Relaxed);

                        match timeout(SOCKET_TIMEOUT, stream.write_all(FRAME_ACK)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => return classify_io(err),
                            Err(_) => return LinkError::Timeout,
                        }
                    }
                }
                Ok(Err(err)) => return classify_io(err),
                Err(_) => return LinkError::Timeout,
            }
        }
    }
}
