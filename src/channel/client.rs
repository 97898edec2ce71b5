use anyhow::{Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::ChannelMessage;
use super::state::ConnectionState;
use crate::media::EncodedFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Encoded frames waiting for the writer; small so stale frames are dropped
const OUTBOUND_QUEUE: usize = 2;
const INBOUND_QUEUE: usize = 64;
/// How long close waits for the writer/reader tasks to wind down
const CLOSE_GRACE: Duration = Duration::from_secs(2);

enum WriterCommand {
    Frame(EncodedFrame),
    Close,
}

struct Link {
    writer_tx: mpsc::Sender<WriterCommand>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// Persistent bidirectional channel to the recognition service
pub struct StreamingChannel {
    endpoint: String,
    state: Arc<watch::Sender<ConnectionState>>,
    link: Mutex<Option<Link>>,
    frames_sent: Arc<AtomicU64>,
}

impl StreamingChannel {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            endpoint: endpoint.into(),
            state: Arc::new(state),
            link: Mutex::new(None),
            frames_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Frame pairs written to the socket across all connections
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    /// Open the WebSocket
    ///
    /// Returns the receiver of raw inbound text messages, or `None` when the
    /// channel is already connected, another connect is in progress, or the
    /// channel was closed before the handshake finished.
    pub async fn connect(&self) -> Result<Option<mpsc::Receiver<String>>> {
        let claimed = self.state.send_if_modified(|s| {
            if s.can_connect() {
                *s = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            debug!("Connect ignored, channel is {}", self.state());
            return Ok(None);
        }

        info!("Connecting to recognition service at {}", self.endpoint);

        // Resolves once close() abandons this connect
        let mut state_rx = self.state.subscribe();
        let abandoned = async move {
            while state_rx.changed().await.is_ok() {
                if *state_rx.borrow() != ConnectionState::Connecting {
                    break;
                }
            }
        };

        let attempt = tokio::select! {
            result = connect_async(self.endpoint.as_str()) => Some(result),
            _ = abandoned => None,
        };
        let Some(attempt) = attempt else {
            info!("Connect abandoned, channel is {}", self.state());
            return Ok(None);
        };

        let ws = match attempt {
            Ok((ws, _response)) => ws,
            Err(e) => {
                let reason = e.to_string();
                let failed = self.state.send_if_modified(|s| {
                    if *s == ConnectionState::Connecting {
                        *s = ConnectionState::Errored(reason);
                        true
                    } else {
                        false
                    }
                });
                if !failed {
                    debug!("Connect failed after the channel was closed: {}", e);
                    return Ok(None);
                }
                return Err(e)
                    .with_context(|| format!("Failed to connect to {}", self.endpoint));
            }
        };

        // Checked under the link lock: close() moves Connecting to Closed under it too
        let mut link = self.link.lock().await;
        let claimed = self.state.send_if_modified(|s| {
            if *s == ConnectionState::Connecting {
                *s = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if !claimed {
            drop(link);
            info!("Channel closed while connecting, dropping the new socket");
            let mut ws = ws;
            if let Err(e) = ws.close(None).await {
                debug!("Close frame not sent: {}", e);
            }
            return Ok(None);
        }

        if let Some(stale) = link.take() {
            stale.writer.abort();
            stale.reader.abort();
        }

        let (sink, stream) = ws.split();
        let (writer_tx, writer_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

        let writer = tokio::spawn(write_loop(
            sink,
            writer_rx,
            Arc::clone(&self.state),
            Arc::clone(&self.frames_sent),
        ));
        let reader = tokio::spawn(read_loop(stream, inbound_tx, Arc::clone(&self.state)));

        *link = Some(Link {
            writer_tx,
            writer,
            reader,
        });

        info!("Connected to recognition service");

        Ok(Some(inbound_rx))
    }

    /// Handle for queueing encoded frames, if a connection exists
    pub async fn outbound(&self) -> Option<OutboundHandle> {
        let link = self.link.lock().await;
        link.as_ref().map(|l| OutboundHandle {
            tx: l.writer_tx.clone(),
            state: self.state.subscribe(),
        })
    }

    /// Close the channel
    ///
    /// Frames already queued are flushed before the close frame. A connect
    /// still in progress is abandoned. Returns `false` if there was nothing
    /// to close.
    pub async fn close(&self) -> Result<bool> {
        let (link, was_open) = {
            let mut link = self.link.lock().await;
            // Producers and an in-flight connect see a closed channel from here on
            let was_open = self.state.send_if_modified(|s| match s {
                ConnectionState::Connected | ConnectionState::Connecting => {
                    *s = ConnectionState::Closed;
                    true
                }
                _ => false,
            });
            (link.take(), was_open)
        };
        let Some(mut link) = link else {
            if was_open {
                info!("Abandoned connect to recognition service");
            }
            return Ok(was_open);
        };

        info!("Closing recognition channel");

        if link.writer_tx.send(WriterCommand::Close).await.is_err() {
            debug!("Writer already stopped");
        }
        drop(link.writer_tx);

        match tokio::time::timeout(CLOSE_GRACE, &mut link.writer).await {
            Ok(Err(e)) => error!("Channel writer task panicked: {}", e),
            Err(_) => {
                warn!("Channel writer did not stop in time");
                link.writer.abort();
            }
            Ok(Ok(())) => {}
        }

        match tokio::time::timeout(CLOSE_GRACE, &mut link.reader).await {
            Ok(Err(e)) if !e.is_cancelled() => error!("Channel reader task panicked: {}", e),
            Err(_) => {
                debug!("Server did not finish the close handshake, dropping reader");
                link.reader.abort();
            }
            _ => {}
        }

        info!(
            "Recognition channel closed ({} frames sent)",
            self.frames_sent()
        );

        Ok(true)
    }
}

/// Producer side of the outbound queue
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<WriterCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl OutboundHandle {
    pub fn is_open(&self) -> bool {
        self.state.borrow().is_open() && !self.tx.is_closed()
    }

    /// Queue a frame without waiting; returns `false` if it was dropped
    pub fn send_frame(&self, frame: EncodedFrame) -> bool {
        if !self.is_open() {
            return false;
        }

        match self.tx.try_send(WriterCommand::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

fn mark_errored(state: &watch::Sender<ConnectionState>, reason: String) {
    state.send_if_modified(|s| {
        if s.is_open() {
            *s = ConnectionState::Errored(reason);
            true
        } else {
            false
        }
    });
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<WriterCommand>,
    state: Arc<watch::Sender<ConnectionState>>,
    frames_sent: Arc<AtomicU64>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Frame(frame) => {
                if let Err(e) = send_pair(&mut sink, frame).await {
                    error!("Failed to send frame: {:#}", e);
                    mark_errored(&state, e.to_string());
                    break;
                }
                frames_sent.fetch_add(1, Ordering::SeqCst);
            }
            WriterCommand::Close => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    debug!("Close frame not sent: {}", e);
                }
                break;
            }
        }
    }
}

/// Metadata then binary, back to back on the same sink
async fn send_pair(sink: &mut SplitSink<WsStream, Message>, frame: EncodedFrame) -> Result<()> {
    let [meta, bytes] = ChannelMessage::pair(frame.timestamp, frame.bytes);

    sink.feed(meta.into_message()?)
        .await
        .context("Failed to queue frame metadata")?;
    sink.send(bytes.into_message()?)
        .await
        .context("Failed to send frame bytes")?;

    Ok(())
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    inbound_tx: mpsc::Sender<String>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if inbound_tx.send(text).await.is_err() {
                    debug!("Inbound consumer gone, stopping reader");
                    break;
                }
            }
            Ok(Message::Binary(bytes)) => {
                warn!("Ignoring unexpected binary message ({} bytes)", bytes.len());
            }
            Ok(Message::Close(frame)) => {
                info!("Recognition service closed the channel: {:?}", frame);
                state.send_if_modified(|s| {
                    if s.is_open() {
                        *s = ConnectionState::Closed;
                        true
                    } else {
                        false
                    }
                });
                // Keep reading so the close handshake completes
            }
            Ok(_) => {}
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => break,
            Err(e) => {
                if state.borrow().is_open() {
                    error!("Recognition channel error: {}", e);
                } else {
                    debug!("Channel error after close: {}", e);
                }
                mark_errored(&state, e.to_string());
                return;
            }
        }
    }

    state.send_if_modified(|s| {
        if s.is_open() {
            *s = ConnectionState::Closed;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbound_rejects_when_not_open() {
        let (tx, mut rx) = mpsc::channel(2);
        let (state, _) = watch::channel(ConnectionState::Connected);
        let handle = OutboundHandle {
            tx,
            state: state.subscribe(),
        };

        let frame = EncodedFrame {
            bytes: vec![0xFF, 0xD8],
            timestamp: 0.2,
        };
        assert!(handle.send_frame(frame.clone()));

        state.send_replace(ConnectionState::Closed);
        assert!(!handle.is_open());
        assert!(!handle.send_frame(frame));

        assert!(matches!(rx.recv().await, Some(WriterCommand::Frame(f)) if f.timestamp == 0.2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_outbound_drops_when_queue_full() {
        let (tx, _rx) = mpsc::channel(1);
        let (_state, state_rx) = watch::channel(ConnectionState::Connected);
        let handle = OutboundHandle {
            tx,
            state: state_rx,
        };

        let frame = EncodedFrame {
            bytes: vec![1, 2, 3],
            timestamp: 1.0,
        };
        assert!(handle.send_frame(frame.clone()));
        assert!(!handle.send_frame(frame));
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let channel = StreamingChannel::new("ws://127.0.0.1:9/ws/video");
        assert!(!channel.close().await.unwrap());
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(channel.outbound().await.is_none());
    }

    #[tokio::test]
    async fn test_close_abandons_pending_connect() {
        // Accepts TCP but never answers the WebSocket handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stalled = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let channel = Arc::new(StreamingChannel::new(format!("ws://{}/ws/video", addr)));
        let connecting = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.connect().await })
        };

        let mut state = channel.subscribe();
        state
            .wait_for(|s| *s == ConnectionState::Connecting)
            .await
            .unwrap();

        assert!(channel.close().await.unwrap());
        assert_eq!(channel.state(), ConnectionState::Closed);

        let result = tokio::time::timeout(Duration::from_secs(5), connecting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(result.is_none());
        assert_eq!(channel.state(), ConnectionState::Closed);
        assert!(channel.outbound().await.is_none());

        stalled.abort();
    }

    #[tokio::test]
    async fn test_failed_connect_surfaces_error_state() {
        // Port 9 (discard) is not listening for WebSocket upgrades
        let channel = StreamingChannel::new("ws://127.0.0.1:9/ws/video");
        assert!(channel.connect().await.is_err());
        assert!(matches!(channel.state(), ConnectionState::Errored(_)));
        assert!(channel.state().can_connect());
    }
}
