//! TCP transport pipeline.
//!
//! Responsibilities:
//! - Own exactly one TCP connection to `(host, port)`
//! - One receive task: read -> frame -> `PipelineEvent::Frame`
//! - One send task: drain the bounded send queue -> `write_all`
//! - Report a stop per direction with a reason; a failed direction never
//!   takes the other one down with it
//!
//! There is no reconnect: once a direction stops it stays stopped.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use orc_core::error::{OrcError, Result};

use crate::config::ConnectionSection;
use crate::transport::framing::OpFramer;

const EVENT_QUEUE_DEPTH: usize = 1024;

/// Socket direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Send => "sender",
            Direction::Receive => "receiver",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications from the socket tasks, in the order they happened.
#[derive(Debug)]
pub enum PipelineEvent {
    /// One complete OP message.
    Frame(Bytes),
    SenderStopped(String),
    ReceiverStopped(String),
}

pub type PipelineEvents = mpsc::Receiver<PipelineEvent>;

/// Send side of an open connection. Dropping it closes both directions.
pub struct TransportPipeline {
    out_tx: mpsc::Sender<Bytes>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    peer: SocketAddr,
}

impl TransportPipeline {
    /// Connect and start the receive and send tasks.
    pub async fn open(cfg: &ConnectionSection) -> Result<(Self, PipelineEvents)> {
        let addr = cfg.addr();
        tracing::info!(%addr, "connecting");

        let stream = timeout(cfg.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| OrcError::Transport(format!("connect to {addr} timed out")))?
            .map_err(|e| OrcError::Transport(format!("connect to {addr} failed: {e}")))?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(error = %e, "failed to set TCP_NODELAY");
        }
        let peer = stream
            .peer_addr()
            .map_err(|e| OrcError::Transport(format!("peer address unavailable: {e}")))?;

        let (rd, wr) = stream.into_split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (out_tx, out_rx) = mpsc::channel(cfg.send_queue_depth);
        let (shutdown, _) = watch::channel(false);

        tokio::spawn(receive_loop(
            rd,
            OpFramer::new(cfg.max_frame_bytes),
            event_tx.clone(),
            shutdown.subscribe(),
        ));
        tokio::spawn(send_loop(wr, out_rx, event_tx, shutdown.subscribe()));

        tracing::info!(%peer, "connected");
        Ok((
            Self {
                out_tx,
                shutdown,
                closed: AtomicBool::new(false),
                peer,
            },
            event_rx,
        ))
    }

    /// Queue bytes for transmission.
    pub async fn send(&self, data: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(OrcError::Transport("pipeline closed".into()));
        }
        self.out_tx
            .send(data)
            .await
            .map_err(|_| OrcError::Transport("sender stopped".into()))
    }

    /// Stop both directions. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        tracing::info!(peer = %self.peer, "pipeline closing");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for TransportPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

async fn receive_loop(
    mut rd: OwnedReadHalf,
    mut framer: OpFramer,
    events: mpsc::Sender<PipelineEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let reason = loop {
        let read = tokio::select! {
            _ = shutdown.changed() => break "closed by owner".to_string(),
            r = rd.read_buf(framer.buffer_mut()) => r,
        };
        match read {
            Ok(0) => break "peer closed connection".to_string(),
            Ok(_) => {}
            Err(e) => break format!("read failed: {e}"),
        }
        if let Err(reason) = forward_frames(&mut framer, &events).await {
            break reason;
        }
    };

    tracing::warn!(direction = %Direction::Receive, %reason, "transport direction stopped");
    let _ = events.send(PipelineEvent::ReceiverStopped(reason)).await;
}

async fn forward_frames(
    framer: &mut OpFramer,
    events: &mpsc::Sender<PipelineEvent>,
) -> std::result::Result<(), String> {
    loop {
        match framer.next_frame() {
            Ok(Some(frame)) => events
                .send(PipelineEvent::Frame(frame))
                .await
                .map_err(|_| "event consumer dropped".to_string())?,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e.to_string()),
        }
    }
}

async fn send_loop(
    mut wr: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<PipelineEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let reason = loop {
        let data = tokio::select! {
            _ = shutdown.changed() => break "closed by owner".to_string(),
            d = out_rx.recv() => match d {
                Some(d) => d,
                None => break "send queue closed".to_string(),
            },
        };
        if let Err(e) = wr.write_all(&data).await {
            break format!("write failed: {e}");
        }
        if let Err(e) = wr.flush().await {
            break format!("flush failed: {e}");
        }
        tracing::trace!(bytes = data.len(), "frame written");
    };

    // send() fails from here on
    out_rx.close();
    let _ = wr.shutdown().await;

    tracing::warn!(direction = %Direction::Send, %reason, "transport direction stopped");
    let _ = events.send(PipelineEvent::SenderStopped(reason)).await;
}
