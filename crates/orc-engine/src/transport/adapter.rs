//! Protocol adapter: text in, text out.
//!
//! Owns the pipeline. Inbound frames become UTF-8 strings for the single
//! registered consumer; outbound OP strings become bytes for the pipeline.
//! The traffic counters are diagnostics only.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;

use orc_core::error::Result;

use crate::config::ConnectionSection;
use crate::transport::pipeline::{Direction, PipelineEvent, PipelineEvents, TransportPipeline};

/// Receiver of inbound OP messages and transport stop notifications.
pub trait InboundConsumer: Send + Sync + 'static {
    fn on_message(&self, raw: String);
    fn on_stopped(&self, direction: Direction, reason: &str);
}

/// Outbound text sink (the adapter in production, a recorder in tests).
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_text(&self, wire: String) -> Result<()>;
}

/// Traffic counters snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrafficSnapshot {
    pub first_byte_at: Option<Instant>,
    pub last_byte_at: Option<Instant>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub frames_in: u64,
    pub frames_out: u64,
}

#[derive(Debug, Default)]
struct TrafficStats {
    inner: Mutex<TrafficSnapshot>,
}

impl TrafficStats {
    fn record_in(&self, n: usize) {
        // Poisoned mutex only loses diagnostics; never panic over it.
        if let Ok(mut t) = self.inner.lock() {
            let now = Instant::now();
            t.first_byte_at.get_or_insert(now);
            t.last_byte_at = Some(now);
            t.bytes_in += n as u64;
            t.frames_in += 1;
        }
    }

    fn record_out(&self, n: usize) {
        if let Ok(mut t) = self.inner.lock() {
            t.bytes_out += n as u64;
            t.frames_out += 1;
        }
    }

    fn snapshot(&self) -> TrafficSnapshot {
        self.inner.lock().map(|t| *t).unwrap_or_default()
    }
}

/// Send half of the adapter.
pub struct ProtocolAdapter {
    pipeline: TransportPipeline,
    traffic: Arc<TrafficStats>,
}

/// Receive half of the adapter; attach a consumer with [`AdapterInbound::spawn`].
pub struct AdapterInbound {
    events: PipelineEvents,
    traffic: Arc<TrafficStats>,
}

impl ProtocolAdapter {
    pub async fn open(cfg: &ConnectionSection) -> Result<(Self, AdapterInbound)> {
        let (pipeline, events) = TransportPipeline::open(cfg).await?;
        let traffic = Arc::new(TrafficStats::default());
        Ok((
            Self {
                pipeline,
                traffic: Arc::clone(&traffic),
            },
            AdapterInbound { events, traffic },
        ))
    }

    pub fn traffic(&self) -> TrafficSnapshot {
        self.traffic.snapshot()
    }

    pub fn close(&self) {
        self.pipeline.close();
    }

    pub fn peer_addr(&self) -> std::net::SocketAddr {
        self.pipeline.peer_addr()
    }
}

#[async_trait]
impl Outbound for ProtocolAdapter {
    async fn send_text(&self, wire: String) -> Result<()> {
        let bytes = Bytes::from(wire);
        let n = bytes.len();
        self.pipeline.send(bytes).await?;
        self.traffic.record_out(n);
        Ok(())
    }
}

impl AdapterInbound {
    /// Pump pipeline events into `consumer` until the pipeline is gone.
    pub fn spawn(self, consumer: Arc<dyn InboundConsumer>) -> JoinHandle<()> {
        tokio::spawn(self.run(consumer))
    }

    async fn run(mut self, consumer: Arc<dyn InboundConsumer>) {
        while let Some(ev) = self.events.recv().await {
            match ev {
                PipelineEvent::Frame(frame) => {
                    self.traffic.record_in(frame.len());
                    match String::from_utf8(frame.to_vec()) {
                        Ok(raw) => consumer.on_message(raw),
                        Err(e) => tracing::warn!(
                            error = %e,
                            bytes = frame.len(),
                            "dropping non utf-8 frame"
                        ),
                    }
                }
                PipelineEvent::SenderStopped(reason) => {
                    consumer.on_stopped(Direction::Send, &reason)
                }
                PipelineEvent::ReceiverStopped(reason) => {
                    consumer.on_stopped(Direction::Receive, &reason)
                }
            }
        }
        tracing::debug!("inbound pump finished");
    }
}
