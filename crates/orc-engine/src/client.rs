//! Client facade.
//!
//! Wires adapter, sequencer, metrics, registry and dispatcher for one
//! connection. Startup errors are returned, never panicked on.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use orc_core::error::Result;
use orc_core::protocol::{CorrelationId, Document};

use crate::codec::BusinessCodec;
use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::obs::EngineMetrics;
use crate::registry::{Delivery, SubscriptionHandle};
use crate::sequencer::Sequencer;
use crate::transport::{InboundConsumer, Outbound, ProtocolAdapter, TrafficSnapshot};

pub struct OrcClient<C: BusinessCodec> {
    cfg: EngineConfig,
    adapter: Arc<ProtocolAdapter>,
    dispatcher: Dispatcher<C>,
    pump: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

impl<C: BusinessCodec> OrcClient<C> {
    /// Connect and start the inbound pump (plus the expiry sweeper when a
    /// TTL is configured). Must run inside a tokio runtime.
    pub async fn connect(cfg: EngineConfig, codec: C) -> Result<Self> {
        cfg.validate()?;

        let sequencer = Sequencer::new()?;
        let metrics = Arc::new(EngineMetrics::default());
        let (adapter, inbound) = ProtocolAdapter::open(&cfg.connection).await?;
        let adapter = Arc::new(adapter);

        let outbound: Arc<dyn Outbound> = adapter.clone();
        let dispatcher = Dispatcher::new(
            outbound,
            codec,
            sequencer,
            metrics,
            cfg.subscriptions.ttl(),
        );

        let consumer: Arc<dyn InboundConsumer> = Arc::new(dispatcher.clone());
        let pump = inbound.spawn(consumer);
        let sweeper = cfg
            .subscriptions
            .ttl()
            .map(|_| spawn_sweeper(dispatcher.clone(), cfg.subscriptions.sweep_interval()));

        tracing::info!(
            peer = %adapter.peer_addr(),
            ttl_ms = cfg.subscriptions.ttl_ms,
            "orc client ready"
        );
        Ok(Self {
            cfg,
            adapter,
            dispatcher,
            pump,
            sweeper,
        })
    }

    pub fn cfg(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Send `message` and subscribe `callback` to every reply carrying
    /// `correlation_id`.
    pub async fn send<F>(
        &self,
        message: Document,
        correlation_id: CorrelationId,
        callback: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(Delivery<C::Object>) + Send + Sync + 'static,
    {
        self.dispatcher
            .send(message, correlation_id, Arc::new(callback))
            .await
    }

    pub fn unsubscribe(&self, correlation_id: &CorrelationId) -> bool {
        self.dispatcher.unsubscribe(correlation_id)
    }

    pub fn pending_subscriptions(&self) -> usize {
        self.dispatcher.pending_subscriptions()
    }

    pub fn traffic(&self) -> TrafficSnapshot {
        self.adapter.traffic()
    }

    /// Prometheus text exposition of the engine metrics.
    pub fn metrics_text(&self) -> String {
        self.dispatcher.metrics().render()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.adapter.peer_addr()
    }

    /// True once the inbound pump has finished (both directions stopped).
    pub fn is_finished(&self) -> bool {
        self.pump.is_finished()
    }

    /// Stop the connection. Idempotent; pending subscriptions are abandoned
    /// when the receiver reports its stop.
    pub fn close(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
        self.adapter.close();
    }
}

impl<C: BusinessCodec> Drop for OrcClient<C> {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_sweeper<C: BusinessCodec>(dispatcher: Dispatcher<C>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let n = dispatcher.purge_expired();
            if n > 0 {
                tracing::info!(expired = n, "expired subscriptions purged");
            }
        }
    })
}
