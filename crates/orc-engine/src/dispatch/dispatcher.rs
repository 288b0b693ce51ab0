use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use orc_core::error::{OrcError, Result};
use orc_core::protocol::envelope::FIELD_PRIVATE;
use orc_core::protocol::grammar::count_braces;
use orc_core::protocol::{
    decode_with, encode_with, CorrelationId, Document, Envelope, MessageType, SequencePolicy,
};

use crate::codec::BusinessCodec;
use crate::obs::EngineMetrics;
use crate::registry::{
    Callback, CancelSubscription, Delivery, SendGate, Subscriber, SubscriptionHandle,
    SubscriptionRegistry,
};
use crate::sequencer::Sequencer;
use crate::transport::{Direction, InboundConsumer, Outbound};

/// Path of the partition sub-key inside feed payloads.
const UNDERLYING_PATH: &str = "instrument_id/underlying";
const UNDERLYING: &str = "underlying";

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Well formed, but nobody is subscribed to its correlation id.
    Dropped,
    /// Handed to the sequencer for delivery.
    Routed {
        message_type: MessageType,
        correlation_id: CorrelationId,
    },
}

struct Inner<C: BusinessCodec> {
    outbound: Arc<dyn Outbound>,
    codec: C,
    registry: Arc<SubscriptionRegistry<C::Object>>,
    sequencer: Sequencer,
    metrics: Arc<EngineMetrics>,
}

/// Correlates outbound requests with inbound replies.
///
/// Outbound: register the callback, stamp `private`, encode, send.
/// Inbound: validate, decode, split the envelope, look up the subscriber and
/// hand the message to its type handler on the sequencer.
pub struct Dispatcher<C: BusinessCodec> {
    inner: Arc<Inner<C>>,
}

impl<C: BusinessCodec> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: BusinessCodec> Dispatcher<C> {
    pub fn new(
        outbound: Arc<dyn Outbound>,
        codec: C,
        sequencer: Sequencer,
        metrics: Arc<EngineMetrics>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                outbound,
                codec,
                registry: Arc::new(SubscriptionRegistry::new(ttl)),
                sequencer,
                metrics,
            }),
        }
    }

    /// Subscribe `callback` to `correlation_id`, then transmit `message`.
    ///
    /// The subscription exists before the first byte leaves, so a fast reply
    /// cannot be missed, but its deliveries are held until this call returns.
    /// On encode or send failure, or if this future is dropped first, the
    /// subscription is removed again and held deliveries are discarded.
    pub async fn send(
        &self,
        mut message: Document,
        correlation_id: CorrelationId,
        callback: Callback<C::Object>,
    ) -> Result<SubscriptionHandle> {
        let inner = &self.inner;
        let gate = Arc::new(SendGate::pending());
        if inner
            .registry
            .insert(correlation_id, callback, Arc::clone(&gate))
        {
            tracing::debug!(%correlation_id, "subscription replaced");
        }
        self.refresh_gauge();
        let pending = PendingSend {
            dispatcher: self,
            correlation_id,
            gate,
            armed: true,
        };

        message.set_leaf(FIELD_PRIVATE, correlation_id.to_string());
        let policy = SequencePolicy::from_schema(inner.codec.schema());
        let wire = encode_with(&message, policy)?;
        inner.outbound.send_text(wire).await?;

        pending.commit();
        tracing::debug!(%correlation_id, "request sent");
        let registry = Arc::downgrade(&inner.registry);
        let registry: Weak<dyn CancelSubscription> = registry;
        Ok(SubscriptionHandle::new(correlation_id, registry))
    }

    /// Returns whether a subscription existed.
    pub fn unsubscribe(&self, correlation_id: &CorrelationId) -> bool {
        let removed = self.inner.registry.remove(correlation_id);
        self.refresh_gauge();
        removed
    }

    pub fn pending_subscriptions(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn purge_expired(&self) -> usize {
        let n = self.inner.registry.purge_expired();
        if n > 0 {
            self.refresh_gauge();
        }
        n
    }

    /// Remove every subscription, logging each with `reason`.
    pub fn abandon_all(&self, reason: &str) -> usize {
        let ids = self.inner.registry.drain_all();
        for id in &ids {
            tracing::warn!(correlation_id = %id, %reason, "subscription abandoned");
        }
        self.inner
            .metrics
            .abandoned_subscriptions
            .add(&[], ids.len() as u64);
        self.refresh_gauge();
        ids.len()
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.inner.metrics
    }

    /// Route one raw inbound message.
    ///
    /// Correlation misses are not errors. Delivery itself happens later on
    /// the sequencer; payload failures there are logged and counted.
    pub fn on_message(&self, raw: &str) -> Result<InboundOutcome> {
        let inner = &self.inner;
        let m = &inner.metrics;

        let braces = count_braces(raw);
        if !braces.is_balanced() {
            m.grammar_errors.inc(&[]);
            return Err(OrcError::grammar(
                0,
                format!(
                    "unbalanced braces: {} '{{' vs {} '}}'",
                    braces.open, braces.close
                ),
            ));
        }

        let policy = SequencePolicy::from_schema(inner.codec.schema());
        let doc = decode_with(raw, policy).inspect_err(|_| m.grammar_errors.inc(&[]))?;
        let env = Envelope::split(doc).inspect_err(|_| m.envelope_errors.inc(&[]))?;

        let message_type = env.message_type;
        let correlation_id = env.correlation_id;
        let Some(subscriber) = inner.registry.lookup(&correlation_id) else {
            m.correlation_misses.inc(&[]);
            tracing::debug!(%correlation_id, %message_type, "no subscriber; dropped");
            return Ok(InboundOutcome::Dropped);
        };

        m.inbound_messages
            .inc(&[("message_type", message_type.as_str())]);
        let shared = Arc::clone(inner);
        inner
            .sequencer
            .sequence(message_type.as_str(), move || handle(&shared, env, subscriber));

        Ok(InboundOutcome::Routed {
            message_type,
            correlation_id,
        })
    }

    fn refresh_gauge(&self) {
        self.inner
            .metrics
            .subscriptions_active
            .set(&[], self.inner.registry.len() as i64);
    }
}

/// Registration made by an in-flight `send`. Rolled back unless committed.
struct PendingSend<'a, C: BusinessCodec> {
    dispatcher: &'a Dispatcher<C>,
    correlation_id: CorrelationId,
    gate: Arc<SendGate>,
    armed: bool,
}

impl<C: BusinessCodec> PendingSend<'_, C> {
    fn commit(mut self) {
        self.armed = false;
        self.gate.open();
    }
}

impl<C: BusinessCodec> Drop for PendingSend<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.gate.close();
        let d = self.dispatcher;
        if d.inner.registry.remove_gated(&self.correlation_id, &self.gate) {
            d.refresh_gauge();
            tracing::warn!(
                correlation_id = %self.correlation_id,
                "send failed; subscription rolled back"
            );
        }
    }
}

/// Message-type handler; runs on the sequencer under the type tag.
fn handle<C: BusinessCodec>(
    inner: &Arc<Inner<C>>,
    env: Envelope,
    subscriber: Subscriber<C::Object>,
) {
    let started = Instant::now();
    let kind = env.message_type;
    let labels = [("message_type", kind.as_str())];

    let routed = partition_key(kind, &env.payload)
        .and_then(|key| Ok((key, inner.codec.decode(kind, &env.payload)?)));

    match routed {
        Ok((key, payload)) => {
            let delivery = Delivery {
                correlation_id: env.correlation_id,
                message_type: kind,
                payload,
            };
            let metrics = Arc::clone(&inner.metrics);
            inner.sequencer.sequence_with_key(
                key,
                move |d: Delivery<C::Object>| {
                    // the request may still be in flight
                    if !subscriber.gate.wait() {
                        tracing::debug!(
                            correlation_id = %d.correlation_id,
                            "send failed; delivery discarded"
                        );
                        return;
                    }
                    (subscriber.callback)(d);
                    metrics.deliveries.inc(&[("message_type", kind.as_str())]);
                },
                delivery,
            );
        }
        Err(e) => {
            inner.metrics.payload_errors.inc(&labels);
            tracing::warn!(
                correlation_id = %env.correlation_id,
                message_type = %kind,
                code = e.code().as_str(),
                error = %e,
                "payload rejected"
            );
        }
    }

    inner.metrics.dispatch_duration.observe(&labels, started.elapsed());
}

/// Delivery partition for a payload of type `kind`.
///
/// Feeds are ordered per underlying instrument; every other type is ordered
/// as a whole under its tag.
pub fn partition_key(kind: MessageType, payload: &Document) -> Result<String> {
    match kind {
        MessageType::InstrumentFeed | MessageType::PriceFeed => payload
            .lookup_value(UNDERLYING_PATH)
            .or_else(|| payload.find_leaf(UNDERLYING))
            .map(str::to_string)
            .ok_or_else(|| {
                OrcError::PayloadDecode(format!("{kind} payload has no underlying"))
            }),
        MessageType::TheoreticalCalculationGroup
        | MessageType::TradeFeed
        | MessageType::OrderInsert => Ok(kind.as_str().to_string()),
    }
}

impl<C: BusinessCodec> InboundConsumer for Dispatcher<C> {
    fn on_message(&self, raw: String) {
        if let Err(e) = Dispatcher::on_message(self, &raw) {
            tracing::warn!(
                code = e.code().as_str(),
                error = %e,
                bytes = raw.len(),
                "inbound message rejected"
            );
        }
    }

    fn on_stopped(&self, direction: Direction, reason: &str) {
        self.inner
            .metrics
            .transport_stops
            .inc(&[("direction", direction.as_str())]);
        if direction == Direction::Receive {
            let n = self.abandon_all(reason);
            tracing::warn!(abandoned = n, %reason, "receiver stopped");
        }
    }
}
