use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use orc_core::protocol::{CorrelationId, MessageType};

use super::gate::SendGate;

/// What a subscriber receives for each matching reply.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub correlation_id: CorrelationId,
    pub message_type: MessageType,
    pub payload: T,
}

/// Subscriber callback; invoked once per matching inbound message.
pub type Callback<T> = Arc<dyn Fn(Delivery<T>) + Send + Sync>;

/// A live lookup result: where to deliver, and the gate deliveries wait on.
pub struct Subscriber<T> {
    pub callback: Callback<T>,
    pub gate: Arc<SendGate>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            gate: Arc::clone(&self.gate),
        }
    }
}

struct Subscription<T> {
    callback: Callback<T>,
    gate: Arc<SendGate>,
    created_seq: u64,
    created_at: Instant,
    expires_at: Option<Instant>,
}

impl<T> Subscription<T> {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// Subscription table:
/// - `correlation_id -> (callback, gate, created_seq, expiry)`
///
/// Lookups never remove live entries; a reply stream may carry many messages
/// for one id. Entries leave through `remove`, expiry or `drain_all`.
///
/// The TTL is an idle limit: it runs from registration and restarts on every
/// successful lookup, so a busy reply stream does not expire mid-flight.
pub struct SubscriptionRegistry<T> {
    subs: DashMap<CorrelationId, Subscription<T>>,
    ttl: Option<Duration>,
    seq: AtomicU64,
}

impl<T> SubscriptionRegistry<T> {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            subs: DashMap::new(),
            ttl,
            seq: AtomicU64::new(1),
        }
    }

    /// Register (or replace) the callback for `id`. Returns true on replace.
    pub fn insert(&self, id: CorrelationId, callback: Callback<T>, gate: Arc<SendGate>) -> bool {
        let created_at = Instant::now();
        let created_seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let sub = Subscription {
            callback,
            gate,
            created_seq,
            created_at,
            expires_at: self.ttl.map(|ttl| created_at + ttl),
        };
        self.subs.insert(id, sub).is_some()
    }

    /// Subscriber for `id`, restarting its TTL. An expired entry is removed
    /// and reported as absent.
    pub fn lookup(&self, id: &CorrelationId) -> Option<Subscriber<T>> {
        let now = Instant::now();
        {
            let mut sub = self.subs.get_mut(id)?;
            if !sub.expired(now) {
                if let Some(ttl) = self.ttl {
                    sub.expires_at = Some(now + ttl);
                }
                return Some(Subscriber {
                    callback: Arc::clone(&sub.callback),
                    gate: Arc::clone(&sub.gate),
                });
            }
        }
        self.subs.remove_if(id, |_, s| s.expired(now));
        None
    }

    pub fn remove(&self, id: &CorrelationId) -> bool {
        match self.subs.remove(id) {
            Some((_, sub)) => {
                sub.gate.close();
                true
            }
            None => false,
        }
    }

    /// Remove `id` only while it is still the registration guarded by `gate`.
    pub fn remove_gated(&self, id: &CorrelationId, gate: &Arc<SendGate>) -> bool {
        self.subs
            .remove_if(id, |_, s| Arc::ptr_eq(&s.gate, gate))
            .is_some()
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.subs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Drop every entry whose TTL elapsed. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.subs.len();
        self.subs.retain(|id, s| {
            let keep = !s.expired(now);
            if !keep {
                s.gate.close();
                tracing::debug!(
                    correlation_id = %id,
                    age_ms = s.created_at.elapsed().as_millis() as u64,
                    "subscription expired"
                );
            }
            keep
        });
        before.saturating_sub(self.subs.len())
    }

    /// Remove everything, oldest registration first.
    pub fn drain_all(&self) -> Vec<CorrelationId> {
        let mut ids: Vec<(u64, CorrelationId)> = self
            .subs
            .iter()
            .map(|e| (e.value().created_seq, *e.key()))
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|(_, id)| {
                self.subs.remove(&id).map(|(id, sub)| {
                    sub.gate.close();
                    id
                })
            })
            .collect()
    }
}

/// Type-erased removal, so handles need not carry the payload type.
pub trait CancelSubscription: Send + Sync {
    fn cancel(&self, id: &CorrelationId) -> bool;
}

impl<T: 'static> CancelSubscription for SubscriptionRegistry<T> {
    fn cancel(&self, id: &CorrelationId) -> bool {
        self.remove(id)
    }
}

/// Returned by `send`; cancelling removes the subscription. Dropping it does not.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: CorrelationId,
    registry: Weak<dyn CancelSubscription>,
}

impl SubscriptionHandle {
    pub fn new(id: CorrelationId, registry: Weak<dyn CancelSubscription>) -> Self {
        Self { id, registry }
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Returns false when the subscription was already gone.
    pub fn cancel(&self) -> bool {
        self.registry
            .upgrade()
            .map_or(false, |r| r.cancel(&self.id))
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle").field("id", &self.id).finish()
    }
}
