//! Subscription registry: correlation id -> subscriber callback.

mod gate;
mod subscriptions;

pub use gate::SendGate;
pub use subscriptions::{
    Callback, CancelSubscription, Delivery, Subscriber, SubscriptionHandle, SubscriptionRegistry,
};
