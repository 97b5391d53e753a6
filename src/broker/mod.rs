//! The messaging engine: destinations, their stores, topic subscriptions and
//! the [`Broker`] that ties them together.

pub mod destination;
pub mod engine;
pub mod store;
pub mod subscription;

pub use destination::{Destination, DestinationKind, DestinationRegistry, TEMPORARY_PREFIX};
pub use engine::Broker;
pub use store::MessageStore;
pub use subscription::{Subscription, SubscriptionKey, SubscriptionManager, SubscriptionRequest};

#[cfg(test)]
mod tests;
