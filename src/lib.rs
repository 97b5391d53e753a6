//! # popmq
//!
//! `popmq` is an in-memory, JMS-style messaging core built with Rust. Queues
//! give each message to one consumer; topics copy it to every subscription.
//! Sessions add acknowledgement modes and local transactions on top.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `message`: Message headers, typed properties and the five body variants.
//! - `selector`: Parses and evaluates SQL-92 style message selectors.
//! - `broker`: The destination registry, message stores and topic subscriptions.
//! - `client`: Connections, sessions, producers, consumers and the simplified context API.
//! - `config`: Handles loading and managing engine configuration.
//! - `utils`: Contains shared utilities, such as error handling and logging.

pub mod broker;
pub mod client;
pub mod config;
pub mod message;
pub mod selector;
pub mod utils;

pub use broker::{Broker, Destination, DestinationKind};
pub use client::{
    AcknowledgeMode, Connection, ConnectionFactory, JmsContext, MessageConsumer, MessageProducer,
    Session,
};
pub use message::{DeliveryMode, Message};
pub use utils::{JmsError, Result};

#[cfg(test)]
mod tests;
