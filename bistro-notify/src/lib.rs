//! Live notification fan-out for staff dashboards.
//!
//! The broker keeps a registry of connected subscribers, each fed through a
//! bounded channel. Publishing never fails the caller: a subscriber that
//! cannot take a message is logged and dropped.

pub mod broker;

pub use broker::{BrokerConfig, DeliveryFailure, NotificationBroker, Outbound, SubscriberHandle};
