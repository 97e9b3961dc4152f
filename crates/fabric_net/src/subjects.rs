//! NATS subject hierarchy.
//!
//! Components publish to a single broker ingest subject. The broker delivers
//! to each component on its own [`Component::subject`].

use fabric_core::Component;

/// Everything components send to the broker. Components → Broker.
pub const BROKER_INGEST: &str = "fabric.broker.ingest";

/// The subject a component listens on. Broker → Component.
#[must_use]
pub fn component_inbox(component: &Component) -> String {
    component.subject()
}
