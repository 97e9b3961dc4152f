//! Frames exchanged between a component and the broker.
//!
//! Component identity and credentials are carried in NATS headers; the
//! payload is one of the frames below, MessagePack encoded.

use std::collections::BTreeMap;
use std::time::Instant;

use fabric_core::{Component, Event, RouteId, RouteSpec, Val};
use serde::{Deserialize, Serialize};

// ── Component → broker ──────────────────────────────────────────────────────

/// What a component declares when it registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Registration {
    /// Resolved routes and whether a default handler is present.
    Routes {
        routes: Vec<RouteSpec>,
        default_handler: bool,
    },
    /// An opaque component specification.
    Spec(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Sent once at the start of every session.
    Register {
        component: Component,
        registration: Registration,
    },
    /// A request, response or message.
    Event(Event),
}

// ── Broker → component ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrokerFrame {
    /// Registration accepted.
    Registered { broker_id: String },
    /// Registration refused.
    Rejected { reason: String },
    Event(MatchedEvent),
}

/// An event together with the route the broker matched it to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedEvent {
    pub event: Event,
    pub route: RouteId,
    /// Environment values resolved for this match.
    #[serde(default)]
    pub env: BTreeMap<String, Val>,
}

/// A request handed to the local handler registry.
#[derive(Debug, Clone)]
pub struct ComponentEvent {
    pub matched: MatchedEvent,
    pub received_at: Instant,
}

// ── NATS header keys ────────────────────────────────────────────────────────

/// Per-call metadata attached to every frame a component publishes.
pub mod headers {
    pub const COMPONENT_ID: &str = "component-id";
    pub const COMPONENT_NAME: &str = "component-name";
    pub const COMPONENT_COMMIT: &str = "component-commit";
    pub const COMPONENT_TYPE: &str = "component-type";
    pub const AUTH_TOKEN: &str = "auth-token";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_frame_roundtrip() {
        let frame = ClientFrame::Register {
            component: Component::new("kubefox", "hello-world", "0123456789abcdef").with_id("a1"),
            registration: Registration::Routes {
                routes: vec![RouteSpec::new(0, "Path(`/hello/{who}`)")],
                default_handler: true,
            },
        };
        let bytes = rmp_serde::to_vec_named(&frame).unwrap();
        let restored: ClientFrame = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored, frame);
    }

    #[test]
    fn test_spec_registration_roundtrip() {
        let registration = Registration::Spec(serde_json::json!({"routes": [], "type": "kubefox"}));
        let bytes = rmp_serde::to_vec_named(&registration).unwrap();
        let restored: Registration = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored, registration);
    }
}
