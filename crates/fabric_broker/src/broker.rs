//! Frame handling: registrations, request routing and response delivery.
//!
//! [`Broker::handle`] turns one inbound frame into at most one outbound frame
//! and the subject to publish it on. It does no I/O.

use std::collections::BTreeMap;

use async_nats::HeaderMap;
use fabric_core::{Category, Component, Event, EventOpts, FabricError, RouteId};
use fabric_net::NetError;
use fabric_net::messages::headers;
use fabric_net::{BrokerFrame, ClientFrame, MatchedEvent, Registration};
use tracing::{debug, info, warn};

use crate::registry::ComponentRegistry;

/// A frame to publish and where to publish it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub subject: String,
    pub frame: BrokerFrame,
}

impl Outbound {
    fn event(to: &Component, event: Event, route: RouteId) -> Self {
        Self {
            subject: to.subject(),
            frame: BrokerFrame::Event(MatchedEvent {
                event,
                route,
                env: BTreeMap::new(),
            }),
        }
    }
}

pub struct Broker {
    id: String,
    registry: ComponentRegistry,
}

impl Broker {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            registry: ComponentRegistry::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Handle a frame published by `sender`.
    pub fn handle(&mut self, sender: &Component, frame: ClientFrame) -> Option<Outbound> {
        match frame {
            ClientFrame::Register {
                component,
                registration,
            } => Some(self.register(sender, component, &registration)),
            ClientFrame::Event(mut event) => {
                if event.source.is_none() {
                    event.source = Some(sender.clone());
                }
                match event.category {
                    Category::Request | Category::Message => self.route(event),
                    Category::Response => deliver_response(event),
                    Category::Unknown => {
                        debug!(event_id = %event.id, "dropping event without category");
                        None
                    }
                }
            }
        }
    }

    fn register(
        &mut self,
        sender: &Component,
        component: Component,
        registration: &Registration,
    ) -> Outbound {
        let subject = component.subject();
        let result = if sender.key() == component.key() {
            self.registry.register(component.clone(), registration)
        } else {
            Err(anyhow::anyhow!(
                "registration for {} sent by {}",
                component.key(),
                sender.key()
            ))
        };

        let frame = match result {
            Ok(()) => {
                info!(component = %component.key(), components = self.registry.len(), "component registered");
                BrokerFrame::Registered {
                    broker_id: self.id.clone(),
                }
            }
            Err(err) => {
                warn!(component = %component.key(), err = %format!("{err:#}"), "registration rejected");
                BrokerFrame::Rejected {
                    reason: format!("{err:#}"),
                }
            }
        };
        Outbound { subject, frame }
    }

    fn route(&self, mut event: Event) -> Option<Outbound> {
        if let Some((target, route)) = self.registry.route(&mut event) {
            debug!(event_id = %event.id, target = %target.key(), %route, "matched event");
            event.target = Some(target.clone());
            return Some(Outbound::event(&target, event, route));
        }

        debug!(event_id = %event.id, path = %event.path(), "no route matched");
        if event.category != Category::Request {
            return None;
        }
        let source = event.source.clone()?;
        let err = Event::new_err(
            &FabricError::route_not_found(),
            EventOpts::new().parent(&event).target(source.clone()),
        );
        Some(Outbound::event(&source, err, RouteId::Default))
    }
}

fn deliver_response(event: Event) -> Option<Outbound> {
    let Some(target) = event.target.clone() else {
        warn!(event_id = %event.id, "dropping response without target");
        return None;
    };
    Some(Outbound::event(&target, event, RouteId::Default))
}

/// Identity of the component that published a message, from its headers.
///
/// # Errors
///
/// Returns [`NetError::MissingHeader`] when the component id or name is
/// absent.
pub fn sender_from_headers(headers: Option<&HeaderMap>) -> Result<Component, NetError> {
    let get = |key: &str| {
        headers
            .and_then(|h| h.get(key))
            .map(|v| v.as_str().to_string())
            .unwrap_or_default()
    };
    let require = |key: &str| {
        let value = get(key);
        if value.is_empty() {
            return Err(NetError::MissingHeader(key.to_string()));
        }
        Ok(value)
    };

    let id = require(headers::COMPONENT_ID)?;
    let name = require(headers::COMPONENT_NAME)?;
    Ok(Component::new(
        get(headers::COMPONENT_TYPE),
        name,
        get(headers::COMPONENT_COMMIT),
    )
    .with_id(id))
}

#[cfg(test)]
mod tests {
    use fabric_core::{ErrorCode, RouteSpec};

    use super::*;

    fn component(name: &str) -> Component {
        Component::new("kubefox", name, "0123456789").with_id("x1")
    }

    fn register(broker: &mut Broker, name: &str, rules: &[&str]) -> Outbound {
        let c = component(name);
        let frame = ClientFrame::Register {
            component: c.clone(),
            registration: Registration::Routes {
                routes: rules
                    .iter()
                    .enumerate()
                    .map(|(id, rule)| RouteSpec::new(id, *rule))
                    .collect(),
                default_handler: false,
            },
        };
        broker.handle(&c, frame).unwrap()
    }

    fn matched(out: Outbound) -> (String, MatchedEvent) {
        match out.frame {
            BrokerFrame::Event(matched) => (out.subject, matched),
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[test]
    fn test_register_acknowledged() {
        let mut broker = Broker::new("b1");
        let out = register(&mut broker, "hello", &["Path(`/hello/{who}`)"]);
        assert_eq!(out.subject, component("hello").subject());
        assert_eq!(
            out.frame,
            BrokerFrame::Registered {
                broker_id: "b1".to_string()
            }
        );
        assert_eq!(broker.registry().len(), 1);
    }

    #[test]
    fn test_register_rejected() {
        let mut broker = Broker::new("b1");
        let out = register(&mut broker, "bad", &["Path(`/a`"]);
        assert!(matches!(out.frame, BrokerFrame::Rejected { .. }));

        let frame = ClientFrame::Register {
            component: component("victim"),
            registration: Registration::Routes {
                routes: Vec::new(),
                default_handler: true,
            },
        };
        let out = broker.handle(&component("intruder"), frame).unwrap();
        assert!(matches!(out.frame, BrokerFrame::Rejected { .. }));
        assert!(broker.registry().is_empty());
    }

    #[test]
    fn test_request_and_response_flow() {
        let mut broker = Broker::new("b1");
        register(&mut broker, "hello", &["Path(`/hello/{who}`)"]);
        let caller = component("caller");

        let mut req = Event::new_req(EventOpts::new());
        req.set_path("/hello/world");
        let (subject, delivered) =
            matched(broker.handle(&caller, ClientFrame::Event(req.clone())).unwrap());
        assert_eq!(subject, component("hello").subject());
        assert_eq!(delivered.route, RouteId::Declared(0));
        assert_eq!(delivered.event.param("who"), "world");
        assert_eq!(delivered.event.source, Some(caller.clone()));

        let resp = Event::new_resp(
            EventOpts::new()
                .parent(&delivered.event)
                .source(component("hello"))
                .target(caller.clone()),
        );
        let (subject, back) =
            matched(broker.handle(&component("hello"), ClientFrame::Event(resp)).unwrap());
        assert_eq!(subject, caller.subject());
        assert_eq!(back.event.parent_id, req.id);
    }

    #[test]
    fn test_unmatched_request_answered_with_error() {
        let mut broker = Broker::new("b1");
        register(&mut broker, "hello", &["Path(`/hello/{who}`)"]);
        let caller = component("caller");

        let mut req = Event::new_req(EventOpts::new());
        req.set_path("/nope");
        let (subject, back) =
            matched(broker.handle(&caller, ClientFrame::Event(req.clone())).unwrap());
        assert_eq!(subject, caller.subject());
        assert_eq!(back.event.parent_id, req.id);
        assert_eq!(back.event.err().map(|e| e.code), Some(ErrorCode::RouteNotFound));

        let mut msg = Event::new_msg(EventOpts::new());
        msg.set_path("/nope");
        assert!(broker.handle(&caller, ClientFrame::Event(msg)).is_none());
    }

    #[test]
    fn test_registration_only_known_to_receiving_broker() {
        let mut first = Broker::new("b1");
        let mut second = Broker::new("b2");
        register(&mut first, "hello", &["Path(`/hello/{who}`)"]);
        let caller = component("caller");

        let mut req = Event::new_req(EventOpts::new());
        req.set_path("/hello/world");
        let (subject, _) =
            matched(first.handle(&caller, ClientFrame::Event(req.clone())).unwrap());
        assert_eq!(subject, component("hello").subject());

        let (subject, back) = matched(second.handle(&caller, ClientFrame::Event(req)).unwrap());
        assert_eq!(subject, caller.subject());
        assert_eq!(back.event.err().map(|e| e.code), Some(ErrorCode::RouteNotFound));
    }

    #[test]
    fn test_sender_from_headers() {
        let mut map = HeaderMap::new();
        map.insert(headers::COMPONENT_ID, "x1");
        map.insert(headers::COMPONENT_NAME, "hello");
        map.insert(headers::COMPONENT_COMMIT, "0123456789");
        map.insert(headers::COMPONENT_TYPE, "kubefox");
        assert_eq!(sender_from_headers(Some(&map)).unwrap(), component("hello"));

        assert!(matches!(
            sender_from_headers(None),
            Err(NetError::MissingHeader(key)) if key == headers::COMPONENT_ID
        ));
    }
}
