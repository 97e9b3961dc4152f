//! MessagePack codec helpers.
//!
//! Every frame exchanged with the broker is MessagePack encoded.

use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Encode a value to MessagePack bytes.
///
/// Structs are written as maps so optional fields can be added without
/// breaking older peers.
///
/// # Errors
///
/// Returns [`NetError::Encode`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    rmp_serde::to_vec_named(value).map_err(NetError::Encode)
}

/// Decode a value from MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Decode`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, NetError> {
    rmp_serde::from_slice(bytes).map_err(NetError::Decode)
}

#[cfg(test)]
mod tests {
    use fabric_core::{Event, EventOpts, RouteId, Val};

    use super::*;
    use crate::messages::{BrokerFrame, MatchedEvent};

    #[test]
    fn test_matched_event_keeps_values() {
        let mut event = Event::new_req(EventOpts::new().event_type("io.fabric.http"));
        event.set_path("/hello/world");
        event.set_header("content-type", "text/plain");
        event.set_param("who", "world");

        let frame = BrokerFrame::Event(MatchedEvent {
            event,
            route: RouteId::Declared(2),
            env: [("subPath".to_string(), Val::from("hello"))].into(),
        });
        let bytes = encode(&frame).unwrap();
        let BrokerFrame::Event(restored) = decode::<BrokerFrame>(&bytes).unwrap() else {
            panic!("expected an event frame");
        };
        assert_eq!(restored.route, RouteId::Declared(2));
        assert_eq!(restored.event.path(), "/hello/world");
        assert_eq!(restored.event.header("Content-Type"), "text/plain");
        assert_eq!(restored.event.param("who"), "world");
        assert_eq!(restored.env["subPath"], Val::from("hello"));
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let result: Result<BrokerFrame, _> = decode(&[0xFF, 0xFF]);
        assert!(matches!(result, Err(NetError::Decode(_))));
    }
}
