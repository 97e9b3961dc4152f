//! Per-request context handed to handlers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use fabric_core::consts::{CHARSET_UTF8, CONTENT_TYPE_PLAIN};
use fabric_core::{Component, Event, EventOpts, FabricError, Val};
use fabric_net::{BrokerClient, BrokerLink, NetError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// The request being handled, the environment it was matched under and a
/// handle for calling other components.
pub struct Kontext<L: BrokerLink> {
    req: Event,
    env: BTreeMap<String, Val>,
    client: Arc<BrokerClient<L>>,
    start: Instant,
    cancel: CancellationToken,
}

impl<L: BrokerLink> Kontext<L> {
    pub(crate) fn new(
        req: Event,
        env: BTreeMap<String, Val>,
        client: Arc<BrokerClient<L>>,
        start: Instant,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            req,
            env,
            client,
            start,
            cancel,
        }
    }

    #[must_use]
    pub fn req(&self) -> &Event {
        &self.req
    }

    #[must_use]
    pub fn component(&self) -> &Component {
        self.client.component()
    }

    /// Route parameter, query parameter or header named `key`.
    #[must_use]
    pub fn param(&self, key: &str) -> String {
        self.req.param(key)
    }

    /// Environment variable as a string, empty when absent.
    #[must_use]
    pub fn env(&self, key: &str) -> String {
        self.env.get(key).map(Val::as_string).unwrap_or_default()
    }

    #[must_use]
    pub fn env_v(&self, key: &str) -> Option<&Val> {
        self.env.get(key)
    }

    /// Start a response to the current request.
    #[must_use]
    pub fn resp(&self) -> Resp {
        let mut opts = EventOpts::new()
            .parent(&self.req)
            .source(self.component().clone());
        if let Some(source) = &self.req.source {
            opts = opts.target(source.clone());
        }
        Resp {
            event: Event::new_resp(opts),
        }
    }

    /// Start a request to `target`, linked to the current request.
    #[must_use]
    pub fn new_req(&self, target: Component) -> Event {
        Event::new_req(
            EventOpts::new()
                .parent(&self.req)
                .source(self.component().clone())
                .target(target),
        )
    }

    /// Call another component and wait for its response.
    ///
    /// The request's TTL is reduced by the time spent handling the current
    /// request.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or [`NetError::Remote`] when the callee
    /// answers with an error.
    pub async fn send_req(&self, req: Event) -> Result<Event, NetError> {
        self.client.send_req(req, self.start, &self.cancel).await
    }
}

/// Builder for a response event.
#[derive(Debug)]
pub struct Resp {
    event: Event,
}

impl Resp {
    #[must_use]
    pub fn status(mut self, code: u16) -> Self {
        self.event.set_status(code);
        self
    }

    #[must_use]
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.event.set_header(key, value);
        self
    }

    /// Finish with plain text content.
    ///
    /// # Errors
    ///
    /// Returns `ContentTooLarge` when the text exceeds the content limit.
    pub fn text(mut self, text: impl Into<String>) -> Result<Event, FabricError> {
        self.event.set_content(
            format!("{CONTENT_TYPE_PLAIN}; {CHARSET_UTF8}"),
            text.into().into_bytes(),
        )?;
        Ok(self.event)
    }

    /// Finish with JSON content.
    ///
    /// # Errors
    ///
    /// Returns an error when `value` cannot be serialised or is too large.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Event, FabricError> {
        self.event.set_json(value)?;
        Ok(self.event)
    }

    /// Finish without content.
    #[must_use]
    pub fn event(self) -> Event {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use fabric_core::Category;
    use fabric_net::{ClientSettings, MemoryLink};

    use super::*;

    fn kontext(req: Event) -> Kontext<MemoryLink> {
        let (link, _sessions) = MemoryLink::new();
        let component = Component::new("kubefox", "hello", "0123456789").with_id("x1");
        let (client, _requests) = BrokerClient::new(component, link, ClientSettings::default());
        let env = BTreeMap::from([("subPath".to_string(), Val::from("hello"))]);
        Kontext::new(req, env, client, Instant::now(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_resp_links_to_request() {
        let caller = Component::new("kubefox", "caller", "abcdefghij").with_id("c1");
        let mut req = Event::new_req(EventOpts::new().source(caller.clone()));
        req.set_param("who", "world");
        let ktx = kontext(req.clone());

        assert_eq!(ktx.param("who"), "world");
        assert_eq!(ktx.env("subPath"), "hello");
        assert_eq!(ktx.env("missing"), "");

        let resp = ktx.resp().status(201).text("hi world").unwrap();
        assert_eq!(resp.category, Category::Response);
        assert_eq!(resp.parent_id, req.id);
        assert_eq!(resp.target, Some(caller));
        assert_eq!(resp.status(), 201);
        assert_eq!(resp.text(), "hi world");
    }

    #[tokio::test]
    async fn test_new_req_targets_component() {
        let req = Event::new_req(EventOpts::new());
        let ktx = kontext(req.clone());
        let target = Component::new("kubefox", "backend", "abcdefghij");
        let call = ktx.new_req(target.clone());
        assert_eq!(call.category, Category::Request);
        assert_eq!(call.parent_id, req.id);
        assert_eq!(call.target, Some(target));
        assert_eq!(call.source.as_ref().map(Component::name), Some("hello"));
    }

    #[tokio::test]
    async fn test_send_req_without_session() {
        let ktx = kontext(Event::new_req(EventOpts::new()));
        let call = ktx.new_req(Component::new("kubefox", "backend", "abcdefghij"));
        assert!(matches!(
            ktx.send_req(call).await,
            Err(NetError::BrokerUnavailable)
        ));
    }
}
