//! Component runner: the harness that runs a set of route handlers as a
//! broker-connected process.
//!
//! The runner resolves route templates, registers with the broker and runs
//! each matched request on its own task.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use fabric_core::{Event, EventOpts, FabricError, RouteId, Val};
use fabric_matcher::{EventMatcher, Route};
use fabric_net::{
    BrokerClient, BrokerLink, ClientSettings, ComponentEvent, MatchedEvent, NatsConnection,
    NatsLink, NatsOptions, NetError, Registration, TokenCredentials,
};
use fabric_template::EnvData;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ComponentConfig;
use crate::context::Kontext;

/// A boxed request handler. The returned event is sent as the response.
pub type Handler<L> = Arc<dyn Fn(Kontext<L>) -> BoxFuture<'static, Result<Event>> + Send + Sync>;

fn boxed<L, F, Fut>(handler: F) -> Handler<L>
where
    L: BrokerLink,
    F: Fn(Kontext<L>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Event>> + Send + 'static,
{
    Arc::new(move |ktx| handler(ktx).boxed())
}

/// Turns route handlers into a component connected to the broker.
///
/// Declare routes with [`route`](Self::route) in priority-independent order;
/// their position is the route id the broker reports back.
pub struct ComponentRunner<L: BrokerLink> {
    config: ComponentConfig,
    link: L,
    settings: ClientSettings,
    env: EnvData,
    routes: Vec<(String, Handler<L>)>,
    default_handler: Option<Handler<L>>,
    shutdown: CancellationToken,
}

impl ComponentRunner<NatsLink> {
    /// Connect to NATS as described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the NATS connection cannot be established.
    pub async fn connect(config: ComponentConfig) -> Result<Self> {
        let mut opts = NatsOptions::default()
            .with_url(&config.broker_url)
            .with_name(format!("{}-{}", config.name, config.component_type));
        if let Some(ca) = &config.ca_cert {
            opts = opts.with_ca_cert(ca);
        }
        let conn = NatsConnection::connect_with(&opts)
            .await
            .context("connecting to broker")?;
        let credentials = Arc::new(TokenCredentials::new(&config.token_path));
        Ok(Self::new(config, NatsLink::new(conn, credentials)))
    }
}

impl<L: BrokerLink> ComponentRunner<L> {
    #[must_use]
    pub fn new(config: ComponentConfig, link: L) -> Self {
        let settings = ClientSettings::default().with_max_attempts(config.max_attempts);
        Self {
            config,
            link,
            settings,
            env: EnvData::default(),
            routes: Vec::new(),
            default_handler: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Environment data rule templates resolve against.
    #[must_use]
    pub fn env(mut self, env: EnvData) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Declare a route. `rule` may reference environment data with
    /// `{{.Vars.name}}`.
    #[must_use]
    pub fn route<F, Fut>(mut self, rule: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Kontext<L>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Event>> + Send + 'static,
    {
        self.routes.push((rule.into(), boxed(handler)));
        self
    }

    /// Handle events the broker could not match to a declared route.
    #[must_use]
    pub fn default_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Kontext<L>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Event>> + Send + 'static,
    {
        self.default_handler = Some(boxed(handler));
        self
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Resolve every declared route against the environment and check that
    /// the result compiles.
    ///
    /// # Errors
    ///
    /// Returns an error if any rule template or resolved rule is invalid.
    pub fn resolve_routes(&self) -> Result<Vec<Route>> {
        let mut routes = Vec::with_capacity(self.routes.len());
        for (id, (rule, _)) in self.routes.iter().enumerate() {
            let mut route =
                Route::new(id, rule).with_context(|| format!("parsing route {id} `{rule}`"))?;
            for problem in route.env_schema().validate(&self.env) {
                warn!(route = id, %problem, "route references missing environment data");
            }
            route
                .resolve(&self.env)
                .with_context(|| format!("resolving route {id} `{rule}`"))?;
            routes.push(route);
        }
        EventMatcher::new()
            .add_routes(routes.iter().cloned())
            .context("compiling routes")?;
        Ok(routes)
    }

    /// Register with the broker and serve requests until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if routes are invalid, the health server cannot start,
    /// or the broker stays unreachable after the configured attempts.
    pub async fn run(self) -> Result<()> {
        let routes = self.resolve_routes()?;
        let registration = Registration::Routes {
            routes: routes.iter().filter_map(Route::spec).collect(),
            default_handler: self.default_handler.is_some(),
        };

        let component = self.config.component();
        info!(
            component = %component.key(),
            routes = routes.len(),
            default_handler = self.default_handler.is_some(),
            "component starting"
        );

        let (client, requests) = BrokerClient::new(component, self.link, self.settings);
        client
            .start_health_srv(&self.config.health_addr, self.shutdown.clone())
            .await?;

        let dispatcher = Arc::new(Dispatcher {
            client: Arc::clone(&client),
            handlers: self.routes.into_iter().map(|(_, handler)| handler).collect(),
            default_handler: self.default_handler,
            env: self.env.vars,
            shutdown: self.shutdown.clone(),
        });
        let dispatch = tokio::spawn(dispatcher.serve(requests));

        let stopper = {
            let client = Arc::clone(&client);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                client.shutdown();
            })
        };

        let result = client.run(&registration).await;
        self.shutdown.cancel();
        dispatch.abort();
        stopper.abort();

        match result {
            Ok(()) => {
                info!("component stopped");
                Ok(())
            }
            Err(err) if err.is_fatal() => {
                error!(%err, "giving up on broker, component stopped");
                Err(err.into())
            }
            Err(err) => {
                error!(%err, "component stopped");
                Err(err.into())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

struct Dispatcher<L: BrokerLink> {
    client: Arc<BrokerClient<L>>,
    handlers: Vec<Handler<L>>,
    default_handler: Option<Handler<L>>,
    env: BTreeMap<String, Val>,
    shutdown: CancellationToken,
}

impl<L: BrokerLink> Dispatcher<L> {
    async fn serve(self: Arc<Self>, mut requests: mpsc::Receiver<ComponentEvent>) {
        while let Some(req) = requests.recv().await {
            let span = info_span!(
                "request",
                event_id = %req.matched.event.id,
                route = %req.matched.route,
            );
            tokio::spawn(Arc::clone(&self).handle(req).instrument(span));
        }
    }

    fn handler(&self, route: RouteId) -> Option<&Handler<L>> {
        match route {
            RouteId::Declared(id) => self.handlers.get(id),
            RouteId::Default => self.default_handler.as_ref(),
        }
    }

    async fn handle(self: Arc<Self>, req: ComponentEvent) {
        let ComponentEvent {
            matched: MatchedEvent { event, route, env },
            received_at,
        } = req;

        let resp = match self.handler(route) {
            None => {
                warn!("no handler for route");
                self.error_resp(&event, &FabricError::route_not_found())
            }
            Some(handler) => {
                let mut vars = self.env.clone();
                vars.extend(env);
                let ktx = Kontext::new(
                    event.clone(),
                    vars,
                    Arc::clone(&self.client),
                    received_at,
                    self.shutdown.child_token(),
                );
                match handler(ktx).await {
                    Ok(mut resp) => {
                        if resp.parent_id != event.id {
                            resp.set_parent(&event);
                        }
                        resp.category = fabric_core::Category::Response;
                        resp
                    }
                    Err(err) => {
                        warn!(%err, "handler failed");
                        let fabric = if let Some(fabric) = err.downcast_ref::<FabricError>() {
                            fabric.clone()
                        } else if let Some(net) = err.downcast_ref::<NetError>() {
                            net.to_fabric()
                        } else {
                            FabricError::unexpected(&err)
                        };
                        self.error_resp(&event, &fabric)
                    }
                }
            }
        };

        debug!(resp_id = %resp.id, "sending response");
        if let Err(err) = self.client.send_resp(resp, received_at).await {
            warn!(%err, "unable to send response");
        }
    }

    fn error_resp(&self, req: &Event, err: &FabricError) -> Event {
        let mut opts = EventOpts::new()
            .parent(req)
            .source(self.client.component().clone());
        if let Some(source) = &req.source {
            opts = opts.target(source.clone());
        }
        Event::new_err(err, opts)
    }
}
