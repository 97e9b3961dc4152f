//! Long-lived client session with the broker.
//!
//! The client registers its component, streams matched events to the local
//! handler registry and correlates responses with in-flight requests. A
//! session that ends is re-established; too many consecutive failures before
//! registration are fatal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fabric_core::{Category, Component, Event, check_content_length};
use futures::StreamExt;
use rand::Rng;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::error::NetError;
use crate::link::{BrokerLink, FrameSink, FrameStream};
use crate::messages::{BrokerFrame, ClientFrame, ComponentEvent, MatchedEvent, Registration};
use crate::pending::{PendingGuard, ResponseStore};

/// Lifecycle of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registered,
    Streaming,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Consecutive failed sessions tolerated before giving up.
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// How long to wait for the broker to acknowledge registration.
    pub register_timeout: Duration,
    /// TTL given to outgoing events that have none.
    pub default_ttl: Duration,
    pub reap_interval: Duration,
    /// Extra time a pending request survives past its TTL.
    pub reap_grace: Duration,
    /// Capacity of the channel feeding requests to handlers.
    pub request_buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(2),
            register_timeout: Duration::from_secs(30),
            default_ttl: Duration::from_secs(30),
            reap_interval: Duration::from_secs(30),
            reap_grace: Duration::from_secs(30),
            request_buffer: 64,
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max;
        self
    }

    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    fn backoff(&self) -> Duration {
        if self.max_backoff <= self.min_backoff {
            return self.min_backoff;
        }
        rand::thread_rng().gen_range(self.min_backoff..=self.max_backoff)
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The session failed before the broker acknowledged registration.
    Failed(NetError),
    /// A registered session ended.
    Closed(NetError),
    /// [`BrokerClient::shutdown`] was called.
    Shutdown,
}

pub struct BrokerClient<L: BrokerLink> {
    component: Component,
    link: L,
    settings: ClientSettings,
    /// Only one frame is written at a time.
    sink: Mutex<Option<L::Sink>>,
    store: Arc<ResponseStore>,
    state: watch::Sender<ConnectionState>,
    requests: mpsc::Sender<ComponentEvent>,
    shutdown: CancellationToken,
    span: Span,
}

impl<L: BrokerLink> BrokerClient<L> {
    /// Create a client and the receiver of requests for local handlers.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        component: Component,
        link: L,
        settings: ClientSettings,
    ) -> (Arc<Self>, mpsc::Receiver<ComponentEvent>) {
        let (requests, rx) = mpsc::channel(settings.request_buffer.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let span = info_span!("broker_client", component = %component.key());
        let store = ResponseStore::new(settings.reap_interval, settings.reap_grace);
        let client = Arc::new(Self {
            component,
            link,
            settings,
            sink: Mutex::new(None),
            store,
            state,
            requests,
            shutdown: CancellationToken::new(),
            span,
        });
        (client, rx)
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    pub fn pending_requests(&self) -> usize {
        self.store.len()
    }

    /// End the current session and stop reconnecting.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.store.shutdown();
    }

    /// Keep a session with the broker until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::RetriesExhausted`] after `max_attempts` consecutive
    /// sessions fail before registering. A session that registered resets
    /// the count.
    pub async fn run(self: &Arc<Self>, registration: &Registration) -> Result<(), NetError> {
        let max = self.settings.max_attempts;
        let mut attempt = 0;
        loop {
            info!(parent: &self.span, attempt = attempt + 1, max, "subscribing to broker");
            match self.run_session(registration).await {
                SessionEnd::Shutdown => return Ok(()),
                SessionEnd::Closed(err) => {
                    warn!(parent: &self.span, %err, "broker subscription closed");
                    attempt = 0;
                }
                SessionEnd::Failed(err) => {
                    attempt += 1;
                    warn!(parent: &self.span, %err, attempt, max, "broker subscription failed");
                }
            }

            if attempt >= max {
                error!(parent: &self.span, attempts = attempt, "giving up on broker");
                return Err(NetError::RetriesExhausted { attempts: attempt });
            }

            let delay = self.settings.backoff();
            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one session: open, register, then receive until the stream ends.
    pub async fn run_session(self: &Arc<Self>, registration: &Registration) -> SessionEnd {
        let span = self.span.clone();
        async move {
            if self.shutdown.is_cancelled() {
                return SessionEnd::Shutdown;
            }
            self.state.send_replace(ConnectionState::Connecting);
            let end = match self.establish(registration).await {
                Ok(stream) => self.receive(stream).await,
                Err(_) if self.shutdown.is_cancelled() => SessionEnd::Shutdown,
                Err(err) => SessionEnd::Failed(err),
            };

            self.sink.lock().await.take();
            self.state.send_replace(ConnectionState::Disconnected);
            // Waiters on the lost session cannot be answered.
            self.store.clear();
            end
        }
        .instrument(span)
        .await
    }

    async fn establish(
        &self,
        registration: &Registration,
    ) -> Result<FrameStream, NetError> {
        let (mut sink, mut stream) = self.link.open(&self.component).await?;
        sink.send(ClientFrame::Register {
            component: self.component.clone(),
            registration: registration.clone(),
        })
        .await?;

        let ack = tokio::select! {
            () = self.shutdown.cancelled() => return Err(NetError::Cancelled),
            ack = tokio::time::timeout(self.settings.register_timeout, stream.next()) => {
                ack.map_err(|_| NetError::Timeout)?
            }
        };
        let broker_id = match ack {
            Some(Ok(BrokerFrame::Registered { broker_id })) => broker_id,
            Some(Ok(BrokerFrame::Rejected { reason })) => return Err(NetError::Rejected(reason)),
            Some(Ok(BrokerFrame::Event(_))) => {
                return Err(NetError::Protocol(
                    "event received before registration was acknowledged".to_string(),
                ));
            }
            Some(Err(err)) => return Err(err),
            None => return Err(NetError::StreamClosed),
        };

        *self.sink.lock().await = Some(sink);
        self.state.send_replace(ConnectionState::Registered);
        info!(broker_id = %broker_id, "subscribed to broker");
        Ok(stream)
    }

    async fn receive(self: &Arc<Self>, mut stream: FrameStream) -> SessionEnd {
        self.state.send_replace(ConnectionState::Streaming);
        loop {
            let frame = tokio::select! {
                () = self.shutdown.cancelled() => return SessionEnd::Shutdown,
                frame = stream.next() => frame,
            };
            match frame {
                Some(Ok(BrokerFrame::Event(matched))) => {
                    let client = Arc::clone(self);
                    tokio::spawn(
                        async move { client.dispatch(matched).await }.instrument(Span::current()),
                    );
                }
                Some(Ok(other)) => debug!(frame = ?other, "ignoring unexpected frame"),
                Some(Err(err @ NetError::Decode(_))) => {
                    warn!(%err, "dropping undecodable frame");
                }
                Some(Err(err)) => return SessionEnd::Closed(err),
                None => return SessionEnd::Closed(NetError::StreamClosed),
            }
        }
    }

    async fn dispatch(&self, matched: MatchedEvent) {
        let category = matched.event.category;
        match category {
            Category::Request => {
                debug!(event_id = %matched.event.id, route = %matched.route, "receive request");
                let req = ComponentEvent {
                    matched,
                    received_at: Instant::now(),
                };
                if self.requests.send(req).await.is_err() {
                    warn!("request receiver closed, dropping request");
                }
            }
            Category::Response => {
                debug!(event_id = %matched.event.id, parent_id = %matched.event.parent_id, "receive response");
                self.store.deliver(matched.event);
            }
            _ => {
                debug!(event_id = %matched.event.id, ?category, "received event on unexpected category, dropping");
            }
        }
    }

    /// Send a request and wait for its response.
    ///
    /// The wait ends with the response, [`NetError::Cancelled`] when `cancel`
    /// fires, [`NetError::Timeout`] when the TTL elapses, or
    /// [`NetError::BrokerUnavailable`] when the session is lost. An error
    /// response is returned as [`NetError::Remote`].
    pub async fn send_req(
        &self,
        mut req: Event,
        start: Instant,
        cancel: &CancellationToken,
    ) -> Result<Event, NetError> {
        debug!(parent: &self.span, event_id = %req.id, "send request");
        self.prepare(&mut req, start)?;
        let ttl = req.ttl();
        let rx = self.store.register(req.id.clone(), ttl);
        let _guard = PendingGuard {
            store: &self.store,
            id: req.id.clone(),
        };
        self.write(ClientFrame::Event(req)).await?;

        let resp = tokio::select! {
            () = cancel.cancelled() => return Err(NetError::Cancelled),
            () = tokio::time::sleep(ttl) => return Err(NetError::Timeout),
            resp = rx => resp.map_err(|_| NetError::BrokerUnavailable)?,
        };
        match resp.err() {
            Some(err) => Err(NetError::Remote(err)),
            None => Ok(resp),
        }
    }

    /// Send a request and return the channel its response arrives on.
    ///
    /// The entry is reaped after the TTL plus grace if no response arrives.
    pub async fn send_req_chan(
        &self,
        mut req: Event,
        start: Instant,
    ) -> Result<oneshot::Receiver<Event>, NetError> {
        debug!(parent: &self.span, event_id = %req.id, "send request");
        self.prepare(&mut req, start)?;
        let id = req.id.clone();
        let rx = self.store.register(id.clone(), req.ttl());
        if let Err(err) = self.write(ClientFrame::Event(req)).await {
            self.store.remove(&id);
            return Err(err);
        }
        Ok(rx)
    }

    pub async fn send_resp(&self, mut resp: Event, start: Instant) -> Result<(), NetError> {
        debug!(parent: &self.span, event_id = %resp.id, "send response");
        self.prepare(&mut resp, start)?;
        self.write(ClientFrame::Event(resp)).await
    }

    fn prepare(&self, event: &mut Event, start: Instant) -> Result<(), NetError> {
        if event.ttl == 0 {
            event.set_ttl(self.settings.default_ttl);
        }
        if event.reduce_ttl(start) < 0 {
            return Err(NetError::Timeout);
        }
        check_content_length(event.content.len())?;
        Ok(())
    }

    async fn write(&self, frame: ClientFrame) -> Result<(), NetError> {
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink.send(frame).await,
            None => Err(NetError::BrokerUnavailable),
        }
    }
}

impl<L: BrokerLink> Drop for BrokerClient<L> {
    fn drop(&mut self) {
        self.store.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use fabric_core::{EventOpts, FabricError, RouteId, RouteSpec};

    use super::*;
    use crate::link::{MemoryLink, MemorySession};

    fn component() -> Component {
        Component::new("kubefox", "hello", "0123456789").with_id("x1")
    }

    fn registration() -> Registration {
        Registration::Routes {
            routes: vec![RouteSpec::new(0, "Path(`/hello/{who}`)")],
            default_handler: false,
        }
    }

    fn fast_settings() -> ClientSettings {
        ClientSettings::default().with_backoff(Duration::from_millis(10), Duration::from_millis(20))
    }

    /// Start a client against an in-memory broker and accept its first
    /// session.
    async fn connected() -> (
        Arc<BrokerClient<MemoryLink>>,
        mpsc::Receiver<ComponentEvent>,
        MemorySession,
    ) {
        let (link, mut sessions) = MemoryLink::new();
        let (client, requests) = BrokerClient::new(component(), link, fast_settings());
        let runner = Arc::clone(&client);
        tokio::spawn(async move { runner.run(&registration()).await });

        let mut session = sessions.recv().await.unwrap();
        assert!(matches!(
            session.inbound.recv().await,
            Some(ClientFrame::Register { .. })
        ));
        session.accept("b1");
        let mut state = client.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Streaming)
            .await
            .unwrap();
        (client, requests, session)
    }

    fn response_to(req: &Event) -> BrokerFrame {
        BrokerFrame::Event(MatchedEvent {
            event: Event::new_resp(EventOpts::new().parent(req)),
            route: RouteId::Default,
            env: Default::default(),
        })
    }

    async fn next_event(session: &mut MemorySession) -> Event {
        match session.inbound.recv().await {
            Some(ClientFrame::Event(e)) => e,
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_response_correlation() {
        let (client, _requests, mut session) = connected().await;
        let cancel = CancellationToken::new();

        let (caller, token) = (Arc::clone(&client), cancel.clone());
        let wait_a = tokio::spawn(async move {
            caller
                .send_req(Event::new_req(EventOpts::new()), Instant::now(), &token)
                .await
        });
        let sent_a = next_event(&mut session).await;

        let (caller, token) = (Arc::clone(&client), cancel.clone());
        let wait_b = tokio::spawn(async move {
            caller
                .send_req(Event::new_req(EventOpts::new()), Instant::now(), &token)
                .await
        });
        let sent_b = next_event(&mut session).await;
        assert_eq!(client.pending_requests(), 2);

        session.deliver(response_to(&sent_b));
        let rb = wait_b.await.unwrap().unwrap();
        assert_eq!(rb.parent_id, sent_b.id);
        assert_eq!(rb.category, Category::Response);
        assert!(!wait_a.is_finished());
        assert_eq!(client.pending_requests(), 1);

        session.deliver(response_to(&sent_a));
        let ra = wait_a.await.unwrap().unwrap();
        assert_eq!(ra.parent_id, sent_a.id);
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_frame_keeps_session() {
        let (client, _requests, mut session) = connected().await;
        let caller = Arc::clone(&client);
        let wait = tokio::spawn(async move {
            caller
                .send_req(Event::new_req(EventOpts::new()), Instant::now(), &CancellationToken::new())
                .await
        });
        let sent = next_event(&mut session).await;

        let garbage = crate::codec::decode::<BrokerFrame>(&[0xc1]).unwrap_err();
        assert!(matches!(garbage, NetError::Decode(_)));
        session.outbound.send(Err(garbage)).unwrap();

        assert!(session.deliver(response_to(&sent)));
        let resp = wait.await.unwrap().unwrap();
        assert_eq!(resp.parent_id, sent.id);
        assert_eq!(client.state(), ConnectionState::Streaming);
    }

    #[tokio::test]
    async fn test_error_response_is_remote_error() {
        let (client, _requests, mut session) = connected().await;
        let req = Event::new_req(EventOpts::new());
        let caller = Arc::clone(&client);
        let wait = tokio::spawn(async move {
            caller
                .send_req(req, Instant::now(), &CancellationToken::new())
                .await
        });
        let sent = next_event(&mut session).await;
        let err = Event::new_err(&FabricError::route_not_found(), EventOpts::new().parent(&sent));
        session.deliver(BrokerFrame::Event(MatchedEvent {
            event: err,
            route: RouteId::Default,
            env: Default::default(),
        }));
        match wait.await.unwrap() {
            Err(NetError::Remote(e)) => assert_eq!(e, FabricError::route_not_found()),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_request_leaves_no_entry() {
        let (client, _requests, mut session) = connected().await;
        let cancel = CancellationToken::new();
        let req = Event::new_req(EventOpts::new());
        let (caller, token) = (Arc::clone(&client), cancel.clone());
        let wait = tokio::spawn(async move { caller.send_req(req, Instant::now(), &token).await });

        let sent = next_event(&mut session).await;
        assert_eq!(client.pending_requests(), 1);
        cancel.cancel();
        assert!(matches!(wait.await.unwrap(), Err(NetError::Cancelled)));
        assert_eq!(client.pending_requests(), 0);

        // A late response is an orphan and goes nowhere.
        session.deliver(response_to(&sent));
        tokio::task::yield_now().await;
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_request_times_out_after_ttl() {
        let (client, _requests, _session) = connected().await;
        let mut req = Event::new_req(EventOpts::new());
        req.set_ttl(Duration::from_millis(50));
        let result = client
            .send_req(req, Instant::now(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(NetError::Timeout)));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_expired_ttl_rejected_before_send() {
        let (client, _requests, _session) = connected().await;
        let mut resp = Event::new_resp(EventOpts::new());
        resp.set_ttl(Duration::from_micros(1));
        let start = Instant::now() - Duration::from_secs(1);
        assert!(matches!(
            client.send_resp(resp, start).await,
            Err(NetError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_oversized_content_rejected() {
        let (client, _requests, _session) = connected().await;
        let mut resp = Event::new_resp(EventOpts::new());
        resp.content = vec![0; fabric_core::consts::MAX_CONTENT_SIZE_BYTES + 1];
        assert!(matches!(
            client.send_resp(resp, Instant::now()).await,
            Err(NetError::Event(_))
        ));
    }

    #[tokio::test]
    async fn test_requests_reach_handler_channel() {
        let (_client, mut requests, session) = connected().await;
        let mut req = Event::new_req(EventOpts::new());
        req.set_path("/hello/world");
        session.deliver(BrokerFrame::Event(MatchedEvent {
            event: req.clone(),
            route: RouteId::Declared(0),
            env: Default::default(),
        }));
        let got = requests.recv().await.unwrap();
        assert_eq!(got.matched.route, RouteId::Declared(0));
        assert_eq!(got.matched.event.id, req.id);
    }

    #[tokio::test]
    async fn test_session_loss_fails_waiters() {
        let (client, _requests, mut session) = connected().await;
        let req = Event::new_req(EventOpts::new());
        let caller = Arc::clone(&client);
        let wait = tokio::spawn(async move {
            caller
                .send_req(req, Instant::now(), &CancellationToken::new())
                .await
        });
        next_event(&mut session).await;
        drop(session);
        assert!(matches!(
            wait.await.unwrap(),
            Err(NetError::BrokerUnavailable)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_consecutive_failures() {
        let (link, mut sessions) = MemoryLink::new();
        let (client, _requests) = BrokerClient::new(component(), link, ClientSettings::default());
        let runner = Arc::clone(&client);
        let run = tokio::spawn(async move { runner.run(&registration()).await });

        let mut opened = 0;
        while let Some(session) = sessions.recv().await {
            opened += 1;
            session.outbound.send(Ok(BrokerFrame::Rejected {
                reason: "unknown component".to_string(),
            })).unwrap();
            if opened == 5 {
                break;
            }
        }
        let result = run.await.unwrap();
        assert!(matches!(result, Err(NetError::RetriesExhausted { attempts: 5 })));
        assert!(sessions.try_recv().is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_session_resets_attempts() {
        let (link, mut sessions) = MemoryLink::new();
        let (client, _requests) = BrokerClient::new(component(), link, ClientSettings::default());
        let runner = Arc::clone(&client);
        let run = tokio::spawn(async move { runner.run(&registration()).await });

        // Four failures, one registered session that then drops, then five
        // more failures: nine failed sessions in total before giving up.
        let mut opened = 0;
        while let Some(session) = sessions.recv().await {
            opened += 1;
            if opened == 5 {
                session.accept("b1");
                let mut state = client.subscribe_state();
                state
                    .wait_for(|s| *s == ConnectionState::Streaming)
                    .await
                    .unwrap();
            }
            drop(session);
            if opened == 10 {
                break;
            }
        }
        assert!(matches!(
            run.await.unwrap(),
            Err(NetError::RetriesExhausted { attempts: 5 })
        ));
        assert_eq!(opened, 10);
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let (client, _requests, _session) = connected().await;
        client.shutdown();
        let mut state = client.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert!(!client.is_healthy());
    }

    // -- Single writer --

    #[derive(Clone, Default)]
    struct WriteCounter {
        writing: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
        writes: Arc<AtomicUsize>,
    }

    struct CountingSink(WriteCounter);

    impl FrameSink for CountingSink {
        async fn send(&mut self, _frame: ClientFrame) -> Result<(), NetError> {
            let counter = &self.0;
            if counter.writing.swap(true, Ordering::SeqCst) {
                counter.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            counter.writing.store(false, Ordering::SeqCst);
            counter.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl BrokerLink for WriteCounter {
        type Sink = CountingSink;

        async fn open(&self, _component: &Component) -> Result<(CountingSink, FrameStream), NetError> {
            let ack = futures::stream::iter([Ok(BrokerFrame::Registered {
                broker_id: "counter".to_string(),
            })]);
            let stream = ack.chain(futures::stream::pending()).boxed();
            Ok((CountingSink(self.clone()), stream))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_writer() {
        let counter = WriteCounter::default();
        let (client, _requests) = BrokerClient::new(component(), counter.clone(), fast_settings());
        let runner = Arc::clone(&client);
        tokio::spawn(async move { runner.run(&registration()).await });
        client
            .subscribe_state()
            .wait_for(|s| *s == ConnectionState::Streaming)
            .await
            .unwrap();

        let sends = (0..32).map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .send_resp(Event::new_resp(EventOpts::new()), Instant::now())
                    .await
            })
        });
        for send in futures::future::join_all(sends).await {
            send.unwrap().unwrap();
        }
        assert_eq!(counter.writes.load(Ordering::SeqCst), 32);
        assert_eq!(counter.overlaps.load(Ordering::SeqCst), 0);
    }
}
