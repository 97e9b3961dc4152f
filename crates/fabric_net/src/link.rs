//! Duplex links to the broker.
//!
//! A [`BrokerLink`] opens one session at a time: a [`FrameSink`] for frames
//! going to the broker and a stream of frames coming back. [`NatsLink`] is
//! the production transport; [`MemoryLink`] hands both ends to the caller.

use std::future::Future;
use std::sync::Arc;

use async_nats::HeaderMap;
use fabric_core::Component;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec;
use crate::connection::NatsConnection;
use crate::credentials::CallCredentials;
use crate::error::NetError;
use crate::messages::{BrokerFrame, ClientFrame};
use crate::subjects;

/// Frames arriving from the broker. The stream ends when the session does.
pub type FrameStream = BoxStream<'static, Result<BrokerFrame, NetError>>;

/// The sending half of a session.
pub trait FrameSink: Send + 'static {
    fn send(&mut self, frame: ClientFrame) -> impl Future<Output = Result<(), NetError>> + Send;
}

/// Opens sessions with the broker.
pub trait BrokerLink: Send + Sync + 'static {
    type Sink: FrameSink;

    /// Open a new session for `component`, loading transport credentials.
    fn open(
        &self,
        component: &Component,
    ) -> impl Future<Output = Result<(Self::Sink, FrameStream), NetError>> + Send;
}

// ---------------------------------------------------------------------------
// NATS
// ---------------------------------------------------------------------------

/// Publishes to the broker ingest subject and listens on the component's
/// own subject.
#[derive(Clone)]
pub struct NatsLink {
    connection: NatsConnection,
    credentials: Arc<dyn CallCredentials>,
}

impl NatsLink {
    pub fn new(connection: NatsConnection, credentials: Arc<dyn CallCredentials>) -> Self {
        Self {
            connection,
            credentials,
        }
    }
}

pub struct NatsSink {
    connection: NatsConnection,
    credentials: Arc<dyn CallCredentials>,
    component: Component,
}

impl FrameSink for NatsSink {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), NetError> {
        let mut headers = HeaderMap::new();
        for (key, value) in self.credentials.metadata(&self.component).await? {
            headers.insert(key, value.as_str());
        }
        self.connection
            .publish_with_headers(subjects::BROKER_INGEST, headers, &frame)
            .await
    }
}

impl BrokerLink for NatsLink {
    type Sink = NatsSink;

    async fn open(&self, component: &Component) -> Result<(NatsSink, FrameStream), NetError> {
        // Fail the session early when credentials are unavailable.
        self.credentials.metadata(component).await?;

        let inbox = subjects::component_inbox(component);
        let subscriber = self.connection.subscribe(&inbox).await?;
        debug!(subject = %inbox, "subscribed to component inbox");

        let stream = subscriber
            .map(|msg| codec::decode::<BrokerFrame>(&msg.payload))
            .boxed();
        let sink = NatsSink {
            connection: self.connection.clone(),
            credentials: Arc::clone(&self.credentials),
            component: component.clone(),
        };
        Ok((sink, stream))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// The far end of a [`MemoryLink`] session.
pub struct MemorySession {
    pub component: Component,
    /// Frames the client sent.
    pub inbound: mpsc::UnboundedReceiver<ClientFrame>,
    /// Frames to deliver to the client. Dropping it ends the session.
    pub outbound: mpsc::UnboundedSender<Result<BrokerFrame, NetError>>,
}

impl MemorySession {
    /// Acknowledge registration.
    pub fn accept(&self, broker_id: &str) -> bool {
        self.outbound
            .send(Ok(BrokerFrame::Registered {
                broker_id: broker_id.to_string(),
            }))
            .is_ok()
    }

    /// Deliver a frame to the client.
    pub fn deliver(&self, frame: BrokerFrame) -> bool {
        self.outbound.send(Ok(frame)).is_ok()
    }
}

/// Each [`open`](BrokerLink::open) creates a [`MemorySession`] and hands it
/// to the receiver returned by [`MemoryLink::new`].
#[derive(Clone)]
pub struct MemoryLink {
    sessions: mpsc::UnboundedSender<MemorySession>,
}

impl MemoryLink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemorySession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sessions: tx }, rx)
    }
}

pub struct MemorySink {
    tx: mpsc::UnboundedSender<ClientFrame>,
}

impl FrameSink for MemorySink {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), NetError> {
        self.tx.send(frame).map_err(|_| NetError::StreamClosed)
    }
}

impl BrokerLink for MemoryLink {
    type Sink = MemorySink;

    async fn open(&self, component: &Component) -> Result<(MemorySink, FrameStream), NetError> {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (broker_tx, mut broker_rx) = mpsc::unbounded_channel();
        let session = MemorySession {
            component: component.clone(),
            inbound: client_rx,
            outbound: broker_tx,
        };
        if self.sessions.send(session).is_err() {
            warn!("memory broker is gone");
            return Err(NetError::BrokerUnavailable);
        }
        let stream = futures::stream::poll_fn(move |cx| broker_rx.poll_recv(cx)).boxed();
        Ok((MemorySink { tx: client_tx }, stream))
    }
}
