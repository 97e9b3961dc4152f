//! Transport error types.

use fabric_core::FabricError;

/// Errors that can occur while talking to the broker.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to encode a frame to MessagePack.
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode a frame from MessagePack.
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// NATS subscription error.
    #[error("NATS subscribe error: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    /// NATS publish error.
    #[error("NATS publish error: {0}")]
    Publish(#[from] async_nats::PublishError),

    /// NATS connection error.
    #[error("NATS connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// A required NATS header was missing.
    #[error("missing NATS header: {0}")]
    MissingHeader(String),

    /// Per-call credentials could not be produced.
    #[error("failed to load credentials: {0}")]
    Credentials(String),

    /// The broker refused the registration.
    #[error("registration rejected by broker: {0}")]
    Rejected(String),

    /// The broker sent a frame that is not valid in the current state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The stream to the broker ended.
    #[error("broker stream closed")]
    StreamClosed,

    /// No session is established, or it was lost while waiting.
    #[error("broker unavailable")]
    BrokerUnavailable,

    /// The event TTL elapsed.
    #[error("event timed out")]
    Timeout,

    /// The caller gave up.
    #[error("request cancelled")]
    Cancelled,

    /// Too many consecutive sessions failed before registering.
    #[error("unable to connect to broker after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The event itself is invalid, e.g. its content is too large.
    #[error(transparent)]
    Event(#[from] FabricError),

    /// The health server could not start.
    #[error("health server error: {0}")]
    Health(String),

    /// The peer answered with an error event.
    #[error("remote error: {0}")]
    Remote(FabricError),
}

impl NetError {
    /// Whether this error ends the owning process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NetError::RetriesExhausted { .. })
    }

    /// Wire-level error to report back to a caller.
    pub fn to_fabric(&self) -> FabricError {
        match self {
            NetError::Event(err) | NetError::Remote(err) => err.clone(),
            NetError::Timeout => FabricError::timeout(),
            NetError::BrokerUnavailable | NetError::StreamClosed => {
                FabricError::broker_unavailable()
            }
            other => FabricError::unexpected(other),
        }
    }
}
