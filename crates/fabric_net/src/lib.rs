//! # fabric_net
//!
//! Broker transport for fabric components.
//!
//! This crate provides:
//!
//! - [`client`] — the [`BrokerClient`]: registration, reconnection and
//!   request/response correlation.
//! - [`link`] — broker sessions over NATS or in memory.
//! - [`pending`] — responses awaited by in-flight requests.
//! - [`health`] — the HTTP health probe.
//! - [`messages`] — frames exchanged with the broker.
//! - [`codec`] — MessagePack serialisation helpers.
//! - [`connection`] — NATS connection management.
//! - [`credentials`] — per-call credentials.
//! - [`subjects`] — NATS subject names.
//! - [`error`] — transport error types.

pub mod client;
pub mod codec;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod health;
pub mod link;
pub mod messages;
pub mod pending;
pub mod subjects;

pub use client::{BrokerClient, ClientSettings, ConnectionState, SessionEnd};
pub use codec::{decode, encode};
pub use connection::{NatsConnection, NatsOptions};
pub use credentials::{CallCredentials, Metadata, StaticCredentials, TokenCredentials};
pub use error::NetError;
pub use link::{BrokerLink, FrameSink, FrameStream, MemoryLink, MemorySession, NatsLink};
pub use messages::{BrokerFrame, ClientFrame, ComponentEvent, MatchedEvent, Registration};
pub use pending::ResponseStore;
