//! NATS connection management.
//!
//! Provides a thin wrapper around `async-nats` for connecting to NATS with
//! fabric defaults.

use std::path::PathBuf;

use tracing::info;

use crate::error::NetError;

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// The environment variable used to override the NATS URL.
pub const NATS_URL_ENV: &str = "NATS_URL";

/// How to reach the NATS server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsOptions {
    pub url: String,
    /// Root CA used to verify the server. When set, TLS is required.
    pub ca_cert: Option<PathBuf>,
    /// Client name reported to the server.
    pub name: Option<String>,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_NATS_URL.to_string(),
            ca_cert: None,
            name: None,
        }
    }
}

impl NatsOptions {
    /// Options using the `NATS_URL` environment variable, falling back to
    /// [`DEFAULT_NATS_URL`].
    pub fn from_env() -> Self {
        Self {
            url: std::env::var(NATS_URL_ENV).unwrap_or_else(|_| DEFAULT_NATS_URL.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A wrapper around an `async-nats` client with fabric-specific helpers.
#[derive(Debug, Clone)]
pub struct NatsConnection {
    /// The underlying NATS client.
    client: async_nats::Client,
}

impl NatsConnection {
    /// Connect to NATS using the URL from the `NATS_URL` environment variable,
    /// falling back to [`DEFAULT_NATS_URL`].
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the connection cannot be established.
    pub async fn connect() -> Result<Self, NetError> {
        Self::connect_with(&NatsOptions::from_env()).await
    }

    /// Connect to NATS with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the connection cannot be established.
    pub async fn connect_with(opts: &NatsOptions) -> Result<Self, NetError> {
        info!(url = %opts.url, tls = opts.ca_cert.is_some(), "connecting to NATS");
        let mut connect_opts = async_nats::ConnectOptions::new();
        if let Some(name) = &opts.name {
            connect_opts = connect_opts.name(name);
        }
        if let Some(ca_cert) = &opts.ca_cert {
            connect_opts = connect_opts
                .add_root_certificates(ca_cert.clone())
                .require_tls(true);
        }
        let client = connect_opts.connect(opts.url.as_str()).await?;
        info!("NATS connection established");
        Ok(Self { client })
    }

    /// Returns a reference to the underlying `async-nats` client.
    #[must_use]
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Publish a MessagePack-encoded message with NATS headers.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if encoding or publishing fails.
    pub async fn publish_with_headers<T: serde::Serialize>(
        &self,
        subject: &str,
        headers: async_nats::HeaderMap,
        message: &T,
    ) -> Result<(), NetError> {
        let payload = crate::codec::encode(message)?;
        self.client
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await?;
        Ok(())
    }

    /// Publish a MessagePack-encoded message without headers.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if encoding or publishing fails.
    pub async fn publish<T: serde::Serialize>(
        &self,
        subject: &str,
        message: &T,
    ) -> Result<(), NetError> {
        let payload = crate::codec::encode(message)?;
        self.client
            .publish(subject.to_string(), payload.into())
            .await?;
        Ok(())
    }

    /// Subscribe to a subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Subscribe`] if the subscription fails.
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, NetError> {
        let sub = self.client.subscribe(subject.to_string()).await?;
        Ok(sub)
    }
}
