//! # fabric_broker
//!
//! A minimal broker for fabric components. It owns the component registry,
//! matches requests against registered routes and forwards events to the
//! components that should receive them.
//!
//! The registry lives in process memory, so the broker runs as a single
//! instance. Replicas would each hold a partial registry.
//!
//! ## Startup Sequence
//!
//! 1. Connect to NATS (configurable URL, default `nats://localhost:4222`).
//! 2. Subscribe to the ingest subject.
//! 3. Handle frames until interrupted.

mod broker;
mod config;
mod registry;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use fabric_net::{ClientFrame, NatsConnection, NatsOptions, decode, subjects};

use broker::{Broker, sender_from_headers};
use config::BrokerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = BrokerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fabric_broker=info".parse()?))
        .init();

    let id = config
        .broker_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(broker_id = %id, url = %config.nats_url, "fabric broker starting");

    let mut opts = NatsOptions::default()
        .with_url(&config.nats_url)
        .with_name(format!("fabric-broker-{id}"));
    if let Some(ca) = &config.ca_cert {
        opts = opts.with_ca_cert(ca);
    }
    let conn = NatsConnection::connect_with(&opts).await?;
    let mut ingest = conn.subscribe(subjects::BROKER_INGEST).await?;
    info!(subject = subjects::BROKER_INGEST, "subscribed to ingest");

    let mut broker = Broker::new(id);
    loop {
        let msg = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            msg = ingest.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let sender = match sender_from_headers(msg.headers.as_ref()) {
            Ok(sender) => sender,
            Err(err) => {
                warn!(%err, "dropping message without component identity");
                continue;
            }
        };
        let frame: ClientFrame = match decode(&msg.payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, sender = %sender.key(), "dropping undecodable frame");
                continue;
            }
        };

        if let Some(out) = broker.handle(&sender, frame)
            && let Err(err) = conn.publish(&out.subject, &out.frame).await
        {
            warn!(%err, subject = %out.subject, "unable to publish frame");
        }
    }

    info!(components = broker.registry().len(), "fabric broker shut down");
    Ok(())
}
