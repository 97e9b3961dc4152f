//! Broker configuration from flags and environment.

use std::path::PathBuf;

use clap::Parser;
use fabric_net::connection::DEFAULT_NATS_URL;

#[derive(Debug, Clone, Parser)]
#[command(name = "fabric_broker", about = "Routes events between fabric components")]
pub struct BrokerConfig {
    /// NATS server URL.
    #[arg(long, env = "NATS_URL", default_value = DEFAULT_NATS_URL)]
    pub nats_url: String,

    /// Root CA for the NATS connection. When set, TLS is required.
    #[arg(long, env = "FABRIC_CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// Broker instance id; a random UUID when unset.
    #[arg(long, env = "FABRIC_BROKER_ID")]
    pub broker_id: Option<String>,
}
