//! Hello world component.
//!
//! Registers a single route, ``Path(`/{{.Vars.subPath}}/{who}`)``, and
//! answers every matched request with `hi {who}`. `subPath` defaults to
//! `hello` unless the env data file sets it.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fabric_component::{ComponentConfig, ComponentRunner, Kontext};
use fabric_core::{Event, Val};
use fabric_net::NatsLink;

#[derive(Debug, Parser)]
#[command(name = "hello_world", about = "Greets whoever is in the path")]
struct Args {
    /// Health probe listen address; `false` disables it.
    #[arg(long, env = "FABRIC_HEALTH_ADDR", default_value = "127.0.0.1:1111")]
    health_addr: String,

    /// Commit the component was built from.
    #[arg(long, env = "FABRIC_COMPONENT_COMMIT", default_value = "0000000000")]
    commit: String,
}

async fn hello(ktx: Kontext<NatsLink>) -> Result<Event> {
    let who = ktx.param("who");
    info!(%who, "saying hello");
    Ok(ktx.resp().text(format!("hi {who}"))?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hello_world=info".parse()?))
        .init();

    let args = Args::parse();
    let mut config = ComponentConfig::from_env().with_health_addr(args.health_addr);
    if config.name.is_empty() {
        config.name = "hello-world".to_string();
    }
    config.commit = args.commit;

    let mut env = config.load_env()?;
    env.vars
        .entry("subPath".to_string())
        .or_insert_with(|| Val::from("hello"));

    let runner = ComponentRunner::connect(config)
        .await?
        .env(env)
        .route("Path(`/{{.Vars.subPath}}/{who}`)", hello);

    let shutdown = runner.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    runner.run().await
}
