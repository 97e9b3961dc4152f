//! # fabric_component
//!
//! Runtime harness that turns a set of route handlers into a component
//! connected to the broker. A component:
//!
//! 1. Resolves its rule templates against environment data.
//! 2. Registers its identity and resolved routes with the broker.
//! 3. Receives matched requests and runs the handler for each route.
//! 4. Sends each handler's result back as a response event.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fabric_component::{ComponentConfig, ComponentRunner, Kontext};
//! use fabric_core::Event;
//! use fabric_net::NatsLink;
//!
//! async fn hello(ktx: Kontext<NatsLink>) -> anyhow::Result<Event> {
//!     let who = ktx.param("who");
//!     Ok(ktx.resp().text(format!("hi {who}"))?)
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ComponentConfig::from_env();
//!     ComponentRunner::connect(config)
//!         .await?
//!         .route("Path(`/hello/{who}`)", hello)
//!         .run()
//!         .await
//! }
//! ```

pub mod config;
pub mod context;
pub mod runner;

pub use config::ComponentConfig;
pub use context::{Kontext, Resp};
pub use runner::{ComponentRunner, Handler};
