//! HTTP health probe.
//!
//! `GET /` answers 200 while the client is streaming from the broker and 503
//! otherwise.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::{BrokerClient, ConnectionState};
use crate::error::NetError;
use crate::link::BrokerLink;

/// Whether `addr` disables the health server.
pub fn is_disabled(addr: &str) -> bool {
    addr.is_empty() || addr == "false"
}

pub fn status_for(state: ConnectionState) -> StatusCode {
    if state == ConnectionState::Streaming {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn health(State(state): State<watch::Receiver<ConnectionState>>) -> StatusCode {
    status_for(*state.borrow())
}

/// Serve the probe on `addr` until `cancel` fires. Returns the bound address.
///
/// # Errors
///
/// Returns [`NetError::Health`] if the listener cannot be bound.
pub async fn serve(
    addr: &str,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
) -> Result<SocketAddr, NetError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| NetError::Health(format!("unable to open tcp socket for health server: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| NetError::Health(e.to_string()))?;

    let app = Router::new().route("/", get(health)).with_state(state);
    tokio::spawn(async move {
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await });
        if let Err(err) = server.await {
            error!(%err, "health server failed");
        }
    });

    info!(addr = %local, "health server started");
    Ok(local)
}

impl<L: BrokerLink> BrokerClient<L> {
    /// Start the health server unless `addr` is empty or `false`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Health`] if the listener cannot be bound.
    pub async fn start_health_srv(
        &self,
        addr: &str,
        cancel: CancellationToken,
    ) -> Result<Option<SocketAddr>, NetError> {
        if is_disabled(addr) {
            return Ok(None);
        }
        serve(addr, self.subscribe_state(), cancel).await.map(Some)
    }
}
