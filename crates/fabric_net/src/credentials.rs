//! Per-call credentials attached to every frame sent to the broker.

use std::path::{Path, PathBuf};

use fabric_core::Component;
use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::error::NetError;
use crate::messages::headers;

/// Default location of the mounted service account token.
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

pub type Metadata = Vec<(&'static str, String)>;

/// Produces the metadata that authenticates one call.
///
/// Returns a boxed future so credentials can be shared as
/// `Arc<dyn CallCredentials>`.
pub trait CallCredentials: Send + Sync + 'static {
    /// Metadata pairs for a call made on behalf of `component`.
    ///
    /// # Errors
    ///
    /// A failure aborts the call.
    fn metadata<'a>(
        &'a self,
        component: &'a Component,
    ) -> BoxFuture<'a, Result<Metadata, NetError>>;
}

fn identity(component: &Component, token: String) -> Metadata {
    vec![
        (headers::COMPONENT_ID, component.id().to_string()),
        (headers::COMPONENT_NAME, component.name().to_string()),
        (headers::COMPONENT_COMMIT, component.commit().to_string()),
        (headers::COMPONENT_TYPE, component.component_type().to_string()),
        (headers::AUTH_TOKEN, token),
    ]
}

/// Reads a token file on every call so rotated tokens are picked up.
#[derive(Debug, Clone)]
pub struct TokenCredentials {
    path: PathBuf,
}

impl TokenCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for TokenCredentials {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_PATH)
    }
}

impl CallCredentials for TokenCredentials {
    fn metadata<'a>(
        &'a self,
        component: &'a Component,
    ) -> BoxFuture<'a, Result<Metadata, NetError>> {
        async move {
            let token = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
                NetError::Credentials(format!("reading token {}: {e}", self.path.display()))
            })?;
            Ok(identity(component, token.trim().to_string()))
        }
        .boxed()
    }
}

/// A fixed token, for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CallCredentials for StaticCredentials {
    fn metadata<'a>(
        &'a self,
        component: &'a Component,
    ) -> BoxFuture<'a, Result<Metadata, NetError>> {
        future::ready(Ok(identity(component, self.token.clone()))).boxed()
    }
}
