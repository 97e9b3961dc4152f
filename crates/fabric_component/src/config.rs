//! Component configuration.

use std::path::PathBuf;

use anyhow::Context;
use fabric_core::Component;
use fabric_core::component::generate_id;
use fabric_net::connection::{DEFAULT_NATS_URL, NATS_URL_ENV};
use fabric_net::credentials::DEFAULT_TOKEN_PATH;
use fabric_template::EnvData;

/// Default number of consecutive failed broker sessions before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Configuration for a component process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentConfig {
    pub component_type: String,
    pub name: String,
    pub commit: String,
    /// Instance id; derived from the pod name or a UUID when unset.
    pub id: Option<String>,
    pub broker_url: String,
    /// Root CA for the broker connection. When set, TLS is required.
    pub ca_cert: Option<PathBuf>,
    pub token_path: PathBuf,
    /// Health probe listen address; empty or `false` disables it.
    pub health_addr: String,
    pub max_attempts: u32,
    /// JSON file holding [`EnvData`] for rule templates.
    pub env_path: Option<PathBuf>,
}

impl ComponentConfig {
    #[must_use]
    pub fn new(
        component_type: impl Into<String>,
        name: impl Into<String>,
        commit: impl Into<String>,
    ) -> Self {
        Self {
            component_type: component_type.into(),
            name: name.into(),
            commit: commit.into(),
            id: None,
            broker_url: DEFAULT_NATS_URL.to_string(),
            ca_cert: None,
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            health_addr: String::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            env_path: None,
        }
    }

    /// Read `FABRIC_*` environment variables. The broker URL falls back to
    /// `NATS_URL` and then the default.
    #[must_use]
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let mut config = Self::new(
            var("FABRIC_COMPONENT_TYPE").unwrap_or_else(|| "kubefox".to_string()),
            var("FABRIC_COMPONENT_NAME").unwrap_or_default(),
            var("FABRIC_COMPONENT_COMMIT").unwrap_or_default(),
        );
        config.id = var("FABRIC_COMPONENT_ID");
        if let Some(url) = var("FABRIC_BROKER_URL").or_else(|| var(NATS_URL_ENV)) {
            config.broker_url = url;
        }
        config.ca_cert = var("FABRIC_CA_CERT").map(PathBuf::from);
        if let Some(path) = var("FABRIC_TOKEN_PATH") {
            config.token_path = PathBuf::from(path);
        }
        if let Some(addr) = var("FABRIC_HEALTH_ADDR") {
            config.health_addr = addr;
        }
        if let Some(max) = var("FABRIC_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            config.max_attempts = max;
        }
        config.env_path = var("FABRIC_ENV_PATH").map(PathBuf::from);
        config
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = url.into();
        self
    }

    #[must_use]
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = path.into();
        self
    }

    #[must_use]
    pub fn with_health_addr(mut self, addr: impl Into<String>) -> Self {
        self.health_addr = addr.into();
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_env_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_path = Some(path.into());
        self
    }

    /// The component identity, generating an instance id when none is set.
    #[must_use]
    pub fn component(&self) -> Component {
        let id = self.id.clone().unwrap_or_else(generate_id);
        Component::new(&self.component_type, &self.name, &self.commit).with_id(id)
    }

    /// Load environment data from [`env_path`](Self::env_path), or empty data
    /// when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load_env(&self) -> anyhow::Result<EnvData> {
        let Some(path) = &self.env_path else {
            return Ok(EnvData::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading env data {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing env data {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use fabric_core::Val;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ComponentConfig::new("kubefox", "hello", "0123456789");
        assert_eq!(config.broker_url, DEFAULT_NATS_URL);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(config.health_addr.is_empty());
        assert!(config.id.is_none());
    }

    #[test]
    fn test_component_identity() {
        let config = ComponentConfig::new("kubefox", "hello", "0123456789").with_id("x1");
        let component = config.component();
        assert_eq!(component.key(), "hello-0123456-x1");
        assert_eq!(component.component_type(), "kubefox");

        let generated = ComponentConfig::new("kubefox", "hello", "0123456789").component();
        assert!(!generated.id().is_empty());
    }

    #[test]
    fn test_load_env() {
        let config = ComponentConfig::new("kubefox", "hello", "0123456789");
        assert_eq!(config.load_env().unwrap(), EnvData::default());

        let path = std::env::temp_dir().join(format!("fabric-env-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"vars":{"subPath":"hello"}}"#).unwrap();
        let data = config.clone().with_env_path(&path).load_env().unwrap();
        assert_eq!(data.vars.get("subPath"), Some(&Val::from("hello")));
        std::fs::remove_file(&path).unwrap();

        assert!(config.with_env_path("/nonexistent/env.json").load_env().is_err());
    }
}
