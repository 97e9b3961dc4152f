//! Component identity.
//!
//! A [`Component`] identifies one running instance of an independently
//! deployed unit. Its derived keys and subjects are used as map keys by the
//! broker and as NATS subjects for delivery.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Environment variable holding the pod name when running under Kubernetes.
pub const POD_NAME_ENV: &str = "POD_NAME";

/// Number of commit characters used in keys and subjects.
pub const SHORT_COMMIT_LEN: usize = 7;

/// Identity of a running component instance.
///
/// Fields are private so identity cannot change after creation; use
/// [`Component::with_id`] and [`Component::with_broker_id`] to derive a new
/// identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "type")]
    component_type: String,
    name: String,
    commit: String,
    id: String,
    broker_id: String,
}

impl Component {
    /// Create a component identity without an instance or broker id.
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
            id: String::new(),
            broker_id: String::new(),
        }
    }

    /// Returns a copy of this identity with the given instance id.
    #[must_use]
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }

    /// Returns a copy of this identity with the broker id assigned on connect.
    #[must_use]
    pub fn with_broker_id(&self, broker_id: impl Into<String>) -> Self {
        Self {
            broker_id: broker_id.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn commit(&self) -> &str {
        &self.commit
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    /// The first seven characters of the commit, or empty if the commit is
    /// shorter than that.
    #[must_use]
    pub fn short_commit(&self) -> &str {
        self.commit.get(..SHORT_COMMIT_LEN).unwrap_or("")
    }

    /// `<name>-<short commit>-<id>`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.name, self.short_commit(), self.id)
    }

    /// `<name>-<short commit>`, shared by every instance of a build.
    #[must_use]
    pub fn group_key(&self) -> String {
        format!("{}-{}", self.name, self.short_commit())
    }

    /// The subject used to reach this instance.
    ///
    /// Prefers the broker subject once a broker id is assigned; falls back to
    /// the group subject when the instance id is not yet known.
    #[must_use]
    pub fn subject(&self) -> String {
        if !self.broker_id.is_empty() {
            return self.broker_subject();
        }
        if self.id.is_empty() {
            return self.group_subject();
        }
        format!("evt.js.{}.{}.{}", self.name, self.short_commit(), self.id)
    }

    /// `evt.js.<name>.<short commit>`
    #[must_use]
    pub fn group_subject(&self) -> String {
        format!("evt.js.{}.{}", self.name, self.short_commit())
    }

    /// `evt.brk.<broker id>`
    #[must_use]
    pub fn broker_subject(&self) -> String {
        format!("evt.brk.{}", self.broker_id)
    }

    /// Every identity field is populated.
    #[must_use]
    pub fn is_full(&self) -> bool {
        !self.name.is_empty()
            && !self.commit.is_empty()
            && !self.id.is_empty()
            && !self.broker_id.is_empty()
    }

    /// Only the name is populated; used to address a component by name.
    #[must_use]
    pub fn is_name_only(&self) -> bool {
        !self.name.is_empty()
            && self.commit.is_empty()
            && self.id.is_empty()
            && self.broker_id.is_empty()
    }
}

/// Derive an instance id for this process.
///
/// Under Kubernetes the last dash-separated segment of `POD_NAME` is used;
/// otherwise a random UUID.
#[must_use]
pub fn generate_id() -> String {
    match std::env::var(POD_NAME_ENV) {
        Ok(pod) if !pod.is_empty() => id_from_pod_name(&pod),
        _ => Uuid::new_v4().to_string(),
    }
}

fn id_from_pod_name(pod: &str) -> String {
    match pod.rsplit_once('-') {
        Some((_, suffix)) if !suffix.is_empty() => suffix.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}
