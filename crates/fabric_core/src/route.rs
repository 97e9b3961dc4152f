//! Route identifiers exchanged with the broker.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The route the broker selected for an inbound event.
///
/// `Declared(n)` indexes the component's registered route table; `Default`
/// means no declared rule matched and the default handler should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteId {
    Declared(usize),
    Default,
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteId::Declared(id) => write!(f, "{id}"),
            RouteId::Default => write!(f, "default"),
        }
    }
}

/// Wire form of a declared route: its table position and rule text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub id: usize,
    pub rule: String,
}

impl RouteSpec {
    #[must_use]
    pub fn new(id: usize, rule: impl Into<String>) -> Self {
        Self {
            id,
            rule: rule.into(),
        }
    }
}
