//! Wire-level error type.
//!
//! A [`FabricError`] travels inside error events (see
//! [`Event::new_err`](crate::Event::new_err)) so the originating caller learns
//! why a request failed. Each [`ErrorCode`] carries the HTTP status an edge
//! adapter should answer with.

use serde::{Deserialize, Serialize};

/// Error categories understood by every component and the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unexpected,
    BrokerMismatch,
    BrokerUnavailable,
    ComponentGone,
    ComponentMismatch,
    ContentTooLarge,
    Invalid,
    NotFound,
    PortUnavailable,
    RouteInvalid,
    RouteNotFound,
    Timeout,
    Unauthorized,
    UnknownContentType,
    UnsupportedAdapter,
}

impl ErrorCode {
    /// Default human-readable message for the code.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::Unexpected => "unexpected error",
            ErrorCode::BrokerMismatch => "broker mismatch",
            ErrorCode::BrokerUnavailable => "broker unavailable",
            ErrorCode::ComponentGone => "component gone",
            ErrorCode::ComponentMismatch => "component mismatch",
            ErrorCode::ContentTooLarge => "content too large",
            ErrorCode::Invalid => "invalid",
            ErrorCode::NotFound => "not found",
            ErrorCode::PortUnavailable => "port unavailable",
            ErrorCode::RouteInvalid => "route invalid",
            ErrorCode::RouteNotFound => "route not found",
            ErrorCode::Timeout => "time out",
            ErrorCode::Unauthorized => "component unauthorized",
            ErrorCode::UnknownContentType => "unknown content type",
            ErrorCode::UnsupportedAdapter => "unsupported adapter",
        }
    }

    /// HTTP status an adapter should use when surfacing this error.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::Unexpected => 500,
            ErrorCode::BrokerMismatch
            | ErrorCode::BrokerUnavailable
            | ErrorCode::ComponentGone
            | ErrorCode::ComponentMismatch => 502,
            ErrorCode::ContentTooLarge => 413,
            ErrorCode::Invalid
            | ErrorCode::RouteInvalid
            | ErrorCode::UnknownContentType
            | ErrorCode::UnsupportedAdapter => 400,
            ErrorCode::NotFound | ErrorCode::RouteNotFound => 404,
            ErrorCode::PortUnavailable => 409,
            ErrorCode::Timeout => 504,
            ErrorCode::Unauthorized => 403,
        }
    }
}

/// An error that can be carried in an event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{msg}{}", .cause.as_deref().map(|c| format!(": {c}")).unwrap_or_default())]
pub struct FabricError {
    pub code: ErrorCode,
    pub http_code: u16,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl FabricError {
    /// Create an error with the code's default message.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            http_code: code.http_status(),
            msg: code.message().to_string(),
            cause: None,
        }
    }

    /// Attach a cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl ToString) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    #[must_use]
    pub fn unexpected(cause: impl ToString) -> Self {
        Self::new(ErrorCode::Unexpected).with_cause(cause)
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout)
    }

    #[must_use]
    pub fn broker_unavailable() -> Self {
        Self::new(ErrorCode::BrokerUnavailable)
    }

    #[must_use]
    pub fn content_too_large() -> Self {
        Self::new(ErrorCode::ContentTooLarge)
    }

    #[must_use]
    pub fn route_not_found() -> Self {
        Self::new(ErrorCode::RouteNotFound)
    }

    #[must_use]
    pub fn unknown_content_type(content_type: &str) -> Self {
        Self::new(ErrorCode::UnknownContentType).with_cause(content_type)
    }
}
