//! # fabric_core
//!
//! Shared data model for the event fabric.
//!
//! This crate provides:
//!
//! - [`Val`] — the typed value used for event values and environment data.
//! - [`Component`] — identity of a running component instance.
//! - [`Event`] — the wire envelope, with request/response linkage.
//! - [`RouteId`] / [`RouteSpec`] — route identifiers shared with the broker.
//! - [`FabricError`] — errors carried inside error events.

pub mod component;
pub mod consts;
pub mod error;
pub mod event;
pub mod header;
pub mod route;
pub mod val;

pub use component::Component;
pub use error::{ErrorCode, FabricError};
pub use event::{Category, Event, EventContext, EventOpts, check_content_length};
pub use header::canonical_header_key;
pub use route::{RouteId, RouteSpec};
pub use val::Val;
