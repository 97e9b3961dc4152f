//! The event envelope.
//!
//! Every message exchanged between components and the broker is an
//! [`Event`]. Requests and responses are linked through `parent_id`; routing
//! metadata (method, path, host, headers, query) lives in the typed `values`
//! bag and route captures in `params`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::component::Component;
use crate::consts::{self, val_key};
use crate::error::FabricError;
use crate::header::canonical_header_key;
use crate::val::Val;

/// What role an event plays in an exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    #[default]
    Unknown,
    Message,
    Request,
    Response,
}

/// Routing and versioning context.
///
/// A release is active when neither a deployment nor an environment is
/// pinned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventContext {
    pub deployment: String,
    pub environment: String,
    pub release: String,
}

impl EventContext {
    #[must_use]
    pub fn is_release(&self) -> bool {
        self.deployment.is_empty() && self.environment.is_empty()
    }
}

/// Options applied when creating an event.
#[derive(Debug, Clone, Default)]
pub struct EventOpts<'a> {
    pub event_type: Option<String>,
    pub parent: Option<&'a Event>,
    pub source: Option<Component>,
    pub target: Option<Component>,
}

impl<'a> EventOpts<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: &'a Event) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn source(mut self, source: Component) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn target(mut self, target: Component) -> Self {
        self.target = Some(target);
        self
    }
}

/// The wire envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub id: String,
    pub parent_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub category: Category,
    /// Microseconds since the Unix epoch.
    pub create_time: i64,
    /// Remaining lifetime in microseconds.
    pub ttl: i64,
    pub context: EventContext,
    pub source: Option<Component>,
    pub target: Option<Component>,
    pub params: BTreeMap<String, Val>,
    pub values: BTreeMap<String, Val>,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl Event {
    /// A blank event with a fresh id and creation time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            create_time: now_micros(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn new_req(opts: EventOpts<'_>) -> Self {
        Self::new().apply_opts(Category::Request, opts)
    }

    #[must_use]
    pub fn new_resp(opts: EventOpts<'_>) -> Self {
        Self::new().apply_opts(Category::Response, opts)
    }

    #[must_use]
    pub fn new_msg(opts: EventOpts<'_>) -> Self {
        Self::new().apply_opts(Category::Message, opts)
    }

    /// An error response carrying `err` as JSON content.
    #[must_use]
    pub fn new_err(err: &FabricError, opts: EventOpts<'_>) -> Self {
        let mut evt = Self::new();
        // A FabricError always serialises; the fallback keeps the event valid.
        if evt.set_json(err).is_err() {
            evt.content_type = consts::CONTENT_TYPE_PLAIN.to_string();
            evt.content = err.to_string().into_bytes();
        }
        let opts = opts.event_type(consts::EVENT_TYPE_ERROR);
        evt.apply_opts(Category::Response, opts)
    }

    /// Clone this event into a new request with a fresh id.
    #[must_use]
    pub fn clone_to_req(&self, opts: EventOpts<'_>) -> Self {
        self.clone_as(Category::Request, opts)
    }

    /// Clone this event into a new response with a fresh id.
    #[must_use]
    pub fn clone_to_resp(&self, opts: EventOpts<'_>) -> Self {
        self.clone_as(Category::Response, opts)
    }

    fn clone_as(&self, category: Category, opts: EventOpts<'_>) -> Self {
        let mut evt = self.clone();
        evt.id = Uuid::new_v4().to_string();
        evt.create_time = now_micros();
        evt.apply_opts(category, opts)
    }

    fn apply_opts(mut self, category: Category, opts: EventOpts<'_>) -> Self {
        if let Some(parent) = opts.parent {
            self.set_parent(parent);
        }
        self.category = category;
        self.source = opts.source;
        self.target = opts.target;
        if let Some(t) = opts.event_type
            && !t.is_empty()
            && t != consts::EVENT_TYPE_UNKNOWN
        {
            self.event_type = t;
        }
        self
    }

    /// Link this event to `parent`, inheriting its context, trace ids and
    /// TTL. The type defaults to the parent's when unset.
    pub fn set_parent(&mut self, parent: &Event) {
        self.parent_id = parent.id.clone();
        self.ttl = parent.ttl;
        self.context = parent.context.clone();
        self.set_trace_id(parent.trace_id());
        self.set_span_id(parent.span_id());
        self.set_trace_flags(parent.trace_flags());
        if self.event_type.is_empty() || self.event_type == consts::EVENT_TYPE_UNKNOWN {
            self.event_type = parent.event_type.clone();
        }
    }

    /// Whether this is an error event.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.event_type == consts::EVENT_TYPE_ERROR
    }

    /// Decode the error carried by an error event.
    #[must_use]
    pub fn err(&self) -> Option<FabricError> {
        if !self.is_error() {
            return None;
        }
        Some(
            self.bind::<FabricError>()
                .unwrap_or_else(FabricError::unexpected),
        )
    }

    // ── Params ──────────────────────────────────────────────────────────────

    /// Route parameter by name, falling back to the query parameter and then
    /// the header of the same name.
    #[must_use]
    pub fn param(&self, key: &str) -> String {
        if let Some(v) = self.params.get(key)
            && !v.is_nil()
        {
            return v.as_string();
        }
        let q = self.query(key);
        if !q.is_empty() {
            return q;
        }
        self.header(key)
    }

    /// Like [`Event::param`], returning `def` when empty.
    #[must_use]
    pub fn param_or(&self, key: &str, def: &str) -> String {
        let v = self.param(key);
        if v.is_empty() { def.to_string() } else { v }
    }

    pub fn set_param(&mut self, key: impl Into<String>, val: impl Into<Val>) {
        self.params.insert(key.into(), val.into());
    }

    // ── Values ──────────────────────────────────────────────────────────────

    /// String form of a value, empty when absent.
    #[must_use]
    pub fn value(&self, key: &str) -> String {
        self.values.get(key).map(Val::as_string).unwrap_or_default()
    }

    #[must_use]
    pub fn value_v(&self, key: &str) -> Option<&Val> {
        self.values.get(key)
    }

    /// Set a value; [`Val::Nil`] removes the entry.
    pub fn set_value(&mut self, key: impl Into<String>, val: impl Into<Val>) {
        let key = key.into();
        match val.into() {
            Val::Nil => {
                self.values.remove(&key);
            }
            v => {
                self.values.insert(key, v);
            }
        }
    }

    /// A multi-valued map entry (headers, query), empty when absent.
    #[must_use]
    pub fn value_map(&self, key: &str) -> BTreeMap<String, Vec<String>> {
        self.values
            .get(key)
            .and_then(Val::as_map)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_value_map(&mut self, key: impl Into<String>, map: BTreeMap<String, Vec<String>>) {
        self.values.insert(key.into(), Val::MapArrayString(map));
    }

    #[must_use]
    pub fn value_map_key_all(&self, val_key: &str, key: &str) -> Vec<String> {
        self.values
            .get(val_key)
            .and_then(Val::as_map)
            .and_then(|m| m.get(key))
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn value_map_key(&self, val_key: &str, key: &str) -> String {
        self.value_map_key_all(val_key, key)
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// Set or append an entry in a multi-valued map value.
    pub fn set_value_map_key(&mut self, val_key: &str, key: &str, value: &str, overwrite: bool) {
        let entry = self
            .values
            .entry(val_key.to_string())
            .or_insert_with(|| Val::MapArrayString(BTreeMap::new()));
        if entry.as_map().is_none() {
            *entry = Val::MapArrayString(BTreeMap::new());
        }
        if let Some(map) = entry.as_map_mut() {
            let values = map.entry(key.to_string()).or_default();
            if overwrite {
                values.clear();
            }
            values.push(value.to_string());
        }
    }

    pub fn del_value_map_key(&mut self, val_key: &str, key: &str) {
        if let Some(map) = self.values.get_mut(val_key).and_then(Val::as_map_mut) {
            map.remove(key);
        }
    }

    // ── Well-known values ───────────────────────────────────────────────────

    #[must_use]
    pub fn method(&self) -> String {
        self.value(val_key::METHOD)
    }

    pub fn set_method(&mut self, method: &str) {
        self.set_value(val_key::METHOD, method);
    }

    #[must_use]
    pub fn path(&self) -> String {
        self.value(val_key::PATH)
    }

    pub fn set_path(&mut self, path: &str) {
        self.set_value(val_key::PATH, path);
    }

    #[must_use]
    pub fn host(&self) -> String {
        self.value(val_key::HOST)
    }

    /// Hosts are stored lower-cased.
    pub fn set_host(&mut self, host: &str) {
        self.set_value(val_key::HOST, host.to_lowercase());
    }

    #[must_use]
    pub fn query(&self, key: &str) -> String {
        self.value_map_key(val_key::QUERY, key)
    }

    #[must_use]
    pub fn query_all(&self, key: &str) -> Vec<String> {
        self.value_map_key_all(val_key::QUERY, key)
    }

    pub fn set_query(&mut self, key: &str, value: &str) {
        self.set_value_map_key(val_key::QUERY, key, value, true);
    }

    pub fn del_query(&mut self, key: &str) {
        self.del_value_map_key(val_key::QUERY, key);
    }

    #[must_use]
    pub fn header(&self, key: &str) -> String {
        self.value_map_key(val_key::HEADER, &canonical_header_key(key))
    }

    #[must_use]
    pub fn header_all(&self, key: &str) -> Vec<String> {
        self.value_map_key_all(val_key::HEADER, &canonical_header_key(key))
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        self.set_value_map_key(val_key::HEADER, &canonical_header_key(key), value, true);
    }

    pub fn add_header(&mut self, key: &str, value: &str) {
        self.set_value_map_key(val_key::HEADER, &canonical_header_key(key), value, false);
    }

    pub fn del_header(&mut self, key: &str) {
        self.del_value_map_key(val_key::HEADER, &canonical_header_key(key));
    }

    #[must_use]
    pub fn status(&self) -> i64 {
        self.values
            .get(val_key::STATUS_CODE)
            .map(Val::as_i64)
            .unwrap_or_default()
    }

    pub fn set_status(&mut self, code: u16) {
        self.set_value(val_key::STATUS_CODE, i64::from(code));
    }

    #[must_use]
    pub fn trace_id(&self) -> String {
        self.value(val_key::TRACE_ID)
    }

    pub fn set_trace_id(&mut self, id: String) {
        self.set_value(val_key::TRACE_ID, id);
    }

    #[must_use]
    pub fn span_id(&self) -> String {
        self.value(val_key::SPAN_ID)
    }

    pub fn set_span_id(&mut self, id: String) {
        self.set_value(val_key::SPAN_ID, id);
    }

    #[must_use]
    pub fn trace_flags(&self) -> u8 {
        self.values
            .get(val_key::TRACE_FLAGS)
            .map(|v| v.as_i64() as u8)
            .unwrap_or_default()
    }

    pub fn set_trace_flags(&mut self, flags: u8) {
        self.set_value(val_key::TRACE_FLAGS, i64::from(flags));
    }

    // ── TTL ─────────────────────────────────────────────────────────────────

    /// Remaining lifetime; zero once exhausted.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_micros(u64::try_from(self.ttl).unwrap_or(0))
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX);
    }

    /// Subtract the time elapsed since `start` from the TTL and return the
    /// remaining microseconds, which may be negative.
    pub fn reduce_ttl(&mut self, start: Instant) -> i64 {
        let elapsed = i64::try_from(start.elapsed().as_micros()).unwrap_or(i64::MAX);
        self.ttl = self.ttl.saturating_sub(elapsed);
        self.ttl
    }

    // ── Content ─────────────────────────────────────────────────────────────

    /// Set raw content, rejecting payloads above
    /// [`MAX_CONTENT_SIZE_BYTES`](consts::MAX_CONTENT_SIZE_BYTES).
    pub fn set_content(
        &mut self,
        content_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Result<(), FabricError> {
        check_content_length(content.len())?;
        self.content_type = content_type.into();
        self.content = content;
        Ok(())
    }

    /// Serialise `value` as JSON content.
    pub fn set_json<T: Serialize>(&mut self, value: &T) -> Result<(), FabricError> {
        let bytes = serde_json::to_vec(value).map_err(FabricError::unexpected)?;
        self.set_content(
            format!("{}; {}", consts::CONTENT_TYPE_JSON, consts::CHARSET_UTF8),
            bytes,
        )
    }

    /// Deserialise JSON content. Other content types are rejected with
    /// `UnknownContentType`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, FabricError> {
        if !self
            .content_type
            .to_lowercase()
            .contains(consts::CONTENT_TYPE_JSON)
        {
            return Err(FabricError::unknown_content_type(&self.content_type));
        }
        serde_json::from_slice(&self.content).map_err(|e| {
            FabricError::new(crate::error::ErrorCode::Invalid).with_cause(e)
        })
    }

    /// Content as UTF-8 text, lossily.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Reject a declared content length above the maximum before any body is
/// read.
pub fn check_content_length(len: usize) -> Result<(), FabricError> {
    if len > consts::MAX_CONTENT_SIZE_BYTES {
        return Err(FabricError::content_too_large());
    }
    Ok(())
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
