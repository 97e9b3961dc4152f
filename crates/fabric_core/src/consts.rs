//! Well-known event types, value keys and limits.

/// Large events reduce throughput; payloads above this are rejected.
pub const MAX_CONTENT_SIZE_BYTES: usize = 3 * 1024 * 1024;

// ── Event types ─────────────────────────────────────────────────────────────

pub const EVENT_TYPE_HTTP: &str = "io.fabric.http";
pub const EVENT_TYPE_ERROR: &str = "io.fabric.error";
pub const EVENT_TYPE_UNKNOWN: &str = "io.fabric.unknown";

// ── Value keys ──────────────────────────────────────────────────────────────

/// Keys of well-known entries in [`Event::values`](crate::Event::values).
pub mod val_key {
    pub const HEADER: &str = "header";
    pub const HOST: &str = "host";
    pub const METHOD: &str = "method";
    pub const PATH: &str = "path";
    pub const QUERY: &str = "queryParam";
    pub const STATUS_CODE: &str = "statusCode";
    pub const TRACE_ID: &str = "traceId";
    pub const SPAN_ID: &str = "spanId";
    pub const TRACE_FLAGS: &str = "traceFlags";
}

// ── Content types ───────────────────────────────────────────────────────────

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_PLAIN: &str = "text/plain";
pub const CHARSET_UTF8: &str = "charset=UTF-8";
