//! Upload module
//!
//! Per-call upload options plus the two stages every PUT goes through:
//! optional gzip compression and hedged dispatch.

pub mod compress;
pub mod hedge;

pub use hedge::{Hedge, Raced, Winner, DEFAULT_HEDGE_DELAY};

/// Content type used when the caller gives none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// `Cache-Control` value for objects that are never overwritten (7 days)
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=604800, immutable";

/// Options for a single upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// MIME type; `None` or empty means [`DEFAULT_CONTENT_TYPE`]
    pub content_type: Option<String>,
    /// Gzip the body and send `Content-Encoding: gzip`
    pub compress: bool,
    /// Long-lived caching and, where supported, a create-only precondition
    pub immutable: bool,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn immutable(mut self, immutable: bool) -> Self {
        self.immutable = immutable;
        self
    }

    /// Content type to send on the wire
    pub fn resolved_content_type(&self) -> &str {
        match self.content_type.as_deref() {
            Some(ct) if !ct.is_empty() => ct,
            _ => DEFAULT_CONTENT_TYPE,
        }
    }

    /// `Cache-Control` to send, if any
    pub fn cache_control(&self) -> Option<&'static str> {
        self.immutable.then_some(IMMUTABLE_CACHE_CONTROL)
    }
}
