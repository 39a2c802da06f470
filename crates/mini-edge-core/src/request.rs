//! The normalized request handed to workers and the response they produce.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Content type used when a worker does not set one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Normalized request value, serialized as JSON into guest memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub method: String,
    pub path: String,
    /// Route parameters (`:name` captures and `*`).
    pub params: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl WorkerRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// JSON encoding written into guest memory.
    pub fn to_json(&self) -> Vec<u8> {
        // Maps of strings always serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Output of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Default for WorkerResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }
}

impl WorkerResponse {
    /// The body as text, replacing invalid UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The content type the worker set, or the plain-text default.
    pub fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .map_or(DEFAULT_CONTENT_TYPE, String::as_str)
    }
}
