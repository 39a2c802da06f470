//! HTTP request conversion for worker execution.
//!
//! Inbound requests are normalized into a [`WorkerRequest`] before routing,
//! and into a [`RequestSnapshot`] for the traffic record.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, Method, Uri};
use bytes::Bytes;

use mini_edge_core::WorkerRequest;
use mini_edge_state::RequestSnapshot;

/// Normalize an inbound request.
///
/// Header names are lowercase; headers with non-UTF-8 values are skipped.
/// A repeated query key keeps its last value. The body is decoded as UTF-8
/// with replacement.
pub fn worker_request(method: &Method, uri: &Uri, headers: &HeaderMap, body: &Bytes) -> WorkerRequest {
    WorkerRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        params: BTreeMap::new(),
        query: parse_query(uri.query()),
        headers: header_map(headers),
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

/// The part of a request kept on its traffic record.
pub fn snapshot(request: &WorkerRequest) -> RequestSnapshot {
    RequestSnapshot {
        headers: request.headers.clone(),
        query: request.query.clone(),
        body: request.body.clone(),
    }
}

/// Headers as a lowercase-keyed map.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Extract a bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
