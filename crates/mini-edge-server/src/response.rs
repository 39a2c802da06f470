//! HTTP response conversion from worker execution.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode, header};
use tracing::debug;

use mini_edge_core::WorkerResponse;

/// Convert a worker's output into an HTTP response.
///
/// Headers with invalid names or values are dropped. The content type
/// defaults to plain text when the worker did not set one.
pub fn from_worker(output: WorkerResponse) -> Response<Body> {
    let status = StatusCode::from_u16(output.status).unwrap_or(StatusCode::OK);
    let content_type = output.content_type().to_string();

    let mut response = Response::new(Body::from(output.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in output.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(header = %name, "Dropping invalid worker header"),
        }
    }
    if let Ok(value) = HeaderValue::try_from(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }

    response
}
