//! HTTP router configuration.
//!
//! This module builds the Axum router with every platform endpoint, the
//! worker catch-all and the middleware stack.

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, Response, StatusCode, header};
use axum::middleware::{self, Next};
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::handler::{handle_worker, health_check, readiness_check, run_playground};
use crate::sse::{inspect_stream, logs_stream};
use crate::state::AppState;
use crate::webhook::{WEBHOOK_PATH, github_webhook};

/// Build the main application router.
///
/// Routes:
/// - `GET /health`, `GET /ready` - Liveness and readiness
/// - `/api/...` - Management, inspector and KV API (see [`api`])
/// - `GET /api/inspect/stream`, `GET /api/logs/stream` - SSE
/// - `POST /api/webhooks/github` - Signed source-control webhook
/// - `POST /__run` - Dashboard playground
/// - anything else - Resolved to a worker
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let project_routes = Router::new()
        .route("/api/projects/signup", post(api::signup))
        .route("/api/projects/me", get(api::me));

    let worker_routes = Router::new()
        .route("/api/workers/list", get(api::list_workers))
        .route("/api/workers/get", get(api::get_worker))
        .route("/api/workers/deploy", post(api::deploy_worker))
        .route("/api/routes/list", get(api::list_routes))
        .route("/api/routes/add", post(api::add_route))
        .route("/api/routes/delete", post(api::delete_route));

    let inspector_routes = Router::new()
        .route("/api/traffic", get(api::list_traffic))
        .route("/api/traffic/:id", get(api::get_traffic))
        .route("/api/inspect/stream", get(inspect_stream))
        .route("/api/metrics", get(api::metrics))
        .route("/api/logs", get(api::list_logs))
        .route("/__logs", get(api::list_logs))
        .route("/api/logs/stream", get(logs_stream));

    let kv_routes = Router::new()
        .route("/api/kv/list", get(api::kv_list))
        .route("/api/kv/set", post(api::kv_set))
        .route("/api/kv/delete", post(api::kv_delete));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check));

    Router::new()
        .merge(project_routes)
        .merge(worker_routes)
        .merge(inspector_routes)
        .merge(kv_routes)
        .merge(health_routes)
        .route(WEBHOOK_PATH, post(github_webhook))
        .route("/__run", post(run_playground))
        .fallback(handle_worker)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Permissive CORS on every response; any `OPTIONS` is answered `204`
/// without reaching a handler.
async fn cors(request: Request, next: Next) -> Response<Body> {
    let mut response = if request.method() == Method::OPTIONS {
        let mut preflight = Response::new(Body::empty());
        *preflight.status_mut() = StatusCode::NO_CONTENT;
        preflight
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    let any = HeaderValue::from_static("*");
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, any.clone());
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, any.clone());
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, any);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use mini_edge_common::RuntimeConfig;
    use tower::util::ServiceExt;

    async fn setup_router() -> Router {
        let config = RuntimeConfig::default();
        let state = AppState::new(&config).await.unwrap();
        build_router(state, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = setup_router().await;

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_readiness_check() {
        let app = setup_router().await;

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_options_short_circuits() {
        let app = setup_router().await;

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/workers/deploy")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["access-control-allow-methods"], "*");
        assert_eq!(response.headers()["access-control-allow-headers"], "*");
    }

    #[tokio::test]
    async fn test_unknown_path_is_route_not_found() {
        let app = setup_router().await;

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/nonexistent/path")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
}
