//! Bearer-token authentication.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use mini_edge_state::{Project, StateError};

use crate::error::ApiError;
use crate::request::bearer_token;
use crate::state::AppState;

/// The project identified by the request's `Authorization: Bearer` token.
///
/// Rejects with `UNAUTHORIZED` when the header is missing or the token is
/// unknown.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub token: String,
    pub project: Project,
}

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(StateError::Unauthorized)?;
        let project = state.quota().authenticate(token)?;
        Ok(Self {
            token: token.to_string(),
            project,
        })
    }
}
