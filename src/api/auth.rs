use std::fmt;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::api::error::ErrorKind;
use crate::api::handler_utils::error_response;
use crate::api::server::AppState;
use crate::auth::AUTH_TOKEN_HEADER;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPrincipal {
    pub user_id: String,
}

impl fmt::Display for AuthPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}", self.user_id)
    }
}

/// Rejects the request before its body is read unless `x-auth-token` verifies.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_auth_token(request.headers()) else {
        return unauthorized("No auth token, access denied");
    };

    match state.authenticator.authenticate(token.as_str()) {
        Ok(user) => {
            request.extensions_mut().insert(AuthPrincipal {
                user_id: user.user_id,
            });
            next.run(request).await
        }
        Err(error) => {
            debug!(%error, path = %request.uri().path(), "auth token rejected");
            unauthorized("Token verification failed, authorization denied")
        }
    }
}

pub fn extract_auth_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTH_TOKEN_HEADER)?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

fn unauthorized(message: &str) -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        ErrorKind::Auth,
        "unauthorized",
        message,
    )
    .into_response()
}
