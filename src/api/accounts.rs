use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::api::auth::{extract_auth_token, AuthPrincipal};
use crate::api::handler_utils::{internal_error, into_json, map_repo_error, ApiObject};
use crate::api::server::AppState;
use crate::db::accounts::AccountsRepoError;

#[derive(Debug, Clone, Serialize)]
struct MeResponse {
    success: bool,
    id: String,
    email: String,
    created_at: String,
    pdfs: Vec<String>,
}

pub async fn me_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
) -> ApiObject<Value> {
    let accounts = state.accounts.clone();
    let user_id = principal.user_id.clone();
    let result = tokio::task::spawn_blocking(move || {
        accounts
            .find_account(user_id.as_str())?
            .ok_or(AccountsRepoError::NotFound)
    })
    .await;

    match result {
        Ok(Ok(account)) => (
            StatusCode::OK,
            into_json(MeResponse {
                success: true,
                id: account.id,
                email: account.email,
                created_at: account.created_at,
                pdfs: account.pdfs,
            }),
        ),
        Ok(Err(error)) => map_repo_error(error, "User not found"),
        Err(join_error) => internal_error(format!("account lookup task failed: {join_error}")),
    }
}

/// Answers a bare JSON boolean; never 401s.
pub async fn token_is_valid_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<bool>) {
    let Some(token) = extract_auth_token(&headers) else {
        return (StatusCode::OK, Json(false));
    };
    let user = match state.authenticator.authenticate(token.as_str()) {
        Ok(user) => user,
        Err(error) => {
            debug!(%error, "token check rejected");
            return (StatusCode::OK, Json(false));
        }
    };

    let accounts = state.accounts.clone();
    let result =
        tokio::task::spawn_blocking(move || accounts.find_account(user.user_id.as_str())).await;
    match result {
        Ok(Ok(found)) => (StatusCode::OK, Json(found.is_some())),
        Ok(Err(error)) => {
            debug!(%error, "token check account lookup failed");
            (StatusCode::OK, Json(false))
        }
        Err(join_error) => {
            debug!(%join_error, "token check task failed");
            (StatusCode::OK, Json(false))
        }
    }
}
