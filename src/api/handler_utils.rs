use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::api::error::ErrorKind;
use crate::db::accounts::AccountsRepoError;

pub type ApiObject<T> = (StatusCode, Json<T>);

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    build_error(status, kind, code.into(), message.into(), None)
}

pub fn error_response_with_details(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
    details: impl Into<String>,
) -> ApiObject<Value> {
    build_error(
        status,
        kind,
        code.into(),
        message.into(),
        Some(details.into()),
    )
}

fn build_error(
    status: StatusCode,
    kind: ErrorKind,
    code: String,
    message: String,
    details: Option<String>,
) -> ApiObject<Value> {
    (
        status,
        into_json(ErrorResponse {
            success: false,
            error: message,
            details,
            error_kind: Some(kind),
            error_code: Some(code),
        }),
    )
}

pub fn map_repo_error(error: AccountsRepoError, not_found_message: &str) -> ApiObject<Value> {
    match error {
        AccountsRepoError::NotFound => error_response(
            StatusCode::NOT_FOUND,
            ErrorKind::Validation,
            "not_found",
            not_found_message,
        ),
        AccountsRepoError::Validation(message) => error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "validation_error",
            message,
        ),
        AccountsRepoError::Internal(message) => internal_error(message),
        AccountsRepoError::Sqlite(source) => internal_error(format!("database error: {source}")),
    }
}

/// Logs the real cause and answers with a generic body.
pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response_with_details(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
        "",
    )
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).unwrap_or(Value::Null))
}
