use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{JwtAuthenticator, SharedAuthenticator};
use crate::config::{AppConfig, ConfigError};
use crate::db::accounts::{AccountsRepoError, SqliteAccountStore};
use crate::db::SharedAccountStore;
use crate::pipeline::controller::PipelineController;
use crate::pipeline::job::{ProcessWorkerLauncher, SharedWorkerLauncher, WorkerCommandSpec};
use crate::pipeline::now_unix_ms;
use crate::pipeline::reconcile::ResultReconciler;
use crate::pipeline::upload::UploadReceiver;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub authenticator: SharedAuthenticator,
    pub accounts: SharedAccountStore,
    pub pipeline: PipelineController,
}

impl AppState {
    pub fn new(
        authenticator: SharedAuthenticator,
        accounts: SharedAccountStore,
        uploads: UploadReceiver,
        launcher: SharedWorkerLauncher,
    ) -> Self {
        let reconciler = ResultReconciler::new(accounts.clone());
        Self {
            service_name: "vidsum-backend-core",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            authenticator,
            accounts,
            pipeline: PipelineController::new(uploads, launcher, reconciler),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("account store failed to initialize: {0}")]
    Accounts(#[from] AccountsRepoError),
    #[error("server i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

pub fn build_state_from_config(config: &AppConfig) -> Result<AppState, ServerError> {
    let secret = config.require_auth_secret()?;
    let store = SqliteAccountStore::new(config.db_path.clone());
    store.initialize()?;
    std::fs::create_dir_all(config.upload_dir.as_path())?;

    let launcher = ProcessWorkerLauncher::new(WorkerCommandSpec::from(&config.worker));
    Ok(AppState::new(
        Arc::new(JwtAuthenticator::from_secret(secret.as_bytes())),
        Arc::new(store),
        UploadReceiver::new(config.upload_dir.clone(), config.max_upload_bytes),
        Arc::new(launcher),
    ))
}

/// Summarization routes sit behind the token check; health and the token validity check do not.
pub fn build_router_with_state(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/api/video/summarize",
            post(crate::api::summarize::summarize_handler),
        )
        .route("/summarize", post(crate::api::summarize::summarize_handler))
        .route("/api/me", get(crate::api::accounts::me_handler))
        .route("/", get(crate::api::accounts::me_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            crate::api::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/tokenIsValid",
            post(crate::api::accounts::token_is_valid_handler),
        )
        .merge(protected)
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: AppConfig) -> Result<(), ServerError> {
    let state = build_state_from_config(&config)?;
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(
        bind = %config.bind,
        db = %config.db_path.display(),
        uploads = %config.upload_dir.display(),
        worker = %config.worker.program,
        "starting vidsum-backend-core HTTP surface"
    );
    axum::serve(listener, build_router_with_state(state)).await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
        })),
    )
}
