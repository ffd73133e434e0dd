use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::db::accounts::AccountsRepoError;
use crate::db::SharedAccountStore;
use crate::pipeline::job::{JobError, JobOutcome};
use crate::pipeline::state::JobState;
use crate::pipeline::upload::TransientUpload;

pub const PARSE_FAILURE_MESSAGE: &str = "Failed to parse response from worker";
pub const DEFAULT_JOB_FAILURE_MESSAGE: &str = "Video summarization failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerResult {
    Success {
        artifact_url: String,
    },
    Failure {
        error_message: String,
        details: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparseable worker output: {details}")]
pub struct WorkerParseError {
    pub details: String,
}

#[derive(Debug, Deserialize)]
struct WireWorkerResult {
    success: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<Value>,
}

/// Interprets captured stdout. Exit status is deliberately not consulted.
pub fn parse_worker_result(outcome: &JobOutcome) -> Result<WorkerResult, WorkerParseError> {
    let stdout = outcome.stdout_text();
    let stderr = outcome.stderr_text();
    let parse_failure = |reason: String| WorkerParseError {
        details: first_non_blank([stdout.as_str(), stderr.as_str()]).unwrap_or(reason),
    };

    let wire = serde_json::from_str::<WireWorkerResult>(stdout.trim())
        .map_err(|err| parse_failure(err.to_string()))?;

    if wire.success {
        let raw_url = wire.url.as_deref().map(str::trim).unwrap_or_default();
        if raw_url.is_empty() {
            return Err(parse_failure(String::from(
                "success response is missing 'url'",
            )));
        }
        // Validated only; the worker's reference is stored exactly as sent.
        Url::parse(raw_url)
            .map_err(|err| parse_failure(format!("success response has invalid 'url': {err}")))?;
        return Ok(WorkerResult::Success {
            artifact_url: raw_url.to_string(),
        });
    }

    let error_message = wire
        .error
        .as_deref()
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .unwrap_or(DEFAULT_JOB_FAILURE_MESSAGE)
        .to_string();
    let details = wire
        .details
        .as_ref()
        .and_then(details_text)
        .unwrap_or(stderr);
    Ok(WorkerResult::Failure {
        error_message,
        details,
    })
}

fn details_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn first_non_blank<'a>(candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    candidates
        .into_iter()
        .find(|text| !text.trim().is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResponse {
    Success { artifact_url: String },
    JobFailed { error: String, details: String },
    ParseFailed { details: String },
    InternalError { message: String },
}

impl PipelineResponse {
    pub fn terminal_state(&self) -> JobState {
        match self {
            Self::Success { .. } => JobState::ReconciledSuccess,
            Self::JobFailed { .. } | Self::ParseFailed { .. } => JobState::ReconciledFailure,
            Self::InternalError { .. } => JobState::ReconciledError,
        }
    }
}

#[derive(Clone)]
pub struct ResultReconciler {
    accounts: SharedAccountStore,
}

impl ResultReconciler {
    pub fn new(accounts: SharedAccountStore) -> Self {
        Self { accounts }
    }

    /// Consumes the transient upload, removing its file before anything else happens.
    pub async fn reconcile(
        &self,
        upload: TransientUpload,
        outcome: Result<JobOutcome, JobError>,
        user_id: &str,
    ) -> PipelineResponse {
        let upload_path = upload.handle().storage_path.clone();
        if let Err(err) = upload.remove().await {
            warn!(path = %upload_path.display(), error = %err, "failed to remove transient upload");
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err @ JobError::LaunchFailed { .. }) | Err(err @ JobError::Io(_)) => {
                error!(user_id, error = %err, "worker could not be run");
                return PipelineResponse::InternalError {
                    message: err.to_string(),
                };
            }
            Err(err) => {
                info!(user_id, error = %err, "worker stopped by launcher");
                return PipelineResponse::JobFailed {
                    error: err.to_string(),
                    details: String::new(),
                };
            }
        };

        match parse_worker_result(&outcome) {
            Err(err) => {
                warn!(
                    user_id,
                    exit_code = outcome.exit_code,
                    "worker output could not be parsed"
                );
                PipelineResponse::ParseFailed {
                    details: err.details,
                }
            }
            Ok(WorkerResult::Failure {
                error_message,
                details,
            }) => {
                info!(
                    user_id,
                    exit_code = outcome.exit_code,
                    error = %error_message,
                    "worker reported failure"
                );
                PipelineResponse::JobFailed {
                    error: error_message,
                    details,
                }
            }
            Ok(WorkerResult::Success { artifact_url }) => {
                match self.record_artifact(user_id, artifact_url.as_str()).await {
                    Ok(()) => {
                        info!(user_id, artifact_url = %artifact_url, "artifact recorded");
                        PipelineResponse::Success { artifact_url }
                    }
                    Err(err) => {
                        error!(
                            target: "vidsum::orphan",
                            user_id,
                            artifact_url = %artifact_url,
                            error = %err,
                            "artifact produced but not recorded"
                        );
                        PipelineResponse::InternalError {
                            message: err.to_string(),
                        }
                    }
                }
            }
        }
    }

    async fn record_artifact(
        &self,
        user_id: &str,
        artifact_url: &str,
    ) -> Result<(), AccountsRepoError> {
        let accounts = self.accounts.clone();
        let user_id = user_id.to_string();
        let artifact_url = artifact_url.to_string();
        tokio::task::spawn_blocking(move || {
            if accounts.find_account(user_id.as_str())?.is_none() {
                return Err(AccountsRepoError::NotFound);
            }
            accounts.append_artifact(user_id.as_str(), artifact_url.as_str())
        })
        .await
        .map_err(|err| AccountsRepoError::Internal(format!("account task failed: {err}")))?
    }
}
