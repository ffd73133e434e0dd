use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Extension;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::api::auth::AuthPrincipal;
use crate::api::error::ErrorKind;
use crate::api::handler_utils::{
    error_response, error_response_with_details, internal_error, into_json, ApiObject,
};
use crate::api::server::AppState;
use crate::pipeline::reconcile::{PipelineResponse, PARSE_FAILURE_MESSAGE};
use crate::pipeline::upload::{TransientUpload, UploadError, UploadReceiver, UPLOAD_FIELD};

/// Optional text field naming the produced document.
pub const PDF_NAME_FIELD: &str = "pdfName";

#[derive(Debug, Clone, Serialize)]
struct SummarizeResponse {
    success: bool,
    #[serde(rename = "pdfURL")]
    pdf_url: String,
}

#[derive(Debug)]
struct SummarizeForm {
    upload: TransientUpload,
    pdf_name: Option<String>,
}

pub async fn summarize_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiObject<Value> {
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            return upload_error(UploadError::Malformed(rejection.body_text()));
        }
    };

    let form = match receive_form(state.pipeline.uploads(), multipart).await {
        Ok(form) => form,
        Err(error) => return upload_error(error),
    };
    info!(
        user_id = %principal.user_id,
        upload = %form.upload.handle().storage_path.display(),
        original_name = %form.upload.handle().original_name,
        "upload received"
    );

    let response = state
        .pipeline
        .run(
            principal.user_id.as_str(),
            form.upload,
            form.pdf_name.as_deref(),
        )
        .await;
    pipeline_response(response)
}

async fn receive_form(
    uploads: &UploadReceiver,
    mut multipart: Multipart,
) -> Result<SummarizeForm, UploadError> {
    let mut upload: Option<TransientUpload> = None;
    let mut pdf_name: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);

        if name == UPLOAD_FIELD || file_name.is_some() {
            if name != UPLOAD_FIELD {
                return Err(UploadError::UnexpectedField(name));
            }
            if upload.is_some() {
                return Err(UploadError::MultipleFiles);
            }
            let mut pending = uploads
                .begin(file_name.as_deref().unwrap_or_default())
                .await?;
            while let Some(chunk) = field.chunk().await.map_err(malformed)? {
                pending.write_chunk(&chunk).await?;
            }
            upload = Some(TransientUpload::new(pending.finish().await?));
            continue;
        }

        if name == PDF_NAME_FIELD {
            let text = field.text().await.map_err(malformed)?;
            pdf_name = Some(text).filter(|value| !value.trim().is_empty());
        }
    }

    let upload = upload.ok_or(UploadError::MissingFile)?;
    Ok(SummarizeForm { upload, pdf_name })
}

fn malformed(error: MultipartError) -> UploadError {
    UploadError::Malformed(error.body_text())
}

fn upload_error(error: UploadError) -> ApiObject<Value> {
    if !error.is_client_error() {
        return internal_error(format!("upload storage failed: {error}"));
    }
    warn!(%error, "rejected upload");
    let code = match &error {
        UploadError::TooLarge { .. } => "upload_too_large",
        _ => "bad_upload",
    };
    error_response(
        StatusCode::BAD_REQUEST,
        ErrorKind::Validation,
        code,
        error.to_string(),
    )
}

fn pipeline_response(response: PipelineResponse) -> ApiObject<Value> {
    match response {
        PipelineResponse::Success { artifact_url } => (
            StatusCode::OK,
            into_json(SummarizeResponse {
                success: true,
                pdf_url: artifact_url,
            }),
        ),
        PipelineResponse::JobFailed { error, details } => error_response_with_details(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Worker,
            "job_failed",
            error,
            details,
        ),
        PipelineResponse::ParseFailed { details } => error_response_with_details(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Worker,
            "worker_output_unparseable",
            PARSE_FAILURE_MESSAGE,
            details,
        ),
        PipelineResponse::InternalError { message } => internal_error(message),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::{pipeline_response, upload_error};
    use crate::pipeline::reconcile::PipelineResponse;
    use crate::pipeline::upload::UploadError;

    #[test]
    fn success_uses_pdf_url_key() {
        let (status, payload) = pipeline_response(PipelineResponse::Success {
            artifact_url: String::from("https://store/x.pdf"),
        });
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            payload.0,
            json!({"success": true, "pdfURL": "https://store/x.pdf"})
        );
    }

    #[test]
    fn job_failure_is_unprocessable_with_details() {
        let (status, payload) = pipeline_response(PipelineResponse::JobFailed {
            error: String::from("unsupported codec"),
            details: String::from("hevc"),
        });
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(payload.0["error"], json!("unsupported codec"));
        assert_eq!(payload.0["details"], json!("hevc"));
    }

    #[test]
    fn parse_failure_and_internal_error_are_500() {
        let (status, payload) = pipeline_response(PipelineResponse::ParseFailed {
            details: String::from("Segmentation fault"),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            payload.0["error"],
            json!("Failed to parse response from worker")
        );
        assert_eq!(payload.0["details"], json!("Segmentation fault"));

        let (status, payload) = pipeline_response(PipelineResponse::InternalError {
            message: String::from("sqlite error: locked"),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(payload.0["error"], json!("Internal server error"));
        assert_eq!(payload.0["details"], json!(""));
    }

    #[test]
    fn client_upload_errors_are_400_and_io_is_500() {
        let (status, payload) = upload_error(UploadError::MissingFile);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload.0["success"], json!(false));

        let (status, _) = upload_error(UploadError::Io(std::io::Error::other("disk full")));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
