use tracing::{error, info};

use crate::pipeline::job::{JobError, JobOutcome, JobRequest, SharedWorkerLauncher};
use crate::pipeline::now_unix_ms;
use crate::pipeline::reconcile::{PipelineResponse, ResultReconciler};
use crate::pipeline::state::{JobState, JobTracker};
use crate::pipeline::upload::{TransientUpload, UploadReceiver};

/// Sequences one authenticated request: stored upload, worker run, reconciliation.
#[derive(Clone)]
pub struct PipelineController {
    uploads: UploadReceiver,
    launcher: SharedWorkerLauncher,
    reconciler: ResultReconciler,
}

impl PipelineController {
    pub fn new(
        uploads: UploadReceiver,
        launcher: SharedWorkerLauncher,
        reconciler: ResultReconciler,
    ) -> Self {
        Self {
            uploads,
            launcher,
            reconciler,
        }
    }

    pub fn uploads(&self) -> &UploadReceiver {
        &self.uploads
    }

    pub async fn run(
        &self,
        user_id: &str,
        upload: TransientUpload,
        pdf_name: Option<&str>,
    ) -> PipelineResponse {
        let mut tracker = JobTracker::new();
        let request = JobRequest::for_upload(upload.handle(), pdf_name, now_unix_ms());
        info!(
            job_id = tracker.job_id(),
            user_id,
            upload = %upload.handle().storage_path.display(),
            output_name = %request.output_name,
            "summarization job received"
        );

        let outcome = self.launcher.launch(request).await;
        for state in states_before_reconcile(&outcome) {
            self.advance(&mut tracker, *state);
        }

        let response = self.reconciler.reconcile(upload, outcome, user_id).await;
        self.advance(&mut tracker, response.terminal_state());
        info!(
            job_id = tracker.job_id(),
            user_id,
            state = tracker.state().as_str(),
            "summarization job finished"
        );
        response
    }

    fn advance(&self, tracker: &mut JobTracker, next: JobState) {
        if let Err(err) = tracker.advance(next) {
            error!(job_id = tracker.job_id(), error = %err, "job state machine violated");
        }
    }
}

/// States a job passes through between `Received` and its reconciled end.
/// Only a failed spawn never reaches `Launched`.
fn states_before_reconcile(outcome: &Result<JobOutcome, JobError>) -> &'static [JobState] {
    match outcome {
        Ok(_) => &[JobState::Launched, JobState::Completed],
        Err(JobError::LaunchFailed { .. }) => &[],
        Err(_) => &[JobState::Launched],
    }
}
