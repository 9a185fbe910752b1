use crate::error;
use crate::job::{JobRecord, JobView};
use crate::spec::JobSpec;
use crate::types::JobId;
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum CoordinatorMessage {
    SubmitJob {
        spec: JobSpec,
        response: oneshot::Sender<error::Result<JobRecord>>,
    },
    GetStatus {
        job_id: JobId,
        response: oneshot::Sender<error::Result<JobView>>,
    },
    ListJobs {
        response: oneshot::Sender<Vec<JobView>>,
    },
    KillJob {
        job_id: JobId,
        response: oneshot::Sender<error::Result<()>>,
    },
}
