mod actor;
mod messages;

use self::{
    actor::JobCoordinator,
    messages::CoordinatorMessage::{self, GetStatus, KillJob, ListJobs, SubmitJob},
};
use crate::error::{self, Error};
use crate::job::{JobRecord, JobView};
use crate::runtime::Runtime;
use crate::spec::JobSpec;
use crate::types::JobId;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// How long a terminated job keeps its worker by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

/// A `JobCoordinator` which accepts jobs, runs each in its own VM, and answers status queries.
///
/// This struct is actually an actor handle, the real work is done in the actor spawned by `JobCoordinator::spawn`,
/// but from the user perspective all that matters is that this struct provides methods for managing jobs.
/// The actor-handle abstraction allows this struct to be cloned freely in a multi-thread async context,
/// without requiring an `Arc<Mutex>` or any other means of synchronization.
#[derive(Clone)]
pub struct JobCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
}

impl JobCoordinatorHandle {
    /// Spawn a new coordinator running jobs on `runtime`.
    ///
    /// Specify the capacity for the coordinator's message queue. This limits the build-up of inbound messages.
    pub fn spawn(runtime: Runtime, message_capacity: usize) -> Self {
        Self::spawn_with_retention(runtime, message_capacity, DEFAULT_RETENTION)
    }

    /// Like [`JobCoordinatorHandle::spawn`], keeping a terminated job's worker for `retention`.
    ///
    /// After that the job is still queryable, from the files in its base directory.
    pub fn spawn_with_retention(
        runtime: Runtime,
        message_capacity: usize,
        retention: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(message_capacity);
        JobCoordinator::spawn(receiver, runtime, retention);
        Self { sender }
    }

    /// Materialize a job and start running it in the background.
    ///
    /// Returns once the job's directory and `spec.json` exist, not when the job finishes.
    pub async fn submit_job(&self, spec: JobSpec) -> error::Result<JobRecord> {
        let (tx, rx) = oneshot::channel();
        self.request(SubmitJob { spec, response: tx }, rx).await?
    }

    pub async fn job_status(&self, job_id: JobId) -> error::Result<JobView> {
        let (tx, rx) = oneshot::channel();
        self.request(
            GetStatus {
                job_id,
                response: tx,
            },
            rx,
        )
        .await?
    }

    pub async fn list_jobs(&self) -> error::Result<Vec<JobView>> {
        let (tx, rx) = oneshot::channel();
        self.request(ListJobs { response: tx }, rx).await
    }

    /// Kill a job's VM now, without waiting for its script.
    ///
    /// Errors if the VM is already gone, and without signalling anything once the job
    /// has terminated.
    pub async fn kill_job(&self, job_id: JobId) -> error::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(
            KillJob {
                job_id,
                response: tx,
            },
            rx,
        )
        .await?
    }

    async fn request<T>(
        &self,
        msg: CoordinatorMessage,
        rx: oneshot::Receiver<T>,
    ) -> error::Result<T> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| Error::CoordinatorExited)?;
        rx.await.map_err(|_| Error::CoordinatorExited)
    }
}
