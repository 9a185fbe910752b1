mod actor;
mod messages;

use crate::error;
use crate::job::{Job, JobView};
use crate::runtime::Runtime;
use crate::types::{JobId, Port};
use actor::Actor;
use messages::WorkerMessage;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};

/// Handle to the actor that drives one job through its lifecycle.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::UnboundedSender<WorkerMessage>,
    base_path: PathBuf,
}

impl WorkerHandle {
    /// Start running `job`. `finished_tx` hears about the job once its VM is torn down.
    pub fn spawn(
        job: Job,
        runtime: Runtime,
        finished_tx: mpsc::UnboundedSender<(JobId, Port)>,
    ) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        let base_path = job.base_path().to_path_buf();
        Actor::spawn(inbox, job, runtime, finished_tx);
        Self { sender, base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn get_status(&self, response: oneshot::Sender<error::Result<JobView>>) {
        let _ = self.sender.send(WorkerMessage::GetStatus { response });
    }

    pub fn kill(&self, response: oneshot::Sender<error::Result<()>>) {
        let _ = self.sender.send(WorkerMessage::Kill { response });
    }
}
