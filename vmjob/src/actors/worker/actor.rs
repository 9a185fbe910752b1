use super::messages::WorkerMessage;
use crate::error::Error;
use crate::events::JobStatus;
use crate::job::{Job, JobView};
use crate::runtime::{self, Runtime};
use crate::types::{JobId, Port};

use tokio::{select, sync::mpsc};

pub struct Actor {
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    job: Job,
    runtime: Runtime,
    job_status: JobStatus,
    lifecycle_pending: bool,
}

impl Actor {
    pub fn spawn(
        inbox: mpsc::UnboundedReceiver<WorkerMessage>,
        job: Job,
        runtime: Runtime,
        finished_tx: mpsc::UnboundedSender<(JobId, Port)>,
    ) {
        let actor = Self {
            inbox,
            job,
            runtime,
            job_status: JobStatus::created(),
            lifecycle_pending: true,
        };
        tokio::spawn(async move { actor.run(finished_tx).await });
    }

    async fn run(mut self, finished_tx: mpsc::UnboundedSender<(JobId, Port)>) {
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();

        // the lifecycle runs on its own task so status queries are answered while it blocks
        let job = self.job.clone();
        let runtime = self.runtime.clone();
        tokio::spawn(async move {
            runtime::run_job(&runtime, &job, &status_tx, None).await;
        });

        loop {
            select! {
                maybe_msg = self.inbox.recv() => {
                    match maybe_msg {
                        Some(msg) => self.handle_message(msg).await,
                        // handle dropped. the lifecycle task still tears the vm down on its own
                        None => return,
                    }
                }
                maybe_status = status_rx.recv(), if self.lifecycle_pending => {
                    match maybe_status {
                        Some(status) => {
                            let terminated = status.is_terminated();
                            self.job_status = status;
                            if terminated {
                                let _ = finished_tx.send((self.job.id(), self.job.port()));
                            }
                        }
                        None => self.lifecycle_pending = false,
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: WorkerMessage) {
        use WorkerMessage::*;
        match msg {
            GetStatus { response } => {
                let _ = response.send(Ok(JobView {
                    record: self.job.record().clone(),
                    status: self.job_status.clone(),
                }));
            }
            Kill { response } => {
                tracing::info!(job_id = %self.job.id(), "kill requested");
                // the pid may already belong to something else
                if self.job_status.is_terminated() {
                    let _ = response.send(Err(Error::AlreadyTerminated(self.job.id())));
                    return;
                }
                let result = self.runtime.supervisor.kill(self.job.base_path()).await;
                let _ = response.send(result);
            }
        }
    }
}
