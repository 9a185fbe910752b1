use super::messages::CoordinatorMessage;
use crate::actors::worker::WorkerHandle;
use crate::error::{self, Error};
use crate::job::{self, Job, JobRecord, JobView};
use crate::port::PortLeases;
use crate::runtime::Runtime;
use crate::spec::JobSpec;
use crate::types::{JobId, Port};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::{
    select,
    sync::{mpsc, oneshot},
};

pub struct JobCoordinator {
    inbox: mpsc::Receiver<CoordinatorMessage>,
    runtime: Runtime,
    workers: HashMap<JobId, WorkerHandle>,
    // terminated jobs whose worker was dropped; answered from their directory
    archived: HashMap<JobId, PathBuf>,
    retention: Duration,
    leases: PortLeases,
    finished_tx: mpsc::UnboundedSender<(JobId, Port)>,
    finished_rx: mpsc::UnboundedReceiver<(JobId, Port)>,
    evict_tx: mpsc::UnboundedSender<JobId>,
    evict_rx: mpsc::UnboundedReceiver<JobId>,
}

impl JobCoordinator {
    pub fn spawn(inbox: mpsc::Receiver<CoordinatorMessage>, runtime: Runtime, retention: Duration) {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (evict_tx, evict_rx) = mpsc::unbounded_channel();
        let actor = Self {
            inbox,
            runtime,
            workers: HashMap::new(),
            archived: HashMap::new(),
            retention,
            leases: PortLeases::default(),
            finished_tx,
            finished_rx,
            evict_tx,
            evict_rx,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        use self::CoordinatorMessage::*;
        loop {
            select! {
                maybe_msg = self.inbox.recv() => {
                    let msg = match maybe_msg {
                        Some(msg) => msg,
                        None => return,
                    };
                    match msg {
                        SubmitJob { spec, response } => {
                            let _ = response.send(self.submit_job(spec).await);
                        }
                        GetStatus { job_id, response } => {
                            self.get_job_status(job_id, response);
                        }
                        ListJobs { response } => {
                            self.list_jobs(response);
                        }
                        KillJob { job_id, response } => {
                            self.kill_job(job_id, response);
                        }
                    }
                }
                Some((job_id, port)) = self.finished_rx.recv() => {
                    tracing::debug!(%job_id, port, "releasing port");
                    self.leases.release(port);
                    self.schedule_eviction(job_id);
                }
                Some(job_id) = self.evict_rx.recv() => {
                    if let Some(worker) = self.workers.remove(&job_id) {
                        tracing::debug!(%job_id, "archiving terminated job");
                        self.archived.insert(job_id, worker.base_path().to_path_buf());
                    }
                }
            }
        }
    }

    fn schedule_eviction(&self, job_id: JobId) {
        let evict_tx = self.evict_tx.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let _ = evict_tx.send(job_id);
        });
    }

    async fn submit_job(&mut self, spec: JobSpec) -> error::Result<JobRecord> {
        let port = self.leases.lease().await?;
        let job = match Job::create_with_port(spec, port).await {
            Ok(job) => job,
            Err(err) => {
                self.leases.release(port);
                return Err(err);
            }
        };
        let record = job.record().clone();
        tracing::info!(job_id = %record.id, port, base_path = %job.base_path().display(), "job created");
        let worker = WorkerHandle::spawn(job, self.runtime.clone(), self.finished_tx.clone());
        self.workers.insert(record.id, worker);
        Ok(record)
    }

    fn get_job_status(&self, job_id: JobId, response: oneshot::Sender<error::Result<JobView>>) {
        if let Some(worker) = self.workers.get(&job_id) {
            worker.get_status(response);
        } else if let Some(base_path) = self.archived.get(&job_id) {
            let base_path = base_path.clone();
            tokio::spawn(async move {
                let _ = response.send(job::read_view(job_id, &base_path).await);
            });
        } else {
            let _ = response.send(Err(Error::DoesNotExist(job_id)));
        }
    }

    fn list_jobs(&self, response: oneshot::Sender<Vec<JobView>>) {
        let pending: Vec<_> = self
            .workers
            .values()
            .map(|worker| {
                let (tx, rx) = oneshot::channel();
                worker.get_status(tx);
                rx
            })
            .collect();
        let archived: Vec<_> = self
            .archived
            .iter()
            .map(|(job_id, base_path)| (*job_id, base_path.clone()))
            .collect();
        // collect off the actor so a slow worker does not stall the inbox
        tokio::spawn(async move {
            let mut views: Vec<JobView> = futures::future::join_all(pending)
                .await
                .into_iter()
                .filter_map(|view| view.ok().and_then(Result::ok))
                .collect();
            let on_disk = futures::future::join_all(
                archived
                    .iter()
                    .map(|(job_id, base_path)| job::read_view(*job_id, base_path)),
            )
            .await;
            views.extend(on_disk.into_iter().filter_map(Result::ok));
            let _ = response.send(views);
        });
    }

    fn kill_job(&self, job_id: JobId, response: oneshot::Sender<error::Result<()>>) {
        if let Some(worker) = self.workers.get(&job_id) {
            worker.kill(response);
        } else if self.archived.contains_key(&job_id) {
            let _ = response.send(Err(Error::AlreadyTerminated(job_id)));
        } else {
            let _ = response.send(Err(Error::DoesNotExist(job_id)));
        }
    }
}
