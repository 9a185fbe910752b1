//! The job lifecycle: spawn the VM, run the script in it, tear it down.

use crate::error::Result;
use crate::events::{JobOutcome, JobState, JobStatus, Output};
use crate::guest::ScriptExecutor;
use crate::job::{layout, Job};
use crate::supervisor::Supervisor;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The pieces a job runs on.
#[derive(Clone)]
pub struct Runtime {
    pub supervisor: Arc<dyn Supervisor>,
    pub executor: Arc<dyn ScriptExecutor>,
}

/// How a finished job went. Execution and teardown are reported separately so
/// that a failed kill never hides why the script failed.
#[derive(Debug)]
pub struct JobReport {
    /// Spawn and script execution.
    pub execution: Result<()>,
    /// `None` when there was no VM to tear down.
    pub teardown: Option<Result<()>>,
}

impl JobReport {
    pub fn status(&self) -> JobStatus {
        let outcome = match &self.execution {
            Ok(()) => JobOutcome::Succeeded,
            Err(err) => JobOutcome::Failed {
                error: err.to_string(),
            },
        };
        JobStatus {
            state: JobState::Terminated,
            outcome: Some(outcome),
            teardown_error: match &self.teardown {
                Some(Err(err)) => Some(err.to_string()),
                _ => None,
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        self.execution.is_ok() && !matches!(self.teardown, Some(Err(_)))
    }
}

/// Records the states a job enters: persisted to `status.json`, then sent to the observer.
pub struct Transitions<'a> {
    job: &'a Job,
    sender: &'a mpsc::UnboundedSender<JobStatus>,
}

impl<'a> Transitions<'a> {
    pub fn new(job: &'a Job, sender: &'a mpsc::UnboundedSender<JobStatus>) -> Self {
        Self { job, sender }
    }

    pub async fn enter(&self, state: JobState) {
        self.publish(JobStatus::in_state(state)).await;
    }

    async fn publish(&self, status: JobStatus) {
        if let Err(err) = self.job.write_status(&status).await {
            tracing::warn!(job_id = %self.job.id(), "failed to persist status: {}", err);
        }
        let _ = self.sender.send(status);
    }

    async fn finish(&self, report: JobReport) -> JobReport {
        self.publish(report.status()).await;
        report
    }
}

/// Run `job` to completion: `Spawn -> ExecScript -> Kill`.
///
/// Kill runs whenever spawn succeeded, whatever the script did. Every state the job
/// enters is persisted to `status.json` and sent on `transitions` before the work of
/// that state starts. `Executing` is entered by the executor once the guest is
/// reachable. The terminal status carries the outcome.
pub async fn run_job(
    runtime: &Runtime,
    job: &Job,
    transitions: &mpsc::UnboundedSender<JobStatus>,
    output: Option<mpsc::UnboundedSender<Output>>,
) -> JobReport {
    let job_id = job.id();
    let transitions = Transitions::new(job, transitions);
    if let Err(err) = runtime.supervisor.spawn(job).await {
        tracing::warn!(%job_id, "failed to spawn vm: {}", err);
        // a hypervisor that died after daemonizing may still have left a process behind
        let teardown = if job.file_path(layout::PID).exists() {
            Some(teardown(runtime, job).await)
        } else {
            None
        };
        return transitions
            .finish(JobReport {
                execution: Err(err),
                teardown,
            })
            .await;
    }
    tracing::info!(%job_id, port = job.port(), "vm spawned");
    transitions.enter(JobState::Spawned).await;

    let execution = runtime
        .executor
        .exec_script(job, &transitions, output)
        .await;
    match &execution {
        Ok(()) => tracing::info!(%job_id, "script finished"),
        Err(err) => tracing::warn!(%job_id, "script execution failed: {}", err),
    }

    let teardown = teardown(runtime, job).await;
    transitions
        .finish(JobReport {
            execution,
            teardown: Some(teardown),
        })
        .await
}

async fn teardown(runtime: &Runtime, job: &Job) -> Result<()> {
    let result = runtime.supervisor.kill(job.base_path()).await;
    match &result {
        Ok(()) => tracing::info!(job_id = %job.id(), "vm killed"),
        Err(err) => tracing::warn!(job_id = %job.id(), "failed to kill vm: {}", err),
    }
    result
}
