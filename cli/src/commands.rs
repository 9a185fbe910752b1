use std::io::Write;
use std::path::Path;

use tokio::sync::mpsc;
use vmjob::{job, supervisor, Error, Job, JobSpec, Output, RuntimeConfig};

const EXIT_SUCCESS: u8 = 0;
/// Exit code for a job whose script or teardown failed.
const EXIT_JOB_FAILED: u8 = 1;
/// Exit code for a job that never got a running VM.
const EXIT_NOT_STARTED: u8 = 2;

/// Where script output goes while a job runs.
#[derive(Clone, Copy, Debug)]
pub enum OutputMode {
    /// Raw bytes to the terminal.
    Terminal,
    /// One tracing event per chunk.
    Events,
}

pub async fn run(job_file: &Path, config: &RuntimeConfig, mode: OutputMode) -> u8 {
    let spec = match read_spec(job_file).await {
        Ok(spec) => spec,
        Err(err) => {
            tracing::error!("Bad job file {}: {}", job_file.display(), err);
            return EXIT_NOT_STARTED;
        }
    };
    let job = match Job::create(spec).await {
        Ok(job) => job,
        Err(err) => {
            tracing::error!("Error during creating job: {}", err);
            return EXIT_NOT_STARTED;
        }
    };
    tracing::info!(job_id = %job.id(), port = job.port(), "job created");

    let runtime = config.build_runtime();
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let (output_tx, mut output_rx) = mpsc::unbounded_channel();

    let printer = tokio::spawn(async move {
        while let Some(output) = output_rx.recv().await {
            print_output(&output, mode);
        }
    });
    let statuses = tokio::spawn(async move {
        while let Some(status) = status_rx.recv().await {
            tracing::debug!(?status, "job status");
        }
    });

    let report = vmjob::run_job(&runtime, &job, &status_tx, Some(output_tx)).await;
    drop(status_tx);
    let _ = printer.await;
    let _ = statuses.await;

    let status = report.status();
    tracing::info!(job_id = %job.id(), ?status, "job finished");
    exit_code(&report)
}

pub async fn kill(base_path: &Path) -> u8 {
    match supervisor::kill_by_pidfile(base_path).await {
        Ok(()) => {
            tracing::info!("Killed vm in {}", base_path.display());
            EXIT_SUCCESS
        }
        Err(err) => {
            tracing::error!("Error during killing vm: {}", err);
            EXIT_JOB_FAILED
        }
    }
}

pub async fn status(base_path: &Path) -> u8 {
    let status = match job::read_status(base_path).await {
        Ok(status) => status,
        Err(err) => {
            tracing::error!("Error during reading status: {}", err);
            return EXIT_JOB_FAILED;
        }
    };
    match serde_json::to_string_pretty(&status) {
        Ok(json) => {
            println!("{}", json);
            EXIT_SUCCESS
        }
        Err(err) => {
            tracing::error!("Error during encoding status: {}", err);
            EXIT_JOB_FAILED
        }
    }
}

async fn read_spec(job_file: &Path) -> Result<JobSpec, Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(job_file).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn print_output(output: &Output, mode: OutputMode) {
    match (mode, output) {
        (OutputMode::Terminal, Output::Stdout(blob)) => {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(blob).and_then(|_| stdout.flush());
        }
        (OutputMode::Terminal, Output::Stderr(blob)) => {
            let _ = std::io::stderr().lock().write_all(blob);
        }
        (OutputMode::Events, Output::Stdout(blob)) => {
            tracing::info!(stream = "stdout", data = %String::from_utf8_lossy(blob));
        }
        (OutputMode::Events, Output::Stderr(blob)) => {
            tracing::info!(stream = "stderr", data = %String::from_utf8_lossy(blob));
        }
    }
}

fn exit_code(report: &vmjob::JobReport) -> u8 {
    match (&report.execution, &report.teardown) {
        (Err(Error::ProcessSpawn(_)), _) => EXIT_NOT_STARTED,
        (Ok(()), None | Some(Ok(()))) => EXIT_SUCCESS,
        _ => EXIT_JOB_FAILED,
    }
}
