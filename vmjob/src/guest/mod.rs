//! Reaching the guest once the hypervisor is up, and running the job's script there.
//!
//! The job's base directory is exported into the guest as a 9p share, so the script
//! travels by being copied next to the other job artifacts. The only guest-side
//! requirements are an SSH server and 9p mount support.

mod sink;
pub mod ssh;

pub use sink::LogSink;

use crate::error::{Error, Result};
use crate::events::{JobState, Output};
use crate::job::{layout, Job};
use crate::retry::RetryPolicy;
use crate::runtime::Transitions;
use crate::supervisor::MOUNT_TAG;
use crate::types::Port;
use async_trait::async_trait;
use std::{os::unix::fs::PermissionsExt, time::Duration};
use tokio::sync::mpsc;

/// Where the shared directory is mounted inside the guest.
pub const GUEST_MOUNT_POINT: &str = "/mnt/share";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct GuestError(pub String);

impl From<std::io::Error> for GuestError {
    fn from(err: std::io::Error) -> Self {
        GuestError(err.to_string())
    }
}

/// Account the guest image accepts logins for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestCredentials {
    pub user: String,
    pub password: String,
}

impl Default for GuestCredentials {
    fn default() -> Self {
        Self {
            user: "root".into(),
            password: "root".into(),
        }
    }
}

/// Opens a connection to the guest behind a forwarded host port.
#[async_trait]
pub trait GuestDialer: Send + Sync {
    type Connection: GuestConnection;

    async fn dial(&self, port: Port) -> std::result::Result<Self::Connection, GuestError>;
}

/// An authenticated connection to a guest.
#[async_trait]
pub trait GuestConnection: Send {
    /// Run `command` in a fresh session, with stdin closed.
    ///
    /// Output goes to `sink` when given and is discarded otherwise. Returns the exit
    /// status, or `None` when the session ended without reporting one.
    async fn exec(
        &mut self,
        command: &str,
        sink: Option<&mut LogSink>,
    ) -> std::result::Result<Option<u32>, GuestError>;

    async fn close(&mut self);
}

/// Runs a job's script inside its guest.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Enters [`JobState::Executing`] on `transitions` once the script is about to run.
    async fn exec_script(
        &self,
        job: &Job,
        transitions: &Transitions<'_>,
        output: Option<mpsc::UnboundedSender<Output>>,
    ) -> Result<()>;
}

/// Waits for the guest to come up, then mounts the share and runs the script.
pub struct GuestRunner<D> {
    dialer: D,
    policy: RetryPolicy,
    exec_timeout: Option<Duration>,
}

impl<D: GuestDialer> GuestRunner<D> {
    pub fn new(dialer: D, policy: RetryPolicy) -> Self {
        Self {
            dialer,
            policy,
            exec_timeout: None,
        }
    }

    pub fn with_exec_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Dial until the guest's SSH server answers or the retry budget is spent.
    pub async fn connect(&self, port: Port) -> Result<D::Connection> {
        let dialer = &self.dialer;
        self.policy
            .retry(move |attempt| {
                tracing::debug!(port, attempt, "dialing guest");
                dialer.dial(port)
            })
            .await
            .map_err(|err| Error::GuestUnreachable {
                attempts: err.attempts,
                last_error: err.to_string(),
            })
    }

    async fn run_in_guest(
        &self,
        conn: &mut D::Connection,
        job: &Job,
        script_name: &str,
        transitions: &Transitions<'_>,
        output: Option<mpsc::UnboundedSender<Output>>,
    ) -> Result<()> {
        match conn.exec(&mount_command(), None).await {
            Ok(Some(0)) => {}
            Ok(Some(code)) => return Err(Error::Mount(format!("exit status {}", code))),
            Ok(None) => return Err(Error::Mount("no exit status reported".into())),
            Err(err) => return Err(Error::Mount(err.to_string())),
        }

        let log_path = job.file_path(layout::LOG);
        let mut sink = LogSink::create(&log_path, output).await.map_err(|err| {
            Error::io(
                format!("failed to create log file {}", log_path.display()),
                err,
            )
        })?;
        transitions.enter(JobState::Executing).await;
        let command = script_command(script_name);
        let run = conn.exec(&command, Some(&mut sink));
        let result = match self.exec_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(Error::ScriptExecution(format!(
                        "timed out after {:?}",
                        limit
                    )))
                }
            },
            None => run.await,
        };
        if let Err(err) = sink.flush().await {
            tracing::warn!(job_id = %job.id(), "failed to flush log file: {}", err);
        }
        match result {
            Ok(Some(0)) => Ok(()),
            Ok(Some(code)) => Err(Error::ScriptExecution(format!("exit status {}", code))),
            Ok(None) => Err(Error::ScriptExecution("no exit status reported".into())),
            Err(err) => Err(Error::ScriptExecution(err.to_string())),
        }
    }
}

#[async_trait]
impl<D: GuestDialer> ScriptExecutor for GuestRunner<D> {
    async fn exec_script(
        &self,
        job: &Job,
        transitions: &Transitions<'_>,
        output: Option<mpsc::UnboundedSender<Output>>,
    ) -> Result<()> {
        let script_name = stage_script(job).await?;
        let mut conn = self.connect(job.port()).await?;
        tracing::info!(job_id = %job.id(), port = job.port(), "guest reachable");
        let result = self
            .run_in_guest(&mut conn, job, &script_name, transitions, output)
            .await;
        conn.close().await;
        result
    }
}

/// Copy the script into the shared directory and make it executable.
pub async fn stage_script(job: &Job) -> Result<String> {
    let name = job.spec().script_name()?.to_owned();
    let src = &job.spec().script;
    let dst = job.file_path(&name);
    // copying a file onto itself truncates it
    if !same_file(src, &dst).await {
        tokio::fs::copy(src, &dst).await.map_err(|err| {
            Error::io(
                format!("failed to copy script {} into {}", src.display(), dst.display()),
                err,
            )
        })?;
    }
    tokio::fs::set_permissions(&dst, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|err| Error::io(format!("failed to chmod {}", dst.display()), err))?;
    Ok(name)
}

async fn same_file(a: &std::path::Path, b: &std::path::Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub fn mount_command() -> String {
    format!(
        "mkdir -p {mnt} && mount -t 9p -o trans=virtio {tag} {mnt}",
        mnt = GUEST_MOUNT_POINT,
        tag = MOUNT_TAG
    )
}

pub fn script_command(script_name: &str) -> String {
    shell_quote(&format!("{}/{}", GUEST_MOUNT_POINT, script_name))
}

fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}
