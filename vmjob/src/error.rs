use crate::types::JobId;
use nix::errno::Errno;
use std::{io, path::PathBuf, result};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to allocate a free port: {0}")]
    PortAllocation(#[source] io::Error),
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to start vm: {0}")]
    ProcessSpawn(String),
    #[error("guest unreachable after {attempts} attempts: {last_error}")]
    GuestUnreachable { attempts: u32, last_error: String },
    #[error("failed to mount shared folder: {0}")]
    Mount(String),
    #[error("failed to run script: {0}")]
    ScriptExecution(String),
    #[error("failed to read pid file {}: {source}", path.display())]
    ProcessLookup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("pid file {} holds no valid pid: {contents:?}", path.display())]
    CorruptState { path: PathBuf, contents: String },
    #[error("failed to kill process {pid}: {source}")]
    Termination {
        pid: i32,
        #[source]
        source: Errno,
    },
    #[error("No such job exists: {0}")]
    DoesNotExist(JobId),
    #[error("job {0} has already terminated")]
    AlreadyTerminated(JobId),
    #[error("job coordinator exited")]
    CoordinatorExited,
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
