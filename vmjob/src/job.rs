use crate::error::{Error, Result};
use crate::events::JobStatus;
use crate::port;
use crate::spec::JobSpec;
use crate::types::{JobId, Port};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Files a job keeps in its base directory.
pub mod layout {
    use std::path::{Path, PathBuf};

    /// Snapshot of the job record, written at creation.
    pub const SPEC: &str = "spec.json";
    /// Hypervisor pid, written by the hypervisor itself.
    pub const PID: &str = "qemu.pid";
    /// Combined stdout and stderr of the script.
    pub const LOG: &str = "log.txt";
    /// Latest lifecycle status.
    pub const STATUS: &str = "status.json";

    /// Whether a script staged under `name` would clobber a job artifact.
    pub fn is_reserved(name: &str) -> bool {
        [SPEC, PID, LOG, STATUS].iter().any(|file| {
            name == *file || name.strip_suffix(".tmp") == Some(*file)
        })
    }

    pub fn file_path(base_path: &Path, file: &str) -> PathBuf {
        base_path.join(file)
    }
}

/// The materialized job: what `spec.json` holds and what submitters get back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub port: Port,
    pub spec: JobSpec,
}

/// A job's record together with where it is in its lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub record: JobRecord,
    pub status: JobStatus,
}

/// One request to run a script in its own VM.
///
/// A `Job` is plain data. Nothing here holds the hypervisor process: whether the VM
/// is alive is answered by the pidfile in the base directory.
#[derive(Clone, Debug)]
pub struct Job {
    record: JobRecord,
}

impl Job {
    /// Resolve the spec, allocate a forwarded port and persist the record.
    pub async fn create(spec: JobSpec) -> Result<Self> {
        let port = port::allocate_port().await?;
        Self::create_with_port(spec, port).await
    }

    /// Like [`Job::create`] for a port the caller already holds.
    pub async fn create_with_port(spec: JobSpec, port: Port) -> Result<Self> {
        let spec = spec.resolve().await?;
        // a reused base directory may still name the pid of some earlier, long gone vm
        let pidfile = layout::file_path(&spec.base_path, layout::PID);
        match tokio::fs::remove_file(&pidfile).await {
            Ok(()) => tracing::debug!(pidfile = %pidfile.display(), "removed stale pidfile"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(Error::io(
                    format!("failed to remove stale pidfile {}", pidfile.display()),
                    err,
                ))
            }
        }
        let job = Self {
            record: JobRecord {
                id: uuid::Uuid::new_v4(),
                port,
                spec,
            },
        };
        job.write_json(layout::SPEC, &job.record).await?;
        job.write_status(&JobStatus::created()).await?;
        Ok(job)
    }

    pub fn id(&self) -> JobId {
        self.record.id
    }

    pub fn port(&self) -> Port {
        self.record.port
    }

    pub fn spec(&self) -> &JobSpec {
        &self.record.spec
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn base_path(&self) -> &Path {
        &self.record.spec.base_path
    }

    pub fn file_path(&self, file: &str) -> PathBuf {
        layout::file_path(self.base_path(), file)
    }

    pub async fn write_status(&self, status: &JobStatus) -> Result<()> {
        self.write_json(layout::STATUS, status).await
    }

    // write to a sibling file first so readers in other processes never see half a document
    async fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.file_path(file);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(value).map_err(|err| {
            Error::io(format!("failed to encode {}", file), err.into())
        })?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|err| Error::io(format!("failed to write {}", tmp.display()), err))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| Error::io(format!("failed to write {}", path.display()), err))
    }
}

/// Read the status another process persisted for the job rooted at `base_path`.
pub async fn read_status(base_path: &Path) -> Result<JobStatus> {
    read_json(&layout::file_path(base_path, layout::STATUS)).await
}

/// Read the record written when the job rooted at `base_path` was created.
pub async fn read_record(base_path: &Path) -> Result<JobRecord> {
    read_json(&layout::file_path(base_path, layout::SPEC)).await
}

/// Read back the whole view of the job rooted at `base_path`.
///
/// Fails with [`Error::DoesNotExist`] when the directory has since been taken over by
/// another job.
pub async fn read_view(job_id: JobId, base_path: &Path) -> Result<JobView> {
    let record = read_record(base_path).await?;
    if record.id != job_id {
        return Err(Error::DoesNotExist(job_id));
    }
    let status = read_status(base_path).await?;
    Ok(JobView { record, status })
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
    serde_json::from_slice(&raw)
        .map_err(|err| Error::io(format!("failed to decode {}", path.display()), err.into()))
}
