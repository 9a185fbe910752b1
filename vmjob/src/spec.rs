use crate::error::{Error, Result};
use crate::job::layout;
use serde::{Deserialize, Serialize};
use std::path::{self, Path, PathBuf};

/// What the caller asked for: a script and the machine to run it on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Script to run inside the guest.
    pub script: PathBuf,
    /// Guest memory in megabytes.
    pub memory: u32,
    /// Number of virtual cpus.
    pub cpu: u32,
    /// Disk image booted as the guest's primary drive.
    pub image: PathBuf,
    /// Directory owned by the job. Holds every artifact and is shared into the guest.
    pub base_path: PathBuf,
}

impl JobSpec {
    /// Make every path absolute and make sure the base directory exists.
    ///
    /// Paths that are already absolute come back unchanged.
    pub async fn resolve(self) -> Result<Self> {
        if self.memory == 0 {
            return Err(Error::InvalidSpec("memory must be at least 1 MB".into()));
        }
        if self.cpu == 0 {
            return Err(Error::InvalidSpec("cpu count must be at least 1".into()));
        }
        let script_name = self.script_name()?;
        if layout::is_reserved(script_name) {
            return Err(Error::InvalidSpec(format!(
                "script name {} collides with a job file",
                script_name
            )));
        }
        let base_path = absolute(&self.base_path)?;
        tokio::fs::create_dir_all(&base_path).await.map_err(|err| {
            Error::io(
                format!("failed to create base dir {}", base_path.display()),
                err,
            )
        })?;
        Ok(Self {
            script: absolute(&self.script)?,
            image: absolute(&self.image)?,
            base_path,
            ..self
        })
    }

    /// File name the script keeps once it is copied into the base directory.
    pub fn script_name(&self) -> Result<&str> {
        self.script
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::InvalidSpec(format!(
                    "script path {} has no usable file name",
                    self.script.display()
                ))
            })
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    path::absolute(path).map_err(|err| {
        Error::io(
            format!("failed to get absolute path of {}", path.display()),
            err,
        )
    })
}
