//! Stand-ins for the hypervisor and the guest, used by unit tests.

use crate::error::{Error, Result};
use crate::events::{JobState, Output};
use crate::guest::{
    GuestConnection, GuestDialer, GuestError, LogSink, ScriptExecutor, GUEST_MOUNT_POINT,
};
use crate::job::{layout, Job};
use crate::runtime::Transitions;
use crate::spec::JobSpec;
use crate::supervisor::Supervisor;
use crate::types::Port;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex,
};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// A spec for `hello.sh` under `dir`, with the script written out.
pub fn hello_spec(dir: &Path, body: &str) -> JobSpec {
    let script = dir.join("hello.sh");
    std::fs::write(&script, format!("#!/bin/sh\n{}", body)).unwrap();
    JobSpec {
        script,
        memory: 512,
        cpu: 1,
        image: dir.join("img.qcow2"),
        base_path: dir.join("j1"),
    }
}

/// What a [`LocalGuestDialer`] saw.
#[derive(Default)]
pub struct GuestProbe {
    pub dials: AtomicU32,
    pub commands: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

/// Forwarded ports of the "VMs" that are up, mapped to the directory they share.
#[derive(Clone, Default)]
pub struct LocalVms(Arc<Mutex<HashMap<Port, PathBuf>>>);

impl LocalVms {
    pub fn boot(&self, port: Port, share: &Path) {
        self.0.lock().unwrap().insert(port, share.to_path_buf());
    }

    fn share_for(&self, port: Port) -> Option<PathBuf> {
        self.0.lock().unwrap().get(&port).cloned()
    }
}

/// A "guest" that is the local shell, with the mount point mapped onto the shared dir.
///
/// Dials fail until attempt `answer_on` and for ports no VM was booted on.
/// `None` never answers.
pub struct LocalGuestDialer {
    answer_on: Option<u32>,
    mount_exit: u32,
    vms: LocalVms,
    probe: Arc<GuestProbe>,
}

impl LocalGuestDialer {
    pub fn answering_on(attempt: u32) -> Self {
        Self {
            answer_on: Some(attempt),
            mount_exit: 0,
            vms: LocalVms::default(),
            probe: Arc::default(),
        }
    }

    pub fn never_answering() -> Self {
        Self {
            answer_on: None,
            ..Self::answering_on(1)
        }
    }

    pub fn with_mount_exit(mut self, code: u32) -> Self {
        self.mount_exit = code;
        self
    }

    pub fn vms(&self) -> LocalVms {
        self.vms.clone()
    }

    pub fn probe(&self) -> Arc<GuestProbe> {
        self.probe.clone()
    }
}

#[async_trait]
impl GuestDialer for LocalGuestDialer {
    type Connection = LocalGuest;

    async fn dial(&self, port: Port) -> std::result::Result<LocalGuest, GuestError> {
        let attempt = self.probe.dials.fetch_add(1, Ordering::SeqCst) + 1;
        let refused = || GuestError(format!("dial tcp localhost:{}: connection refused", port));
        match self.answer_on {
            Some(answer_on) if attempt >= answer_on => {
                let share = self.vms.share_for(port).ok_or_else(refused)?;
                Ok(LocalGuest {
                    share,
                    mount_exit: self.mount_exit,
                    probe: self.probe.clone(),
                })
            }
            _ => Err(refused()),
        }
    }
}

pub struct LocalGuest {
    share: PathBuf,
    mount_exit: u32,
    probe: Arc<GuestProbe>,
}

#[async_trait]
impl GuestConnection for LocalGuest {
    async fn exec(
        &mut self,
        command: &str,
        sink: Option<&mut LogSink>,
    ) -> std::result::Result<Option<u32>, GuestError> {
        self.probe.commands.lock().unwrap().push(command.to_string());
        if command.contains("mount -t 9p") {
            return Ok(Some(self.mount_exit));
        }
        let command = command.replace(GUEST_MOUNT_POINT, &self.share.display().to_string());
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout).await?;
        }
        if let Some(mut err) = child.stderr.take() {
            err.read_to_end(&mut stderr).await?;
        }
        let status = child.wait().await?;
        if let Some(sink) = sink {
            if !stdout.is_empty() {
                sink.write(Output::Stdout(Bytes::from(stdout))).await?;
            }
            if !stderr.is_empty() {
                sink.write(Output::Stderr(Bytes::from(stderr))).await?;
            }
        }
        Ok(status.code().map(|code| code as u32))
    }

    async fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

/// Behaves like a daemonizing hypervisor: leaves a detached `sleep` behind,
/// records its pid in the pidfile and boots a [`LocalVms`] entry for the job's port.
pub struct DaemonSupervisor {
    pub vms: LocalVms,
}

#[async_trait]
impl Supervisor for DaemonSupervisor {
    async fn spawn(&self, job: &Job) -> Result<()> {
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(r#"sleep 300 >/dev/null 2>&1 & echo $! > "$1""#)
            .arg("sh")
            .arg(job.file_path(layout::PID))
            .status()
            .await
            .map_err(|err| Error::ProcessSpawn(err.to_string()))?;
        if !status.success() {
            return Err(Error::ProcessSpawn(status.to_string()));
        }
        self.vms.boot(job.port(), job.base_path());
        Ok(())
    }
}

/// Records the order lifecycle calls arrive in.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<&'static str>>>);

impl CallLog {
    pub fn push(&self, call: &'static str) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

/// Supervisor whose calls succeed or fail on demand.
pub struct ScriptedSupervisor {
    pub log: CallLog,
    pub spawn_fails: bool,
    pub kill_fails: bool,
}

#[async_trait]
impl Supervisor for ScriptedSupervisor {
    async fn spawn(&self, _job: &Job) -> Result<()> {
        self.log.push("spawn");
        if self.spawn_fails {
            return Err(Error::ProcessSpawn("qemu: could not open disk image".into()));
        }
        Ok(())
    }

    async fn kill(&self, _base_path: &Path) -> Result<()> {
        self.log.push("kill");
        if self.kill_fails {
            return Err(Error::Termination {
                pid: 4242,
                source: nix::errno::Errno::ESRCH,
            });
        }
        Ok(())
    }
}

/// Executor whose script succeeds or fails on demand.
pub struct ScriptedExecutor {
    pub log: CallLog,
    pub fails: bool,
}

#[async_trait]
impl ScriptExecutor for ScriptedExecutor {
    async fn exec_script(
        &self,
        _job: &Job,
        transitions: &Transitions<'_>,
        _output: Option<mpsc::UnboundedSender<Output>>,
    ) -> Result<()> {
        self.log.push("exec");
        if self.fails {
            return Err(Error::GuestUnreachable {
                attempts: 10,
                last_error: "connection refused".into(),
            });
        }
        transitions.enter(JobState::Executing).await;
        Ok(())
    }
}
