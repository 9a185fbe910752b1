use crate::error::{Error, Result};
use crate::job::{layout, Job};
use async_trait::async_trait;
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};
use tokio::process::Command;

/// Mount tag the guest uses to find the job's shared directory.
pub const MOUNT_TAG: &str = "hostshare";
/// Guest port the hypervisor forwards the job's host port to.
pub const GUEST_SSH_PORT: u16 = 22;

/// Starts and stops the hypervisor behind a job.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Start the VM. Returning `Ok` only means the hypervisor accepted its
    /// arguments and daemonized, not that the guest has booted.
    async fn spawn(&self, job: &Job) -> Result<()>;

    /// Kill whatever process the pidfile under `base_path` names.
    async fn kill(&self, base_path: &Path) -> Result<()> {
        kill_by_pidfile(base_path).await
    }
}

/// Runs `qemu-system-*` in daemonizing mode.
#[derive(Clone, Debug)]
pub struct QemuSupervisor {
    binary: PathBuf,
}

impl QemuSupervisor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Default for QemuSupervisor {
    fn default() -> Self {
        Self::new("qemu-system-x86_64")
    }
}

#[async_trait]
impl Supervisor for QemuSupervisor {
    async fn spawn(&self, job: &Job) -> Result<()> {
        let args = qemu_args(job);
        tracing::debug!(job_id = %job.id(), binary = %self.binary.display(), ?args, "starting hypervisor");
        // with -daemonize the foreground process exits once the guest is running
        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(false)
            .output()
            .await
            .map_err(|err| Error::ProcessSpawn(format!("{}: {}", self.binary.display(), err)))?;
        if !output.status.success() {
            let mut combined = output.stdout;
            combined.extend_from_slice(&output.stderr);
            return Err(Error::ProcessSpawn(format!(
                "{} {}",
                String::from_utf8_lossy(&combined).trim(),
                output.status
            )));
        }
        Ok(())
    }
}

/// Hypervisor arguments for `job`.
pub fn qemu_args(job: &Job) -> Vec<OsString> {
    let spec = job.spec();
    let mut fsdev = OsString::from("local,id=fs1,path=");
    fsdev.push(job.base_path());
    fsdev.push(",security_model=mapped");

    let mut args: Vec<OsString> = Vec::new();
    let mut push = |flag: &str, value: OsString| {
        args.push(flag.into());
        args.push(value);
    };
    push("-m", spec.memory.to_string().into());
    push("-hda", spec.image.clone().into());
    push("-smp", spec.cpu.to_string().into());
    push("-device", "qemu-xhci".into());
    push(
        "-nic",
        format!("user,hostfwd=tcp::{}-:{}", job.port(), GUEST_SSH_PORT).into(),
    );
    push("-display", "none".into());
    push("-fsdev", fsdev);
    push(
        "-device",
        format!("virtio-9p-pci,fsdev=fs1,mount_tag={}", MOUNT_TAG).into(),
    );
    push("-pidfile", job.file_path(layout::PID).into());
    args.push("-no-reboot".into());
    args.push("-enable-kvm".into());
    args.push("-daemonize".into());
    args
}

/// SIGKILL the process recorded in `<base_path>/qemu.pid`.
///
/// Depends on nothing but the directory, so any process can tear down a VM
/// some other process started. A pid that no longer exists is an error.
pub async fn kill_by_pidfile(base_path: &Path) -> Result<()> {
    let path = layout::file_path(base_path, layout::PID);
    let raw = tokio::fs::read(&path)
        .await
        .map_err(|source| Error::ProcessLookup {
            path: path.clone(),
            source,
        })?;
    let pid = parse_pid(&raw).ok_or_else(|| Error::CorruptState {
        path: path.clone(),
        contents: String::from_utf8_lossy(&raw).into_owned(),
    })?;
    signal::kill(Pid::from_raw(pid), Signal::SIGKILL)
        .map_err(|source| Error::Termination { pid, source })?;
    tracing::debug!(pid, pidfile = %path.display(), "killed hypervisor");
    Ok(())
}

fn parse_pid(raw: &[u8]) -> Option<i32> {
    let pid: i32 = std::str::from_utf8(raw).ok()?.trim().parse().ok()?;
    // 0 and negative pids address process groups, never a single VM
    (pid > 0).then(|| pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::JobSpec;
    use nix::errno::Errno;

    async fn job_in(dir: &Path) -> Job {
        let spec = JobSpec {
            script: dir.join("hello.sh"),
            memory: 512,
            cpu: 2,
            image: dir.join("img.qcow2"),
            base_path: dir.join("j1"),
        };
        Job::create_with_port(spec, 40022).await.expect("create job")
    }

    fn args_as_strings(job: &Job) -> Vec<String> {
        qemu_args(job)
            .into_iter()
            .map(|arg| arg.into_string().unwrap())
            .collect()
    }

    fn value_of<'a>(args: &'a [String], flag: &str, contains: &str) -> &'a str {
        args.windows(2)
            .find(|pair| pair[0] == flag && pair[1].contains(contains))
            .map(|pair| pair[1].as_str())
            .unwrap_or_else(|| panic!("no {} {}.. in {:?}", flag, contains, args))
    }

    #[tokio::test]
    async fn builds_the_invocation_contract() {
        let tmp = tempfile::tempdir().unwrap();
        let job = job_in(tmp.path()).await;
        let base = job.base_path().display().to_string();
        let args = args_as_strings(&job);

        assert_eq!(value_of(&args, "-m", ""), "512");
        assert_eq!(value_of(&args, "-smp", ""), "2");
        assert_eq!(
            value_of(&args, "-hda", ""),
            tmp.path().join("img.qcow2").display().to_string()
        );
        assert_eq!(value_of(&args, "-nic", ""), "user,hostfwd=tcp::40022-:22");
        assert_eq!(
            value_of(&args, "-fsdev", ""),
            format!("local,id=fs1,path={},security_model=mapped", base)
        );
        assert_eq!(
            value_of(&args, "-device", "9p"),
            "virtio-9p-pci,fsdev=fs1,mount_tag=hostshare"
        );
        assert_eq!(value_of(&args, "-pidfile", ""), format!("{}/qemu.pid", base));
        for flag in ["-daemonize", "-no-reboot", "-enable-kvm"] {
            assert!(args.iter().any(|arg| arg == flag), "missing {}", flag);
        }
    }

    #[tokio::test]
    async fn spawn_failure_carries_output() {
        let tmp = tempfile::tempdir().unwrap();
        let job = job_in(tmp.path()).await;
        // `false` rejects everything, like a hypervisor refusing its arguments
        let err = QemuSupervisor::new("false").spawn(&job).await.unwrap_err();
        assert!(matches!(err, Error::ProcessSpawn(_)), "{:?}", err);

        let err = QemuSupervisor::new(tmp.path().join("no-such-qemu"))
            .spawn(&job)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProcessSpawn(_)), "{:?}", err);
    }

    #[test]
    fn parses_pidfile_contents() {
        assert_eq!(parse_pid(b"1234\n"), Some(1234));
        assert_eq!(parse_pid(b"1234"), Some(1234));
        assert_eq!(parse_pid(b""), None);
        assert_eq!(parse_pid(b"qemu\n"), None);
        assert_eq!(parse_pid(b"0\n"), None);
        assert_eq!(parse_pid(b"-1\n"), None);
    }

    #[tokio::test]
    async fn missing_pidfile_is_a_lookup_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = kill_by_pidfile(tmp.path()).await.unwrap_err();
        assert!(matches!(err, Error::ProcessLookup { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn garbage_pidfile_is_corrupt_state() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(layout::PID), "not a pid\n").unwrap();
        let err = kill_by_pidfile(tmp.path()).await.unwrap_err();
        assert!(matches!(err, Error::CorruptState { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn second_kill_reports_the_process_is_gone() {
        let tmp = tempfile::tempdir().unwrap();
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        std::fs::write(tmp.path().join(layout::PID), format!("{}\n", child.id())).unwrap();

        kill_by_pidfile(tmp.path()).await.expect("first kill");
        // reap it, a zombie would still accept signals
        let status = child.wait().unwrap();
        assert_eq!(std::os::unix::process::ExitStatusExt::signal(&status), Some(9));

        let err = kill_by_pidfile(tmp.path()).await.unwrap_err();
        match err {
            Error::Termination { source, .. } => assert_eq!(source, Errno::ESRCH),
            other => panic!("expected termination error, got {:?}", other),
        }
    }
}
