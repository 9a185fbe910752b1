use crate::guest::{ssh::SshDialer, GuestCredentials, GuestRunner};
use crate::retry::{Backoff, RetryPolicy};
use crate::runtime::Runtime;
use crate::supervisor::QemuSupervisor;
use std::{path::PathBuf, sync::Arc, time::Duration};

/// Everything an operator may tune about how jobs are run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
pub struct RuntimeConfig {
    /// Hypervisor binary
    #[cfg_attr(
        feature = "cli",
        clap(long, env = "VMJOB_QEMU", default_value = "qemu-system-x86_64")
    )]
    pub qemu_binary: PathBuf,

    /// Guest account used for ssh
    #[cfg_attr(feature = "cli", clap(long, env = "VMJOB_SSH_USER", default_value = "root"))]
    pub ssh_user: String,

    /// Password of the guest account
    #[cfg_attr(
        feature = "cli",
        clap(long, env = "VMJOB_SSH_PASSWORD", default_value = "root", hide_env_values = true)
    )]
    pub ssh_password: String,

    /// How many times to dial the guest before giving up
    #[cfg_attr(feature = "cli", clap(long, env = "VMJOB_DIAL_ATTEMPTS", default_value = "10"))]
    pub dial_attempts: u32,

    /// Seconds between dial attempts
    #[cfg_attr(
        feature = "cli",
        clap(long, env = "VMJOB_DIAL_INTERVAL_SECS", default_value = "2")
    )]
    pub dial_interval_secs: u64,

    /// Multiply the wait by this much after every failed dial; unset keeps it fixed
    #[cfg_attr(feature = "cli", clap(long, env = "VMJOB_DIAL_BACKOFF_FACTOR"))]
    pub dial_backoff_factor: Option<u32>,

    /// Longest wait between dials once backing off
    #[cfg_attr(
        feature = "cli",
        clap(long, env = "VMJOB_DIAL_BACKOFF_MAX_SECS", default_value = "30")
    )]
    pub dial_backoff_max_secs: u64,

    /// Give up dialing after this many seconds, whatever attempts remain
    #[cfg_attr(feature = "cli", clap(long, env = "VMJOB_DIAL_DEADLINE_SECS"))]
    pub dial_deadline_secs: Option<u64>,

    /// Fail the script if it runs longer than this many seconds
    #[cfg_attr(feature = "cli", clap(long, env = "VMJOB_EXEC_TIMEOUT_SECS"))]
    pub exec_timeout_secs: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            qemu_binary: "qemu-system-x86_64".into(),
            ssh_user: "root".into(),
            ssh_password: "root".into(),
            dial_attempts: 10,
            dial_interval_secs: 2,
            dial_backoff_factor: None,
            dial_backoff_max_secs: 30,
            dial_deadline_secs: None,
            exec_timeout_secs: None,
        }
    }
}

impl RuntimeConfig {
    pub fn dial_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.dial_attempts.max(1),
            interval: Duration::from_secs(self.dial_interval_secs),
            backoff: match self.dial_backoff_factor {
                Some(factor) if factor > 1 => Backoff::Exponential {
                    factor,
                    max: Duration::from_secs(self.dial_backoff_max_secs),
                },
                _ => Backoff::Fixed,
            },
            deadline: self.dial_deadline_secs.map(Duration::from_secs),
        }
    }

    pub fn credentials(&self) -> GuestCredentials {
        GuestCredentials {
            user: self.ssh_user.clone(),
            password: self.ssh_password.clone(),
        }
    }

    /// QEMU for the VM, ssh for the guest.
    pub fn build_runtime(&self) -> Runtime {
        let runner = GuestRunner::new(SshDialer::new(self.credentials()), self.dial_policy())
            .with_exec_timeout(self.exec_timeout_secs.map(Duration::from_secs));
        Runtime {
            supervisor: Arc::new(QemuSupervisor::new(self.qemu_binary.clone())),
            executor: Arc::new(runner),
        }
    }
}
