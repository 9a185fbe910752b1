//! Run scripts inside short-lived virtual machines.
//!
//! A job boots a QEMU guest with the job's directory shared over virtio-9p, waits
//! for the guest's SSH server, runs the script from the share and kills the VM.
//! Liveness of a VM is tracked by its pidfile, so any process can tear it down.

mod actors;
pub mod config;
pub mod error;
pub mod events;
pub mod guest;
pub mod job;
pub mod port;
pub mod retry;
pub mod runtime;
pub mod spec;
pub mod supervisor;
pub mod types;

#[cfg(test)]
mod testing;

// re-export the job coord handle as if it is the job coordinator itself.
pub use actors::coordinator::JobCoordinatorHandle as JobCoordinator;
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use events::{JobOutcome, JobState, JobStatus, Output};
pub use job::{Job, JobRecord, JobView};
pub use runtime::{run_job, JobReport, Runtime};
pub use spec::JobSpec;
