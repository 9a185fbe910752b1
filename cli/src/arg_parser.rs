use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vmjob::RuntimeConfig;

/// Run a script in a throwaway VM, or inspect one left behind by another process
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct ArgParser {
    /// Log as JSON lines; script output becomes events tagged with its stream
    #[clap(long, global = true)]
    pub json: bool,

    #[clap(flatten)]
    pub runtime: RuntimeConfig,

    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum SubCommand {
    /// run a job to completion
    Run {
        /// JSON file holding the job spec
        job_file: PathBuf,
    },
    /// kill the VM whose pidfile lives in a job directory
    Kill {
        /// base directory of the job
        base_path: PathBuf,
    },
    /// print the last status a job persisted
    Status {
        /// base directory of the job
        base_path: PathBuf,
    },
}
