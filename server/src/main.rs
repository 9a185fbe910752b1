mod interceptors;
mod services;

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vmjob::{JobCoordinator, RuntimeConfig};

/// HTTP front end for running scripts in throwaway VMs.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct ServerArgs {
    /// Address to accept HTTP connections on.
    #[clap(long, env = "VMJOB_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Depth of the coordinator's request queue.
    #[clap(long, env = "VMJOB_CHANNEL_CAPACITY", default_value = "64")]
    channel_capacity: usize,

    /// Seconds a finished job stays in memory before it is answered from its directory.
    #[clap(long, env = "VMJOB_RETENTION_SECS", default_value = "600")]
    retention_secs: u64,

    #[clap(flatten)]
    runtime: RuntimeConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = ServerArgs::parse();
    serve(args).await
}

async fn serve(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = JobCoordinator::spawn_with_retention(
        args.runtime.build_runtime(),
        args.channel_capacity,
        Duration::from_secs(args.retention_secs),
    );
    let app = services::jobservice::router(coordinator);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
