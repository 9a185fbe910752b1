use crate::error::{Error, Result};
use crate::types::Port;
use std::collections::HashSet;
use tokio::net::TcpListener;

/// How many times a lease re-draws a port the OS handed out while it was still leased.
const MAX_REDRAWS: usize = 16;

/// Ask the OS for a port that is free right now.
///
/// The listener is dropped before returning, so nothing reserves the port afterwards.
/// Use it promptly.
pub async fn allocate_port() -> Result<Port> {
    let listener = TcpListener::bind(("0.0.0.0", 0))
        .await
        .map_err(Error::PortAllocation)?;
    let addr = listener.local_addr().map_err(Error::PortAllocation)?;
    Ok(addr.port())
}

/// Ports held by live jobs.
///
/// The OS may recycle an ephemeral port as soon as the probing listener closes,
/// so a fresh allocation is checked against the ports still in use by other jobs.
#[derive(Debug, Default)]
pub struct PortLeases {
    leased: HashSet<Port>,
}

impl PortLeases {
    pub async fn lease(&mut self) -> Result<Port> {
        for _ in 0..MAX_REDRAWS {
            let port = allocate_port().await?;
            if self.leased.insert(port) {
                return Ok(port);
            }
            tracing::debug!(port, "allocated port is still leased, drawing again");
        }
        Err(Error::PortAllocation(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "os kept returning ports held by live jobs",
        )))
    }

    pub fn release(&mut self, port: Port) {
        self.leased.remove(&port);
    }

    pub fn is_leased(&self, port: Port) -> bool {
        self.leased.contains(&port)
    }

    pub fn len(&self) -> usize {
        self.leased.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leased.is_empty()
    }
}
