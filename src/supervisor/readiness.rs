//! Readiness probing: polls a just-spawned backend's loopback port until it
//! accepts a TCP connection, the process dies, or the startup timeout
//! elapses.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    NotYet,
}

/// Attempts one TCP connect to `127.0.0.1:port`, bounded by a short timeout
/// so a half-open port can't stall the probe loop.
pub async fn probe_once(port: u16) -> ProbeOutcome {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    match timeout(Duration::from_millis(150), TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => ProbeOutcome::Ready,
        _ => ProbeOutcome::NotYet,
    }
}
