//! Downstream Address Resolution
//!
//! Resolves the SRT server's hostname and probes each candidate address
//! with an SRT handshake induction packet. SRT is connection-oriented and
//! stays silent otherwise, so a same-sized echo is the only cheap signal
//! that a server is actually listening. An unreachable server is a
//! warning, not an error: the proxy proceeds with the first resolved
//! address and lets the stream find it later.

use srtla_protocol::{build_induction_probe, MTU};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use thiserror::Error;

/// Per-candidate wait for the induction response.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Resolution errors (all fatal at startup)
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolution {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("{host}:{port} did not resolve to any IPv4 address")]
    NoAddresses { host: String, port: u16 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Resolve the downstream SRT server, preferring an address that answers
/// an SRT handshake induction.
pub fn resolve_srt_addr(host: &str, port: u16) -> Result<SocketAddr, ResolveError> {
    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| ResolveError::Resolution {
            host: host.to_string(),
            port,
            source,
        })?
        .filter(|a| a.is_ipv4())
        .collect();

    if candidates.is_empty() {
        return Err(ResolveError::NoAddresses {
            host: host.to_string(),
            port,
        });
    }

    let probe = build_induction_probe();
    let sock = UdpSocket::bind("0.0.0.0:0")?;
    sock.set_read_timeout(Some(PROBE_TIMEOUT))?;

    for &addr in &candidates {
        tracing::info!("trying to connect to SRT at {addr}");

        if sock.connect(addr).is_err() {
            continue;
        }
        if !matches!(sock.send(&probe), Ok(n) if n == probe.len()) {
            continue;
        }

        let mut buf = [0u8; MTU];
        if let Ok(n) = sock.recv(&mut buf) {
            if n == probe.len() {
                tracing::info!("SRT server reachable at {addr}");
                return Ok(addr);
            }
        }
    }

    let fallback = candidates[0];
    tracing::warn!(
        "failed to confirm that an SRT server is reachable at any address, \
         proceeding with {fallback}"
    );
    Ok(fallback)
}
