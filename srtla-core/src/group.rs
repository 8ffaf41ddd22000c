//! Connection Group
//!
//! A group is one client's aggregate session: every uplink the client has
//! registered, the lazily-created downstream SRT socket, and the sidecar
//! file that maps the downstream local port to the client addresses.

use mio::net::UdpSocket;
use mio::Token;
use rand::rngs::OsRng;
use rand::RngCore;
use srtla_protocol::SRTLA_ID_LEN;
use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;

use crate::conn::Conn;

/// Seconds an empty group survives after creation before the janitor
/// reclaims it.
pub const GROUP_TIMEOUT: u64 = 10;

/// Sidecar files live under this prefix, keyed by downstream local port.
pub const SOCKET_INFO_PREFIX: &str = "/tmp/srtla-group-";

/// Full 32-byte group id: client nonce then server random half.
pub type GroupId = [u8; SRTLA_ID_LEN];

/// One client's aggregate session.
pub struct Group {
    /// Bytes [0..16) from the client's REG1, bytes [16..32) server random.
    pub id: GroupId,
    /// Registered uplinks, in registration order.
    pub conns: Vec<Conn>,
    pub created_at: u64,
    /// Downstream SRT socket, created when the first data packet needs
    /// forwarding. The sidecar file exists exactly as long as this does.
    pub srt_sock: Option<UdpSocket>,
    /// Readiness token of `srt_sock`; the dispatcher resolves events back
    /// to the group through this key.
    pub token: Option<Token>,
    /// Peer address that most recently carried traffic for this group.
    pub last_addr: SocketAddr,
}

impl Group {
    /// Build a group from the client half of the id. The server half comes
    /// from the OS random source; ids are capabilities and must not be
    /// guessable.
    pub fn new(client_id: &[u8], last_addr: SocketAddr, now: u64) -> Self {
        let mut id: GroupId = [0; SRTLA_ID_LEN];
        id[..SRTLA_ID_LEN / 2].copy_from_slice(&client_id[..SRTLA_ID_LEN / 2]);
        OsRng.fill_bytes(&mut id[SRTLA_ID_LEN / 2..]);

        Group {
            id,
            conns: Vec::new(),
            created_at: now,
            srt_sock: None,
            token: None,
            last_addr,
        }
    }

    /// Abbreviated id for log context.
    pub fn short_id(&self) -> String {
        let s = &self.id[SRTLA_ID_LEN / 2..SRTLA_ID_LEN / 2 + 4];
        format!("{:02x}{:02x}{:02x}{:02x}", s[0], s[1], s[2], s[3])
    }

    pub fn conn_idx_by_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.conns.iter().position(|c| c.peer_addr == addr)
    }

    /// Index of the most recently heard-from uplink.
    pub fn most_recent_conn(&self) -> Option<usize> {
        self.conns
            .iter()
            .enumerate()
            .max_by_key(|(_, c)| c.last_rcvd)
            .map(|(i, _)| i)
    }

    /// Local port of the downstream socket, once it exists.
    pub fn local_port(&self) -> Option<u16> {
        let sock = self.srt_sock.as_ref()?;
        sock.local_addr().ok().map(|a| a.port())
    }

    fn sidecar_path(&self) -> Option<String> {
        self.local_port()
            .map(|port| format!("{}{}", SOCKET_INFO_PREFIX, port))
    }

    /// Write (or rewrite) the sidecar file: one `ip:port` line per uplink.
    /// A no-op until the downstream socket exists.
    pub fn write_sidecar(&self) {
        let Some(path) = self.sidecar_path() else {
            return;
        };

        if let Err(e) = self.write_sidecar_inner(&path) {
            tracing::error!(group = %self.short_id(), %path, "failed to write socket info file: {e}");
        } else {
            tracing::debug!(group = %self.short_id(), %path, "wrote socket info file");
        }
    }

    fn write_sidecar_inner(&self, path: &str) -> io::Result<()> {
        let mut f = fs::File::create(path)?;
        for conn in &self.conns {
            writeln!(f, "{}", conn.peer_addr)?;
        }
        Ok(())
    }

    fn remove_sidecar(&self) {
        if let Some(path) = self.sidecar_path() {
            let _ = fs::remove_file(path);
        }
    }

    /// Tear the group down: remove the sidecar file and detach the
    /// downstream socket from the readiness loop. Called exactly once,
    /// right before the group leaves the registry.
    pub fn shutdown(&mut self, poll_registry: &mio::Registry) {
        self.remove_sidecar();
        if let Some(mut sock) = self.srt_sock.take() {
            let _ = poll_registry.deregister(&mut sock);
        }
        self.token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srtla_io::connect_downstream;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_id_construction() {
        let client_id = [0x42u8; 16];
        let g = Group::new(&client_id, addr("10.0.0.1:40000"), 1000);

        assert_eq!(&g.id[..16], &client_id);
        assert_eq!(g.created_at, 1000);
        assert!(g.srt_sock.is_none());

        // Server halves are random per group
        let g2 = Group::new(&client_id, addr("10.0.0.2:40000"), 1000);
        assert_ne!(&g.id[16..], &g2.id[16..]);
    }

    #[test]
    fn test_conn_lookup_and_most_recent() {
        let mut g = Group::new(&[0u8; 16], addr("10.0.0.1:40000"), 1000);
        g.conns.push(Conn::new(addr("10.0.0.1:40000"), 1000));
        g.conns.push(Conn::new(addr("10.0.0.2:50000"), 1005));

        assert_eq!(g.conn_idx_by_addr(addr("10.0.0.1:40000")), Some(0));
        assert_eq!(g.conn_idx_by_addr(addr("10.0.0.3:60000")), None);
        assert_eq!(g.most_recent_conn(), Some(1));
    }

    #[test]
    fn test_sidecar_lifecycle() {
        let anchor = srtla_io::bind_listener(0).unwrap();
        let target = anchor.local_addr().unwrap();

        let mut g = Group::new(&[1u8; 16], addr("10.0.0.1:40000"), 1000);
        g.conns.push(Conn::new(addr("10.0.0.1:40000"), 1000));
        g.conns.push(Conn::new(addr("10.0.0.2:50000"), 1000));

        // No socket yet: writing is a no-op
        g.write_sidecar();
        g.srt_sock = Some(connect_downstream(target).unwrap());

        let path = g.sidecar_path().unwrap();
        g.write_sidecar();
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["10.0.0.1:40000", "10.0.0.2:50000"]);

        let poll = mio::Poll::new().unwrap();
        g.shutdown(poll.registry());
        assert!(fs::metadata(&path).is_err());
        assert!(g.srt_sock.is_none());
    }
}
