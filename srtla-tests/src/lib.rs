//! Shared helpers for the SRTLA proxy integration tests: client-side
//! packet construction and timeout-bounded UDP receives.

use srtla_protocol::packet::{SRTLA_TYPE_REG1, SRTLA_TYPE_REG2};
use srtla_protocol::{SRTLA_ID_LEN, SRTLA_REG1_LEN, SRTLA_REG2_LEN};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Build a client REG1: opcode plus the 16-byte client nonce, zero-padded
/// to the full id width.
pub fn build_reg1(nonce: &[u8; 16]) -> Vec<u8> {
    let mut pkt = vec![0u8; SRTLA_REG1_LEN];
    pkt[..2].copy_from_slice(&SRTLA_TYPE_REG1.to_be_bytes());
    pkt[2..18].copy_from_slice(nonce);
    pkt
}

/// Build a client REG2 carrying a full 32-byte group id.
pub fn build_client_reg2(id: &[u8]) -> Vec<u8> {
    assert_eq!(id.len(), SRTLA_ID_LEN);
    let mut pkt = vec![0u8; SRTLA_REG2_LEN];
    pkt[..2].copy_from_slice(&SRTLA_TYPE_REG2.to_be_bytes());
    pkt[2..].copy_from_slice(id);
    pkt
}

/// Build an SRT data packet of `len` bytes carrying `seq`.
pub fn build_srt_data(seq: u32, len: usize) -> Vec<u8> {
    assert!(len >= 16);
    let mut pkt = vec![0u8; len];
    pkt[..4].copy_from_slice(&(seq & 0x7FFF_FFFF).to_be_bytes());
    pkt
}

/// Build a minimal SRT ACK control packet.
pub fn build_srt_ack(len: usize) -> Vec<u8> {
    assert!(len >= 16);
    let mut pkt = vec![0u8; len];
    pkt[0] = 0x80;
    pkt[1] = 0x02;
    pkt
}

/// Bind a client-side socket with a short receive timeout.
pub fn client_sock() -> UdpSocket {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    sock
}

/// The address a bound socket will be seen as by the proxy.
pub fn sock_addr(sock: &UdpSocket) -> SocketAddr {
    sock.local_addr().unwrap()
}

/// Receive one datagram, or `None` on timeout.
pub fn recv_pkt(sock: &UdpSocket) -> Option<Vec<u8>> {
    let mut buf = [0u8; 2048];
    match sock.recv(&mut buf) {
        Ok(n) => Some(buf[..n].to_vec()),
        Err(_) => None,
    }
}

/// Receive datagrams until one satisfies `pred`, skipping the rest
/// (keepalives and similar background chatter), or `None` on timeout.
pub fn recv_matching(sock: &UdpSocket, pred: impl Fn(&[u8]) -> bool) -> Option<Vec<u8>> {
    for _ in 0..16 {
        let pkt = recv_pkt(sock)?;
        if pred(&pkt) {
            return Some(pkt);
        }
    }
    None
}

/// Assert that nothing arrives within the socket's timeout.
pub fn assert_silent(sock: &UdpSocket) {
    assert!(recv_pkt(sock).is_none(), "expected no datagram");
}
