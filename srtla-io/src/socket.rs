//! UDP socket construction
//!
//! All sockets are built through socket2 so their options can be set before
//! binding, then handed to mio for readiness notification. Every socket is
//! non-blocking; the event loop is the only place that waits.

use mio::net::UdpSocket;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use thiserror::Error;

/// Receive buffer for the listening socket. Bonded uplinks burst, so the
/// kernel queue has to absorb far more than a single link's worth.
pub const LISTENER_RCVBUF: usize = 32 * 1024 * 1024;

/// Socket configuration errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,
}

fn new_udp_socket() -> Result<Socket, SocketError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Bind the SRTLA listening socket on `0.0.0.0:<port>` with a large receive
/// buffer. Port 0 asks the kernel for an ephemeral port.
pub fn bind_listener(port: u16) -> Result<UdpSocket, SocketError> {
    let socket = new_udp_socket()?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(LISTENER_RCVBUF)?;

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;

    Ok(UdpSocket::from_std(socket.into()))
}

/// Create a connected UDP socket toward the downstream SRT server.
///
/// The kernel picks the local port; that port names the group in the
/// socket-info sidecar file.
pub fn connect_downstream(target: SocketAddr) -> Result<UdpSocket, SocketError> {
    let socket = new_udp_socket()?;
    socket.connect(&target.into())?;
    Ok(UdpSocket::from_std(socket.into()))
}
