//! Event Loop and Packet Routing
//!
//! Single-threaded dispatcher over a mio poll: one token for the SRTLA
//! listening socket, one per-group token for each downstream SRT socket.
//! Group tokens are stable keys resolved through the registry on every
//! event, so a group destroyed mid-batch simply stops matching instead of
//! leaving dangling state behind.
//!
//! Every handler runs to completion before the loop waits again; all
//! mutable proxy state lives on this struct and is only touched from here.

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use srtla_io::{bind_listener, now_secs, SocketError};
use srtla_protocol::{
    build_reg2, build_reg3, build_reg_err, build_reg_ngp, classify, is_srt_ack,
    srt_dst_socket_id, PacketKind, MAX_CONNS_PER_GROUP, MTU, SRTLA_ID_LEN, SRT_MIN_LEN,
};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::conn::Conn;
use crate::group::Group;
use crate::janitor::Janitor;
use crate::registry::Registry;
use crate::selector::Selector;

/// Readiness token of the SRTLA listening socket.
const LISTENER_TOKEN: Token = Token(0);

/// Poll ceiling so the janitor runs even with zero traffic.
const TICK: Duration = Duration::from_secs(1);

/// Fatal dispatcher errors. Per-group and per-packet faults never surface
/// here; they are contained in the handlers.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("socket setup failed: {0}")]
    Socket(#[from] SocketError),

    #[error("readiness poll failed: {0}")]
    Poll(#[from] io::Error),
}

/// Outcome of one read on a group's downstream socket.
enum DownstreamRead {
    Packet(usize),
    Drained,
    Fatal,
}

/// The proxy's event loop and all state it owns.
pub struct Dispatcher {
    poll: Poll,
    events: Events,
    listener: UdpSocket,
    registry: Registry,
    selector: Selector,
    janitor: Janitor,
    srt_addr: SocketAddr,
    next_token: usize,
}

impl Dispatcher {
    /// Bind the listening socket and set up the readiness loop.
    /// `srt_addr` is the resolved downstream SRT server.
    pub fn new(srtla_port: u16, srt_addr: SocketAddr) -> Result<Self, DispatchError> {
        let poll = Poll::new().map_err(SocketError::Io)?;
        let mut listener = bind_listener(srtla_port)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(SocketError::Io)?;

        Ok(Dispatcher {
            poll,
            events: Events::with_capacity(64),
            listener,
            registry: Registry::new(),
            selector: Selector::new(),
            janitor: Janitor::new(),
            srt_addr,
            next_token: 1,
        })
    }

    /// Address the listening socket actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn group_count(&self) -> usize {
        self.registry.len()
    }

    /// Read-only view of the live groups, for inspection and tests.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run forever. Only a failing readiness wait escapes.
    pub fn run(&mut self) -> Result<(), DispatchError> {
        loop {
            self.run_once(TICK)?;
        }
    }

    /// One iteration: wait for readiness, dispatch every event, then give
    /// the janitor its tick.
    pub fn run_once(&mut self, timeout: Duration) -> Result<(), DispatchError> {
        self.poll.poll(&mut self.events, Some(timeout))?;
        let now = now_secs();

        let tokens: Vec<Token> = self.events.iter().map(|ev| ev.token()).collect();
        for token in tokens {
            if token == LISTENER_TOKEN {
                self.drain_listener(now);
            } else {
                self.drain_group_socket(token, now);
            }
        }

        self.janitor
            .run(&self.listener, &mut self.registry, self.poll.registry(), now);
        Ok(())
    }

    /// Read the listening socket dry.
    fn drain_listener(&mut self, now: u64) {
        loop {
            let mut buf = [0u8; MTU];
            let (n, src) = match self.listener.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::error!("failed to read an srtla packet: {e}");
                    return;
                }
            };
            self.process_datagram(src, &buf[..n], now);
        }
    }

    /// Route one datagram from the listening socket.
    pub fn process_datagram(&mut self, src: SocketAddr, buf: &[u8], now: u64) {
        match classify(buf) {
            PacketKind::Reg1 => self.register_group(src, buf, now),
            PacketKind::Reg2 => self.register_conn(src, buf, now),
            kind => self.handle_uplink_traffic(src, buf, kind, now),
        }
    }

    fn send_reply(&self, reply: &[u8], dst: SocketAddr) {
        if let Err(e) = self.listener.send_to(reply, dst) {
            tracing::error!(peer = %dst, "failed to send reply: {e}");
        }
    }

    /// REG1 -> REG2: allocate a group for this client.
    fn register_group(&mut self, src: SocketAddr, buf: &[u8], now: u64) {
        if self.registry.is_full() {
            self.send_reply(&build_reg_err(), src);
            tracing::error!(peer = %src, "group registration failed: max groups reached");
            return;
        }

        // One group per remote address at any time
        if self.registry.find_by_addr(src).is_some() {
            self.send_reply(&build_reg_err(), src);
            tracing::error!(
                peer = %src,
                "group registration failed: remote address already registered to a group"
            );
            return;
        }

        let group = Group::new(&buf[2..2 + SRTLA_ID_LEN / 2], src, now);
        let reg2 = build_reg2(&group.id);
        match self.listener.send_to(&reg2, src) {
            Ok(n) if n == reg2.len() => {}
            _ => {
                // The group was never inserted; it just evaporates
                tracing::error!(peer = %src, "group registration failed: send error");
                return;
            }
        }

        let short_id = group.short_id();
        if self.registry.insert(group).is_err() {
            tracing::error!(peer = %src, "group registration failed: registry full");
            return;
        }
        tracing::info!(peer = %src, group = %short_id, "group registered");
    }

    /// REG2 -> REG3: attach an uplink to its group.
    fn register_conn(&mut self, src: SocketAddr, buf: &[u8], now: u64) {
        let id = &buf[2..2 + SRTLA_ID_LEN];
        let Some(gidx) = self.registry.index_of_id(id) else {
            self.send_reply(&build_reg_ngp(), src);
            tracing::error!(peer = %src, "connection registration failed: no group found");
            return;
        };

        // Re-registration to the same group is allowed, to another is not
        if let Some((other, _)) = self.registry.find_by_addr(src) {
            if other != gidx {
                self.send_reply(&build_reg_err(), src);
                tracing::error!(
                    peer = %src,
                    "connection registration failed: provided group ID mismatch"
                );
                return;
            }
        }

        let (already_registered, group_full, short_id) = {
            let group = self.registry.group(gidx);
            (
                group.conn_idx_by_addr(src).is_some(),
                group.conns.len() >= MAX_CONNS_PER_GROUP,
                group.short_id(),
            )
        };
        if !already_registered && group_full {
            self.send_reply(&build_reg_err(), src);
            tracing::error!(
                peer = %src,
                group = %short_id,
                "connection registration failed: max group conns reached"
            );
            return;
        }

        let reg3 = build_reg3();
        match self.listener.send_to(&reg3, src) {
            Ok(n) if n == reg3.len() => {}
            _ => {
                tracing::error!(peer = %src, "connection registration failed: socket send error");
                return;
            }
        }

        let group = self.registry.group_mut(gidx);
        if !already_registered {
            group.conns.push(Conn::new(src, now));
        }
        group.last_addr = src;
        group.write_sidecar();
        tracing::info!(peer = %src, group = %group.short_id(), "connection registered");
    }

    /// Anything after registration: keepalives, SRT data and control from
    /// a known uplink.
    fn handle_uplink_traffic(&mut self, src: SocketAddr, buf: &[u8], kind: PacketKind, now: u64) {
        // Unknown peers are discarded without a reply
        let Some((gidx, Some(cidx))) = self.registry.find_by_addr(src) else {
            return;
        };

        {
            let group = self.registry.group_mut(gidx);
            group.conns[cidx].last_rcvd = now;

            if kind == PacketKind::Keepalive {
                // Echo so the client can measure the path
                if self.listener.send_to(buf, src).is_err() {
                    tracing::error!(peer = %src, "failed to send SRTLA keepalive");
                }
                return;
            }

            if buf.len() < SRT_MIN_LEN {
                return;
            }

            group.last_addr = src;

            if let PacketKind::SrtData { seq } = kind {
                if let Some(ack) = group.conns[cidx].log_data_seq(seq) {
                    match self.listener.send_to(&ack, src) {
                        Ok(n) if n == ack.len() => {}
                        _ => tracing::error!(peer = %src, "failed to send the SRTLA ACK"),
                    }
                }
            }
        }

        if self.registry.group(gidx).srt_sock.is_none() {
            if let Err(e) = self.open_downstream(gidx, buf) {
                tracing::error!("failed to open the SRT socket, terminating the group: {e}");
                self.destroy_group(gidx);
                return;
            }
        }

        let forwarded = {
            let group = self.registry.group(gidx);
            match group.srt_sock.as_ref() {
                Some(sock) => matches!(sock.send(buf), Ok(n) if n == buf.len()),
                None => return,
            }
        };
        if !forwarded {
            tracing::error!(
                group = %self.registry.group(gidx).short_id(),
                "failed to forward SRTLA packet, terminating the group"
            );
            self.destroy_group(gidx);
        }
    }

    /// Create, connect and register the group's downstream socket, then
    /// publish the sidecar file.
    fn open_downstream(&mut self, gidx: usize, first_pkt: &[u8]) -> Result<(), SocketError> {
        let mut sock = srtla_io::connect_downstream(self.srt_addr)?;
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(&mut sock, token, Interest::READABLE)
            .map_err(SocketError::Io)?;

        let group = self.registry.group_mut(gidx);
        group.srt_sock = Some(sock);
        group.token = Some(token);
        tracing::info!(
            group = %group.short_id(),
            local_port = group.local_port(),
            dst_socket_id = srt_dst_socket_id(first_pkt),
            "created downstream SRT socket"
        );
        group.write_sidecar();
        Ok(())
    }

    fn destroy_group(&mut self, gidx: usize) {
        self.registry.remove_at(gidx, self.poll.registry());
    }

    /// Drain one group's downstream socket.
    fn drain_group_socket(&mut self, token: Token, now: u64) {
        // A stale token from a group destroyed earlier in this batch no
        // longer resolves; nothing to do
        let Some(gidx) = self.registry.index_of_token(token) else {
            return;
        };

        loop {
            let mut buf = [0u8; MTU];
            let read = {
                let group = self.registry.group(gidx);
                let Some(sock) = group.srt_sock.as_ref() else {
                    return;
                };
                match sock.recv(&mut buf) {
                    Ok(n) if n >= SRT_MIN_LEN => DownstreamRead::Packet(n),
                    Ok(_) => DownstreamRead::Fatal,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => DownstreamRead::Drained,
                    Err(_) => DownstreamRead::Fatal,
                }
            };

            match read {
                DownstreamRead::Drained => return,
                DownstreamRead::Fatal => {
                    tracing::error!(
                        group = %self.registry.group(gidx).short_id(),
                        "failed to read the SRT sock, terminating the group"
                    );
                    self.destroy_group(gidx);
                    return;
                }
                DownstreamRead::Packet(n) => self.forward_to_uplink(gidx, &buf[..n], now),
            }
        }
    }

    /// Send one downstream packet toward the client: ACKs fan out over
    /// every uplink, data rides the selector's pick.
    fn forward_to_uplink(&mut self, gidx: usize, buf: &[u8], now: u64) {
        if is_srt_ack(buf) {
            // Broadcast so losing any one path does not delay ACK delivery
            let group = self.registry.group(gidx);
            for conn in &group.conns {
                match self.listener.send_to(buf, conn.peer_addr) {
                    Ok(n) if n == buf.len() => {}
                    _ => tracing::error!(peer = %conn.peer_addr, "failed to send the SRT ack"),
                }
            }
            return;
        }

        let group = self.registry.group_mut(gidx);
        match self.selector.pick(group, now) {
            Some(idx) => {
                let dst = group.conns[idx].peer_addr;
                match self.listener.send_to(buf, dst) {
                    Ok(n) if n == buf.len() => {
                        let conn = &mut group.conns[idx];
                        conn.bytes_sent += n as u64;
                        conn.bytes_this_period += n as u64;
                    }
                    _ => tracing::error!(peer = %dst, "failed to send the SRT packet"),
                }
            }
            None => {
                // Group momentarily has no usable uplink; aim at whoever
                // spoke last
                let dst = group.last_addr;
                if self.listener.send_to(buf, dst).is_err() {
                    tracing::error!(peer = %dst, "failed to send the SRT packet");
                }
            }
        }
    }
}
