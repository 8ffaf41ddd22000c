//! Periodic Sweeps
//!
//! Two housekeeping tasks driven off the event-loop tick: a cleanup pass
//! that reclaims dead uplinks and empty groups, and a proactive ping pass
//! that keeps quiet uplinks alive and probes ones under recovery.
//!
//! An uplink stops being selectable after `CONN_TIMEOUT` but is only
//! deleted after 1.5x that; the gap is a deliberate grace band in which
//! recovery probes can still bring it back.

use mio::net::UdpSocket;
use srtla_io::PeriodGate;
use srtla_protocol::build_keepalive;

use crate::conn::CONN_TIMEOUT;
use crate::group::GROUP_TIMEOUT;
use crate::registry::Registry;

/// Minimum seconds between cleanup passes.
pub const CLEANUP_PERIOD: u64 = 3;

/// Minimum seconds between proactive ping passes.
const PING_PERIOD: u64 = 2;

/// Uplinks silent longer than this are deleted outright.
const CONN_REMOVE_AFTER: u64 = CONN_TIMEOUT + CONN_TIMEOUT / 2;

/// Recovery probing starts this early into the silence.
const RECOVERY_AFTER: u64 = CONN_TIMEOUT / 4;

/// Keepalives sent per cleanup-pass recovery attempt.
const RECOVERY_BURST: usize = 3;

/// An uplink idle longer than this gets a proactive keepalive.
const PING_IDLE_AFTER: u64 = CONN_TIMEOUT / 5;

/// Maximum recovery attempts before an uplink is written off.
const MAX_RECOVERY_ATTEMPTS: u32 = 5;

pub struct Janitor {
    cleanup_gate: PeriodGate,
    ping_gate: PeriodGate,
}

impl Default for Janitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Janitor {
    pub fn new() -> Self {
        Janitor {
            cleanup_gate: PeriodGate::new(CLEANUP_PERIOD),
            ping_gate: PeriodGate::new(PING_PERIOD),
        }
    }

    /// Run whichever sweeps are due. Called once per event-loop tick;
    /// `sock` is the SRTLA listening socket keepalives go out on.
    pub fn run(
        &mut self,
        sock: &UdpSocket,
        registry: &mut Registry,
        poll_registry: &mio::Registry,
        now: u64,
    ) {
        if self.cleanup_gate.try_fire(now) {
            Self::cleanup(sock, registry, poll_registry, now);
        }
        if self.ping_gate.try_fire(now) {
            Self::ping(sock, registry, now);
        }
    }

    /// Reclaim timed-out uplinks, probe flagging ones, and drop groups
    /// that have been empty past their grace period.
    fn cleanup(
        sock: &UdpSocket,
        registry: &mut Registry,
        poll_registry: &mio::Registry,
        now: u64,
    ) {
        if registry.is_empty() {
            return;
        }

        tracing::debug!("starting a cleanup run");

        let total_groups = registry.len();
        let mut total_conns = 0;
        let mut removed_groups = 0;
        let mut removed_conns = 0;
        let mut probed_conns = 0;

        let keepalive = build_keepalive();
        let mut gidx = 0;
        while gidx < registry.len() {
            let group = registry.group_mut(gidx);
            let before = group.conns.len();
            total_conns += before;

            group.conns.retain_mut(|conn| {
                if conn.last_rcvd + CONN_REMOVE_AFTER < now {
                    tracing::info!(peer = %conn.peer_addr, "connection removed (timed out)");
                    removed_conns += 1;
                    return false;
                }

                if conn.last_rcvd + RECOVERY_AFTER < now
                    && conn.recovery_attempts < MAX_RECOVERY_ATTEMPTS
                {
                    for _ in 0..RECOVERY_BURST {
                        let _ = sock.send_to(&keepalive, conn.peer_addr);
                    }
                    conn.recovery_attempts += 1;
                    probed_conns += 1;
                    tracing::debug!(
                        peer = %conn.peer_addr,
                        attempt = conn.recovery_attempts,
                        "attempting to recover connection"
                    );
                }
                true
            });

            let expired = group.conns.is_empty() && group.created_at + GROUP_TIMEOUT < now;
            if expired {
                tracing::info!(group = %group.short_id(), "group removed (no connections)");
            } else if before != group.conns.len() {
                group.write_sidecar();
            }

            if expired {
                registry.remove_at(gidx, poll_registry);
                removed_groups += 1;
            } else {
                gidx += 1;
            }
        }

        tracing::debug!(
            total_groups,
            total_conns,
            removed_groups,
            removed_conns,
            probed_conns,
            "cleanup run ended"
        );
    }

    /// Keep quiet uplinks warm and lean on ones under recovery.
    fn ping(sock: &UdpSocket, registry: &mut Registry, now: u64) {
        if registry.is_empty() {
            return;
        }

        let keepalive = build_keepalive();
        for gidx in 0..registry.len() {
            let group = registry.group(gidx);
            for conn in &group.conns {
                if now.saturating_sub(conn.last_rcvd) > PING_IDLE_AFTER {
                    let _ = sock.send_to(&keepalive, conn.peer_addr);
                    if conn.recovery_attempts > 0 {
                        tracing::debug!(peer = %conn.peer_addr, "probing inactive connection");
                    }
                }

                if conn.recovery_attempts > 0 {
                    for _ in 0..2 {
                        let _ = sock.send_to(&keepalive, conn.peer_addr);
                    }
                }
            }
        }
    }
}
