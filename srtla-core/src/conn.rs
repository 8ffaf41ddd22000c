//! Uplink Connection Record
//!
//! One record per client-side UDP endpoint within a group. The peer
//! address is the connection's identity; everything else is bookkeeping
//! for ACK batching, capacity estimation and health tracking.

use srtla_protocol::{build_ack, RECV_ACK_INT, SRTLA_ACK_LEN};
use std::net::SocketAddr;

/// Seconds without traffic before an uplink stops being selectable.
pub const CONN_TIMEOUT: u64 = 10;

/// Capacity estimates of idle uplinks start shrinking after this long.
const CAPACITY_IDLE_AFTER: u64 = 60;

/// Shrink factor applied per decay tick to an idle capacity estimate.
const CAPACITY_IDLE_SHRINK: f64 = 0.8;

/// A symptomatic uplink that stays quiet this long counts another failure.
const HEALTH_GRACE: u64 = 5;

/// One client uplink.
pub struct Conn {
    /// Client-side endpoint; immutable, unique across the whole registry.
    pub peer_addr: SocketAddr,
    /// Wall-clock second of the last packet received from `peer_addr`.
    pub last_rcvd: u64,
    /// Ring of SRT data sequence numbers awaiting the next SRTLA ACK.
    recv_log: [u32; RECV_ACK_INT],
    recv_idx: usize,
    /// Bytes dispatched to this uplink, halved every decay tick.
    pub bytes_sent: u64,
    /// Bytes dispatched during the current measurement period.
    pub bytes_this_period: u64,
    /// Largest bytes-per-period ever observed; the capacity estimate.
    pub max_bytes_per_period: u64,
    /// Wall-clock second the capacity estimate last grew.
    pub last_capacity_update: u64,
    /// Wall-clock second of the first unresolved health symptom, or 0.
    pub health_status: u64,
    /// Consecutive health failures; 3 or more excludes the uplink.
    pub successive_failures: u32,
    /// Keepalive recovery probes sent since the uplink last carried data.
    pub recovery_attempts: u32,
}

impl Conn {
    pub fn new(peer_addr: SocketAddr, now: u64) -> Self {
        Conn {
            peer_addr,
            last_rcvd: now,
            recv_log: [0; RECV_ACK_INT],
            recv_idx: 0,
            bytes_sent: 0,
            bytes_this_period: 0,
            max_bytes_per_period: 0,
            last_capacity_update: now,
            health_status: 0,
            successive_failures: 0,
            recovery_attempts: 0,
        }
    }

    /// Record one received SRT data sequence number.
    ///
    /// Returns a ready-to-send SRTLA ACK once per `RECV_ACK_INT` recorded
    /// packets, in the order the packets arrived on this uplink.
    pub fn log_data_seq(&mut self, seq: u32) -> Option<[u8; SRTLA_ACK_LEN]> {
        self.recv_log[self.recv_idx] = seq;
        self.recv_idx += 1;

        if self.recv_idx < RECV_ACK_INT {
            return None;
        }
        self.recv_idx = 0;
        Some(build_ack(&self.recv_log))
    }

    /// Whether this uplink may carry data right now.
    pub fn is_active(&self, now: u64) -> bool {
        self.last_rcvd + CONN_TIMEOUT >= now && self.successive_failures < 3
    }

    /// Fold the current period into the capacity estimate.
    ///
    /// Runs once per decay tick. A period that beat the previous maximum
    /// raises the estimate; a silent uplink whose estimate has gone stale
    /// is gradually deprioritized instead of keeping its old reputation.
    pub fn update_capacity_estimate(&mut self, now: u64) {
        if self.bytes_this_period > 0 {
            if self.bytes_this_period > self.max_bytes_per_period {
                self.max_bytes_per_period = self.bytes_this_period;
                self.last_capacity_update = now;
                tracing::debug!(
                    peer = %self.peer_addr,
                    "updated capacity estimate: {:.2} MB/period",
                    self.max_bytes_per_period as f64 / 1_048_576.0
                );
            }
            self.bytes_this_period = 0;
        } else if self.max_bytes_per_period > 0
            && now.saturating_sub(self.last_capacity_update) > CAPACITY_IDLE_AFTER
        {
            self.max_bytes_per_period =
                (self.max_bytes_per_period as f64 * CAPACITY_IDLE_SHRINK) as u64;
            tracing::debug!(
                peer = %self.peer_addr,
                "reducing capacity estimate due to inactivity: {:.2} MB/period",
                self.max_bytes_per_period as f64 / 1_048_576.0
            );
        }
    }

    /// Advance the health state machine one observation.
    pub fn track_health(&mut self, now: u64) {
        if now.saturating_sub(self.last_rcvd) > CONN_TIMEOUT / 2 {
            if self.health_status == 0 {
                self.health_status = now;
                self.successive_failures = 0;
            } else if now - self.health_status > HEALTH_GRACE {
                self.successive_failures += 1;
                self.health_status = now;
                tracing::debug!(
                    peer = %self.peer_addr,
                    failures = self.successive_failures,
                    "connection health deteriorating"
                );
            }
        } else {
            self.health_status = 0;
            self.successive_failures = 0;
        }
    }
}
