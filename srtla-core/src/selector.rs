//! Uplink Selection
//!
//! Chooses which uplink of a group carries the next outbound data packet.
//! Normal operation alternates round-robin with a periodic least-loaded
//! pick; once any path runs above 70% of its estimated capacity, new
//! packets rotate over the less-utilized half instead, so a saturating
//! path never becomes the congestion collapse point.

use crate::conn::Conn;
use crate::group::Group;

/// Length in seconds of one capacity measurement period.
pub const DECAY_PERIOD: u64 = 30;

/// Utilization above which a path counts as approaching capacity.
const PRESSURE_THRESHOLD: f64 = 0.7;

/// Utilization values are capped here; beyond 200% the ordering no longer
/// carries information.
const UTILIZATION_CAP: f64 = 2.0;

/// Bandwidth distribution is logged at most this often.
const DISTRIBUTION_LOG_PERIOD: u64 = 10;

/// Per-dispatcher selection state.
///
/// `last_decay` is shared across every group the dispatcher owns: the
/// first selection call that observes an elapsed period runs capacity
/// maintenance for its group and stamps the shared clock.
pub struct Selector {
    last_decay: u64,
    round_robin: u64,
    last_distribution_log: u64,
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector {
    pub fn new() -> Self {
        Selector {
            last_decay: 0,
            round_robin: 0,
            last_distribution_log: 0,
        }
    }

    /// Pick the uplink for the next data packet.
    ///
    /// Returns an index into `group.conns`, or `None` for an empty group.
    /// Selection is staged: active uplinks first, then uplinks in recovery,
    /// then the most recently alive uplink as a last resort.
    pub fn pick(&mut self, group: &mut Group, now: u64) -> Option<usize> {
        if group.conns.is_empty() {
            return None;
        }

        self.maintain_capacity(group, now);

        let mut candidates = self.active_indices(group, now);

        if candidates.is_empty() {
            candidates = Self::recovery_indices(group);
            if !candidates.is_empty() {
                tracing::debug!(
                    group = %group.short_id(),
                    count = candidates.len(),
                    "no active connections, using recovery connections"
                );
            }
        }

        if candidates.is_empty() {
            tracing::warn!(
                group = %group.short_id(),
                "no active or recovery connections, using fallback strategy"
            );
            return group.most_recent_conn();
        }

        let picked = self.pick_by_load(group, &candidates, now);

        self.log_distribution(group, now);

        // Carrying traffic again means the recovery probes worked
        let conn = &mut group.conns[picked];
        if conn.recovery_attempts > 0 {
            conn.recovery_attempts = 0;
        }

        Some(picked)
    }

    /// Scale factor estimating how much of the current period has elapsed.
    pub fn time_factor(&self, now: u64) -> f64 {
        let elapsed = now.saturating_sub(self.last_decay) as f64;
        (elapsed.min(DECAY_PERIOD as f64) / DECAY_PERIOD as f64).max(0.01)
    }

    /// Run the once-per-period maintenance pass over the group: capacity
    /// estimates, sent-byte decay, and health observations.
    fn maintain_capacity(&mut self, group: &mut Group, now: u64) {
        if now.saturating_sub(self.last_decay) <= DECAY_PERIOD {
            return;
        }
        self.last_decay = now;

        for conn in &mut group.conns {
            conn.update_capacity_estimate(now);
            conn.bytes_sent /= 2;
            conn.track_health(now);
        }

        tracing::debug!(
            group = %group.short_id(),
            "applied bandwidth usage decay and updated capacity estimates"
        );
    }

    /// Indices of uplinks currently eligible for selection. Excluded
    /// uplinks get their failure count clamped back once per wall-clock
    /// 30-second boundary so a transient dropout is not a life sentence.
    fn active_indices(&self, group: &mut Group, now: u64) -> Vec<usize> {
        let mut active = Vec::with_capacity(group.conns.len());

        for (idx, conn) in group.conns.iter_mut().enumerate() {
            if conn.is_active(now) {
                active.push(idx);
            } else if conn.successive_failures >= 3 {
                tracing::warn!(
                    peer = %conn.peer_addr,
                    failures = conn.successive_failures,
                    "connection excluded from load balancing"
                );
                if now % DECAY_PERIOD == 0 {
                    conn.successive_failures = 2;
                    tracing::info!(
                        peer = %conn.peer_addr,
                        "attempting to reintegrate problematic connection"
                    );
                }
            }
        }

        active
    }

    /// Uplinks with in-flight recovery probes that have not been written
    /// off yet.
    fn recovery_indices(group: &Group) -> Vec<usize> {
        group
            .conns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.recovery_attempts > 0 && c.recovery_attempts < 5)
            .map(|(i, _)| i)
            .collect()
    }

    fn utilization(&self, conn: &Conn, now: u64) -> f64 {
        if conn.max_bytes_per_period == 0 {
            return 0.0;
        }
        let estimated_period_usage = conn.bytes_this_period as f64 / self.time_factor(now);
        (estimated_period_usage / conn.max_bytes_per_period as f64).min(UTILIZATION_CAP)
    }

    /// Load-based stage over a non-empty candidate pool.
    fn pick_by_load(&mut self, group: &Group, candidates: &[usize], now: u64) -> usize {
        self.round_robin += 1;

        let mut utilization: Vec<(usize, f64)> = candidates
            .iter()
            .map(|&idx| (idx, self.utilization(&group.conns[idx], now)))
            .collect();

        let any_at_capacity = utilization.iter().any(|&(idx, u)| {
            if u > PRESSURE_THRESHOLD {
                tracing::debug!(
                    peer = %group.conns[idx].peer_addr,
                    "connection at {:.1}% capacity, adjusting distribution",
                    u * 100.0
                );
                true
            } else {
                false
            }
        });

        if any_at_capacity {
            // Rotate over the less-utilized half so the pressured paths
            // get room to drain
            utilization.sort_by(|a, b| a.1.total_cmp(&b.1));
            let pool = (utilization.len() / 2).max(1);
            let (idx, u) = utilization[(self.round_robin % pool as u64) as usize];
            tracing::debug!(
                peer = %group.conns[idx].peer_addr,
                "load balancing: using connection with {:.1}% utilization",
                u * 100.0
            );
            return idx;
        }

        if self.round_robin % 3 == 0 {
            // Every third packet goes to the least-loaded path to pull
            // laggards up
            if let Some(&idx) = candidates
                .iter()
                .min_by_key(|&&idx| group.conns[idx].bytes_sent)
            {
                return idx;
            }
        }

        candidates[(self.round_robin % candidates.len() as u64) as usize]
    }

    /// Periodic debug dump of how traffic is spread over the group.
    fn log_distribution(&mut self, group: &Group, now: u64) {
        if now.saturating_sub(self.last_distribution_log) <= DISTRIBUTION_LOG_PERIOD
            || group.conns.is_empty()
        {
            return;
        }
        self.last_distribution_log = now;

        let total_bytes: u64 = group.conns.iter().map(|c| c.bytes_sent).sum();
        let healthy = group.conns.iter().filter(|c| c.is_active(now)).count();

        if total_bytes == 0 {
            tracing::debug!(group = %group.short_id(), "no bandwidth data available");
            return;
        }

        tracing::debug!("active connections: {}/{}", healthy, group.conns.len());

        for conn in &group.conns {
            let percent = conn.bytes_sent as f64 / total_bytes as f64 * 100.0;
            let capacity_mbps =
                conn.max_bytes_per_period as f64 * 8.0 / (DECAY_PERIOD as f64 * 1_000_000.0);
            tracing::debug!(
                peer = %conn.peer_addr,
                failures = conn.successive_failures,
                "bandwidth: {:.1}% ({:.2} KB) | capacity: {:.2} Mbps | utilization: {:.1}%",
                percent,
                conn.bytes_sent as f64 / 1024.0,
                capacity_mbps,
                self.utilization(conn, now) * 100.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Conn;
    use std::net::SocketAddr;

    fn addr(n: u8) -> SocketAddr {
        format!("10.0.0.{}:4000{}", n, n).parse().unwrap()
    }

    fn group(uplinks: u8, now: u64) -> Group {
        let mut g = Group::new(&[1u8; 16], addr(1), now);
        for n in 1..=uplinks {
            g.conns.push(Conn::new(addr(n), now));
        }
        g
    }

    /// Selector whose decay clock is warm so maintenance does not clobber
    /// hand-set counters.
    fn warm_selector(now: u64, into_period: u64) -> Selector {
        let mut s = Selector::new();
        s.last_decay = now - into_period;
        s
    }

    #[test]
    fn test_empty_group_yields_none() {
        let now = 10_000;
        let mut g = group(0, now);
        let mut s = warm_selector(now, 15);
        assert_eq!(s.pick(&mut g, now), None);
    }

    #[test]
    fn test_saturated_path_rebalances_to_least_utilized() {
        // 15 seconds into the period: time_factor 0.5
        let now = 10_001;
        let mut g = group(2, now);
        let mut s = warm_selector(now, 15);

        for conn in &mut g.conns {
            conn.max_bytes_per_period = 1_000_000;
        }
        g.conns[0].bytes_this_period = 800_000; // u = 1.6
        g.conns[1].bytes_this_period = 100_000; // u = 0.2

        // Bottom half of two candidates is one entry: always the
        // least-utilized uplink
        for _ in 0..5 {
            assert_eq!(s.pick(&mut g, now), Some(1));
        }
    }

    #[test]
    fn test_utilization_is_capped() {
        let now = 10_001;
        let s = warm_selector(now, 30);
        let mut c = Conn::new(addr(1), now);
        c.max_bytes_per_period = 100;
        c.bytes_this_period = 10_000;
        assert_eq!(s.utilization(&c, now), 2.0);

        c.max_bytes_per_period = 0;
        assert_eq!(s.utilization(&c, now), 0.0);
    }

    #[test]
    fn test_round_robin_with_least_loaded_every_third() {
        let now = 10_001;
        let mut g = group(3, now);
        let mut s = warm_selector(now, 5);

        g.conns[0].bytes_sent = 100;
        g.conns[1].bytes_sent = 200;
        g.conns[2].bytes_sent = 50;

        // round_robin pre-increments: calls see counters 1, 2, 3, ...
        assert_eq!(s.pick(&mut g, now), Some(1)); // 1 % 3 = 1
        assert_eq!(s.pick(&mut g, now), Some(2)); // 2 % 3 = 2
        assert_eq!(s.pick(&mut g, now), Some(2)); // 3 % 3 = 0 -> least bytes_sent
        assert_eq!(s.pick(&mut g, now), Some(1)); // 4 % 3 = 1
    }

    #[test]
    fn test_recovery_pool_used_when_no_active() {
        let now = 10_001;
        let mut g = group(2, now);
        let mut s = warm_selector(now, 5);

        // Both timed out; one has probes in flight
        g.conns[0].last_rcvd = now - 20;
        g.conns[1].last_rcvd = now - 20;
        g.conns[1].recovery_attempts = 2;

        let picked = s.pick(&mut g, now).unwrap();
        assert_eq!(picked, 1);
        // Being selected clears the recovery counter
        assert_eq!(g.conns[1].recovery_attempts, 0);
    }

    #[test]
    fn test_fallback_most_recently_alive() {
        let now = 10_001;
        let mut g = group(3, now);
        let mut s = warm_selector(now, 5);

        for conn in &mut g.conns {
            conn.last_rcvd = now - 30;
            conn.recovery_attempts = 5; // written off
        }
        g.conns[1].last_rcvd = now - 25;

        assert_eq!(s.pick(&mut g, now), Some(1));
    }

    #[test]
    fn test_excluded_conn_rehabilitated_on_period_boundary() {
        // A wall-clock second divisible by 30
        let now = 10_020;
        assert_eq!(now % DECAY_PERIOD, 0);

        let mut g = group(2, now);
        let mut s = warm_selector(now, 5);
        g.conns[0].successive_failures = 3;

        let picked = s.pick(&mut g, now);
        assert_eq!(picked, Some(1));
        // Clamped back to 2: eligible again on the next pass
        assert_eq!(g.conns[0].successive_failures, 2);
        assert!(g.conns[0].is_active(now));
    }

    #[test]
    fn test_maintenance_decays_sent_bytes_once_per_period() {
        let now = 10_001;
        let mut g = group(1, now);
        let mut s = Selector::new();
        s.last_decay = now - 31;

        g.conns[0].bytes_sent = 1000;
        g.conns[0].bytes_this_period = 400;

        s.pick(&mut g, now);
        assert_eq!(g.conns[0].bytes_sent, 500);
        assert_eq!(g.conns[0].max_bytes_per_period, 400);
        assert_eq!(g.conns[0].bytes_this_period, 0);

        // Within the same period nothing decays again
        g.conns[0].bytes_sent = 500;
        s.pick(&mut g, now + 1);
        assert_eq!(g.conns[0].bytes_sent, 500);
    }
}
