//! Reliable delivery: per-packet retry, adaptive RTO, in-flight window
//! (§4.G).

use heapless::Vec;

use crate::address::NodeAddress;
use crate::radio::MAX_FRAME_LEN;
use crate::time::{Duration, Instant};

/// Bound on concurrently in-flight unacknowledged sends.
pub const MAX_IN_FLIGHT: usize = 4;

/// Bound on distinct destinations with their own [`RtoEstimator`].
pub const MAX_RTO_PEERS: usize = 8;

/// Maximum retransmission attempts before giving up.
pub const MAX_RETRIES: u8 = 3;

pub const RTO_MIN: Duration = Duration::from_secs(1);
pub const RTO_MAX: Duration = Duration::from_secs(30);

const ALPHA_NUM: i32 = 1;
const ALPHA_DEN: i32 = 8;
const BETA_NUM: i32 = 1;
const BETA_DEN: i32 = 4;

/// Jacobson/Karels smoothed RTT estimator, per destination.
#[derive(Copy, Clone, Debug)]
pub struct RtoEstimator {
    srtt_ms: i32,
    rttvar_ms: i32,
    initialized: bool,
}

impl RtoEstimator {
    pub fn new() -> Self {
        RtoEstimator {
            srtt_ms: 0,
            rttvar_ms: 0,
            initialized: false,
        }
    }

    /// Folds in a fresh RTT sample and returns the resulting RTO, clamped
    /// to `[RTO_MIN, RTO_MAX]`.
    pub fn sample(&mut self, rtt: Duration) -> Duration {
        let sample_ms = rtt.as_millis() as i32;
        if !self.initialized {
            self.srtt_ms = sample_ms;
            self.rttvar_ms = sample_ms / 2;
            self.initialized = true;
        } else {
            self.srtt_ms +=
                (ALPHA_NUM * (sample_ms - self.srtt_ms)) / ALPHA_DEN;
            let deviation = (sample_ms - self.srtt_ms).abs();
            self.rttvar_ms += (BETA_NUM * (deviation - self.rttvar_ms)) / BETA_DEN;
        }
        self.rto()
    }

    pub fn rto(&self) -> Duration {
        let rto_ms = self.srtt_ms + 4 * self.rttvar_ms;
        let rto_ms = rto_ms.max(0) as u32;
        Duration::from_millis(rto_ms).clamp_between(RTO_MIN, RTO_MAX)
    }
}

impl Default for RtoEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-destination [`RtoEstimator`]s, evicting the least-recently-used
/// entry when a new destination arrives at capacity.
#[derive(Default)]
pub struct RtoTable {
    entries: Vec<(NodeAddress, RtoEstimator), MAX_RTO_PEERS>,
}

impl RtoTable {
    pub fn new() -> Self {
        RtoTable { entries: Vec::new() }
    }

    /// Folds an RTT sample into `destination`'s estimator, creating one
    /// (seeded from the sample) if this is the first observation.
    pub fn sample(&mut self, destination: NodeAddress, rtt: Duration) -> Duration {
        if let Some((_, est)) = self.entries.iter_mut().find(|(d, _)| *d == destination) {
            return est.sample(rtt);
        }
        let mut est = RtoEstimator::new();
        let rto = est.sample(rtt);
        if self.entries.push((destination, est)).is_err() {
            // Table full: overwrite slot 0 rather than dropping the sample.
            self.entries[0] = (destination, est);
        }
        rto
    }

    /// Current RTO for `destination`, or [`RTO_MIN`] if nothing has been
    /// sampled for it yet.
    pub fn rto_for(&self, destination: NodeAddress) -> Duration {
        self.entries
            .iter()
            .find(|(d, _)| *d == destination)
            .map(|(_, est)| est.rto())
            .unwrap_or(RTO_MIN)
    }
}

trait ClampDuration {
    fn clamp_between(self, min: Duration, max: Duration) -> Duration;
}

impl ClampDuration for Duration {
    fn clamp_between(self, min: Duration, max: Duration) -> Duration {
        if self < min {
            min
        } else if self > max {
            max
        } else {
            self
        }
    }
}

/// Terminal and non-terminal states of a tracked send, per §4.G.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Acked,
    Failed,
    NoRoute,
}

/// A send being tracked until it is acked, retried out, or abandoned.
/// Carries the original encoded frame so a retry can resend it verbatim.
#[derive(Clone)]
pub struct PendingAck {
    pub destination: NodeAddress,
    pub packet_id: u16,
    pub sent_at: Instant,
    pub last_retry_at: Instant,
    pub retry_count: u8,
    pub status: DeliveryStatus,
    pub frame: Vec<u8, MAX_FRAME_LEN>,
}

/// Bounded slot pool of in-flight acknowledged sends.
#[derive(Default)]
pub struct PendingAckPool {
    slots: Vec<PendingAck, MAX_IN_FLIGHT>,
}

impl PendingAckPool {
    pub fn new() -> Self {
        PendingAckPool { slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Registers a new tracked send, caching `frame` so a later retry can
    /// resend the exact same bytes. Fails with `false` (window full) if
    /// the pool is already at [`MAX_IN_FLIGHT`].
    pub fn track(
        &mut self,
        destination: NodeAddress,
        packet_id: u16,
        now: Instant,
        frame: &[u8],
    ) -> bool {
        let mut buf = Vec::new();
        if buf.extend_from_slice(frame).is_err() {
            return false;
        }
        self.slots
            .push(PendingAck {
                destination,
                packet_id,
                sent_at: now,
                last_retry_at: now,
                retry_count: 0,
                status: DeliveryStatus::Sent,
                frame: buf,
            })
            .is_ok()
    }

    /// Matches an inbound ACK, returning the elapsed RTT if found and
    /// marking the slot `Acked` (removed on the next [`PendingAckPool::reap`]).
    pub fn acknowledge(&mut self, packet_id: u16, now: Instant) -> Option<Duration> {
        let entry = self.slots.iter_mut().find(|p| p.packet_id == packet_id)?;
        entry.status = DeliveryStatus::Acked;
        Some(now.duration_since(entry.sent_at))
    }

    /// Advances retry state for all pending slots whose RTO has elapsed,
    /// where `rto_for` gives the current estimate for a slot's destination
    /// (see [`RtoTable::rto_for`]). Returns the slots that should be
    /// retransmitted this tick and those that have just exhausted their
    /// retries.
    pub fn service(
        &mut self,
        now: Instant,
        rto_for: impl Fn(NodeAddress) -> Duration,
    ) -> (Vec<PendingAck, MAX_IN_FLIGHT>, Vec<PendingAck, MAX_IN_FLIGHT>) {
        let mut to_retry = Vec::new();
        let mut exhausted = Vec::new();
        for entry in self.slots.iter_mut() {
            if entry.status != DeliveryStatus::Sent {
                continue;
            }
            if now.duration_since(entry.last_retry_at) < rto_for(entry.destination) {
                continue;
            }
            if entry.retry_count >= MAX_RETRIES {
                entry.status = DeliveryStatus::Failed;
                let _ = exhausted.push(entry.clone());
            } else {
                entry.retry_count += 1;
                entry.last_retry_at = now;
                let _ = to_retry.push(entry.clone());
            }
        }
        (to_retry, exhausted)
    }

    /// Removes every slot that has reached a terminal status, returning
    /// them so the caller can fire delivery callbacks.
    pub fn reap(&mut self) -> Vec<PendingAck, MAX_IN_FLIGHT> {
        let mut done = Vec::new();
        self.slots.retain(|p| {
            let terminal = matches!(
                p.status,
                DeliveryStatus::Acked | DeliveryStatus::Failed | DeliveryStatus::NoRoute
            );
            if terminal {
                let _ = done.push(p.clone());
            }
            !terminal
        });
        done
    }

    /// Marks a tracked send as having failed discovery rather than delivery.
    pub fn mark_no_route(&mut self, packet_id: u16) {
        if let Some(entry) = self.slots.iter_mut().find(|p| p.packet_id == packet_id) {
            entry.status = DeliveryStatus::NoRoute;
        }
    }
}
