//! Hybrid TDMA/CSMA medium access and time-source election (§4.E).

use crate::payload::TimeSourceKind;
use crate::time::{Duration, Instant};

/// Number of slots per TDMA frame.
pub const SLOTS_PER_FRAME: u16 = 16;

/// Default slot duration.
pub const SLOT_DURATION: Duration = Duration::from_millis(200);

/// Maximum carrier-sense busy observations before reporting failure.
pub const MAX_BACKOFF_ATTEMPTS: u8 = 5;

/// Cap on the exponential backoff shift.
pub const MAX_BACKOFF_SHIFT: u8 = 5;

/// Base slot duration used to scale CSMA backoff.
pub const BASE_SLOT_MS: u32 = 20;

/// Time quality below which a `TDMA_SYNCED` node falls back to CSMA.
pub const TIME_QUALITY_MAX_AGE: Duration = Duration::from_secs(60);
pub const TIME_QUALITY_MAX_STRATUM: u8 = 8;

/// MAC operating mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MacMode {
    CsmaOnly,
    TdmaSynced,
}

/// A node's current notion of the authoritative time source.
#[derive(Copy, Clone, Debug)]
pub struct TimeSource {
    pub kind: TimeSourceKind,
    pub stratum: u8,
    pub acquired_at: Instant,
}

impl TimeSource {
    /// Whether `remote` should be adopted in place of `self`, per §4.E:
    /// strictly better `(kind, stratum)`, or equal and fresher.
    fn prefers(&self, remote_kind: TimeSourceKind, remote_stratum: u8, now: Instant) -> bool {
        let remote_rank = (remote_kind, remote_stratum);
        let own_rank = (self.kind, self.stratum);
        if remote_rank < own_rank {
            return true;
        }
        remote_rank == own_rank && now.duration_since(self.acquired_at) > Duration::ZERO
    }

    fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.acquired_at) > TIME_QUALITY_MAX_AGE
            || self.stratum > TIME_QUALITY_MAX_STRATUM
    }
}

/// Result of a transmit-gate evaluation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GateResult {
    /// Transmit immediately (own TDMA slot).
    Go,
    /// Carrier sensed idle: transmit via CSMA.
    GoCsma,
    /// Carrier busy: back off for this duration before retrying.
    Backoff(Duration),
    /// Busy for `MAX_BACKOFF_ATTEMPTS` attempts in a row.
    Failed,
}

/// The MAC's mutable state, owned by the scheduler.
pub struct MacState {
    pub mode: MacMode,
    pub frame_counter: u32,
    pub slot_counter: u16,
    pub own_slot: Option<u16>,
    pub time_source: Option<TimeSource>,
    pub time_parent: Option<crate::address::NodeAddress>,
    backoff_attempts: u8,
}

impl MacState {
    pub fn new() -> Self {
        MacState {
            mode: MacMode::CsmaOnly,
            frame_counter: 0,
            slot_counter: 0,
            own_slot: None,
            time_source: None,
            time_parent: None,
            backoff_attempts: 0,
        }
    }

    /// Advances the slot/frame counters by one tick's worth of elapsed
    /// time. Called once per scheduler tick while `TdmaSynced`.
    pub fn advance(&mut self, elapsed: Duration) {
        let slots_elapsed = elapsed.as_millis() / SLOT_DURATION.as_millis().max(1);
        for _ in 0..slots_elapsed {
            self.slot_counter += 1;
            if self.slot_counter >= SLOTS_PER_FRAME {
                self.slot_counter = 0;
                self.frame_counter = self.frame_counter.wrapping_add(1);
            }
        }
    }

    /// Re-evaluates `mode` against the current time source's freshness.
    pub fn reassess_mode(&mut self, now: Instant) {
        self.mode = match &self.time_source {
            Some(source) if !source.is_stale(now) => MacMode::TdmaSynced,
            _ => MacMode::CsmaOnly,
        };
    }

    /// Considers adopting a time source announced by a peer, applying the
    /// election rule in §4.E (hop-count derives our own stratum as
    /// `remote.stratum + 1`).
    pub fn consider_remote_time(
        &mut self,
        from: crate::address::NodeAddress,
        remote_kind: TimeSourceKind,
        remote_stratum: u8,
        now: Instant,
    ) {
        let should_adopt = match &self.time_source {
            Some(current) => current.prefers(remote_kind, remote_stratum, now),
            None => true,
        };
        if should_adopt {
            self.time_source = Some(TimeSource {
                kind: remote_kind,
                stratum: remote_stratum.saturating_add(1),
                acquired_at: now,
            });
            self.time_parent = Some(from);
            self.reassess_mode(now);
        }
    }

    /// Installs a locally-authoritative time source (GPS fix, host-supplied
    /// UTC), always preferred over a mesh-derived one at the same kind.
    pub fn set_local_time_source(&mut self, kind: TimeSourceKind, now: Instant) {
        self.time_source = Some(TimeSource {
            kind,
            stratum: 0,
            acquired_at: now,
        });
        self.time_parent = None;
        self.reassess_mode(now);
    }

    /// Evaluates the transmit gate for an outbound packet, per §4.E.
    pub fn transmit_gate(&mut self, carrier_busy: bool, rng_jitter: u32) -> GateResult {
        if self.mode == MacMode::TdmaSynced {
            if let Some(own_slot) = self.own_slot {
                if own_slot == self.slot_counter {
                    self.backoff_attempts = 0;
                    return GateResult::Go;
                }
            }
        }

        if !carrier_busy {
            self.backoff_attempts = 0;
            return GateResult::GoCsma;
        }

        self.backoff_attempts = self.backoff_attempts.saturating_add(1);
        if self.backoff_attempts >= MAX_BACKOFF_ATTEMPTS {
            self.backoff_attempts = 0;
            return GateResult::Failed;
        }
        let shift = self.backoff_attempts.min(MAX_BACKOFF_SHIFT);
        let window = BASE_SLOT_MS.saturating_mul(1u32 << shift);
        let backoff_ms = rng_jitter % window.max(1);
        GateResult::Backoff(Duration::from_millis(backoff_ms))
    }
}

impl Default for MacState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeAddress;

    #[test]
    fn adopts_better_remote_time_source() {
        let mut mac = MacState::new();
        let now = Instant::from_raw_millis(0);
        mac.consider_remote_time(NodeAddress::from_u32(1), TimeSourceKind::Gps, 0, now);
        assert_eq!(mac.mode, MacMode::TdmaSynced);
        assert_eq!(mac.time_source.unwrap().stratum, 1);
    }

    #[test]
    fn ignores_worse_remote_time_source() {
        let mut mac = MacState::new();
        let now = Instant::from_raw_millis(0);
        mac.set_local_time_source(TimeSourceKind::Gps, now);
        mac.consider_remote_time(NodeAddress::from_u32(1), TimeSourceKind::Crystal, 5, now);
        assert_eq!(mac.time_source.unwrap().stratum, 0);
    }

    #[test]
    fn falls_back_to_csma_when_time_source_stale() {
        let mut mac = MacState::new();
        let now = Instant::from_raw_millis(0);
        mac.set_local_time_source(TimeSourceKind::Gps, now);
        assert_eq!(mac.mode, MacMode::TdmaSynced);
        let later = now + TIME_QUALITY_MAX_AGE + Duration::from_millis(1);
        mac.reassess_mode(later);
        assert_eq!(mac.mode, MacMode::CsmaOnly);
    }

    #[test]
    fn transmits_immediately_in_own_slot() {
        let mut mac = MacState::new();
        mac.set_local_time_source(TimeSourceKind::Gps, Instant::from_raw_millis(0));
        mac.own_slot = Some(3);
        mac.slot_counter = 3;
        assert_eq!(mac.transmit_gate(true, 0), GateResult::Go);
    }

    #[test]
    fn backs_off_then_fails_after_max_attempts() {
        let mut mac = MacState::new();
        for _ in 0..MAX_BACKOFF_ATTEMPTS - 1 {
            assert!(matches!(mac.transmit_gate(true, 7), GateResult::Backoff(_)));
        }
        assert_eq!(mac.transmit_gate(true, 7), GateResult::Failed);
    }

    #[test]
    fn idle_carrier_clears_backoff_history() {
        let mut mac = MacState::new();
        mac.transmit_gate(true, 1);
        assert_eq!(mac.transmit_gate(false, 1), GateResult::GoCsma);
    }
}
