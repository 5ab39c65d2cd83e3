//! Adaptive Data Rate: per-link spreading-factor recommendation and
//! negotiation, plus the network scan (§4.D).

use heapless::Vec;

use crate::address::NodeAddress;
use crate::time::{Duration, Instant};

/// Lowest (fastest) and highest (longest-range) spreading factors.
pub const MIN_SF: u8 = 7;
pub const MAX_SF: u8 = 12;

/// Hysteresis margin (dB) required to recommend a lower (faster) SF.
pub const HYSTERESIS_DB: i16 = 5;

/// Minimum samples in the rolling window before a recommendation is made.
pub const MIN_SAMPLES: usize = 2;

/// Default per-SF network-scan dwell time.
pub const DEFAULT_SCAN_DWELL: Duration = Duration::from_secs(5);

/// `(rssi_threshold, snr_threshold)` a link must clear to run at a given SF.
/// Indexed by `sf - MIN_SF`.
const THRESHOLDS: [(i16, i16); 6] = [
    (-70, 8),   // SF7
    (-85, 5),   // SF8
    (-100, 0),  // SF9
    (-110, -5), // SF10
    (-120, -10), // SF11
    (-140, -15), // SF12
];

fn thresholds_for(sf: u8) -> (i16, i16) {
    THRESHOLDS[usize::from(sf - MIN_SF)]
}

/// Chooses the lowest SF whose thresholds are both met by `(rssi, snr)`,
/// falling back to [`MAX_SF`] if none qualify.
fn lowest_qualifying_sf(rssi: i16, snr: i16) -> u8 {
    for sf in MIN_SF..=MAX_SF {
        let (rssi_thresh, snr_thresh) = thresholds_for(sf);
        if rssi >= rssi_thresh && snr >= snr_thresh {
            return sf;
        }
    }
    MAX_SF
}

/// Bounded rolling window of recent signal samples for one link.
#[derive(Clone, Default)]
struct Window {
    rssi_sum: i32,
    snr_sum: i32,
    count: u32,
}

impl Window {
    fn push(&mut self, rssi: i16, snr: i16) {
        const MAX_WEIGHT: u32 = 16;
        if self.count >= MAX_WEIGHT {
            let avg_rssi = self.rssi_sum / self.count as i32;
            let avg_snr = self.snr_sum / self.count as i32;
            self.rssi_sum -= avg_rssi;
            self.snr_sum -= avg_snr;
            self.count -= 1;
        }
        self.rssi_sum += i32::from(rssi);
        self.snr_sum += i32::from(snr);
        self.count += 1;
    }

    fn averages(&self) -> Option<(i16, i16)> {
        if (self.count as usize) < MIN_SAMPLES {
            return None;
        }
        Some((
            (self.rssi_sum / self.count as i32) as i16,
            (self.snr_sum / self.count as i32) as i16,
        ))
    }
}

/// Per-peer ADR negotiation state.
#[derive(Clone)]
pub struct LinkState {
    pub peer: NodeAddress,
    window: Window,
    pub current_sf: u8,
    pub recommended_sf: u8,
    pub peer_advertised_sf: Option<u8>,
    pub negotiated_sf: u8,
    pub successes: u32,
    pub attempts: u32,
    has_recommended: bool,
}

impl LinkState {
    fn new(peer: NodeAddress) -> Self {
        LinkState {
            peer,
            window: Window::default(),
            current_sf: MAX_SF,
            recommended_sf: MAX_SF,
            peer_advertised_sf: None,
            negotiated_sf: MAX_SF,
            successes: 0,
            attempts: 0,
            has_recommended: false,
        }
    }

    /// Folds a new signal sample into the rolling window and recomputes
    /// `recommended_sf`, applying the hysteresis rule in §4.D step 3.
    ///
    /// The very first recommendation for a link (before the window holds
    /// enough samples to have recommended anything) is taken directly:
    /// hysteresis exists to prevent oscillation around a threshold once a
    /// recommendation is established, not to delay the initial settle.
    pub fn observe(&mut self, rssi: i16, snr: i16) {
        self.window.push(rssi, snr);
        let Some((avg_rssi, avg_snr)) = self.window.averages() else {
            return;
        };
        let candidate = lowest_qualifying_sf(avg_rssi, avg_snr);
        if !self.has_recommended {
            self.recommended_sf = candidate;
            self.has_recommended = true;
        } else if candidate < self.recommended_sf {
            // Going faster: require a safety margin above the new threshold.
            let (rssi_thresh, _) = thresholds_for(candidate);
            if avg_rssi >= rssi_thresh + HYSTERESIS_DB {
                self.recommended_sf = candidate;
            }
        } else {
            // Going slower (or unchanged): switch immediately.
            self.recommended_sf = candidate;
        }
        self.renegotiate();
    }

    /// Records the peer's advertised preferred SF and renegotiates.
    pub fn set_peer_advertised(&mut self, peer_sf: u8) {
        self.peer_advertised_sf = Some(peer_sf);
        self.renegotiate();
    }

    fn renegotiate(&mut self) {
        self.negotiated_sf = match self.peer_advertised_sf {
            Some(peer_sf) => self.recommended_sf.max(peer_sf),
            None => (self.recommended_sf + 1).min(MAX_SF),
        };
        self.current_sf = self.negotiated_sf;
    }

    pub fn record_attempt(&mut self, success: bool) {
        self.attempts = self.attempts.saturating_add(1);
        if success {
            self.successes = self.successes.saturating_add(1);
        }
    }
}

/// Bounded per-link ADR state table.
pub const MAX_LINKS: usize = 16;

pub struct AdrTable {
    links: Vec<LinkState, MAX_LINKS>,
    pub enabled: bool,
    /// Network-wide SF applied by the last completed [`NetworkScan`], used
    /// as the starting point for links with no per-peer history yet.
    pub network_sf: u8,
}

impl AdrTable {
    pub fn new() -> Self {
        AdrTable {
            links: Vec::new(),
            enabled: true,
            network_sf: MAX_SF,
        }
    }

    fn get_or_insert(&mut self, peer: NodeAddress) -> &mut LinkState {
        if let Some(idx) = self.links.iter().position(|l| l.peer == peer) {
            return &mut self.links[idx];
        }
        if self.links.push(LinkState::new(peer)).is_err() {
            // Table full: reuse the first slot rather than drop the sample.
            self.links[0] = LinkState::new(peer);
            return &mut self.links[0];
        }
        self.links.last_mut().expect("just pushed")
    }

    pub fn observe(&mut self, peer: NodeAddress, rssi: i16, snr: i16) {
        self.get_or_insert(peer).observe(rssi, snr);
    }

    pub fn set_peer_advertised(&mut self, peer: NodeAddress, peer_sf: u8) {
        self.get_or_insert(peer).set_peer_advertised(peer_sf);
    }

    pub fn get(&self, peer: NodeAddress) -> Option<&LinkState> {
        self.links.iter().find(|l| l.peer == peer)
    }

    /// Applies the winning SF of a completed [`NetworkScan`].
    pub fn apply_scan_result(&mut self, sf: u8) {
        self.network_sf = sf;
    }
}

/// Outcome of a completed network scan: counts of frames heard per SF.
#[derive(Copy, Clone, Default)]
pub struct ScanResult {
    heard_per_sf: [u32; (MAX_SF - MIN_SF + 1) as usize],
    best_rssi_per_sf: [i16; (MAX_SF - MIN_SF + 1) as usize],
}

impl ScanResult {
    pub fn new() -> Self {
        ScanResult {
            heard_per_sf: [0; 6],
            best_rssi_per_sf: [i16::MIN; 6],
        }
    }

    pub fn record(&mut self, sf: u8, rssi: i16) {
        let idx = usize::from(sf - MIN_SF);
        self.heard_per_sf[idx] += 1;
        if rssi > self.best_rssi_per_sf[idx] {
            self.best_rssi_per_sf[idx] = rssi;
        }
    }

    /// The SF with the most frames heard, tie-broken by best RSSI.
    pub fn best_sf(&self) -> u8 {
        let mut best_idx = 0usize;
        for idx in 1..self.heard_per_sf.len() {
            let better_count = self.heard_per_sf[idx] > self.heard_per_sf[best_idx];
            let tie_better_rssi = self.heard_per_sf[idx] == self.heard_per_sf[best_idx]
                && self.best_rssi_per_sf[idx] > self.best_rssi_per_sf[best_idx];
            if better_count || tie_better_rssi {
                best_idx = idx;
            }
        }
        MIN_SF + best_idx as u8
    }
}

/// Drives an in-progress network scan across SF7..SF12 (§4.D): dwells on
/// each spreading factor in turn, tallying frames heard via
/// [`ScanResult::record`], then hands back the winning SF once every
/// factor has been sampled. The scheduler advances this once per tick
/// rather than blocking for the dwell duration.
pub struct NetworkScan {
    result: ScanResult,
    sf: u8,
    dwell_start: Instant,
}

impl NetworkScan {
    pub fn start(now: Instant) -> Self {
        NetworkScan {
            result: ScanResult::new(),
            sf: MIN_SF,
            dwell_start: now,
        }
    }

    /// The spreading factor currently being dwelt on; the radio must be
    /// tuned to this SF for the scan's tallies to mean anything.
    pub fn current_sf(&self) -> u8 {
        self.sf
    }

    /// Tallies a frame heard while dwelling on the current SF.
    pub fn record(&mut self, rssi: i16) {
        self.result.record(self.sf, rssi);
    }

    /// Advances the dwell once `DEFAULT_SCAN_DWELL` has elapsed on the
    /// current SF, returning the winning SF once every factor has been
    /// dwelt on.
    pub fn advance(&mut self, now: Instant) -> Option<u8> {
        if now.duration_since(self.dwell_start) < DEFAULT_SCAN_DWELL {
            return None;
        }
        if self.sf == MAX_SF {
            return Some(self.result.best_sf());
        }
        self.sf += 1;
        self.dwell_start = now;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_link_recommends_sf7() {
        let mut link = LinkState::new(NodeAddress::from_u32(1));
        link.observe(-60, 10);
        link.observe(-60, 10);
        assert_eq!(link.recommended_sf, MIN_SF);
    }

    #[test]
    fn weak_link_recommends_higher_sf() {
        let mut link = LinkState::new(NodeAddress::from_u32(1));
        link.observe(-108, -3);
        link.observe(-108, -3);
        assert_eq!(link.recommended_sf, 10);
    }

    #[test]
    fn negotiation_takes_max_of_both_recommendations() {
        let mut a = LinkState::new(NodeAddress::from_u32(2));
        a.observe(-60, 10);
        a.observe(-60, 10);
        assert_eq!(a.recommended_sf, MIN_SF);
        a.set_peer_advertised(10);
        assert_eq!(a.negotiated_sf, 10);
    }

    #[test]
    fn idempotent_observe_is_stable() {
        let mut link = LinkState::new(NodeAddress::from_u32(3));
        link.observe(-90, -2);
        link.observe(-90, -2);
        let first = link.recommended_sf;
        link.observe(-90, -2);
        assert_eq!(link.recommended_sf, first);
    }

    #[test]
    fn hysteresis_blocks_premature_speedup() {
        let mut link = LinkState::new(NodeAddress::from_u32(4));
        // Establish a baseline recommendation of SF9.
        link.observe(-95, 2);
        link.observe(-95, 2);
        assert_eq!(link.recommended_sf, 9);

        // Signal improves to just barely qualify for SF8, but not by the
        // required hysteresis margin: recommendation must not speed up.
        for _ in 0..20 {
            link.observe(-85, 5);
        }
        assert_eq!(link.recommended_sf, 9);

        // Signal improves comfortably past the SF7 threshold with margin
        // to spare: recommendation now speeds up.
        for _ in 0..100 {
            link.observe(-50, 10);
        }
        assert_eq!(link.recommended_sf, MIN_SF);
    }

    #[test]
    fn scan_result_breaks_ties_by_rssi() {
        let mut scan = ScanResult::new();
        scan.record(7, -80);
        scan.record(9, -80);
        scan.record(9, -60);
        assert_eq!(scan.best_sf(), 9);
    }

    #[test]
    fn network_scan_dwells_on_each_sf_before_completing() {
        let mut now = Instant::from_raw_millis(0);
        let mut scan = NetworkScan::start(now);
        assert_eq!(scan.current_sf(), MIN_SF);

        assert!(scan.advance(now).is_none());
        assert_eq!(scan.current_sf(), MIN_SF);

        for sf in MIN_SF..MAX_SF {
            now = now + DEFAULT_SCAN_DWELL;
            assert_eq!(scan.advance(now), None);
            assert_eq!(scan.current_sf(), sf + 1);
        }
        now = now + DEFAULT_SCAN_DWELL;
        assert_eq!(scan.advance(now), Some(MAX_SF));
    }

    #[test]
    fn network_scan_picks_sf_with_most_frames_heard() {
        let mut now = Instant::from_raw_millis(0);
        let mut scan = NetworkScan::start(now);
        scan.record(-90);
        scan.record(-90);
        for _ in MIN_SF..MAX_SF {
            now = now + DEFAULT_SCAN_DWELL;
            assert_eq!(scan.advance(now), None);
        }
        now = now + DEFAULT_SCAN_DWELL;
        assert_eq!(scan.advance(now), Some(MIN_SF));
    }
}
