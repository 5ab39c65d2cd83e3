//! Neighbor Table: per-peer, multi-interface link state (§4.C).

use bitflags::bitflags;
use heapless::Vec;

use crate::address::NodeAddress;
use crate::time::{Duration, Instant};

/// Default inactivity timeout after which a per-interface record expires.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Bounded number of tracked neighbors.
pub const MAX_NEIGHBORS: usize = 16;

bitflags! {
    /// Interfaces a neighbor has been heard on.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct InterfaceMask: u8 {
        const RADIO      = 0b0001;
        const SHORT_RANGE = 0b0010;
        const LOCAL_NET  = 0b0100;
        const WIDE_NET   = 0b1000;
    }
}

/// Priority order for preferred-interface tie-breaks, highest first.
/// Not signal-quality-based: a fixed order per §4.C.
const PREFERENCE_ORDER: [InterfaceMask; 4] = [
    InterfaceMask::RADIO,
    InterfaceMask::SHORT_RANGE,
    InterfaceMask::LOCAL_NET,
    InterfaceMask::WIDE_NET,
];

/// Per-interface link-quality sample.
#[derive(Copy, Clone, Debug, Default)]
pub struct LinkSample {
    pub last_seen: Option<Instant>,
    pub last_rssi: i16,
    pub last_snr: i16,
    pub packet_count: u32,
}

/// A tracked peer, with one [`LinkSample`] per bit of [`InterfaceMask`].
#[derive(Clone, Debug)]
pub struct NeighborEntry {
    pub addr: NodeAddress,
    pub interfaces: InterfaceMask,
    samples: [LinkSample; 4],
}

impl NeighborEntry {
    fn new(addr: NodeAddress) -> Self {
        NeighborEntry {
            addr,
            interfaces: InterfaceMask::empty(),
            samples: [LinkSample::default(); 4],
        }
    }

    fn sample_mut(&mut self, iface: InterfaceMask) -> &mut LinkSample {
        let idx = PREFERENCE_ORDER
            .iter()
            .position(|p| *p == iface)
            .expect("iface must be a single known bit");
        &mut self.samples[idx]
    }

    fn sample(&self, iface: InterfaceMask) -> &LinkSample {
        let idx = PREFERENCE_ORDER
            .iter()
            .position(|p| *p == iface)
            .expect("iface must be a single known bit");
        &self.samples[idx]
    }

    /// The most recent activity across any interface.
    fn newest_activity(&self) -> Option<Instant> {
        self.samples
            .iter()
            .filter_map(|s| s.last_seen)
            .max_by_key(Instant::raw_millis)
    }

    /// Highest-priority interface with a still-live sample.
    pub fn preferred_interface(&self) -> Option<InterfaceMask> {
        PREFERENCE_ORDER
            .into_iter()
            .find(|iface| self.interfaces.contains(*iface))
    }

    /// Signal-quality blend for `iface`, or `None` if never observed on it.
    pub fn quality(&self, iface: InterfaceMask) -> Option<u8> {
        if !self.interfaces.contains(iface) {
            return None;
        }
        let sample = self.sample(iface);
        Some(blend_quality(sample.last_rssi, sample.last_snr))
    }
}

/// Blends RSSI in `[-100, -50]` dBm and SNR in `[-10, +10]` dB into a
/// `[0, 255]` quality score, clamping inputs outside those ranges.
pub fn blend_quality(rssi: i16, snr: i16) -> u8 {
    let rssi_clamped = rssi.clamp(-100, -50);
    let snr_clamped = snr.clamp(-10, 10);
    let rssi_frac = (rssi_clamped + 100) as f32 / 50.0; // 0.0..=1.0
    let snr_frac = (snr_clamped + 10) as f32 / 20.0; // 0.0..=1.0
    let blended = (rssi_frac + snr_frac) / 2.0;
    (blended * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Fixed-size slot table of known neighbors.
#[derive(Default)]
pub struct NeighborTable {
    entries: Vec<NeighborEntry, MAX_NEIGHBORS>,
}

impl NeighborTable {
    pub fn new() -> Self {
        NeighborTable { entries: Vec::new() }
    }

    /// Updates or inserts a neighbor record for a frame heard on `iface`.
    ///
    /// On insertion when the table is full, evicts the entry whose
    /// most-recent-activity timestamp is oldest.
    pub fn observe(&mut self, peer: NodeAddress, iface: InterfaceMask, rssi: i16, snr: i16, now: Instant) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.addr == peer) {
            entry.interfaces.insert(iface);
            let sample = entry.sample_mut(iface);
            sample.last_seen = Some(now);
            sample.last_rssi = rssi;
            sample.last_snr = snr;
            sample.packet_count = sample.packet_count.saturating_add(1);
            return;
        }

        let mut entry = NeighborEntry::new(peer);
        entry.interfaces.insert(iface);
        let sample = entry.sample_mut(iface);
        sample.last_seen = Some(now);
        sample.last_rssi = rssi;
        sample.last_snr = snr;
        sample.packet_count = 1;

        if self.entries.push(entry).is_err() {
            if let Some(victim_idx) = self.oldest_activity_index() {
                self.entries[victim_idx] = NeighborEntry::new(peer);
                let victim = &mut self.entries[victim_idx];
                victim.interfaces.insert(iface);
                let sample = victim.sample_mut(iface);
                sample.last_seen = Some(now);
                sample.last_rssi = rssi;
                sample.last_snr = snr;
                sample.packet_count = 1;
            }
        }
    }

    fn oldest_activity_index(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.newest_activity().map(Instant::raw_millis).unwrap_or(0))
            .map(|(idx, _)| idx)
    }

    pub fn is_neighbor(&self, peer: NodeAddress) -> bool {
        self.entries.iter().any(|e| e.addr == peer)
    }

    pub fn get(&self, peer: NodeAddress) -> Option<&NeighborEntry> {
        self.entries.iter().find(|e| e.addr == peer)
    }

    pub fn iterate(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.entries.iter()
    }

    /// Drops per-interface records inactive for longer than [`DEFAULT_TIMEOUT`],
    /// then drops any entry left with no interfaces.
    pub fn expire(&mut self, now: Instant) {
        for entry in self.entries.iter_mut() {
            for (idx, iface) in PREFERENCE_ORDER.iter().enumerate() {
                let sample = &mut entry.samples[idx];
                let expired = match sample.last_seen {
                    Some(seen) => now.duration_since(seen) > DEFAULT_TIMEOUT,
                    None => false,
                };
                if expired {
                    entry.interfaces.remove(*iface);
                    *sample = LinkSample::default();
                }
            }
        }
        self.entries.retain(|e| !e.interfaces.is_empty());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_then_is_neighbor() {
        let mut table = NeighborTable::new();
        let peer = NodeAddress::from_u32(1);
        table.observe(peer, InterfaceMask::RADIO, -70, 5, Instant::from_raw_millis(0));
        assert!(table.is_neighbor(peer));
    }

    #[test]
    fn expire_drops_inactive_entries() {
        let mut table = NeighborTable::new();
        let peer = NodeAddress::from_u32(1);
        table.observe(peer, InterfaceMask::RADIO, -70, 5, Instant::from_raw_millis(0));
        table.expire(Instant::from_raw_millis(0) + DEFAULT_TIMEOUT + Duration::from_millis(1));
        assert!(!table.is_neighbor(peer));
    }

    #[test]
    fn preferred_interface_follows_fixed_priority() {
        let mut table = NeighborTable::new();
        let peer = NodeAddress::from_u32(1);
        table.observe(peer, InterfaceMask::WIDE_NET, -60, 9, Instant::from_raw_millis(0));
        table.observe(peer, InterfaceMask::RADIO, -95, -9, Instant::from_raw_millis(0));
        let entry = table.get(peer).unwrap();
        assert_eq!(entry.preferred_interface(), Some(InterfaceMask::RADIO));
    }

    #[test]
    fn quality_blend_is_clamped_and_scaled() {
        assert_eq!(blend_quality(-50, 10), 255);
        assert_eq!(blend_quality(-100, -10), 0);
    }

    #[test]
    fn eviction_replaces_oldest_activity_when_full() {
        let mut table = NeighborTable::new();
        for i in 0..MAX_NEIGHBORS as u32 {
            table.observe(
                NodeAddress::from_u32(i + 1),
                InterfaceMask::RADIO,
                -70,
                5,
                Instant::from_raw_millis(i),
            );
        }
        assert_eq!(table.len(), MAX_NEIGHBORS);
        let newcomer = NodeAddress::from_u32(999);
        table.observe(
            newcomer,
            InterfaceMask::RADIO,
            -70,
            5,
            Instant::from_raw_millis(MAX_NEIGHBORS as u32 + 10),
        );
        assert_eq!(table.len(), MAX_NEIGHBORS);
        assert!(table.is_neighbor(newcomer));
        assert!(!table.is_neighbor(NodeAddress::from_u32(1)));
    }
}
