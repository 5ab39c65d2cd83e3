//! On-demand AODV-style routing (§4.F): route table, discovery, forwarding,
//! deduplication, multi-path scoring and proactive maintenance.

use heapless::Vec;

use crate::address::NodeAddress;
use crate::neighbor::NeighborTable;
use crate::time::{Duration, Instant};

/// Bound on the routing table, per §3.
pub const MAX_ROUTES: usize = 32;

/// Bound on the seen-packet and seen-request caches.
pub const MAX_SEEN: usize = 32;

/// Route entries expire after this long without a refresh.
pub const ROUTE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Fraction-of-timeout age at which an in-use route triggers a HELLO probe.
pub const MAINTENANCE_FRACTION_NUM: u32 = 3;
pub const MAINTENANCE_FRACTION_DEN: u32 = 4;

/// Default safety margin added to the known hop count for unicast TTL.
pub const UNICAST_TTL_MARGIN: u8 = 2;

/// Fixed TTL used for broadcast floods, to bound flood cost.
pub const BROADCAST_TTL: u8 = 5;

/// Lifetime of a seen-request cache entry (route discovery dedup window).
pub const REQUEST_CACHE_LIFETIME: Duration = Duration::from_secs(30);

/// A route to a destination via a specific next hop.
#[derive(Copy, Clone, Debug)]
pub struct RouteEntry {
    pub destination: NodeAddress,
    pub next_hop: NodeAddress,
    pub hop_count: u8,
    pub quality: u8,
    pub last_updated: Instant,
    pub primary: bool,
}

impl RouteEntry {
    /// `quality − hop_count·10`, used to rank multiple routes to the same
    /// destination (§4.F multi-path).
    fn score(&self) -> i32 {
        i32::from(self.quality) - i32::from(self.hop_count) * 10
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
struct SeenPacket {
    source: NodeAddress,
    packet_id: u16,
    seen_at_raw: u32,
}

#[derive(Copy, Clone, PartialEq, Eq)]
struct SeenRequest {
    originator: NodeAddress,
    request_id: u32,
    seen_at_raw: u32,
}

/// Outcome of evaluating an inbound unicast/broadcast DATA packet against
/// the routing table.
#[derive(Debug, PartialEq, Eq)]
pub enum ForwardDecision {
    /// Packet is addressed to this node; deliver locally.
    Deliver,
    /// Forward unchanged destination/next_hop fields supplied.
    Forward { next_hop: NodeAddress },
    /// No route is known; caller should initiate discovery.
    NoRoute,
    /// Already seen; drop silently.
    Duplicate,
}

/// The AODV route table plus the seen-packet/seen-request caches.
pub struct RoutingTable {
    routes: Vec<RouteEntry, MAX_ROUTES>,
    seen_packets: Vec<SeenPacket, MAX_SEEN>,
    seen_requests: Vec<SeenRequest, MAX_SEEN>,
    next_request_id: u32,
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable {
            routes: Vec::new(),
            seen_packets: Vec::new(),
            seen_requests: Vec::new(),
            next_request_id: 1,
        }
    }

    pub fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Inserts or refreshes a route; recomputes which route to
    /// `destination` is primary afterward.
    pub fn install(&mut self, entry: RouteEntry) {
        if let Some(existing) = self
            .routes
            .iter_mut()
            .find(|r| r.destination == entry.destination && r.next_hop == entry.next_hop)
        {
            *existing = entry;
        } else if self.routes.push(entry).is_err() {
            if let Some(idx) = self.oldest_route_index() {
                self.routes[idx] = entry;
            }
        }
        self.recompute_primary(entry.destination);
    }

    fn oldest_route_index(&self) -> Option<usize> {
        self.routes
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| r.last_updated.raw_millis())
            .map(|(idx, _)| idx)
    }

    fn recompute_primary(&mut self, destination: NodeAddress) {
        let mut best_idx = None;
        let mut best_score = i32::MIN;
        for (idx, route) in self.routes.iter().enumerate() {
            if route.destination != destination {
                continue;
            }
            let score = route.score();
            if score > best_score {
                best_score = score;
                best_idx = Some(idx);
            }
        }
        for (idx, route) in self.routes.iter_mut().enumerate() {
            if route.destination == destination {
                route.primary = Some(idx) == best_idx;
            }
        }
    }

    /// The current primary route to `destination`, if any.
    pub fn primary_route(&self, destination: NodeAddress) -> Option<&RouteEntry> {
        self.routes
            .iter()
            .find(|r| r.destination == destination && r.primary)
    }

    /// Promotes the next-best route after a forwarding failure through the
    /// current primary's next hop.
    pub fn promote_next_best(&mut self, destination: NodeAddress, failed_next_hop: NodeAddress) {
        self.routes
            .retain(|r| !(r.destination == destination && r.next_hop == failed_next_hop));
        self.recompute_primary(destination);
    }

    /// Invalidates every route whose next hop is `unreachable_via`, as
    /// triggered by a ROUTE_ERR or unresponsive-neighbor detection.
    pub fn invalidate_via(&mut self, unreachable_via: NodeAddress) {
        let mut affected: Vec<NodeAddress, MAX_ROUTES> = Vec::new();
        self.routes.retain(|r| {
            let hit = r.next_hop == unreachable_via;
            if hit {
                let _ = affected.push(r.destination);
            }
            !hit
        });
        for dest in affected {
            self.recompute_primary(dest);
        }
    }

    pub fn expire(&mut self, now: Instant) {
        self.routes
            .retain(|r| now.duration_since(r.last_updated) <= ROUTE_TIMEOUT);
        self.seen_packets
            .retain(|s| now.duration_since(Instant::from_raw_millis(s.seen_at_raw)) <= REQUEST_CACHE_LIFETIME);
        self.seen_requests
            .retain(|s| now.duration_since(Instant::from_raw_millis(s.seen_at_raw)) <= REQUEST_CACHE_LIFETIME);
    }

    /// Routes whose age exceeds the maintenance fraction of the timeout;
    /// callers HELLO-probe their next hops (§4.F proactive maintenance).
    pub fn routes_needing_maintenance(&self, now: Instant) -> impl Iterator<Item = &RouteEntry> {
        let threshold =
            Duration::from_millis(ROUTE_TIMEOUT.as_millis() / MAINTENANCE_FRACTION_DEN * MAINTENANCE_FRACTION_NUM);
        self.routes
            .iter()
            .filter(move |r| now.duration_since(r.last_updated) >= threshold)
    }

    /// Records `(source, packet_id)` if not already present, returning
    /// whether this is a duplicate (§8 property 2).
    pub fn check_and_record_seen(&mut self, source: NodeAddress, packet_id: u16, now: Instant) -> bool {
        if self
            .seen_packets
            .iter()
            .any(|s| s.source == source && s.packet_id == packet_id)
        {
            return true;
        }
        let record = SeenPacket {
            source,
            packet_id,
            seen_at_raw: now.raw_millis(),
        };
        if self.seen_packets.push(record).is_err() {
            if let Some(idx) = self.oldest_seen_packet_index() {
                self.seen_packets[idx] = record;
            }
        }
        false
    }

    fn oldest_seen_packet_index(&self) -> Option<usize> {
        self.seen_packets
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.seen_at_raw)
            .map(|(idx, _)| idx)
    }

    /// Records `(originator, request_id)` if not already present,
    /// returning whether this is a duplicate route-discovery broadcast.
    pub fn check_and_record_seen_request(&mut self, originator: NodeAddress, request_id: u32, now: Instant) -> bool {
        if self
            .seen_requests
            .iter()
            .any(|s| s.originator == originator && s.request_id == request_id)
        {
            return true;
        }
        let record = SeenRequest {
            originator,
            request_id,
            seen_at_raw: now.raw_millis(),
        };
        if self.seen_requests.push(record).is_err() {
            if let Some(idx) = self
                .seen_requests
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.seen_at_raw)
                .map(|(idx, _)| idx)
            {
                self.seen_requests[idx] = record;
            }
        }
        false
    }

    /// Computes the TTL for a fresh outbound packet per §4.F step 2.
    pub fn ttl_for(&self, destination: NodeAddress, broadcast: bool) -> u8 {
        if broadcast {
            return BROADCAST_TTL;
        }
        let hop_count = self
            .primary_route(destination)
            .map(|r| r.hop_count)
            .unwrap_or(0);
        (hop_count.saturating_add(UNICAST_TTL_MARGIN)).min(15).max(1)
    }

    /// Decides what to do with an inbound packet not yet known to be a
    /// duplicate, per §4.F forwarding strategy. Falls back to a direct
    /// neighbor entry for `destination` before giving up with `NoRoute`,
    /// mirroring the neighbor-then-route order [`Scheduler::send_unicast`]
    /// uses for locally-originated sends.
    pub fn forward_decision(
        &mut self,
        this_node: NodeAddress,
        source: NodeAddress,
        destination: NodeAddress,
        packet_id: u16,
        is_broadcast: bool,
        neighbors: &NeighborTable,
        now: Instant,
    ) -> ForwardDecision {
        if destination == this_node || (is_broadcast && source == this_node) {
            return ForwardDecision::Deliver;
        }
        if self.check_and_record_seen(source, packet_id, now) {
            return ForwardDecision::Duplicate;
        }
        if is_broadcast {
            return ForwardDecision::Forward {
                next_hop: NodeAddress::BROADCAST,
            };
        }
        if let Some(route) = self.primary_route(destination) {
            return ForwardDecision::Forward {
                next_hop: route.next_hop,
            };
        }
        if neighbors.is_neighbor(destination) {
            return ForwardDecision::Forward {
                next_hop: destination,
            };
        }
        ForwardDecision::NoRoute
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(v: u32) -> NodeAddress {
        NodeAddress::from_u32(v)
    }

    #[test]
    fn install_and_find_primary() {
        let mut table = RoutingTable::new();
        table.install(RouteEntry {
            destination: addr(2),
            next_hop: addr(3),
            hop_count: 2,
            quality: 200,
            last_updated: Instant::from_raw_millis(0),
            primary: false,
        });
        let primary = table.primary_route(addr(2)).unwrap();
        assert_eq!(primary.next_hop, addr(3));
    }

    #[test]
    fn higher_score_becomes_primary() {
        let mut table = RoutingTable::new();
        table.install(RouteEntry {
            destination: addr(2),
            next_hop: addr(3),
            hop_count: 4,
            quality: 100,
            last_updated: Instant::from_raw_millis(0),
            primary: false,
        });
        table.install(RouteEntry {
            destination: addr(2),
            next_hop: addr(4),
            hop_count: 1,
            quality: 100,
            last_updated: Instant::from_raw_millis(1),
            primary: false,
        });
        let primary = table.primary_route(addr(2)).unwrap();
        assert_eq!(primary.next_hop, addr(4));
    }

    #[test]
    fn promote_next_best_after_failure() {
        let mut table = RoutingTable::new();
        table.install(RouteEntry {
            destination: addr(2),
            next_hop: addr(3),
            hop_count: 1,
            quality: 255,
            last_updated: Instant::from_raw_millis(0),
            primary: false,
        });
        table.install(RouteEntry {
            destination: addr(2),
            next_hop: addr(5),
            hop_count: 3,
            quality: 200,
            last_updated: Instant::from_raw_millis(0),
            primary: false,
        });
        table.promote_next_best(addr(2), addr(3));
        let primary = table.primary_route(addr(2)).unwrap();
        assert_eq!(primary.next_hop, addr(5));
    }

    #[test]
    fn duplicate_detection() {
        let mut table = RoutingTable::new();
        let now = Instant::from_raw_millis(0);
        assert!(!table.check_and_record_seen(addr(1), 17, now));
        assert!(table.check_and_record_seen(addr(1), 17, now));
    }

    #[test]
    fn forward_decision_deliver_for_self() {
        let mut table = RoutingTable::new();
        let neighbors = NeighborTable::new();
        let now = Instant::from_raw_millis(0);
        let decision = table.forward_decision(addr(2), addr(1), addr(2), 1, false, &neighbors, now);
        assert_eq!(decision, ForwardDecision::Deliver);
    }

    #[test]
    fn forward_decision_no_route() {
        let mut table = RoutingTable::new();
        let neighbors = NeighborTable::new();
        let now = Instant::from_raw_millis(0);
        let decision = table.forward_decision(addr(9), addr(1), addr(2), 1, false, &neighbors, now);
        assert_eq!(decision, ForwardDecision::NoRoute);
    }

    #[test]
    fn forward_decision_uses_route() {
        let mut table = RoutingTable::new();
        let neighbors = NeighborTable::new();
        let now = Instant::from_raw_millis(0);
        table.install(RouteEntry {
            destination: addr(2),
            next_hop: addr(3),
            hop_count: 1,
            quality: 200,
            last_updated: now,
            primary: false,
        });
        let decision = table.forward_decision(addr(9), addr(1), addr(2), 1, false, &neighbors, now);
        assert_eq!(decision, ForwardDecision::Forward { next_hop: addr(3) });
    }

    #[test]
    fn forward_decision_falls_back_to_direct_neighbor() {
        let mut table = RoutingTable::new();
        let mut neighbors = NeighborTable::new();
        let now = Instant::from_raw_millis(0);
        neighbors.observe(addr(2), crate::neighbor::InterfaceMask::RADIO, -60, 8, now);
        let decision = table.forward_decision(addr(9), addr(1), addr(2), 1, false, &neighbors, now);
        assert_eq!(decision, ForwardDecision::Forward { next_hop: addr(2) });
    }

    #[test]
    fn invalidate_via_drops_matching_routes() {
        let mut table = RoutingTable::new();
        table.install(RouteEntry {
            destination: addr(2),
            next_hop: addr(3),
            hop_count: 1,
            quality: 200,
            last_updated: Instant::from_raw_millis(0),
            primary: false,
        });
        table.invalidate_via(addr(3));
        assert!(table.primary_route(addr(2)).is_none());
    }
}
