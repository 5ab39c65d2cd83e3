//! The cooperative scheduler tick (§4.I): the single-threaded loop that
//! owns every table and drives A–H from one place, with no global
//! singletons (§9 design note).

use heapless::Vec;
use rand_core::RngCore;

use crate::address::NodeAddress;
use crate::adr::{AdrTable, NetworkScan};
use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::codec::{self, Flags, PacketHeader, PacketType};
use crate::config::Config;
use crate::crypto::KeyStore;
use crate::group::GroupTable;
use crate::mac::{GateResult, MacState};
use crate::neighbor::{InterfaceMask, NeighborTable};
use crate::payload::DataKind;
use crate::radio::{CarrierSense, Radio, RxConsumer, SendResult};
use crate::reliable::{DeliveryStatus, PendingAckPool, RtoTable};
use crate::routing::{ForwardDecision, RouteEntry, RoutingTable};
use crate::time::{Duration, Instant, Timer};
use crate::Error;

/// Bound on the queue of completed delivery events awaiting [`Scheduler::poll_delivery_events`].
pub const MAX_DELIVERY_EVENTS: usize = crate::reliable::MAX_IN_FLIGHT * 2;

/// Bound on the queue of rebroadcasts deferred for their §4.F jitter delay.
pub const MAX_DEFERRED_SENDS: usize = 4;

/// A control-packet rebroadcast waiting out its jitter delay before
/// transmission, already fully encoded so the delay adds no further work.
struct DeferredSend {
    ready_at: Instant,
    len: u8,
    buf: [u8; crate::radio::MAX_FRAME_LEN],
}

/// Counters incremented on silently-dropped frames, for observability.
#[derive(Default, Debug, Clone, Copy)]
pub struct DropCounters {
    pub malformed: u32,
    pub auth_failure: u32,
    pub duplicate: u32,
}

/// Amortized cleanup cadence: run table expiry once every this many ticks.
const CLEANUP_EVERY_TICKS: u32 = 1_000; // ~10s at 100Hz

/// Outcome of a completed unicast send, delivered to callers via
/// [`Scheduler::poll_delivery_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryEvent {
    pub packet_id: u16,
    pub destination: NodeAddress,
    pub status: DeliveryStatus,
}

/// The context object every table and protocol component lives on,
/// constructed once by the application and driven by repeated calls to
/// [`Scheduler::tick`].
pub struct Scheduler<C: Config> {
    pub local_addr: NodeAddress,
    pub keys: KeyStore,
    pub neighbors: NeighborTable,
    pub routing: RoutingTable,
    pub adr: AdrTable,
    pub mac: MacState,
    pub groups: GroupTable,
    pub acks: PendingAckPool,
    rto: RtoTable,
    pub drops: DropCounters,
    /// Application channel new locally-originated packets are stamped
    /// with, set by the `channel` operator command (§6.4).
    pub current_channel: u8,
    next_packet_id: u16,
    last_tick_at: Option<Instant>,
    tick_count: u32,
    delivery_events: Vec<DeliveryEvent, MAX_DELIVERY_EVENTS>,
    deferred: Vec<DeferredSend, MAX_DEFERRED_SENDS>,
    scan: Option<NetworkScan>,
    _config: core::marker::PhantomData<C>,
}

impl<C: Config> Scheduler<C> {
    pub fn new(local_addr: NodeAddress, keys: KeyStore) -> Self {
        Scheduler {
            local_addr,
            keys,
            neighbors: NeighborTable::new(),
            routing: RoutingTable::new(),
            adr: AdrTable::new(),
            mac: MacState::new(),
            groups: GroupTable::new(),
            acks: PendingAckPool::new(),
            rto: RtoTable::new(),
            drops: DropCounters::default(),
            current_channel: 0,
            next_packet_id: 1,
            last_tick_at: None,
            tick_count: 0,
            delivery_events: Vec::new(),
            deferred: Vec::new(),
            scan: None,
            _config: core::marker::PhantomData,
        }
    }

    /// Restores a scheduler's identity and group state from `store`,
    /// generating a fresh identity via `rng` on first boot (no record
    /// present yet). See [`crate::persist`] for the on-disk framing.
    pub fn load(store: &mut C::Store, rng: &mut C::Rng) -> Result<Self, Error> {
        let keys = match crate::persist::load_identity(store)? {
            Some(keys) => keys,
            None => {
                let keys = KeyStore::generate(rng);
                crate::persist::save_identity(store, &keys)?;
                keys
            }
        };
        let local_addr = NodeAddress::derive_from_public_key(keys.public_key());
        let mut sched = Scheduler::new(local_addr, keys);
        sched.groups = crate::persist::load_groups(store)?;
        crate::persist::load_history(store, &mut sched.groups)?;
        Ok(sched)
    }

    /// Persists identity and group state to `store`. Callers should invoke
    /// this after identity changes (rare) and may invoke
    /// [`Scheduler::save_history`] alone after accepting group traffic
    /// (frequent), to avoid rewriting key material on every message.
    pub fn save(&self, store: &mut C::Store) -> Result<(), Error> {
        crate::persist::save_identity(store, &self.keys)?;
        crate::persist::save_groups(store, &self.groups)?;
        crate::persist::save_history(store, &self.groups)
    }

    /// Persists only the per-group replay high-water marks, cheap enough
    /// to call after every accepted group message.
    pub fn save_history(&self, store: &mut C::Store) -> Result<(), Error> {
        crate::persist::save_history(store, &self.groups)
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        id
    }

    /// Runs one cooperative tick: drains at most one inbound frame,
    /// advances MAC timers, services routing/reliable-delivery timers,
    /// and runs amortized cleanup. Never blocks.
    pub fn tick(
        &mut self,
        timer: &C::Timer,
        radio: &mut C::Radio,
        rx: &mut RxConsumer<'_>,
        rng: &mut C::Rng,
    ) {
        let now = timer.now();
        let elapsed = match self.last_tick_at {
            Some(prev) => now.duration_since(prev),
            None => Duration::ZERO,
        };
        self.last_tick_at = Some(now);
        self.tick_count = self.tick_count.wrapping_add(1);

        if let Some(frame) = rx.dequeue() {
            self.handle_received_frame(frame.bytes(), frame.rssi, frame.snr, now, radio, rng);
        }

        if self.mac.mode == crate::mac::MacMode::TdmaSynced {
            self.mac.advance(elapsed);
        }
        self.mac.reassess_mode(now);

        self.service_deferred_sends(now, radio, rng);
        self.service_reliable_delivery(now, radio, rng);
        self.service_network_scan(now, radio);

        if self.tick_count % CLEANUP_EVERY_TICKS == 0 {
            self.neighbors.expire(now);
            self.routing.expire(now);
        }
    }

    fn handle_received_frame(
        &mut self,
        bytes: &[u8],
        rssi: i16,
        snr: i16,
        now: Instant,
        radio: &mut C::Radio,
        rng: &mut C::Rng,
    ) {
        let packet = match codec::decode(bytes, crate::radio::MAX_FRAME_LEN) {
            Ok(p) => p,
            Err(_) => {
                self.drops.malformed += 1;
                return;
            }
        };

        if let Some(scan) = &mut self.scan {
            scan.record(rssi);
        }

        self.neighbors.observe(
            packet.header.source,
            InterfaceMask::RADIO,
            rssi,
            snr,
            now,
        );
        self.adr.observe(packet.header.source, rssi, snr);

        match packet.header.packet_type {
            PacketType::TimeSync => self.handle_time_sync(&packet, now),
            PacketType::Ack => self.handle_ack(&packet, now),
            PacketType::RouteReq => self.handle_route_req(&packet, now, radio, rng),
            PacketType::RouteRep => self.handle_route_rep(&packet, now),
            PacketType::RouteErr => self.handle_route_err(&packet),
            PacketType::Hello => {}
            _ => self.handle_data_like(&packet, now, radio, rng),
        }
    }

    fn handle_time_sync(&mut self, packet: &codec::Packet<'_>, now: Instant) {
        if let Ok(sync) = crate::payload::TimeSync::from_bytes(&mut ByteReader::new(packet.payload)) {
            self.mac
                .consider_remote_time(packet.header.source, sync.kind, sync.stratum, now);
        }
    }

    fn handle_ack(&mut self, packet: &codec::Packet<'_>, now: Instant) {
        if let Ok(ack) = crate::payload::Ack::from_bytes(&mut ByteReader::new(packet.payload)) {
            if let Some(rtt) = self.acks.acknowledge(ack.acked_packet_id, now) {
                self.rto.sample(packet.header.source, rtt);
            }
        }
    }

    fn handle_route_req(
        &mut self,
        packet: &codec::Packet<'_>,
        now: Instant,
        radio: &mut C::Radio,
        rng: &mut C::Rng,
    ) {
        let Ok(req) = crate::payload::RouteReq::from_bytes(&mut ByteReader::new(packet.payload)) else {
            self.drops.malformed += 1;
            return;
        };
        if self
            .routing
            .check_and_record_seen_request(req.originator, req.request_id, now)
        {
            self.drops.duplicate += 1;
            return;
        }

        // Reverse path: a route back to the originator via whoever relayed this REQ.
        self.routing.install(RouteEntry {
            destination: req.originator,
            next_hop: packet.header.source,
            hop_count: req.hop_count.saturating_add(1),
            quality: self
                .neighbors
                .get(packet.header.source)
                .and_then(|n| n.preferred_interface().and_then(|i| n.quality(i)))
                .unwrap_or(0),
            last_updated: now,
            primary: false,
        });

        if req.target == self.local_addr {
            let rep = crate::payload::RouteRep {
                originator: req.originator,
                destination: self.local_addr,
                hop_count: req.hop_count.saturating_add(1),
                quality: 255,
            };
            self.send_control_packet(
                PacketType::RouteRep,
                req.originator,
                packet.header.source,
                self.routing.ttl_for(req.originator, false),
                &rep,
                radio,
                rng,
            );
        } else if packet.header.ttl > 1 {
            let mut forwarded = req;
            forwarded.hop_count = forwarded.hop_count.saturating_add(1);
            let jitter_ms = 10 + (rng.next_u32() % 41);
            self.defer_control_packet_send(
                PacketType::RouteReq,
                NodeAddress::BROADCAST,
                NodeAddress::BROADCAST,
                packet.header.ttl - 1,
                &forwarded,
                Duration::from_millis(jitter_ms),
                now,
            );
        }
    }

    fn handle_route_rep(&mut self, packet: &codec::Packet<'_>, now: Instant) {
        let Ok(rep) = crate::payload::RouteRep::from_bytes(&mut ByteReader::new(packet.payload)) else {
            self.drops.malformed += 1;
            return;
        };
        self.routing.install(RouteEntry {
            destination: rep.destination,
            next_hop: packet.header.source,
            hop_count: rep.hop_count,
            quality: rep.quality,
            last_updated: now,
            primary: false,
        });
    }

    fn handle_route_err(&mut self, packet: &codec::Packet<'_>) {
        if let Ok(err) = crate::payload::RouteErr::from_bytes(&mut ByteReader::new(packet.payload)) {
            self.routing.invalidate_via(err.failed_next_hop);
        }
    }

    fn handle_data_like(
        &mut self,
        packet: &codec::Packet<'_>,
        now: Instant,
        radio: &mut C::Radio,
        rng: &mut C::Rng,
    ) {
        let is_broadcast = packet.header.flags.contains(Flags::BROADCAST)
            || packet.header.destination.is_broadcast();

        let decision = self.routing.forward_decision(
            self.local_addr,
            packet.header.source,
            packet.header.destination,
            packet.header.packet_id,
            is_broadcast,
            &self.neighbors,
            now,
        );

        match decision {
            ForwardDecision::Duplicate => self.drops.duplicate += 1,
            ForwardDecision::NoRoute => {
                let err = crate::payload::RouteErr {
                    unreachable: packet.header.destination,
                    failed_next_hop: NodeAddress::INVALID,
                };
                self.send_control_packet(
                    PacketType::RouteErr,
                    packet.header.source,
                    packet.header.source,
                    2,
                    &err,
                    radio,
                    rng,
                );
            }
            ForwardDecision::Deliver => {
                if packet.header.packet_type == PacketType::Data {
                    let kind = if is_broadcast {
                        DataKind::Group(packet.payload)
                    } else {
                        DataKind::Application(packet.payload)
                    };
                    match kind {
                        DataKind::Group(body) => self.try_open_group(body, now),
                        DataKind::Application(_) => {
                            if packet.header.flags.contains(Flags::ACK_REQ) {
                                let ack = crate::payload::Ack {
                                    acked_packet_id: packet.header.packet_id,
                                };
                                self.send_control_packet(
                                    PacketType::Ack,
                                    packet.header.source,
                                    packet.header.source,
                                    2,
                                    &ack,
                                    radio,
                                    rng,
                                );
                            }
                        }
                    }
                }
            }
            ForwardDecision::Forward { next_hop } => {
                if let Ok(mut next_header) = codec::step_forward(&packet.header) {
                    next_header.next_hop = next_hop;
                    let mut buf = [0u8; crate::radio::MAX_FRAME_LEN];
                    if let Ok(len) = codec::encode(&next_header, packet.payload, &mut buf) {
                        self.gated_send(&buf[..len], radio, rng);
                    }
                }
            }
        }
    }

    /// Encodes a locally-originated control packet without transmitting it.
    /// `source` is always this node (the actual RF transmitter, so neighbor
    /// observation on the receiving end stays accurate); `destination` is
    /// the final recipient and `next_hop` the node the frame is actually
    /// addressed to on this hop, which may differ along a multi-hop reverse
    /// path.
    fn encode_control_packet<P: ToBytes>(
        &mut self,
        packet_type: PacketType,
        destination: NodeAddress,
        next_hop: NodeAddress,
        ttl: u8,
        payload: &P,
    ) -> Option<([u8; crate::radio::MAX_FRAME_LEN], usize)> {
        let mut payload_buf = [0u8; crate::MAX_PAYLOAD_LEN];
        let mut writer = ByteWriter::new(&mut payload_buf);
        if payload.to_bytes(&mut writer).is_err() {
            return None;
        }
        let written = crate::MAX_PAYLOAD_LEN - writer.space_left();

        let header = PacketHeader {
            packet_type,
            ttl: ttl.max(1),
            flags: if destination.is_broadcast() {
                Flags::BROADCAST
            } else {
                Flags::empty()
            },
            channel_id: self.current_channel,
            packet_id: self.next_packet_id(),
            source: self.local_addr,
            destination,
            next_hop,
            hop_count: 0,
            seq_number: 0,
            payload_length: written as u16,
        };

        let mut buf = [0u8; crate::radio::MAX_FRAME_LEN];
        let len = codec::encode(&header, &payload_buf[..written], &mut buf).ok()?;
        Some((buf, len))
    }

    /// Encodes and immediately transmits a control packet, subject to the
    /// MAC transmit gate (§4.E).
    fn send_control_packet<P: ToBytes>(
        &mut self,
        packet_type: PacketType,
        destination: NodeAddress,
        next_hop: NodeAddress,
        ttl: u8,
        payload: &P,
        radio: &mut C::Radio,
        rng: &mut C::Rng,
    ) {
        if let Some((buf, len)) = self.encode_control_packet(packet_type, destination, next_hop, ttl, payload) {
            self.gated_send(&buf[..len], radio, rng);
        }
    }

    /// Encodes a control packet now but defers its transmission by `delay`
    /// (§4.F rebroadcast jitter), queuing it for [`Scheduler::service_deferred_sends`].
    fn defer_control_packet_send<P: ToBytes>(
        &mut self,
        packet_type: PacketType,
        destination: NodeAddress,
        next_hop: NodeAddress,
        ttl: u8,
        payload: &P,
        delay: Duration,
        now: Instant,
    ) {
        if let Some((buf, len)) = self.encode_control_packet(packet_type, destination, next_hop, ttl, payload) {
            let _ = self.deferred.push(DeferredSend {
                ready_at: now + delay,
                len: len as u8,
                buf,
            });
        }
    }

    /// Transmits every deferred rebroadcast whose jitter delay has elapsed.
    fn service_deferred_sends(&mut self, now: Instant, radio: &mut C::Radio, rng: &mut C::Rng) {
        let mut idx = 0;
        while idx < self.deferred.len() {
            if self.deferred[idx].ready_at <= now {
                let entry = self.deferred.swap_remove(idx);
                self.gated_send(&entry.buf[..usize::from(entry.len)], radio, rng);
            } else {
                idx += 1;
            }
        }
    }

    /// Evaluates the MAC transmit gate and sends `frame` if it grants
    /// passage, dropping it otherwise (reliable-delivery retry and route
    /// re-discovery cover the cases that need a guaranteed eventual send).
    fn gated_send(&mut self, frame: &[u8], radio: &mut C::Radio, rng: &mut C::Rng) {
        match self.transmit_gate(radio, rng) {
            GateResult::Go | GateResult::GoCsma => {
                let _ = radio.send(frame);
            }
            GateResult::Backoff(_) | GateResult::Failed => {}
        }
    }

    /// Queues a unicast application send with `ACK_REQ`, per §4.G.
    ///
    /// Returns [`Error::WindowFull`] if the in-flight cap is already
    /// reached, or [`Error::NoRoute`] if no route and no neighbor entry
    /// exists (the caller should retry once discovery completes).
    pub fn send_unicast(
        &mut self,
        destination: NodeAddress,
        payload: &[u8],
        now: Instant,
        radio: &mut C::Radio,
        rng: &mut C::Rng,
    ) -> Result<u16, Error> {
        if self.acks.len() >= crate::reliable::MAX_IN_FLIGHT {
            return Err(Error::WindowFull);
        }

        let next_hop = if self.neighbors.is_neighbor(destination) {
            destination
        } else if let Some(route) = self.routing.primary_route(destination) {
            route.next_hop
        } else {
            return Err(Error::NoRoute);
        };

        let packet_id = self.next_packet_id();
        let header = PacketHeader {
            packet_type: PacketType::Data,
            ttl: self.routing.ttl_for(destination, false),
            flags: Flags::ACK_REQ,
            channel_id: self.current_channel,
            packet_id,
            source: self.local_addr,
            destination,
            next_hop,
            hop_count: 0,
            seq_number: 0,
            payload_length: payload.len() as u16,
        };
        let mut buf = [0u8; crate::radio::MAX_FRAME_LEN];
        let len = codec::encode(&header, payload, &mut buf)?;

        match self.transmit_gate(radio, rng) {
            GateResult::Go | GateResult::GoCsma => match radio.send(&buf[..len]) {
                SendResult::Ok => {
                    self.acks.track(destination, packet_id, now, &buf[..len]);
                    Ok(packet_id)
                }
                SendResult::Busy | SendResult::Error => Err(Error::RadioBusy),
            },
            GateResult::Backoff(_) | GateResult::Failed => Err(Error::RadioBusy),
        }
    }

    /// Attempts to open a broadcast DATA frame as a group message against
    /// every joined group (cheap: `group_id` is checked before any AEAD
    /// work), silently dropping it if no group claims it or the tag fails.
    fn try_open_group(&mut self, frame: &[u8], now: Instant) {
        if frame.len() < crate::group::GROUP_HEADER_LEN {
            return;
        }
        let group_id = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let Some(group) = self.groups.get_mut(group_id) else {
            return;
        };
        let mut out: Vec<u8, { crate::group::MAX_GROUP_BODY }> = Vec::new();
        if group.open(frame, now, &mut out).is_err() {
            self.drops.auth_failure += 1;
        }
    }

    /// Seals `body` for broadcast into a joined group and transmits it.
    pub fn send_group(
        &mut self,
        group_id: u32,
        msg_type: u8,
        body: &[u8],
        radio: &mut C::Radio,
        rng: &mut C::Rng,
    ) -> Result<(), Error> {
        let local_addr = self.local_addr;
        let channel_id = self.current_channel;
        let Some(group) = self.groups.get_mut(group_id) else {
            return Err(Error::InvalidValue);
        };
        let mut sealed: Vec<u8, { crate::group::GROUP_HEADER_LEN + crate::group::MAX_GROUP_BODY + 16 }> =
            Vec::new();
        group.seal(local_addr, msg_type, body, &mut sealed)?;

        let header = PacketHeader {
            packet_type: PacketType::Data,
            ttl: crate::routing::BROADCAST_TTL,
            flags: Flags::BROADCAST | Flags::ENCRYPTED,
            channel_id,
            packet_id: self.next_packet_id(),
            source: local_addr,
            destination: NodeAddress::BROADCAST,
            next_hop: NodeAddress::BROADCAST,
            hop_count: 0,
            seq_number: 0,
            payload_length: sealed.len() as u16,
        };
        let mut buf = [0u8; crate::radio::MAX_FRAME_LEN];
        let len = codec::encode(&header, &sealed, &mut buf)?;
        match self.transmit_gate(radio, rng) {
            GateResult::Go | GateResult::GoCsma => match radio.send(&buf[..len]) {
                SendResult::Ok => Ok(()),
                SendResult::Busy | SendResult::Error => Err(Error::RadioBusy),
            },
            GateResult::Backoff(_) | GateResult::Failed => Err(Error::RadioBusy),
        }
    }

    /// Initiates route discovery by broadcasting a ROUTE_REQ.
    pub fn discover_route(&mut self, target: NodeAddress, radio: &mut C::Radio, rng: &mut C::Rng) {
        let request_id = self.routing.next_request_id();
        let req = crate::payload::RouteReq {
            originator: self.local_addr,
            target,
            request_id,
            hop_count: 0,
        };
        self.send_control_packet(
            PacketType::RouteReq,
            NodeAddress::BROADCAST,
            NodeAddress::BROADCAST,
            crate::routing::BROADCAST_TTL,
            &req,
            radio,
            rng,
        );
    }

    /// Broadcasts a BEACON announcing this node's network id and preferred
    /// spreading factor (§6.4 `beacon` command).
    pub fn send_beacon(&mut self, beacon: &crate::payload::Beacon, radio: &mut C::Radio, rng: &mut C::Rng) {
        self.send_control_packet(
            PacketType::Beacon,
            NodeAddress::BROADCAST,
            NodeAddress::BROADCAST,
            1,
            beacon,
            radio,
            rng,
        );
    }

    /// Starts a network scan (§4.D `adr scan`): iterates SF7..SF12 across
    /// subsequent ticks, tallying frames heard at each, rather than
    /// blocking here for the dwell duration.
    pub fn start_network_scan(&mut self, now: Instant, radio: &mut C::Radio) {
        radio.set_spreading_factor(crate::adr::MIN_SF);
        self.scan = Some(NetworkScan::start(now));
    }

    /// Whether a network scan started by [`Scheduler::start_network_scan`]
    /// is still in progress.
    pub fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    /// Advances an in-progress network scan, if any, applying the winning
    /// SF once every factor has been dwelt on.
    fn service_network_scan(&mut self, now: Instant, radio: &mut C::Radio) {
        let Some(scan) = &mut self.scan else {
            return;
        };
        match scan.advance(now) {
            Some(best_sf) => {
                radio.set_spreading_factor(best_sf);
                self.adr.apply_scan_result(best_sf);
                self.scan = None;
            }
            None => radio.set_spreading_factor(scan.current_sf()),
        }
    }

    fn service_reliable_delivery(&mut self, now: Instant, radio: &mut C::Radio, rng: &mut C::Rng) {
        let rto = &self.rto;
        let (to_retry, _exhausted) = self.acks.service(now, |dest| rto.rto_for(dest));
        for pending in &to_retry {
            self.gated_send(&pending.frame, radio, rng);
        }
        for done in self.acks.reap() {
            if self.delivery_events.push(DeliveryEvent {
                packet_id: done.packet_id,
                destination: done.destination,
                status: done.status,
            }).is_err() {
                break;
            }
        }
    }

    /// Drains and returns completed delivery events for callers to
    /// dispatch to application callbacks.
    pub fn poll_delivery_events(&mut self) -> Vec<DeliveryEvent, MAX_DELIVERY_EVENTS> {
        core::mem::take(&mut self.delivery_events)
    }

    /// Evaluates the MAC transmit gate for an impending send.
    pub fn transmit_gate(&mut self, radio: &mut C::Radio, rng: &mut C::Rng) -> GateResult {
        let busy = matches!(radio.carrier_sense(), CarrierSense::Busy);
        self.mac.transmit_gate(busy, rng.next_u32())
    }
}
