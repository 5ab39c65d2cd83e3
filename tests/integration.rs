//! Cross-module integration coverage (§8): a two-node unicast exchange
//! driven entirely through the public `Scheduler` API, with radio
//! transport simulated by hand-copying frames between two in-memory
//! fakes (the crate's own unit-test doubles are private to the crate,
//! so this test defines its own, same as the per-module suites do).

use heapless::spsc::Queue;
use meshcore::address::NodeAddress;
use meshcore::config::Config;
use meshcore::crypto::KeyStore;
use meshcore::radio::{self, CarrierSense, Radio, RadioParams, RxConsumer, RxProducer, SendResult, MAX_FRAME_LEN};
use meshcore::reliable::DeliveryStatus;
use meshcore::scheduler::Scheduler;
use meshcore::store::{Store, MAX_RECORD_LEN};
use meshcore::time::{Instant, Timer};

struct RecordingRadio {
    sent: Vec<heapless::Vec<u8, MAX_FRAME_LEN>>,
    busy: bool,
}

impl RecordingRadio {
    fn new() -> Self {
        RecordingRadio { sent: Vec::new(), busy: false }
    }
}

impl Radio for RecordingRadio {
    fn init(&mut self, _params: RadioParams) -> Result<(), meshcore::Error> {
        Ok(())
    }

    fn set_spreading_factor(&mut self, _sf: u8) {}

    fn carrier_sense(&mut self) -> CarrierSense {
        if self.busy {
            CarrierSense::Busy
        } else {
            CarrierSense::Idle
        }
    }

    fn send(&mut self, frame: &[u8]) -> SendResult {
        let mut buf: heapless::Vec<u8, MAX_FRAME_LEN> = heapless::Vec::new();
        if buf.extend_from_slice(frame).is_err() {
            return SendResult::Error;
        }
        self.sent.push(buf);
        SendResult::Ok
    }

    fn last_rssi(&self) -> i16 {
        -60
    }

    fn last_snr(&self) -> i16 {
        8
    }
}

struct FixedClock(Instant);

impl Timer for FixedClock {
    fn now(&self) -> Instant {
        self.0
    }
}

#[derive(Default)]
struct NullStore;

impl Store for NullStore {
    fn get(&mut self, _key: &str) -> Result<Option<heapless::Vec<u8, MAX_RECORD_LEN>>, meshcore::Error> {
        Ok(None)
    }
    fn put(&mut self, _key: &str, _value: &[u8]) -> Result<(), meshcore::Error> {
        Ok(())
    }
    fn remove(&mut self, _key: &str) -> Result<(), meshcore::Error> {
        Ok(())
    }
}

struct StepRng(u64);

impl rand_core::RngCore for StepRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        self.0
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
impl rand_core::CryptoRng for StepRng {}

struct TestConfig;
impl Config for TestConfig {
    type Timer = FixedClock;
    type Radio = RecordingRadio;
    type Store = NullStore;
    type Rng = StepRng;
}

fn keys(seed: u64) -> KeyStore {
    let mut rng = StepRng(seed);
    KeyStore::generate(&mut rng)
}

/// S1: direct-neighbor unicast with ACK_REQ, round-tripped through two
/// independent schedulers with hand-copied radio frames between them.
#[test]
fn two_node_unicast_round_trips_an_ack() {
    let now = Instant::from_raw_millis(0);
    let clock = FixedClock(now);
    let mut rng_a = StepRng(100);
    let mut rng_b = StepRng(200);

    let node_a = NodeAddress::from_u32(0xA);
    let node_b = NodeAddress::from_u32(0xB);

    let mut sched_a: Scheduler<TestConfig> = Scheduler::new(node_a, keys(1));
    let mut sched_b: Scheduler<TestConfig> = Scheduler::new(node_b, keys(2));

    // A has directly heard B before, so `send_unicast` resolves B as its
    // own next hop instead of requiring a route.
    sched_a.neighbors.observe(
        node_b,
        meshcore::neighbor::InterfaceMask::RADIO,
        -60,
        8,
        now,
    );

    let mut radio_a = RecordingRadio::new();
    let mut radio_b = RecordingRadio::new();

    let packet_id = sched_a
        .send_unicast(node_b, b"hello mesh", now, &mut radio_a, &mut rng_a)
        .expect("direct neighbor send succeeds");
    assert_eq!(radio_a.sent.len(), 1);

    // Feed A's transmitted frame into B's receive queue and let a tick
    // drain it.
    let mut rx_queue_b: radio::RxQueue = Queue::new();
    let (mut rx_prod_b, mut rx_cons_b): (RxProducer<'_>, RxConsumer<'_>) = rx_queue_b.split();
    radio::enqueue_received(&mut rx_prod_b, &radio_a.sent[0], -55, 9, now).unwrap();
    sched_b.tick(&clock, &mut radio_b, &mut rx_cons_b, &mut rng_b);

    // B now knows A as a neighbor purely from decoding the inbound frame.
    assert!(sched_b.neighbors.is_neighbor(node_a));
    // B replied with an ACK since the DATA frame carried ACK_REQ.
    assert_eq!(radio_b.sent.len(), 1);

    // Feed B's ACK back to A and let a tick drain it.
    let mut rx_queue_a: radio::RxQueue = Queue::new();
    let (mut rx_prod_a, mut rx_cons_a): (RxProducer<'_>, RxConsumer<'_>) = rx_queue_a.split();
    radio::enqueue_received(&mut rx_prod_a, &radio_b.sent[0], -55, 9, now).unwrap();
    sched_a.tick(&clock, &mut radio_a, &mut rx_cons_a, &mut rng_a);

    let events = sched_a.poll_delivery_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].packet_id, packet_id);
    assert_eq!(events[0].destination, node_b);
    assert_eq!(events[0].status, DeliveryStatus::Acked);
}

/// A unicast with no known neighbor or route fails fast without touching
/// the radio.
#[test]
fn unicast_without_route_or_neighbor_fails() {
    let now = Instant::from_raw_millis(0);
    let mut sched: Scheduler<TestConfig> = Scheduler::new(NodeAddress::from_u32(1), keys(3));
    let mut radio = RecordingRadio::new();
    let mut rng = StepRng(9);
    let result = sched.send_unicast(NodeAddress::from_u32(99), b"nope", now, &mut radio, &mut rng);
    assert_eq!(result, Err(meshcore::Error::NoRoute));
    assert!(radio.sent.is_empty());
}

/// A malformed/truncated inbound frame is dropped and counted rather
/// than panicking the tick loop.
#[test]
fn tick_counts_malformed_frame_without_panicking() {
    let now = Instant::from_raw_millis(0);
    let clock = FixedClock(now);
    let mut sched: Scheduler<TestConfig> = Scheduler::new(NodeAddress::from_u32(1), keys(4));
    let mut radio = RecordingRadio::new();
    let mut rng = StepRng(5);

    let mut rx_queue: radio::RxQueue = Queue::new();
    let (mut producer, mut consumer) = rx_queue.split();
    radio::enqueue_received(&mut producer, &[0xFF, 0x01, 0x02], 0, 0, now).unwrap();

    sched.tick(&clock, &mut radio, &mut consumer, &mut rng);
    assert_eq!(sched.drops.malformed, 1);
}

/// A busy carrier makes `send_unicast` back off instead of transmitting.
#[test]
fn busy_carrier_blocks_unicast_send() {
    let now = Instant::from_raw_millis(0);
    let mut sched: Scheduler<TestConfig> = Scheduler::new(NodeAddress::from_u32(1), keys(6));
    let mut radio = RecordingRadio::new();
    let mut rng = StepRng(11);
    let peer = NodeAddress::from_u32(2);
    sched
        .neighbors
        .observe(peer, meshcore::neighbor::InterfaceMask::RADIO, -60, 8, now);

    radio.busy = true;
    let result = sched.send_unicast(peer, b"hi", now, &mut radio, &mut rng);
    assert_eq!(result, Err(meshcore::Error::RadioBusy));
    assert!(radio.sent.is_empty());

    radio.busy = false;
    sched
        .send_unicast(peer, b"hi", now, &mut radio, &mut rng)
        .expect("idle carrier allows the send");
    assert_eq!(radio.sent.len(), 1);
}

/// S2: three-node route discovery via ROUTE_REQ/ROUTE_REP, with the
/// relay's rebroadcast jitter serviced through a follow-up tick.
#[test]
fn three_node_route_discovery_installs_a_route() {
    let now = Instant::from_raw_millis(0);
    let clock = FixedClock(now);

    let node_a = NodeAddress::from_u32(0xA);
    let node_b = NodeAddress::from_u32(0xB);
    let node_c = NodeAddress::from_u32(0xC);

    let mut sched_a: Scheduler<TestConfig> = Scheduler::new(node_a, keys(10));
    let mut sched_b: Scheduler<TestConfig> = Scheduler::new(node_b, keys(20));
    let mut sched_c: Scheduler<TestConfig> = Scheduler::new(node_c, keys(30));

    // A and B are neighbors, as are B and C; A has no direct route to C.
    sched_a
        .neighbors
        .observe(node_b, meshcore::neighbor::InterfaceMask::RADIO, -60, 8, now);
    sched_b
        .neighbors
        .observe(node_a, meshcore::neighbor::InterfaceMask::RADIO, -60, 8, now);
    sched_b
        .neighbors
        .observe(node_c, meshcore::neighbor::InterfaceMask::RADIO, -60, 8, now);
    sched_c
        .neighbors
        .observe(node_b, meshcore::neighbor::InterfaceMask::RADIO, -60, 8, now);

    let mut radio_a = RecordingRadio::new();
    let mut radio_b = RecordingRadio::new();
    let mut radio_c = RecordingRadio::new();
    let mut rng_a = StepRng(41);
    let mut rng_b = StepRng(42);
    let mut rng_c = StepRng(43);

    sched_a.discover_route(node_c, &mut radio_a, &mut rng_a);
    assert_eq!(radio_a.sent.len(), 1);

    // Feed A's ROUTE_REQ to B; B has no route to C either, so it defers a
    // jittered rebroadcast rather than sending immediately.
    let mut rx_queue_b: radio::RxQueue = Queue::new();
    let (mut rx_prod_b, mut rx_cons_b): (RxProducer<'_>, RxConsumer<'_>) = rx_queue_b.split();
    radio::enqueue_received(&mut rx_prod_b, &radio_a.sent[0], -55, 9, now).unwrap();
    sched_b.tick(&clock, &mut radio_b, &mut rx_cons_b, &mut rng_b);
    assert!(radio_b.sent.is_empty(), "rebroadcast is deferred by jitter, not immediate");

    // Advance B's clock past the jitter window and tick again to flush it.
    let later = now + meshcore::time::Duration::from_millis(100);
    let clock_b_later = FixedClock(later);
    let mut rx_queue_b2: radio::RxQueue = Queue::new();
    let (_rx_prod_b2, mut rx_cons_b2): (RxProducer<'_>, RxConsumer<'_>) = rx_queue_b2.split();
    sched_b.tick(&clock_b_later, &mut radio_b, &mut rx_cons_b2, &mut rng_b);
    assert_eq!(radio_b.sent.len(), 1, "jitter elapsed, rebroadcast flushed");

    // Feed B's rebroadcast ROUTE_REQ to C, which owns the target address
    // and replies with a ROUTE_REP.
    let mut rx_queue_c: radio::RxQueue = Queue::new();
    let (mut rx_prod_c, mut rx_cons_c): (RxProducer<'_>, RxConsumer<'_>) = rx_queue_c.split();
    radio::enqueue_received(&mut rx_prod_c, &radio_b.sent[0], -55, 9, later).unwrap();
    sched_c.tick(&clock_b_later, &mut radio_c, &mut rx_cons_c, &mut rng_c);
    assert_eq!(radio_c.sent.len(), 1);

    // Feed C's ROUTE_REP back to B: B installs a forward route to C from
    // the reply's originating hop.
    let mut rx_queue_b3: radio::RxQueue = Queue::new();
    let (mut rx_prod_b3, mut rx_cons_b3): (RxProducer<'_>, RxConsumer<'_>) = rx_queue_b3.split();
    radio::enqueue_received(&mut rx_prod_b3, &radio_c.sent[0], -55, 9, later).unwrap();
    sched_b.tick(&clock_b_later, &mut radio_b, &mut rx_cons_b3, &mut rng_b);

    assert!(sched_b.routing.primary_route(node_c).is_some());
}
