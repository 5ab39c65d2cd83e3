//! The half-duplex radio driver interface the core consumes (§6.1).
//!
//! Chip-specific register I/O is a hard non-goal; this module only defines
//! the operations the core needs and the bounded single-producer/single-
//! consumer queue that decouples an interrupt-driven receive callback from
//! the cooperative scheduler tick that drains it, mirroring how the
//! teacher's link layer decouples real-time PDU reception from the
//! non-realtime processing loop via its packet queue.

use heapless::spsc::{Consumer, Producer, Queue};

use crate::time::Instant;

/// Instantaneous channel assessment result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CarrierSense {
    Idle,
    Busy,
}

/// Outcome of a transmit attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SendResult {
    Ok,
    Busy,
    Error,
}

/// Physical-layer parameters applied at `init`.
#[derive(Debug, Copy, Clone)]
pub struct RadioParams {
    pub frequency_hz: u32,
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub tx_power_dbm: i8,
    pub preamble_len: u16,
    pub sync_word: u8,
}

/// A half-duplex LoRa radio driver.
///
/// Implementors own the exclusive hardware resource; the scheduler is the
/// only caller, and TX/RX never overlap since the scheduler runs to
/// completion on every tick.
pub trait Radio {
    fn init(&mut self, params: RadioParams) -> Result<(), crate::Error>;

    /// Live spreading-factor change, used by the ADR network scan.
    fn set_spreading_factor(&mut self, sf: u8);

    fn carrier_sense(&mut self) -> CarrierSense;

    /// Transmits a fully-encoded on-air frame.
    fn send(&mut self, frame: &[u8]) -> SendResult;

    fn last_rssi(&self) -> i16;
    fn last_snr(&self) -> i16;
}

/// Maximum on-air frame the radio is assumed to support: the encoded
/// header plus the largest possible payload.
pub const MAX_FRAME_LEN: usize = crate::codec::HEADER_LEN + crate::MAX_PAYLOAD_LEN;

/// A single entry in the receive queue: the raw frame bytes plus the
/// signal-quality metadata the radio captured alongside it.
#[derive(Clone)]
pub struct ReceivedFrame {
    pub len: u8,
    pub buf: [u8; MAX_FRAME_LEN],
    pub rssi: i16,
    pub snr: i16,
    pub received_at: Instant,
}

impl ReceivedFrame {
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..usize::from(self.len)]
    }
}

/// Capacity of the receive queue: the bounded single-producer/single-
/// consumer channel between the radio's receive callback (the producer,
/// run from interrupt context) and the scheduler tick (the sole consumer).
pub const RX_QUEUE_CAPACITY: usize = 8;

pub type RxQueue = Queue<ReceivedFrame, RX_QUEUE_CAPACITY>;
pub type RxProducer<'a> = Producer<'a, ReceivedFrame, RX_QUEUE_CAPACITY>;
pub type RxConsumer<'a> = Consumer<'a, ReceivedFrame, RX_QUEUE_CAPACITY>;

/// Builds a frame record from a just-received buffer and enqueues it.
///
/// Called from the radio's receive callback. Returns `Err` (frame dropped,
/// no counter to increment here since this runs outside the scheduler) if
/// the queue is full or the frame is larger than the radio's maximum.
pub fn enqueue_received(
    producer: &mut RxProducer<'_>,
    data: &[u8],
    rssi: i16,
    snr: i16,
    received_at: Instant,
) -> Result<(), crate::Error> {
    if data.len() > MAX_FRAME_LEN {
        return Err(crate::Error::MalformedFrame);
    }
    let mut buf = [0u8; MAX_FRAME_LEN];
    buf[..data.len()].copy_from_slice(data);
    producer
        .enqueue(ReceivedFrame {
            len: data.len() as u8,
            buf,
            rssi,
            snr,
            received_at,
        })
        .map_err(|_| crate::Error::WindowFull)
}
