//! In-memory fakes backing the crate's own unit tests: a loopback-style
//! radio, a RAM-backed store, and a counter-driven RNG. Never compiled
//! outside `#[cfg(test)]`.

use heapless::Vec;

use crate::config::Config;
use crate::radio::{CarrierSense, Radio, RadioParams, SendResult, MAX_FRAME_LEN};
use crate::store::{Store, MAX_RECORD_LEN};
use crate::time::{Duration, Instant, Timer};
use rand_core::{CryptoRng, RngCore};

/// A radio double that records every frame handed to [`Radio::send`] and
/// never reports the channel busy.
#[derive(Default)]
pub struct LoopbackRadio {
    pub sent: Vec<Vec<u8, MAX_FRAME_LEN>, 16>,
    pub busy: bool,
    pub rssi: i16,
    pub snr: i16,
}

impl LoopbackRadio {
    pub fn new() -> Self {
        LoopbackRadio {
            sent: Vec::new(),
            busy: false,
            rssi: -70,
            snr: 6,
        }
    }
}

impl Radio for LoopbackRadio {
    fn init(&mut self, _params: RadioParams) -> Result<(), crate::Error> {
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
        if self.busy {
            return SendResult::Busy;
        }
        let mut buf: Vec<u8, MAX_FRAME_LEN> = Vec::new();
        if buf.extend_from_slice(frame).is_err() {
            return SendResult::Error;
        }
        if self.sent.push(buf).is_err() {
            return SendResult::Error;
        }
        SendResult::Ok
    }

    fn last_rssi(&self) -> i16 {
        self.rssi
    }

    fn last_snr(&self) -> i16 {
        self.snr
    }
}

/// A RAM-backed [`Store`], standing in for flash/EEPROM in tests.
#[derive(Default)]
pub struct MemoryStore {
    slots: Vec<(heapless::String<8>, Vec<u8, MAX_RECORD_LEN>), 8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore { slots: Vec::new() }
    }
}

impl Store for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8, MAX_RECORD_LEN>>, crate::Error> {
        Ok(self
            .slots
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.clone()))
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), crate::Error> {
        let mut stored: Vec<u8, MAX_RECORD_LEN> = Vec::new();
        stored
            .extend_from_slice(value)
            .map_err(|_| crate::Error::InvalidValue)?;
        let mut stored_key = heapless::String::new();
        stored_key
            .push_str(key)
            .map_err(|_| crate::Error::InvalidValue)?;
        if let Some(entry) = self.slots.iter_mut().find(|(k, _)| k.as_str() == key) {
            entry.1 = stored;
            return Ok(());
        }
        self.slots
            .push((stored_key, stored))
            .map_err(|_| crate::Error::TableFull)
    }

    fn remove(&mut self, key: &str) -> Result<(), crate::Error> {
        self.slots.retain(|(k, _)| k.as_str() != key);
        Ok(())
    }
}

/// A millisecond clock the test advances manually.
pub struct ManualClock {
    pub now_ms: core::cell::Cell<u32>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        ManualClock {
            now_ms: core::cell::Cell::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.set(self.now_ms.get().wrapping_add(by.as_millis()));
    }
}

impl Timer for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_raw_millis(self.now_ms.get())
    }
}

/// A non-cryptographic, fully deterministic RNG for reproducible tests.
pub struct StepRng(pub u64);

impl RngCore for StepRng {
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

impl CryptoRng for StepRng {}

/// A [`Config`] wiring the three fakes above together for scheduler tests.
pub struct TestConfig;

impl Config for TestConfig {
    type Timer = ManualClock;
    type Radio = LoopbackRadio;
    type Store = MemoryStore;
    type Rng = StepRng;
}
