//! Core networking stack for a LoRa mesh radio.
//!
//! This crate implements the on-air protocol, per-node AODV-style routing,
//! reliable delivery with adaptive retransmission, per-link adaptive data
//! rate, authenticated group messaging, and the time-synchronized hybrid
//! TDMA/CSMA medium-access layer that arbitrates a shared half-duplex
//! radio. All of it is driven by a single cooperative [`scheduler::Scheduler`]
//! tick; there is no threading and no blocking I/O.
//!
//! The crate is hardware- and platform-agnostic: callers provide a
//! [`radio::Radio`], a [`store::Store`], a [`time::Timer`], and a source of
//! randomness, bundled together via [`config::Config`].
//!
//! # Layout
//!
//! * [`codec`] — wire header framing (bit-exact, §6.3 of the design spec).
//! * [`payload`] — typed payload encode/decode for every packet type.
//! * [`crypto`] — AEAD envelope, keyed-hash signing, key lifecycle.
//! * [`address`] — node address and network id derivation.
//! * [`neighbor`] — per-peer, multi-interface link state.
//! * [`adr`] — per-link adaptive data rate negotiation.
//! * [`mac`] — hybrid TDMA/CSMA medium access and time-source election.
//! * [`routing`] — AODV-style on-demand routing.
//! * [`reliable`] — per-packet retry, adaptive RTO, in-flight window.
//! * [`group`] — authenticated multicast channels.
//! * [`radio`] / [`store`] — external hardware interfaces the core consumes.
//! * [`persist`] — on-disk record framing on top of [`store`].
//! * [`scheduler`] — the cooperative loop tying every component together.
//! * [`control`] — operator text-command surface.

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

#[macro_use]
mod utils;

pub mod address;
pub mod adr;
pub mod codec;
pub mod config;
pub mod control;
pub mod crypto;
mod error;
pub mod group;
pub mod mac;
pub mod neighbor;
pub mod payload;
pub mod persist;
pub mod radio;
pub mod reliable;
pub mod routing;
pub mod scheduler;
pub mod store;
pub mod time;

pub(crate) mod bytes;

pub use self::error::Error;

/// Protocol version carried in the low nibble of header byte 0. Frames
/// whose version does not match are dropped.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum payload length in bytes, matching the header's 2-byte
/// `payload_length` field constraint of "≤ 255".
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Number of application channels (`channel_id` is valid in `0..NUM_CHANNELS`).
pub const NUM_CHANNELS: u8 = 8;

#[cfg(test)]
mod test_support;
