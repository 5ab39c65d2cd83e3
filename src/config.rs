//! Stack configuration trait.

use crate::{radio::Radio, store::Store, time::Timer};
use rand_core::RngCore;

/// Trait for meshcore stack configurations.
///
/// This trait ties together the platform-provided capability types the
/// stack runs on top of. Every application instantiates exactly one type
/// implementing it and hands that type to [`crate::scheduler::Scheduler`].
pub trait Config {
    /// A monotonic millisecond time source.
    type Timer: Timer;

    /// The LoRa radio driver.
    type Radio: Radio;

    /// The persistent key/value store backing identity, group membership
    /// and replay history.
    type Store: Store;

    /// Source of randomness for nonce generation and backoff jitter.
    type Rng: RngCore;
}
