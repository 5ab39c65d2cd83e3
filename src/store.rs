//! Persistent key/value storage interface the core consumes (§6.2).
//!
//! Flash wear-levelling and the physical storage medium are a hard
//! non-goal; this module only defines the small atomic-replace contract
//! the core relies on to survive a reboot with its identity, group
//! memberships and replay history intact.

use heapless::Vec;

/// Maximum size of a single stored record.
pub const MAX_RECORD_LEN: usize = 128;

/// Key under which the node's long-term identity (private key, derived
/// address, monotonic nonce counter) is stored. File name is an external
/// migration contract, preserved verbatim.
pub const KEY_IDENTITY: &str = "keys";

/// Key under which the group membership table is stored. File name is an
/// external migration contract, preserved verbatim.
pub const KEY_GROUPS: &str = "groups";

/// Key under which the replay-protection history (per-group rx sequence
/// high-water marks) is stored. File name is an external migration
/// contract, preserved verbatim.
pub const KEY_HISTORY: &str = "history";

/// A byte-oriented persistent key/value store.
///
/// Implementations must make `put` atomic with respect to power loss: a
/// reader must never observe a partially-written record. Keys are short,
/// static ASCII strings (the `KEY_*` constants above); values are opaque
/// byte records up to [`MAX_RECORD_LEN`].
pub trait Store {
    /// Reads the record stored under `key`, if any.
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8, MAX_RECORD_LEN>>, crate::Error>;

    /// Atomically replaces the record stored under `key`.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), crate::Error>;

    /// Removes the record stored under `key`, if any.
    fn remove(&mut self, key: &str) -> Result<(), crate::Error>;
}
