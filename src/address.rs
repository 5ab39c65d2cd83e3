//! Node addresses and network identifiers.

use core::fmt;

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;

/// A 32-bit node address.
///
/// `INVALID` and `BROADCAST` are reserved and never assigned to a real node.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeAddress(u32);

impl NodeAddress {
    pub const INVALID: Self = NodeAddress(0x0000_0000);
    pub const BROADCAST: Self = NodeAddress(0xFFFF_FFFF);

    /// A constant fallback address used if every derivation path and
    /// collision-avoidance attempt is exhausted. Not reserved by the wire
    /// format, but chosen to be vanishingly unlikely to collide in practice.
    pub const FALLBACK: Self = NodeAddress(0x5A5A_5A5A);

    pub const fn from_u32(raw: u32) -> Self {
        NodeAddress(raw)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn is_reserved(&self) -> bool {
        self.0 == Self::INVALID.0 || self.0 == Self::BROADCAST.0
    }

    pub const fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST.0
    }

    /// Derives a stable node address from a hardware-unique identifier.
    ///
    /// The identifier is hashed with BLAKE2b and the low 32 bits of the
    /// digest are taken, with collision-avoidance falling back to
    /// [`NodeAddress::FALLBACK`] on the (astronomically unlikely) event
    /// that this produces a reserved value.
    pub fn derive_from_hw_id(hw_id: &[u8]) -> Self {
        Self::derive(b"meshcore-node-addr-hwid", hw_id)
    }

    /// Derives a stable node address from the long-term public key, used
    /// when no hardware-unique identifier is available.
    pub fn derive_from_public_key(public_key: &[u8; 32]) -> Self {
        Self::derive(b"meshcore-node-addr-pubkey", public_key)
    }

    fn derive(domain: &[u8], material: &[u8]) -> Self {
        let mut hasher = Blake2bVar::new(8).expect("valid blake2b output size");
        hasher.update(domain);
        hasher.update(material);
        let mut out = [0u8; 8];
        hasher.finalize_variable(&mut out).expect("output buffer sized correctly");
        let candidate = NodeAddress(u32::from_le_bytes([out[0], out[1], out[2], out[3]]));
        if candidate.is_reserved() {
            Self::FALLBACK
        } else {
            candidate
        }
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A 32-bit network tag, used only for opportunistic filtering of
/// cross-network traffic. Never authoritative: a matching tag does not
/// prove membership, and a non-matching tag is not itself rejected by the
/// wire format (only by policy above it).
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct NetworkId(u32);

impl NetworkId {
    pub const fn from_u32(raw: u32) -> Self {
        NetworkId(raw)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Derives the network id as the first four bytes of
    /// `BLAKE2b("meshcore-network-id" || network_key)`.
    pub fn derive(network_key: &[u8; 32]) -> Self {
        let mut hasher = Blake2bVar::new(4).expect("valid blake2b output size");
        hasher.update(b"meshcore-network-id");
        hasher.update(network_key);
        let mut out = [0u8; 4];
        hasher.finalize_variable(&mut out).expect("output buffer sized correctly");
        NetworkId(u32::from_le_bytes(out))
    }
}

impl fmt::Debug for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net:0x{:08X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_address_is_never_reserved() {
        let addr = NodeAddress::derive_from_hw_id(b"some-hardware-serial");
        assert!(!addr.is_reserved());
    }

    #[test]
    fn same_input_derives_same_address() {
        let a = NodeAddress::derive_from_public_key(&[7u8; 32]);
        let b = NodeAddress::derive_from_public_key(&[7u8; 32]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_keys_derive_to_different_network_ids() {
        let a = NetworkId::derive(&[1u8; 32]);
        let b = NetworkId::derive(&[2u8; 32]);
        assert_ne!(a, b);
    }
}
