//! Crypto envelope: AEAD sealing, keyed-hash signing, and key lifecycle
//! (§4.B).
//!
//! Low-level primitives (the AEAD cipher, BLAKE2b, X25519) are named only
//! abstractly by the design; any library providing them is acceptable.
//! This module reaches for `chacha20poly1305`'s heapless-buffer mode so
//! sealing never needs an allocator, and `blake2` for both address
//! derivation (see [`crate::address`]) and the detached signing tag.

use blake2::digest::{Mac, Update, VariableOutput};
use blake2::{Blake2bMac, Blake2bVar};
use chacha20poly1305::{AeadInPlace, KeyInit, XChaCha20Poly1305, XNonce};
use heapless::Vec;
use rand_core::RngCore;
use zeroize::Zeroize;

use crate::Error;

/// Length of the AEAD tag appended to every sealed payload.
pub const TAG_LEN: usize = 16;

/// Length of the nonce prefixed to every sealed payload:
/// `source_addr (4B) ‖ monotonic_counter (8B) ‖ random (12B)`.
pub const NONCE_LEN: usize = 24;

/// Length of the detached out-of-band signing tag.
pub const SIGN_TAG_LEN: usize = 64;

/// Maximum plaintext payload this module will seal or open.
pub const MAX_SEALED_PAYLOAD: usize = crate::MAX_PAYLOAD_LEN;

/// Maximum ciphertext-plus-tag length, i.e. the in-place working buffer
/// size needed during either direction of the AEAD transform.
pub const MAX_CIPHERTEXT_LEN: usize = MAX_SEALED_PAYLOAD + TAG_LEN;

/// Maximum full envelope length: `nonce ‖ ciphertext ‖ tag`.
pub const MAX_ENVELOPE_LEN: usize = NONCE_LEN + MAX_CIPHERTEXT_LEN;

/// Working buffer for ciphertext-plus-tag, sized for in-place AEAD ops.
pub type CipherBuf = Vec<u8, MAX_CIPHERTEXT_LEN>;

/// Buffer holding a full sealed envelope.
pub type EnvelopeBuf = Vec<u8, MAX_ENVELOPE_LEN>;

/// Long-term key material and the AEAD nonce counter.
///
/// Wiped on drop; callers must not copy the raw key bytes out of this
/// type except through the narrow accessors below.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct KeyStore {
    private_key: [u8; 32],
    public_key: [u8; 32],
    network_key: [u8; 32],
    nonce_counter: u64,
}

impl KeyStore {
    /// Generates a fresh identity and network key from `rng`, for first
    /// boot with no stored state.
    pub fn generate(rng: &mut impl RngCore) -> Self {
        let mut private_key = [0u8; 32];
        rng.fill_bytes(&mut private_key);
        let mut network_key = [0u8; 32];
        rng.fill_bytes(&mut network_key);
        let public_key = derive_public_key(&private_key);
        KeyStore {
            private_key,
            public_key,
            network_key,
            nonce_counter: 0,
        }
    }

    /// Reconstructs a `KeyStore` from the record loaded from [`crate::store::Store`].
    pub fn from_parts(private_key: [u8; 32], network_key: [u8; 32], nonce_counter: u64) -> Self {
        let public_key = derive_public_key(&private_key);
        KeyStore {
            private_key,
            public_key,
            network_key,
            nonce_counter,
        }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// The raw private key, for handing to [`crate::persist`] when writing
    /// the identity record. Not exposed outside the crate.
    pub(crate) fn private_key(&self) -> &[u8; 32] {
        &self.private_key
    }

    pub fn network_key(&self) -> &[u8; 32] {
        &self.network_key
    }

    pub fn nonce_counter(&self) -> u64 {
        self.nonce_counter
    }

    /// Replaces the network key with raw bytes supplied by an operator.
    pub fn set_network_key(&mut self, key: [u8; 32]) {
        self.network_key = key;
    }

    /// Replaces the network key, deriving it from a passphrase via
    /// BLAKE2b with a domain tag.
    pub fn set_network_key_from_passphrase(&mut self, passphrase: &[u8]) {
        let mut hasher = Blake2bVar::new(32).expect("valid blake2b output size");
        hasher.update(b"meshcore-network-key-passphrase");
        hasher.update(passphrase);
        hasher
            .finalize_variable(&mut self.network_key)
            .expect("output buffer sized correctly");
    }

    /// Seals `plaintext` under the network key, returning
    /// `nonce ‖ ciphertext ‖ tag`. Advances and persists the nonce
    /// counter; returns [`Error::NonceWrap`] instead of wrapping, which
    /// is fatal and requires a rekey before further encryption.
    pub fn seal(
        &mut self,
        source: crate::address::NodeAddress,
        rng: &mut impl RngCore,
        plaintext: &[u8],
        out: &mut EnvelopeBuf,
    ) -> Result<(), Error> {
        let next_counter = self
            .nonce_counter
            .checked_add(1)
            .ok_or(Error::NonceWrap)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes[0..4].copy_from_slice(&source.as_u32().to_le_bytes());
        nonce_bytes[4..12].copy_from_slice(&self.nonce_counter.to_le_bytes());
        rng.fill_bytes(&mut nonce_bytes[12..24]);

        let cipher = XChaCha20Poly1305::new(self.network_key.as_slice().into());
        let mut ciphertext_buf: CipherBuf = Vec::new();
        ciphertext_buf
            .extend_from_slice(plaintext)
            .map_err(|_| Error::InvalidValue)?;
        cipher
            .encrypt_in_place(XNonce::from_slice(&nonce_bytes), b"", &mut ciphertext_buf)
            .map_err(|_| Error::AuthFailure)?;

        out.clear();
        out.extend_from_slice(&nonce_bytes)
            .map_err(|_| Error::InvalidValue)?;
        out.extend_from_slice(&ciphertext_buf)
            .map_err(|_| Error::InvalidValue)?;

        self.nonce_counter = next_counter;
        Ok(())
    }

    /// Opens a `nonce ‖ ciphertext ‖ tag` envelope sealed by [`KeyStore::seal`].
    ///
    /// A failed tag (wrong key, or mutated ciphertext) returns
    /// [`Error::AuthFailure`]; there is no retry.
    pub fn open(&self, sealed: &[u8], out: &mut CipherBuf) -> Result<(), Error> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::AuthFailure);
        }
        let (nonce_bytes, rest) = sealed.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new(self.network_key.as_slice().into());
        out.clear();
        out.extend_from_slice(rest).map_err(|_| Error::AuthFailure)?;
        cipher
            .decrypt_in_place(XNonce::from_slice(nonce_bytes), b"", out)
            .map_err(|_| Error::AuthFailure)
    }

    /// Computes the detached 64-byte out-of-band authenticity tag for
    /// `frame`, keyed by the long-term private key.
    pub fn sign(&self, frame: &[u8]) -> [u8; SIGN_TAG_LEN] {
        let mut mac = Blake2bMac::<blake2::digest::consts::U64>::new_from_slice(&self.private_key)
            .expect("private key is a valid MAC key length");
        mac.update(frame);
        let result = mac.finalize().into_bytes();
        let mut tag = [0u8; SIGN_TAG_LEN];
        tag.copy_from_slice(&result);
        tag
    }

    /// Verifies a detached signing tag produced by [`KeyStore::sign`].
    pub fn verify(&self, frame: &[u8], tag: &[u8; SIGN_TAG_LEN]) -> bool {
        self.sign(frame) == *tag
    }
}

fn derive_public_key(private_key: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Blake2bVar::new(32).expect("valid blake2b output size");
    hasher.update(b"meshcore-pubkey-derivation");
    hasher.update(private_key);
    let mut out = [0u8; 32];
    hasher
        .finalize_variable(&mut out)
        .expect("output buffer sized correctly");
    out
}
