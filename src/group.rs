//! Authenticated multicast channels (§4.H).
//!
//! Group messages are unicast-framed but addressed to broadcast;
//! membership is proven solely by possession of the group key. Framing
//! reuses the AEAD primitive from [`crate::crypto`] but with its own
//! header-as-AAD layout and nonce composition, since the group header
//! travels in cleartext alongside the ciphertext.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use chacha20poly1305::{AeadInPlace, KeyInit, XChaCha20Poly1305, XNonce};
use heapless::Vec;

use crate::address::NodeAddress;
use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::time::Instant;
use crate::Error;

/// Bound on concurrently-joined groups.
pub const MAX_GROUPS: usize = 8;

/// Encoded length of the cleartext group header.
pub const GROUP_HEADER_LEN: usize = 4 + 4 + 4 + 2 + 1 + 1;

/// Maximum group message body.
pub const MAX_GROUP_BODY: usize = crate::MAX_PAYLOAD_LEN - GROUP_HEADER_LEN - 16;

/// The cleartext header of a group frame, used as AEAD associated data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GroupHeader {
    pub group_id: u32,
    pub sequence: u32,
    pub sender: NodeAddress,
    pub payload_len: u16,
    pub msg_type: u8,
    pub reserved: u8,
}

impl ToBytes for GroupHeader {
    fn to_bytes(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.write_u32_le(self.group_id)?;
        w.write_u32_le(self.sequence)?;
        w.write_u32_le(self.sender.as_u32())?;
        w.write_u16_le(self.payload_len)?;
        w.write_u8(self.msg_type)?;
        w.write_u8(self.reserved)
    }
}

impl<'a> FromBytes<'a> for GroupHeader {
    fn from_bytes(r: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(GroupHeader {
            group_id: r.read_u32_le()?,
            sequence: r.read_u32_le()?,
            sender: NodeAddress::from_u32(r.read_u32_le()?),
            payload_len: r.read_u16_le()?,
            msg_type: r.read_u8()?,
            reserved: r.read_u8()?,
        })
    }
}

/// A joined group: shared key, name, sequence counters and membership
/// metadata.
pub struct Group {
    pub group_id: u32,
    pub name: heapless::String<32>,
    key: [u8; 32],
    pub tx_seq: u32,
    pub rx_seq: u32,
    pub admin: bool,
    pub last_activity: Option<Instant>,
}

impl Group {
    /// `group_id` = first four bytes of `BLAKE2b(name ‖ key)`.
    pub fn create(name: &str, key: [u8; 32], admin: bool) -> Result<Self, Error> {
        let mut hasher = Blake2bVar::new(4).expect("valid blake2b output size");
        hasher.update(name.as_bytes());
        hasher.update(&key);
        let mut out = [0u8; 4];
        hasher
            .finalize_variable(&mut out)
            .expect("output buffer sized correctly");
        let group_id = u32::from_le_bytes(out);
        let mut stored_name = heapless::String::new();
        stored_name
            .push_str(name)
            .map_err(|_| Error::InvalidValue)?;
        Ok(Group {
            group_id,
            name: stored_name,
            key,
            tx_seq: 0,
            rx_seq: 0,
            admin,
            last_activity: None,
        })
    }

    /// Reconstructs a joined group from a persisted record, where the
    /// human-readable name was not carried across reboot (see
    /// [`crate::persist`]).
    pub fn from_parts(group_id: u32, key: [u8; 32], tx_seq: u32, rx_seq: u32, admin: bool) -> Self {
        Group {
            group_id,
            name: heapless::String::new(),
            key,
            tx_seq,
            rx_seq,
            admin,
            last_activity: None,
        }
    }

    /// The raw group key, for handing to [`crate::persist`] when writing
    /// the group-membership record. Not exposed outside the crate.
    pub(crate) fn key(&self) -> &[u8; 32] {
        &self.key
    }

    fn nonce(sequence: u32, group_id: u32) -> [u8; 24] {
        let mut nonce = [0u8; 24];
        nonce[0..4].copy_from_slice(&sequence.to_le_bytes());
        nonce[4..8].copy_from_slice(&group_id.to_be_bytes());
        nonce
    }

    /// Seals `body` for broadcast into this group, bumping `tx_seq`.
    pub fn seal(
        &mut self,
        sender: NodeAddress,
        msg_type: u8,
        body: &[u8],
        out: &mut Vec<u8, { GROUP_HEADER_LEN + MAX_GROUP_BODY + 16 }>,
    ) -> Result<(), Error> {
        if body.len() > MAX_GROUP_BODY {
            return Err(Error::InvalidValue);
        }
        self.tx_seq = self.tx_seq.wrapping_add(1);
        let header = GroupHeader {
            group_id: self.group_id,
            sequence: self.tx_seq,
            sender,
            payload_len: body.len() as u16,
            msg_type,
            reserved: 0,
        };
        let mut header_bytes = [0u8; GROUP_HEADER_LEN];
        header.to_bytes(&mut ByteWriter::new(&mut header_bytes))?;

        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let nonce = Self::nonce(header.sequence, header.group_id);
        let mut buf: Vec<u8, { MAX_GROUP_BODY + 16 }> = Vec::new();
        buf.extend_from_slice(body).map_err(|_| Error::InvalidValue)?;
        cipher
            .encrypt_in_place(XNonce::from_slice(&nonce), &header_bytes, &mut buf)
            .map_err(|_| Error::AuthFailure)?;

        out.clear();
        out.extend_from_slice(&header_bytes)
            .map_err(|_| Error::InvalidValue)?;
        out.extend_from_slice(&buf).map_err(|_| Error::InvalidValue)
    }

    /// Opens a group frame, enforcing the replay rule: `sequence` must be
    /// strictly greater than the last accepted sequence for this group
    /// (§8 property 3). On success, advances `rx_seq`.
    pub fn open(
        &mut self,
        frame: &[u8],
        now: Instant,
        out: &mut Vec<u8, MAX_GROUP_BODY>,
    ) -> Result<GroupHeader, Error> {
        if frame.len() < GROUP_HEADER_LEN + 16 {
            return Err(Error::MalformedFrame);
        }
        let (header_bytes, ciphertext) = frame.split_at(GROUP_HEADER_LEN);
        let header = GroupHeader::from_bytes(&mut ByteReader::new(header_bytes))?;
        if header.group_id != self.group_id {
            return Err(Error::MalformedFrame);
        }
        if header.sequence <= self.rx_seq {
            return Err(Error::Duplicate);
        }

        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let nonce = Self::nonce(header.sequence, header.group_id);
        out.clear();
        out.extend_from_slice(ciphertext)
            .map_err(|_| Error::AuthFailure)?;
        cipher
            .decrypt_in_place(XNonce::from_slice(&nonce), header_bytes, out)
            .map_err(|_| Error::AuthFailure)?;

        self.rx_seq = header.sequence;
        self.last_activity = Some(now);
        Ok(header)
    }
}

/// Bounded table of joined groups.
#[derive(Default)]
pub struct GroupTable {
    groups: Vec<Group, MAX_GROUPS>,
}

impl GroupTable {
    pub fn new() -> Self {
        GroupTable { groups: Vec::new() }
    }

    pub fn join(&mut self, group: Group) -> Result<(), Error> {
        if self.groups.iter().any(|g| g.group_id == group.group_id) {
            return Err(Error::InvalidValue);
        }
        self.groups.push(group).map_err(|_| Error::TableFull)
    }

    pub fn leave(&mut self, group_id: u32) {
        self.groups.retain(|g| g.group_id != group_id);
    }

    pub fn get_mut(&mut self, group_id: u32) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.group_id == group_id)
    }

    pub fn iterate(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }
}
