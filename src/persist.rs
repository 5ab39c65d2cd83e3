//! On-disk record framing for the store (§6.2): each of the three
//! [`crate::store::Store`] keys holds a 4-byte magic followed by a
//! count-prefixed array of fixed-width entries, replaced atomically by
//! `Store::put`. Splitting group membership (rarely written) from replay
//! history (written on every accepted group message) avoids rewriting key
//! material on the hot receive path.

use crate::bytes::{ByteReader, ByteWriter};
use crate::crypto::KeyStore;
use crate::group::{Group, GroupTable};
use crate::store::{Store, KEY_GROUPS, KEY_HISTORY, KEY_IDENTITY, MAX_RECORD_LEN};
use crate::Error;

const MAGIC_IDENTITY: [u8; 4] = *b"KEYS";
const MAGIC_GROUPS: [u8; 4] = *b"GRPS";
const MAGIC_HISTORY: [u8; 4] = *b"HIST";

/// Bound on persisted group-membership entries. Smaller than the in-RAM
/// [`crate::group::MAX_GROUPS`]: a single [`MAX_RECORD_LEN`]-byte record
/// cannot hold more than this many `(id, key, admin, tx_seq)` tuples.
/// Groups beyond this bound still work for the current power cycle; they
/// are just not guaranteed to survive a reboot.
pub const MAX_PERSISTED_GROUPS: usize = 3;

const GROUP_ENTRY_LEN: usize = 4 + 32 + 1 + 4; // group_id, key, admin, tx_seq
const HISTORY_ENTRY_LEN: usize = 4 + 4; // group_id, rx_seq

const _: () = assert!(5 + MAX_PERSISTED_GROUPS * GROUP_ENTRY_LEN <= MAX_RECORD_LEN);

fn rewrite_private_key(private_key: [u8; 32], network_key: [u8; 32], nonce_counter: u64) -> KeyStore {
    KeyStore::from_parts(private_key, network_key, nonce_counter)
}

/// Writes the node's long-term identity record.
pub fn save_identity(store: &mut impl Store, keys: &KeyStore) -> Result<(), Error> {
    let mut buf = [0u8; MAX_RECORD_LEN];
    let mut w = ByteWriter::new(&mut buf);
    w.write_slice(&MAGIC_IDENTITY)?;
    w.write_slice(keys.private_key())?;
    w.write_slice(keys.network_key())?;
    w.write_u64_le(keys.nonce_counter())?;
    let written = MAX_RECORD_LEN - w.space_left();
    store.put(KEY_IDENTITY, &buf[..written])
}

/// Loads the node's long-term identity record, if one was ever saved.
pub fn load_identity(store: &mut impl Store) -> Result<Option<KeyStore>, Error> {
    let Some(record) = store.get(KEY_IDENTITY)? else {
        return Ok(None);
    };
    let mut r = ByteReader::new(&record);
    let magic: [u8; 4] = r.read_array()?;
    if magic != MAGIC_IDENTITY {
        return Err(Error::MalformedFrame);
    }
    let private_key: [u8; 32] = r.read_array()?;
    let network_key: [u8; 32] = r.read_array()?;
    let nonce_counter = r.read_u64_le()?;
    Ok(Some(rewrite_private_key(private_key, network_key, nonce_counter)))
}

/// Writes the group-membership record, truncating silently to
/// [`MAX_PERSISTED_GROUPS`] entries if more groups are joined.
pub fn save_groups(store: &mut impl Store, groups: &GroupTable) -> Result<(), Error> {
    let mut buf = [0u8; MAX_RECORD_LEN];
    let mut w = ByteWriter::new(&mut buf);
    w.write_slice(&MAGIC_GROUPS)?;
    let count = groups.iterate().take(MAX_PERSISTED_GROUPS).count();
    w.write_u8(count as u8)?;
    for group in groups.iterate().take(MAX_PERSISTED_GROUPS) {
        w.write_u32_le(group.group_id)?;
        w.write_slice(group.key())?;
        w.write_u8(group.admin as u8)?;
        w.write_u32_le(group.tx_seq)?;
    }
    let written = MAX_RECORD_LEN - w.space_left();
    store.put(KEY_GROUPS, &buf[..written])
}

/// Loads the group-membership record into a fresh [`GroupTable`].
/// `rx_seq` for each loaded group starts at zero; call [`load_history`]
/// afterwards to restore replay-protection state.
pub fn load_groups(store: &mut impl Store) -> Result<GroupTable, Error> {
    let mut table = GroupTable::new();
    let Some(record) = store.get(KEY_GROUPS)? else {
        return Ok(table);
    };
    let mut r = ByteReader::new(&record);
    let magic: [u8; 4] = r.read_array()?;
    if magic != MAGIC_GROUPS {
        return Err(Error::MalformedFrame);
    }
    let count = r.read_u8()?;
    for _ in 0..count {
        let group_id = r.read_u32_le()?;
        let key: [u8; 32] = r.read_array()?;
        let admin = r.read_u8()? != 0;
        let tx_seq = r.read_u32_le()?;
        let _ = table.join(Group::from_parts(group_id, key, tx_seq, 0, admin));
    }
    Ok(table)
}

/// Writes the per-group replay-protection high-water marks.
pub fn save_history(store: &mut impl Store, groups: &GroupTable) -> Result<(), Error> {
    let mut buf = [0u8; MAX_RECORD_LEN];
    let mut w = ByteWriter::new(&mut buf);
    w.write_slice(&MAGIC_HISTORY)?;
    let max_entries = (MAX_RECORD_LEN - 5) / HISTORY_ENTRY_LEN;
    let count = groups.iterate().take(max_entries).count();
    w.write_u8(count as u8)?;
    for group in groups.iterate().take(max_entries) {
        w.write_u32_le(group.group_id)?;
        w.write_u32_le(group.rx_seq)?;
    }
    let written = MAX_RECORD_LEN - w.space_left();
    store.put(KEY_HISTORY, &buf[..written])
}

/// Restores replay-protection high-water marks into an already-loaded
/// [`GroupTable`] (see [`load_groups`]).
pub fn load_history(store: &mut impl Store, groups: &mut GroupTable) -> Result<(), Error> {
    let Some(record) = store.get(KEY_HISTORY)? else {
        return Ok(());
    };
    let mut r = ByteReader::new(&record);
    let magic: [u8; 4] = r.read_array()?;
    if magic != MAGIC_HISTORY {
        return Err(Error::MalformedFrame);
    }
    let count = r.read_u8()?;
    for _ in 0..count {
        let group_id = r.read_u32_le()?;
        let rx_seq = r.read_u32_le()?;
        if let Some(group) = groups.get_mut(group_id) {
            group.rx_seq = group.rx_seq.max(rx_seq);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MapStore {
        slots: heapless::Vec<(heapless::String<8>, heapless::Vec<u8, MAX_RECORD_LEN>), 8>,
    }

    impl Store for MapStore {
        fn get(&mut self, key: &str) -> Result<Option<heapless::Vec<u8, MAX_RECORD_LEN>>, Error> {
            Ok(self
                .slots
                .iter()
                .find(|(k, _)| k.as_str() == key)
                .map(|(_, v)| v.clone()))
        }

        fn put(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
            let mut stored: heapless::Vec<u8, MAX_RECORD_LEN> = heapless::Vec::new();
            stored.extend_from_slice(value).map_err(|_| Error::InvalidValue)?;
            let mut stored_key = heapless::String::new();
            stored_key.push_str(key).map_err(|_| Error::InvalidValue)?;
            if let Some(entry) = self.slots.iter_mut().find(|(k, _)| k.as_str() == key) {
                entry.1 = stored;
                return Ok(());
            }
            self.slots.push((stored_key, stored)).map_err(|_| Error::TableFull)
        }

        fn remove(&mut self, key: &str) -> Result<(), Error> {
            self.slots.retain(|(k, _)| k.as_str() != key);
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

    #[test]
    fn identity_round_trips() {
        let mut store = MapStore::default();
        let mut rng = StepRng(1);
        let keys = KeyStore::generate(&mut rng);
        save_identity(&mut store, &keys).unwrap();
        let loaded = load_identity(&mut store).unwrap().expect("identity present");
        assert_eq!(loaded.public_key(), keys.public_key());
        assert_eq!(loaded.network_key(), keys.network_key());
    }

    #[test]
    fn missing_identity_returns_none() {
        let mut store = MapStore::default();
        assert!(load_identity(&mut store).unwrap().is_none());
    }

    #[test]
    fn groups_and_history_round_trip() {
        let mut store = MapStore::default();
        let mut table = GroupTable::new();
        let mut g = Group::create("friends", [7u8; 32], true).unwrap();
        g.tx_seq = 3;
        g.rx_seq = 9;
        let group_id = g.group_id;
        table.join(g).unwrap();

        save_groups(&mut store, &table).unwrap();
        save_history(&mut store, &table).unwrap();

        let mut loaded = load_groups(&mut store).unwrap();
        load_history(&mut store, &mut loaded).unwrap();

        let restored = loaded.get_mut(group_id).expect("group present");
        assert_eq!(restored.tx_seq, 3);
        assert_eq!(restored.rx_seq, 9);
        assert!(restored.admin);
    }
}
