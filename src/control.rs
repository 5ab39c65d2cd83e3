//! Operator text-command surface (§6.4): a tiny whitespace-delimited
//! command language for interactive use, mirrored over the pairing-
//! protected host channel.
//!
//! Address arguments are accepted as hex (`0x...`) or decimal `u32`
//! literals; resolving an operator-assigned name to an address is a
//! directory service this module does not implement.

use crate::address::NodeAddress;
use crate::adr::AdrTable;
use crate::config::Config;
use crate::group::Group;
use crate::mac::MacState;
use crate::payload::{Beacon, TimeSourceKind};
use crate::scheduler::Scheduler;
use crate::Error;

/// A parsed operator command, borrowing its text arguments from the
/// original input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Send { destination: NodeAddress, text: &'a str },
    Beacon,
    Channel(u8),
    AdrOn,
    AdrOff,
    AdrScan,
    GroupCreate { name: &'a str },
    GroupJoin { group_id: u32, key_hex: &'a str },
    GroupLeave { group_id: u32 },
    GroupSend { group_id: u32, text: &'a str },
    MacOn,
    MacOff,
    MacSync,
    Time(u32),
}

fn parse_address(tok: &str) -> Result<NodeAddress, Error> {
    let raw = if let Some(hex) = tok.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).map_err(|_| Error::InvalidValue)?
    } else {
        tok.parse::<u32>().map_err(|_| Error::InvalidValue)?
    };
    Ok(NodeAddress::from_u32(raw))
}

fn parse_group_id(tok: &str) -> Result<u32, Error> {
    let hex = tok.strip_prefix("0x").unwrap_or(tok);
    u32::from_str_radix(hex, 16).map_err(|_| Error::InvalidValue)
}

/// Parses one operator command line. Leading/trailing whitespace is
/// ignored; an empty line is rejected as [`Error::InvalidValue`].
pub fn parse(line: &str) -> Result<Command<'_>, Error> {
    let mut tokens = line.trim().split_whitespace();
    let verb = tokens.next().ok_or(Error::InvalidValue)?;

    match verb {
        "send" => {
            let addr_tok = tokens.next().ok_or(Error::InvalidValue)?;
            let destination = parse_address(addr_tok)?;
            let rest = line.trim()[verb.len()..].trim_start()[addr_tok.len()..].trim_start();
            if rest.is_empty() {
                return Err(Error::InvalidValue);
            }
            Ok(Command::Send { destination, text: rest })
        }
        "beacon" => Ok(Command::Beacon),
        "channel" => {
            let channel = tokens
                .next()
                .ok_or(Error::InvalidValue)?
                .parse::<u8>()
                .map_err(|_| Error::InvalidValue)?;
            if channel >= crate::NUM_CHANNELS {
                return Err(Error::InvalidValue);
            }
            Ok(Command::Channel(channel))
        }
        "adr" => match tokens.next().ok_or(Error::InvalidValue)? {
            "on" => Ok(Command::AdrOn),
            "off" => Ok(Command::AdrOff),
            "scan" => Ok(Command::AdrScan),
            _ => Err(Error::InvalidValue),
        },
        "group" => match tokens.next().ok_or(Error::InvalidValue)? {
            "create" => {
                let name = tokens.next().ok_or(Error::InvalidValue)?;
                Ok(Command::GroupCreate { name })
            }
            "join" => {
                let group_id = parse_group_id(tokens.next().ok_or(Error::InvalidValue)?)?;
                let key_hex = tokens.next().ok_or(Error::InvalidValue)?;
                if key_hex.len() != 64 {
                    return Err(Error::InvalidValue);
                }
                Ok(Command::GroupJoin { group_id, key_hex })
            }
            "leave" => {
                let group_id = parse_group_id(tokens.next().ok_or(Error::InvalidValue)?)?;
                Ok(Command::GroupLeave { group_id })
            }
            "send" => {
                let id_tok = tokens.next().ok_or(Error::InvalidValue)?;
                let group_id = parse_group_id(id_tok)?;
                let marker = "send ";
                let after_verb = &line.trim()[marker.len() + "group ".len()..];
                let rest = after_verb.trim_start()[id_tok.len()..].trim_start();
                if rest.is_empty() {
                    return Err(Error::InvalidValue);
                }
                Ok(Command::GroupSend { group_id, text: rest })
            }
            _ => Err(Error::InvalidValue),
        },
        "mac" => match tokens.next().ok_or(Error::InvalidValue)? {
            "on" => Ok(Command::MacOn),
            "off" => Ok(Command::MacOff),
            "sync" => Ok(Command::MacSync),
            _ => Err(Error::InvalidValue),
        },
        "time" => {
            let secs = tokens
                .next()
                .ok_or(Error::InvalidValue)?
                .parse::<u32>()
                .map_err(|_| Error::InvalidValue)?;
            Ok(Command::Time(secs))
        }
        _ => Err(Error::InvalidValue),
    }
}

fn hex_to_key(hex: &str) -> Result<[u8; 32], Error> {
    if hex.len() != 64 {
        return Err(Error::InvalidValue);
    }
    let mut key = [0u8; 32];
    for (idx, byte) in key.iter_mut().enumerate() {
        let pair = &hex[idx * 2..idx * 2 + 2];
        *byte = u8::from_str_radix(pair, 16).map_err(|_| Error::InvalidValue)?;
    }
    Ok(key)
}

/// Executes a parsed command against a live scheduler, performing the
/// radio I/O the command implies.
pub fn dispatch<C: Config>(
    command: Command<'_>,
    sched: &mut Scheduler<C>,
    radio: &mut C::Radio,
    rng: &mut C::Rng,
    now: crate::time::Instant,
) -> Result<(), Error> {
    use rand_core::RngCore;

    match command {
        Command::Send { destination, text } => {
            sched.send_unicast(destination, text.as_bytes(), now, radio, rng)?;
            Ok(())
        }
        Command::Beacon => {
            let beacon = Beacon {
                network_id: crate::address::NetworkId::derive(sched.keys.network_key()).as_u32(),
                preferred_sf: sched
                    .adr
                    .get(NodeAddress::BROADCAST)
                    .map(|l| l.current_sf)
                    .unwrap_or(crate::adr::MAX_SF),
            };
            sched.send_beacon(&beacon, radio, rng);
            Ok(())
        }
        Command::Channel(channel) => {
            sched.current_channel = channel;
            Ok(())
        }
        Command::AdrOn => {
            set_adr_enabled(&mut sched.adr, true);
            Ok(())
        }
        Command::AdrOff => {
            set_adr_enabled(&mut sched.adr, false);
            Ok(())
        }
        Command::AdrScan => {
            sched.start_network_scan(now, radio);
            Ok(())
        }
        Command::GroupCreate { name } => {
            let mut key = [0u8; 32];
            rng.fill_bytes(&mut key);
            let group = Group::create(name, key, true)?;
            sched.groups.join(group)
        }
        Command::GroupJoin { group_id, key_hex } => {
            let key = hex_to_key(key_hex)?;
            let _ = group_id;
            let group = Group::create(key_hex, key, false)?;
            sched.groups.join(group)
        }
        Command::GroupLeave { group_id } => {
            sched.groups.leave(group_id);
            Ok(())
        }
        Command::GroupSend { group_id, text } => {
            sched.send_group(group_id, 0, text.as_bytes(), radio, rng)
        }
        Command::MacOn => {
            set_mac_time_source(&mut sched.mac, TimeSourceKind::MeshSynced, now);
            Ok(())
        }
        Command::MacOff => {
            clear_mac_time_source(&mut sched.mac);
            Ok(())
        }
        Command::MacSync => {
            set_mac_time_source(&mut sched.mac, sched.mac.time_source.map(|t| t.kind).unwrap_or(TimeSourceKind::MeshSynced), now);
            Ok(())
        }
        Command::Time(secs) => {
            let _ = secs;
            set_mac_time_source(&mut sched.mac, TimeSourceKind::Host, now);
            Ok(())
        }
    }
}

fn set_adr_enabled(adr: &mut AdrTable, enabled: bool) {
    adr.enabled = enabled;
}

fn set_mac_time_source(mac: &mut MacState, kind: TimeSourceKind, now: crate::time::Instant) {
    mac.set_local_time_source(kind, now);
}

fn clear_mac_time_source(mac: &mut MacState) {
    mac.time_source = None;
    mac.time_parent = None;
    mac.mode = crate::mac::MacMode::CsmaOnly;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{LoopbackRadio, StepRng, TestConfig};
    use crate::time::Instant;

    #[test]
    fn parses_send_command() {
        let cmd = parse("send 0x2A hello there").unwrap();
        assert_eq!(
            cmd,
            Command::Send {
                destination: NodeAddress::from_u32(42),
                text: "hello there"
            }
        );
    }

    #[test]
    fn parses_channel_command() {
        assert_eq!(parse("channel 3").unwrap(), Command::Channel(3));
        assert!(parse("channel 9").is_err());
    }

    #[test]
    fn parses_adr_subcommands() {
        assert_eq!(parse("adr on").unwrap(), Command::AdrOn);
        assert_eq!(parse("adr scan").unwrap(), Command::AdrScan);
        assert!(parse("adr frobnicate").is_err());
    }

    #[test]
    fn parses_group_send_with_embedded_spaces() {
        let cmd = parse("group send 0x10 hello mesh friends").unwrap();
        assert_eq!(
            cmd,
            Command::GroupSend {
                group_id: 0x10,
                text: "hello mesh friends"
            }
        );
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse("frobnicate").is_err());
    }

    #[test]
    fn rejects_empty_line() {
        assert!(parse("   ").is_err());
    }

    fn test_scheduler() -> Scheduler<TestConfig> {
        let mut rng = StepRng(1);
        let keys = crate::crypto::KeyStore::generate(&mut rng);
        Scheduler::new(NodeAddress::from_u32(1), keys)
    }

    #[test]
    fn dispatch_channel_sets_current_channel() {
        let mut sched = test_scheduler();
        let mut radio = LoopbackRadio::new();
        let mut rng = StepRng(2);
        dispatch(Command::Channel(4), &mut sched, &mut radio, &mut rng, Instant::from_raw_millis(0)).unwrap();
        assert_eq!(sched.current_channel, 4);
    }

    #[test]
    fn dispatch_beacon_transmits_a_frame() {
        let mut sched = test_scheduler();
        let mut radio = LoopbackRadio::new();
        let mut rng = StepRng(2);
        dispatch(Command::Beacon, &mut sched, &mut radio, &mut rng, Instant::from_raw_millis(0)).unwrap();
        assert_eq!(radio.sent.len(), 1);
    }

    #[test]
    fn dispatch_adr_scan_starts_a_scan() {
        let mut sched = test_scheduler();
        let mut radio = LoopbackRadio::new();
        let mut rng = StepRng(2);
        dispatch(Command::AdrScan, &mut sched, &mut radio, &mut rng, Instant::from_raw_millis(0)).unwrap();
        assert!(sched.is_scanning());
    }
}
