//! Typed payload encode/decode for every packet type.
//!
//! Each payload is itself a bit-exact little-endian wire contract (§6.3),
//! decoded only after the enclosing header has already passed the
//! structural checks in [`crate::codec`].

use crate::address::NodeAddress;
use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::Error;

/// `ROUTE_REQ` payload: broadcast route discovery.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RouteReq {
    pub originator: NodeAddress,
    pub target: NodeAddress,
    pub request_id: u32,
    pub hop_count: u8,
}

impl ToBytes for RouteReq {
    fn to_bytes(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.write_u32_le(self.originator.as_u32())?;
        w.write_u32_le(self.target.as_u32())?;
        w.write_u32_le(self.request_id)?;
        w.write_u8(self.hop_count)
    }
}

impl<'a> FromBytes<'a> for RouteReq {
    fn from_bytes(r: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(RouteReq {
            originator: NodeAddress::from_u32(r.read_u32_le()?),
            target: NodeAddress::from_u32(r.read_u32_le()?),
            request_id: r.read_u32_le()?,
            hop_count: r.read_u8()?,
        })
    }
}

/// `ROUTE_REP` payload: unicast reply along the reverse path.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RouteRep {
    pub originator: NodeAddress,
    pub destination: NodeAddress,
    pub hop_count: u8,
    pub quality: u8,
}

impl ToBytes for RouteRep {
    fn to_bytes(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.write_u32_le(self.originator.as_u32())?;
        w.write_u32_le(self.destination.as_u32())?;
        w.write_u8(self.hop_count)?;
        w.write_u8(self.quality)
    }
}

impl<'a> FromBytes<'a> for RouteRep {
    fn from_bytes(r: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(RouteRep {
            originator: NodeAddress::from_u32(r.read_u32_le()?),
            destination: NodeAddress::from_u32(r.read_u32_le()?),
            hop_count: r.read_u8()?,
            quality: r.read_u8()?,
        })
    }
}

/// `ROUTE_ERR` payload: reports an unreachable destination and the next
/// hop that failed to deliver to it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RouteErr {
    pub unreachable: NodeAddress,
    pub failed_next_hop: NodeAddress,
}

impl ToBytes for RouteErr {
    fn to_bytes(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.write_u32_le(self.unreachable.as_u32())?;
        w.write_u32_le(self.failed_next_hop.as_u32())
    }
}

impl<'a> FromBytes<'a> for RouteErr {
    fn from_bytes(r: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(RouteErr {
            unreachable: NodeAddress::from_u32(r.read_u32_le()?),
            failed_next_hop: NodeAddress::from_u32(r.read_u32_le()?),
        })
    }
}

/// `HELLO` payload: a liveness probe to a specific next hop, carrying no
/// additional fields beyond the common header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Hello;

impl ToBytes for Hello {
    fn to_bytes(&self, _w: &mut ByteWriter<'_>) -> Result<(), Error> {
        Ok(())
    }
}

impl<'a> FromBytes<'a> for Hello {
    fn from_bytes(_r: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(Hello)
    }
}

/// `ACK` payload: acknowledges a specific `packet_id`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    pub acked_packet_id: u16,
}

impl ToBytes for Ack {
    fn to_bytes(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.write_u16_le(self.acked_packet_id)
    }
}

impl<'a> FromBytes<'a> for Ack {
    fn from_bytes(r: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(Ack {
            acked_packet_id: r.read_u16_le()?,
        })
    }
}

/// `TELEMETRY` payload: battery millivolts, uptime seconds, free queue slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Telemetry {
    pub battery_mv: u16,
    pub uptime_secs: u32,
    pub free_slots: u8,
}

impl ToBytes for Telemetry {
    fn to_bytes(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.write_u16_le(self.battery_mv)?;
        w.write_u32_le(self.uptime_secs)?;
        w.write_u8(self.free_slots)
    }
}

impl<'a> FromBytes<'a> for Telemetry {
    fn from_bytes(r: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(Telemetry {
            battery_mv: r.read_u16_le()?,
            uptime_secs: r.read_u32_le()?,
            free_slots: r.read_u8()?,
        })
    }
}

/// `BEACON` payload: node presence advertisement.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Beacon {
    pub network_id: u32,
    pub preferred_sf: u8,
}

impl ToBytes for Beacon {
    fn to_bytes(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.write_u32_le(self.network_id)?;
        w.write_u8(self.preferred_sf)
    }
}

impl<'a> FromBytes<'a> for Beacon {
    fn from_bytes(r: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(Beacon {
            network_id: r.read_u32_le()?,
            preferred_sf: r.read_u8()?,
        })
    }
}

/// Time source kind, ordered best-to-worst per §4.E (`GPS < NTP < HOST <
/// MESH_SYNCED < CRYSTAL`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TimeSourceKind {
    Gps = 0,
    Ntp = 1,
    Host = 2,
    MeshSynced = 3,
    Crystal = 4,
}

impl TimeSourceKind {
    fn from_u8(v: u8) -> Result<Self, Error> {
        Ok(match v {
            0 => TimeSourceKind::Gps,
            1 => TimeSourceKind::Ntp,
            2 => TimeSourceKind::Host,
            3 => TimeSourceKind::MeshSynced,
            4 => TimeSourceKind::Crystal,
            _ => return Err(Error::InvalidValue),
        })
    }
}

/// `TIME_SYNC` payload: periodic broadcast of the sender's time state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeSync {
    pub kind: TimeSourceKind,
    pub stratum: u8,
    pub frame_counter: u32,
    pub slot_counter: u16,
    pub utc_seconds: u32,
    pub utc_fractional: u16,
}

impl ToBytes for TimeSync {
    fn to_bytes(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.write_u8(self.kind as u8)?;
        w.write_u8(self.stratum)?;
        w.write_u32_le(self.frame_counter)?;
        w.write_u16_le(self.slot_counter)?;
        w.write_u32_le(self.utc_seconds)?;
        w.write_u16_le(self.utc_fractional)
    }
}

impl<'a> FromBytes<'a> for TimeSync {
    fn from_bytes(r: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(TimeSync {
            kind: TimeSourceKind::from_u8(r.read_u8()?)?,
            stratum: r.read_u8()?,
            frame_counter: r.read_u32_le()?,
            slot_counter: r.read_u16_le()?,
            utc_seconds: r.read_u32_le()?,
            utc_fractional: r.read_u16_le()?,
        })
    }
}

/// `DATA` payload discriminant, distinguishing plain application data from
/// a framed group message (§4.H). Not itself on the wire: callers pick the
/// right decode path from the frame's broadcast/unicast addressing, since
/// group messages always travel as broadcasts.
pub enum DataKind<'a> {
    Application(&'a [u8]),
    Group(&'a [u8]),
}
