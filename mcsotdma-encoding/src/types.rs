//! Shared control-plane records: node identifiers, positions and the link
//! proposal family carried inside shared-channel headers.

use crate::bytes::{Reader, Writer};
use crate::Result;

/// A node's identity on the air interface. Real identifiers are 27-bit ICAO
/// addresses; negative values are reserved for symbolic targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(i32);

impl NodeId {
    /// No counterparty.
    pub const UNSET: NodeId = NodeId(-1);
    /// The shared (broadcast) channel target.
    pub const BROADCAST: NodeId = NodeId(-2);

    pub const fn new(id: i32) -> Self {
        NodeId(id)
    }

    pub const fn get(self) -> i32 {
        self.0
    }

    /// Whether this names an actual peer rather than a symbolic target.
    pub fn is_unicast(self) -> bool {
        self.0 >= 0
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self> {
        Ok(NodeId(r.i32()?))
    }

    pub(crate) fn write(self, w: &mut Writer) -> Result<()> {
        w.i32(self.0)
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            NodeId::UNSET => write!(f, "unset"),
            NodeId::BROADCAST => write!(f, "broadcast"),
            NodeId(id) => write!(f, "{id}"),
        }
    }
}

/// A coarse geographic position as carried in base headers. The exact CPR
/// encoding happens above this layer; here the fields are opaque fixed-point
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub latitude: i32,
    pub longitude: i32,
    pub altitude: i16,
}

impl Position {
    pub const LEN: usize = 10;

    pub const fn new(latitude: i32, longitude: i32, altitude: i16) -> Self {
        Position { latitude, longitude, altitude }
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self> {
        Ok(Position { latitude: r.i32()?, longitude: r.i32()?, altitude: r.i16()? })
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<()> {
        w.i32(self.latitude)?;
        w.i32(self.longitude)?;
        w.i16(self.altitude)
    }
}

/// One proposed point-to-point link: a channel, a start slot and the burst
/// structure. `period` encodes an inter-burst spacing of `5 * 2^period` slots,
/// alternating direction, so a full TX/RX cycle spans `10 * 2^period` slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkProposal {
    pub center_freq_khz: u64,
    pub slot_offset: i32,
    pub period: u8,
    pub num_tx_initiator: u8,
    pub num_tx_recipient: u8,
}

impl LinkProposal {
    pub const LEN: usize = 15;

    pub(crate) fn read(r: &mut Reader) -> Result<Self> {
        Ok(LinkProposal {
            center_freq_khz: r.u64()?,
            slot_offset: r.i32()?,
            period: r.u8()?,
            num_tx_initiator: r.u8()?,
            num_tx_recipient: r.u8()?,
        })
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<()> {
        w.u64(self.center_freq_khz)?;
        w.i32(self.slot_offset)?;
        w.u8(self.period)?;
        w.u8(self.num_tx_initiator)?;
        w.u8(self.num_tx_recipient)
    }
}

/// A link request addressed to `dest_id`, carrying one proposal and the slot
/// number at which the request was generated (used to measure establishment
/// latency end-to-end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkRequest {
    pub dest_id: NodeId,
    pub proposal: LinkProposal,
    pub generation_time: u64,
}

impl LinkRequest {
    pub const LEN: usize = 4 + LinkProposal::LEN + 8;

    pub(crate) fn read(r: &mut Reader) -> Result<Self> {
        Ok(LinkRequest {
            dest_id: NodeId::read(r)?,
            proposal: LinkProposal::read(r)?,
            generation_time: r.u64()?,
        })
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<()> {
        self.dest_id.write(w)?;
        self.proposal.write(w)?;
        w.u64(self.generation_time)
    }
}

/// A link reply addressed to `dest_id`. The proposal inside is normalized so
/// that its `slot_offset` counts from the slot the reply is broadcast in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkReply {
    pub dest_id: NodeId,
    pub proposal: LinkProposal,
}

impl LinkReply {
    pub const LEN: usize = 4 + LinkProposal::LEN;

    pub(crate) fn read(r: &mut Reader) -> Result<Self> {
        Ok(LinkReply { dest_id: NodeId::read(r)?, proposal: LinkProposal::read(r)? })
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<()> {
        self.dest_id.write(w)?;
        self.proposal.write(w)
    }
}

/// Summary of one currently-utilized point-to-point link, broadcast so that
/// neighbors can steer their own proposals away from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkUtilization {
    pub center_freq_khz: u64,
    pub slot_offset: i32,
    pub period: u8,
    pub timeout: u16,
}

impl LinkUtilization {
    pub const LEN: usize = 15;

    pub(crate) fn read(r: &mut Reader) -> Result<Self> {
        Ok(LinkUtilization {
            center_freq_khz: r.u64()?,
            slot_offset: r.i32()?,
            period: r.u8()?,
            timeout: r.u16()?,
        })
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<()> {
        w.u64(self.center_freq_khz)?;
        w.i32(self.slot_offset)?;
        w.u8(self.period)?;
        w.u16(self.timeout)
    }
}
