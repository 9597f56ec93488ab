//! Packet headers and the packet container.
//!
//! A packet is an ordered list of (header, payload) records. The first record
//! is a base header carrying identity and position; it is followed by a
//! shared-channel header or a unicast header, whose payload holds the upper
//! layer's bytes.

use heapless::Vec;

use crate::bytes::{Reader, Writer};
use crate::types::{LinkProposal, LinkReply, LinkRequest, LinkUtilization, NodeId, Position};
use crate::{Error, Result};

/// Link requests a single shared-channel header can carry.
pub const MAX_LINK_REQUESTS: usize = 16;
/// Advertised proposals a single shared-channel header can carry.
pub const MAX_LINK_PROPOSALS: usize = 8;
/// Link utilizations a single shared-channel header can carry.
pub const MAX_LINK_UTILIZATIONS: usize = 8;
/// Records per packet.
pub const MAX_RECORDS: usize = 4;
/// Payload bytes per record.
pub const MAX_PAYLOAD: usize = 1500;

const KIND_BASE: u8 = 1;
const KIND_SH: u8 = 2;
const KIND_UNICAST: u8 = 3;

/// Carried in every packet: who sent it and where they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct BaseHeader {
    pub src_id: NodeId,
    pub position: Position,
    pub hops_to_ground: u8,
}

impl BaseHeader {
    fn read(r: &mut Reader) -> Result<Self> {
        Ok(BaseHeader {
            src_id: NodeId::read(r)?,
            position: Position::read(r)?,
            hops_to_ground: r.u8()?,
        })
    }

    fn write(&self, w: &mut Writer) -> Result<()> {
        self.src_id.write(w)?;
        self.position.write(w)?;
        w.u8(self.hops_to_ground)
    }
}

/// The shared-channel header: the sender's own next-broadcast advertisement
/// plus the link-negotiation records it carries this slot.
///
/// `slot_offset` is the sender's advertised next broadcast, relative to the
/// slot this header is transmitted in. Zero means "not advertised".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShHeader {
    pub src_id: NodeId,
    pub slot_offset: u16,
    pub link_requests: Vec<LinkRequest, MAX_LINK_REQUESTS>,
    pub link_reply: Option<LinkReply>,
    pub link_proposals: Vec<LinkProposal, MAX_LINK_PROPOSALS>,
    pub link_utilizations: Vec<LinkUtilization, MAX_LINK_UTILIZATIONS>,
}

impl ShHeader {
    pub fn new(src_id: NodeId) -> Self {
        ShHeader { src_id, ..Default::default() }
    }

    fn read(r: &mut Reader) -> Result<Self> {
        let src_id = NodeId::read(r)?;
        let slot_offset = r.u16()?;
        let num_requests = r.u8()? as usize;
        let has_reply = r.u8()? != 0;
        let num_proposals = r.u8()? as usize;
        let num_utilizations = r.u8()? as usize;
        let mut header = ShHeader { src_id, slot_offset, ..Default::default() };
        for _ in 0..num_requests {
            header.link_requests.push(LinkRequest::read(r)?).map_err(|_| Error::Overflow)?;
        }
        if has_reply {
            header.link_reply = Some(LinkReply::read(r)?);
        }
        for _ in 0..num_proposals {
            header.link_proposals.push(LinkProposal::read(r)?).map_err(|_| Error::Overflow)?;
        }
        for _ in 0..num_utilizations {
            header
                .link_utilizations
                .push(LinkUtilization::read(r)?)
                .map_err(|_| Error::Overflow)?;
        }
        Ok(header)
    }

    fn write(&self, w: &mut Writer) -> Result<()> {
        self.src_id.write(w)?;
        w.u16(self.slot_offset)?;
        w.u8(self.link_requests.len() as u8)?;
        w.u8(self.link_reply.is_some() as u8)?;
        w.u8(self.link_proposals.len() as u8)?;
        w.u8(self.link_utilizations.len() as u8)?;
        for request in &self.link_requests {
            request.write(w)?;
        }
        if let Some(reply) = &self.link_reply {
            reply.write(w)?;
        }
        for proposal in &self.link_proposals {
            proposal.write(w)?;
        }
        for utilization in &self.link_utilizations {
            utilization.write(w)?;
        }
        Ok(())
    }
}

/// The point-to-point header. A renewal request may ride along on a data
/// burst instead of waiting for a shared-channel transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct UnicastHeader {
    pub dest_id: NodeId,
    pub seq_num: u16,
    pub link_request: Option<LinkRequest>,
}

impl UnicastHeader {
    pub fn new(dest_id: NodeId, seq_num: u16) -> Self {
        UnicastHeader { dest_id, seq_num, link_request: None }
    }

    fn read(r: &mut Reader) -> Result<Self> {
        let dest_id = NodeId::read(r)?;
        let seq_num = r.u16()?;
        let link_request = if r.u8()? != 0 { Some(LinkRequest::read(r)?) } else { None };
        Ok(UnicastHeader { dest_id, seq_num, link_request })
    }

    fn write(&self, w: &mut Writer) -> Result<()> {
        self.dest_id.write(w)?;
        w.u16(self.seq_num)?;
        w.u8(self.link_request.is_some() as u8)?;
        if let Some(request) = &self.link_request {
            request.write(w)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Base(BaseHeader),
    Sh(ShHeader),
    Unicast(UnicastHeader),
}

impl Header {
    fn kind(&self) -> u8 {
        match self {
            Header::Base(_) => KIND_BASE,
            Header::Sh(_) => KIND_SH,
            Header::Unicast(_) => KIND_UNICAST,
        }
    }

    fn read(kind: u8, r: &mut Reader) -> Result<Self> {
        match kind {
            KIND_BASE => Ok(Header::Base(BaseHeader::read(r)?)),
            KIND_SH => Ok(Header::Sh(ShHeader::read(r)?)),
            KIND_UNICAST => Ok(Header::Unicast(UnicastHeader::read(r)?)),
            other => Err(Error::InvalidHeaderKind(other)),
        }
    }

    fn write(&self, w: &mut Writer) -> Result<()> {
        match self {
            Header::Base(h) => h.write(w),
            Header::Sh(h) => h.write(w),
            Header::Unicast(h) => h.write(w),
        }
    }
}

/// One (header, payload) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub header: Header,
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

impl PacketRecord {
    pub fn header_only(header: Header) -> Self {
        PacketRecord { header, payload: Vec::new() }
    }

    pub fn with_payload(header: Header, payload: &[u8]) -> Result<Self> {
        let payload = Vec::from_slice(payload).map_err(|_| Error::Overflow)?;
        Ok(PacketRecord { header, payload })
    }
}

/// An ordered list of (header, payload) records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub records: Vec<PacketRecord, MAX_RECORDS>,
}

impl Packet {
    pub fn new() -> Self {
        Packet::default()
    }

    pub fn push(&mut self, record: PacketRecord) -> Result<()> {
        self.records.push(record).map_err(|_| Error::Overflow)
    }

    /// The base header, if the packet leads with one.
    pub fn base(&self) -> Option<&BaseHeader> {
        match self.records.first() {
            Some(PacketRecord { header: Header::Base(base), .. }) => Some(base),
            _ => None,
        }
    }

    /// Total serialized size in bytes.
    pub fn serialized_len(&self) -> usize {
        let mut buf = [0u8; MAX_RECORDS * (MAX_PAYLOAD + 1024) + 1];
        // Packets assembled through this crate always fit the scratch buffer.
        self.serialize(&mut buf).unwrap_or(0)
    }

    /// Writes the packet into `buf`, returning the number of bytes used.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        let mut w = Writer::new(buf);
        w.u8(self.records.len() as u8)?;
        for record in &self.records {
            w.u8(record.header.kind())?;
            record.header.write(&mut w)?;
            w.u16(record.payload.len() as u16)?;
            w.put(&record.payload)?;
        }
        Ok(w.position())
    }

    /// Parses a packet from `buf`, returning it and the number of bytes read.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let mut r = Reader::new(buf);
        let num_records = r.u8()? as usize;
        if num_records > MAX_RECORDS {
            return Err(Error::Overflow);
        }
        let mut packet = Packet::new();
        for _ in 0..num_records {
            let kind = r.u8()?;
            let header = Header::read(kind, &mut r)?;
            let payload_len = r.u16()? as usize;
            if payload_len > MAX_PAYLOAD {
                return Err(Error::InvalidLength);
            }
            let payload = Vec::from_slice(r.take(payload_len)?).map_err(|_| Error::Overflow)?;
            packet.records.push(PacketRecord { header, payload }).map_err(|_| Error::Overflow)?;
        }
        Ok((packet, r.position()))
    }
}
