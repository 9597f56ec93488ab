//! Seams toward the collaborators above and below the MAC.
//!
//! The MAC pulls payload bytes just-in-time when a transmit reservation
//! fires, and hands finished packets to the physical layer together with the
//! channel to transmit on.

use alloc::vec::Vec;

use mcsotdma_encoding::{NodeId, Packet};

/// The layer above the MAC (ARQ/RLC).
pub trait UpperLayer {
    /// Pulls up to `num_bits` of payload destined to `peer`.
    /// `NodeId::BROADCAST` asks for broadcast payload.
    fn request_segment(&mut self, num_bits: u32, peer: NodeId) -> Vec<u8>;

    /// Whether more data toward `peer` is waiting. Queried before scheduling
    /// link renewals.
    fn is_there_more_data(&self, peer: NodeId) -> bool;

    /// Delivers the payload of a received packet.
    fn pass_to_upper(&mut self, packet: Packet);

    /// Re-dispatches a control packet into the upper layer.
    fn inject_into_upper(&mut self, packet: Packet) {
        self.pass_to_upper(packet);
    }
}

/// The physical layer below the MAC.
pub trait Phy {
    /// Hands a packet over for transmission on the given channel. Called
    /// while the corresponding transmit reservation fires.
    fn pass_to_lower(&mut self, packet: Packet, center_freq_khz: u64);

    /// Tunes one receiver to the given channel for the current slot.
    fn tune_receiver(&mut self, center_freq_khz: u64);

    /// Current transmission capacity in bits per slot.
    fn current_datarate(&self) -> u32;
}
