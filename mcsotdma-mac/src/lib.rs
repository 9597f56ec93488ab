#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## Feature flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]
//!
//! A multi-channel self-organized TDMA MAC: nodes share a set of frequency
//! channels divided into fixed-duration slots and negotiate collision-free
//! schedules among themselves, with one transmitter, a small number of
//! receivers, and a regulatory duty-cycle ceiling per node.

extern crate alloc;

// This must go first so that the macros are visible to all modules.
mod fmt;

pub mod channel;
pub mod config;
pub mod duty_cycle;
pub mod link;
pub mod mac;
pub mod neighbors;
pub mod reservation;

mod moving_average;
pub use moving_average::MovingAverage;

pub mod radio;
pub mod slots;
pub mod stats;

mod rng;
pub use rng::Prng;

pub use channel::{ChannelKind, FrequencyChannel};
pub use config::{Config, ContentionMethod, DutyCycleStrategy};
pub use mac::Mac;
pub use mcsotdma_encoding as encoding;
pub use mcsotdma_encoding::{
    Header, LinkProposal, LinkReply, LinkRequest, LinkUtilization, NodeId, Packet, Position,
};
pub use rand_core::RngCore;

/// Errors surfaced by the MAC core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// A TX reservation was attempted but the transmitter is taken then.
    NoTxAvailable,
    /// An RX reservation was attempted but every receiver is taken then.
    NoRxAvailable,
    /// A lock or unlock named a different peer than the one holding the slot.
    IdMismatch,
    /// A lock was attempted on a slot that is neither idle nor already locked.
    CannotLock,
    /// The slot offset lies outside the planning horizon.
    OutOfHorizon,
    /// The duty-cycle allocator cannot grant any period or offset.
    NoBudgetLeft,
    /// Slot selection found no feasible resources.
    NoCandidates,
    /// A scheduled request or reply should have fired in the past. This
    /// indicates a logic bug rather than a recoverable condition.
    MissedScheduledSlot,
    /// A control message arrived in a link status that cannot process it.
    UnexpectedState,
}

pub type Result<T = ()> = core::result::Result<T, Error>;
