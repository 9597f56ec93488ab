//! The reservation substrate: per-slot intent, per-channel tables with
//! hardware-capacity enforcement, and the manager that owns them.

mod manager;
mod map;
mod table;

pub use manager::{ChannelRef, ReservationManager};
pub use map::{ReservationMap, TableRef};
pub use table::{HardwareTables, ReservationTable};

use mcsotdma_encoding::NodeId;

/// What the slot associated to a reservation should be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Action {
    /// No reservation.
    #[default]
    Idle,
    /// Reserved by some other user.
    Busy,
    /// Reserved for us; listen during this slot.
    Rx,
    /// Reserved for us; listen for a beacon during this slot.
    RxBeacon,
    /// Reserved for us; transmit during this slot.
    Tx,
    /// Reserved for us; transmit a beacon during this slot.
    TxBeacon,
    /// Held pending a link negotiation; unusable for new proposals until the
    /// negotiation concludes.
    Locked,
}

/// A reservation names the counterparty of a slot and what the slot is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reservation {
    target: NodeId,
    action: Action,
}

impl Reservation {
    pub const IDLE: Reservation = Reservation { target: NodeId::UNSET, action: Action::Idle };

    pub const fn new(target: NodeId, action: Action) -> Self {
        Reservation { target, action }
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn set_target(&mut self, target: NodeId) {
        self.target = target;
    }

    pub fn set_action(&mut self, action: Action) {
        self.action = action;
    }

    pub fn is_idle(&self) -> bool {
        self.action == Action::Idle
    }

    pub fn is_busy(&self) -> bool {
        self.action == Action::Busy
    }

    pub fn is_tx(&self) -> bool {
        self.action == Action::Tx
    }

    pub fn is_any_tx(&self) -> bool {
        matches!(self.action, Action::Tx | Action::TxBeacon)
    }

    pub fn is_rx(&self) -> bool {
        self.action == Action::Rx
    }

    pub fn is_any_rx(&self) -> bool {
        matches!(self.action, Action::Rx | Action::RxBeacon)
    }

    pub fn is_beacon(&self) -> bool {
        matches!(self.action, Action::RxBeacon | Action::TxBeacon)
    }

    pub fn is_locked(&self) -> bool {
        self.action == Action::Locked
    }
}

impl core::fmt::Display for Reservation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}@{}", self.action, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        let tx = Reservation::new(NodeId::new(1), Action::Tx);
        assert!(tx.is_any_tx() && !tx.is_any_rx() && !tx.is_idle());
        let beacon_rx = Reservation::new(NodeId::new(1), Action::RxBeacon);
        assert!(beacon_rx.is_any_rx() && beacon_rx.is_beacon() && !beacon_rx.is_rx());
        assert!(Reservation::IDLE.is_idle());
        assert_eq!(Reservation::IDLE.target(), NodeId::UNSET);
    }

    #[test]
    fn equality_is_on_target_and_action() {
        let a = Reservation::new(NodeId::new(3), Action::Locked);
        let b = Reservation::new(NodeId::new(3), Action::Locked);
        let c = Reservation::new(NodeId::new(4), Action::Locked);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
