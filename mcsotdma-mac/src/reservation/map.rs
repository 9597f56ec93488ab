//! Bookkeeping for the resources a link negotiation has locked or scheduled,
//! so they can be released together when the negotiation concludes or fails.

use alloc::vec::Vec;

use mcsotdma_encoding::NodeId;

use super::manager::{ChannelRef, ReservationManager};
use super::{Action, Reservation};
use crate::Error;

/// Which table an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum TableRef {
    Channel(ChannelRef),
    HwTx,
    HwRx(usize),
}

/// Resources locked or scheduled during link establishment. Offsets are
/// stored as seen at creation time and normalized by the slots elapsed since,
/// so the map stays valid while time advances.
#[derive(Debug, Clone, Default)]
pub struct ReservationMap {
    scheduled: Vec<(TableRef, i32)>,
    locked: Vec<(TableRef, i32)>,
    slots_since_creation: i32,
}

impl ReservationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scheduled(&mut self, table: TableRef, slot_offset: i32) {
        self.scheduled.push((table, slot_offset + self.slots_since_creation));
    }

    pub fn add_locked(&mut self, table: TableRef, slot_offset: i32) {
        self.locked.push((table, slot_offset + self.slots_since_creation));
    }

    pub fn merge(&mut self, other: ReservationMap) {
        debug_assert_eq!(other.slots_since_creation, 0);
        for (table, offset) in other.scheduled {
            self.scheduled.push((table, offset + self.slots_since_creation));
        }
        for (table, offset) in other.locked {
            self.locked.push((table, offset + self.slots_since_creation));
        }
    }

    pub fn on_slot_start(&mut self) {
        self.slots_since_creation += 1;
    }

    pub fn num_scheduled(&self) -> usize {
        self.scheduled.len()
    }

    pub fn num_locked(&self) -> usize {
        self.locked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty() && self.locked.is_empty()
    }

    pub fn reset(&mut self) {
        self.scheduled.clear();
        self.locked.clear();
        self.slots_since_creation = 0;
    }

    /// Scheduled entries with offsets normalized to the current slot.
    pub fn scheduled(&self) -> Vec<(TableRef, i32)> {
        self.scheduled.iter().map(|&(t, o)| (t, o - self.slots_since_creation)).collect()
    }

    /// Locked entries with offsets normalized to the current slot.
    pub fn locked(&self) -> Vec<(TableRef, i32)> {
        self.locked.iter().map(|&(t, o)| (t, o - self.slots_since_creation)).collect()
    }

    /// Releases every still-future locked resource held for either of the two
    /// ids. Entries on the SH channel are skipped: reply slots there are
    /// ordinary RX reservations that lapse on their own. Returns the number
    /// of unlocked resources.
    pub fn unlock_either(&mut self, rm: &mut ReservationManager, id1: NodeId, id2: NodeId) -> usize {
        let mut num_unlocked = 0;
        for (table, offset) in self.locked() {
            if matches!(table, TableRef::Channel(ChannelRef::Sh)) {
                continue;
            }
            if offset <= 0 {
                continue;
            }
            let result = match table {
                TableRef::Channel(cref) => {
                    let (t, _) = rm.table_and_hw_mut(cref);
                    t.unlock_either(offset, id1, id2)
                }
                TableRef::HwTx => rm.hw_mut().tx_mut().unlock_either(offset, id1, id2),
                TableRef::HwRx(i) => rm.hw_mut().rxs_mut()[i].unlock_either(offset, id1, id2),
            };
            match result {
                Ok(()) => num_unlocked += 1,
                // not locked anymore, or owned by someone else by now
                Err(Error::IdMismatch) | Err(Error::CannotLock) | Err(Error::OutOfHorizon) => {}
                Err(_) => {}
            }
        }
        self.locked.clear();
        num_unlocked
    }

    pub fn unlock(&mut self, rm: &mut ReservationManager, id: NodeId) -> usize {
        self.unlock_either(rm, id, id)
    }

    /// Sets every still-future scheduled resource back to idle. Entries that
    /// no longer hold one of the expected actions were taken over by a later
    /// schedule and are left alone.
    pub fn unschedule(
        &mut self,
        rm: &mut ReservationManager,
        expected_actions: &[Action],
    ) -> usize {
        let mut num_unscheduled = 0;
        for (table, offset) in self.scheduled() {
            if offset < 0 {
                continue;
            }
            let TableRef::Channel(cref) = table else {
                // hardware entries are released through the channel mark
                continue;
            };
            let action = match rm.table(cref).reservation(offset) {
                Ok(r) => r.action(),
                Err(_) => continue,
            };
            if expected_actions.contains(&action) && rm.mark(cref, offset, Reservation::IDLE).is_ok()
            {
                num_unscheduled += 1;
            }
        }
        self.scheduled.clear();
        num_unscheduled
    }

    /// The nearest still-future scheduled TX reservation.
    pub fn next_tx_reservation(&self, rm: &ReservationManager) -> Option<(ChannelRef, i32)> {
        self.next_with(rm, Reservation::is_any_tx)
    }

    /// The nearest still-future scheduled RX reservation.
    pub fn next_rx_reservation(&self, rm: &ReservationManager) -> Option<(ChannelRef, i32)> {
        self.next_with(rm, Reservation::is_any_rx)
    }

    fn next_with(
        &self,
        rm: &ReservationManager,
        predicate: fn(&Reservation) -> bool,
    ) -> Option<(ChannelRef, i32)> {
        let mut best: Option<(ChannelRef, i32)> = None;
        for (table, offset) in self.scheduled() {
            let TableRef::Channel(cref) = table else { continue };
            if offset < 0 {
                continue;
            }
            let Ok(r) = rm.table(cref).reservation(offset) else { continue };
            if predicate(r) && best.map_or(true, |(_, b)| offset < b) {
                best = Some((cref, offset));
            }
        }
        best
    }
}
