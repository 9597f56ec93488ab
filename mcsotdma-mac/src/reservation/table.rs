//! Per-channel reservation tables and the hardware tables they mirror into.

use alloc::vec;
use alloc::vec::Vec;

use mcsotdma_encoding::NodeId;

use super::{Action, Reservation};
use crate::slots;
use crate::{Error, Result};

/// The single transmitter table and the receiver tables, shared by all
/// per-channel tables of one node. Every TX/RX reservation made on a channel
/// is mirrored here, so the tables jointly enforce the hardware capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareTables {
    tx: ReservationTable,
    rxs: Vec<ReservationTable>,
}

impl HardwareTables {
    pub fn new(planning_horizon: u32, num_receivers: usize) -> Self {
        HardwareTables {
            tx: ReservationTable::new(planning_horizon),
            rxs: (0..num_receivers).map(|_| ReservationTable::new(planning_horizon)).collect(),
        }
    }

    pub fn tx(&self) -> &ReservationTable {
        &self.tx
    }

    pub fn tx_mut(&mut self) -> &mut ReservationTable {
        &mut self.tx
    }

    pub fn rxs(&self) -> &[ReservationTable] {
        &self.rxs
    }

    pub fn rxs_mut(&mut self) -> &mut [ReservationTable] {
        &mut self.rxs
    }

    pub fn num_receivers(&self) -> usize {
        self.rxs.len()
    }

    /// Whether the transmitter is unreserved for `length` slots from `start`.
    pub fn is_transmitter_idle(&self, start: i32, length: u32) -> Result<bool> {
        self.tx.is_idle_range(start, length)
    }

    /// Whether at least one receiver is unreserved for `length` slots from
    /// `start`.
    pub fn is_any_receiver_idle(&self, start: i32, length: u32) -> Result<bool> {
        for rx in &self.rxs {
            if rx.is_idle_range(start, length)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn tx_free_or_locked(&self, offset: i32) -> bool {
        matches!(self.tx.reservation(offset), Ok(r) if r.is_idle() || r.is_locked())
    }

    fn any_rx_free_or_locked(&self, offset: i32) -> bool {
        self.rxs
            .iter()
            .any(|t| matches!(t.reservation(offset), Ok(r) if r.is_idle() || r.is_locked()))
    }

    /// Picks the receiver table that takes a mirrored RX reservation: the one
    /// already locked to the same target if any, else the first idle one, else
    /// the first locked one.
    fn pick_rx_for(&self, offset: i32, target: NodeId) -> Option<usize> {
        let res_at = |i: usize| self.rxs[i].reservation(offset).ok();
        (0..self.rxs.len())
            .find(|&i| res_at(i).is_some_and(|r| r.is_locked() && r.target() == target))
            .or_else(|| (0..self.rxs.len()).find(|&i| res_at(i).is_some_and(|r| r.is_idle())))
            .or_else(|| (0..self.rxs.len()).find(|&i| res_at(i).is_some_and(|r| r.is_locked())))
    }

    /// Finds the receiver table holding the mirrored counterpart of an RX
    /// reservation that is being released.
    fn find_rx_holding(&self, offset: i32, target: NodeId) -> Option<usize> {
        (0..self.rxs.len()).find(|&i| {
            matches!(self.rxs[i].reservation(offset), Ok(r) if r.is_any_rx() && r.target() == target)
        })
    }

    pub fn update(&mut self, num_slots: u64) {
        self.tx.update(num_slots);
        for rx in &mut self.rxs {
            rx.update(num_slots);
        }
    }
}

/// Keeps track of all slots of one logical frequency channel over a planning
/// horizon into both directions of time, and can be queried for ranges of
/// idle slots suitable for communication.
#[derive(Debug, Clone)]
pub struct ReservationTable {
    /// Past horizon, current slot, future horizon: `2 * horizon + 1` entries.
    slots: Vec<Reservation>,
    horizon: u32,
    /// Idle slots among offsets `0..=horizon`.
    num_idle_future_slots: u64,
    default_reservation: Reservation,
    current_slot: u64,
}

impl ReservationTable {
    pub fn new(planning_horizon: u32) -> Self {
        Self::with_default(planning_horizon, Reservation::IDLE)
    }

    pub fn with_default(planning_horizon: u32, default_reservation: Reservation) -> Self {
        let len = planning_horizon as usize * 2 + 1;
        let idle = if default_reservation.is_idle() { planning_horizon as u64 + 1 } else { 0 };
        ReservationTable {
            slots: vec![default_reservation; len],
            horizon: planning_horizon,
            num_idle_future_slots: idle,
            default_reservation,
            current_slot: 0,
        }
    }

    pub fn planning_horizon(&self) -> u32 {
        self.horizon
    }

    /// Absolute slot number this table regards as "now".
    pub fn current_slot(&self) -> u64 {
        self.current_slot
    }

    pub fn set_current_slot(&mut self, slot: u64) {
        self.current_slot = slot;
    }

    /// Idle slots among the current and future half of the table.
    pub fn num_idle_slots(&self) -> u64 {
        self.num_idle_future_slots
    }

    fn valid(&self, offset: i32) -> bool {
        offset.unsigned_abs() <= self.horizon
    }

    fn valid_range(&self, start: i32, length: u32) -> bool {
        length > 0 && self.valid(start) && self.valid(start + length as i32 - 1)
    }

    fn index(&self, offset: i32) -> usize {
        (self.horizon as i64 + offset as i64) as usize
    }

    pub fn reservation(&self, offset: i32) -> Result<&Reservation> {
        if !self.valid(offset) {
            return Err(Error::OutOfHorizon);
        }
        Ok(&self.slots[self.index(offset)])
    }

    /// Writes without any capacity bookkeeping beyond the idle count. Only
    /// future (and current) slots count toward idleness.
    fn write(&mut self, offset: i32, reservation: Reservation) {
        let idx = self.index(offset);
        let was_idle = self.slots[idx].is_idle();
        self.slots[idx] = reservation;
        if offset >= 0 {
            if was_idle && !reservation.is_idle() {
                self.num_idle_future_slots -= 1;
            } else if !was_idle && reservation.is_idle() {
                self.num_idle_future_slots += 1;
            }
        }
    }

    /// Marks a slot on a table that has no hardware mirror: the hardware
    /// tables themselves, and standalone snapshots.
    pub fn mark_unlinked(&mut self, offset: i32, reservation: Reservation) -> Result<()> {
        if !self.valid(offset) {
            return Err(Error::OutOfHorizon);
        }
        self.write(offset, reservation);
        Ok(())
    }

    /// Marks a slot, mirroring TX/RX intent into the hardware tables.
    ///
    /// Fails with [`Error::NoTxAvailable`] / [`Error::NoRxAvailable`] if the
    /// written action needs a transmitter or receiver that is neither idle
    /// nor locked at that offset. Releasing a TX/RX reservation back to idle
    /// releases the mirrored hardware slot as well.
    pub fn mark(
        &mut self,
        offset: i32,
        reservation: Reservation,
        hw: &mut HardwareTables,
    ) -> Result<()> {
        let current = *self.reservation(offset)?;
        if current == reservation {
            return Ok(());
        }
        if reservation.is_any_tx() && !hw.tx_free_or_locked(offset) {
            return Err(Error::NoTxAvailable);
        }
        if reservation.is_any_rx() && !hw.any_rx_free_or_locked(offset) {
            return Err(Error::NoRxAvailable);
        }
        let frees_tx = current.is_any_tx() && reservation.is_idle();
        let frees_rx = current.is_any_rx() && reservation.is_idle();
        self.write(offset, reservation);
        if reservation.is_any_tx() {
            hw.tx.write(offset, reservation);
        } else if frees_tx {
            hw.tx.write(offset, Reservation::IDLE);
        }
        if reservation.is_any_rx() {
            if let Some(i) = hw.pick_rx_for(offset, reservation.target()) {
                hw.rxs[i].write(offset, reservation);
            }
        } else if frees_rx {
            if let Some(i) = hw.find_rx_holding(offset, current.target()) {
                hw.rxs[i].write(offset, Reservation::IDLE);
            }
        }
        Ok(())
    }

    pub fn is_idle(&self, offset: i32) -> Result<bool> {
        Ok(self.reservation(offset)?.is_idle())
    }

    pub fn is_utilized(&self, offset: i32) -> Result<bool> {
        Ok(!self.reservation(offset)?.is_idle())
    }

    pub fn is_locked(&self, offset: i32) -> Result<bool> {
        Ok(self.reservation(offset)?.is_locked())
    }

    /// Whether all slots of the range are idle.
    pub fn is_idle_range(&self, start: i32, length: u32) -> Result<bool> {
        if !self.valid_range(start, length) {
            return Err(Error::OutOfHorizon);
        }
        for offset in start..start + length as i32 {
            if !self.slots[self.index(offset)].is_idle() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether any slot of the range is utilized.
    pub fn is_utilized_range(&self, start: i32, length: u32) -> Result<bool> {
        Ok(!self.is_idle_range(start, length)?)
    }

    pub fn any_tx_reservations(&self, start: i32, length: u32) -> Result<bool> {
        if !self.valid_range(start, length) {
            return Err(Error::OutOfHorizon);
        }
        Ok((start..start + length as i32).any(|t| self.slots[self.index(t)].is_any_tx()))
    }

    pub fn any_rx_reservations(&self, start: i32, length: u32) -> Result<bool> {
        if !self.valid_range(start, length) {
            return Err(Error::OutOfHorizon);
        }
        Ok((start..start + length as i32).any(|t| self.slots[self.index(t)].is_any_rx()))
    }

    /// Whether the slot can take part in a new proposal lock.
    pub fn can_lock(&self, offset: i32) -> bool {
        matches!(self.reservation(offset), Ok(r) if r.is_idle() || r.is_locked())
    }

    /// Transitions an idle slot to `Locked` with the given peer.
    ///
    /// Returns `Ok(false)` if the slot is already locked to the same peer.
    pub fn lock(&mut self, offset: i32, peer: NodeId) -> Result<bool> {
        let current = *self.reservation(offset)?;
        if current.is_locked() {
            return if current.target() == peer { Ok(false) } else { Err(Error::IdMismatch) };
        }
        if !current.is_idle() {
            return Err(Error::CannotLock);
        }
        self.write(offset, Reservation::new(peer, Action::Locked));
        Ok(true)
    }

    /// Locks to `id1`, accepting a pre-existing lock held by `id2`. Used by
    /// third-party lockers: a request proposes resources either side of the
    /// link could end up owning.
    pub fn lock_either(&mut self, offset: i32, id1: NodeId, id2: NodeId) -> Result<bool> {
        match self.lock(offset, id1) {
            Err(Error::IdMismatch) => self.lock(offset, id2),
            other => other,
        }
    }

    /// Releases a locked slot back to idle. Unlocking an idle slot is a no-op.
    pub fn unlock(&mut self, offset: i32, peer: NodeId) -> Result<()> {
        let current = *self.reservation(offset)?;
        if current.is_idle() {
            return Ok(());
        }
        if !current.is_locked() {
            return Err(Error::CannotLock);
        }
        if current.target() != peer && current.target() != NodeId::UNSET {
            return Err(Error::IdMismatch);
        }
        self.write(offset, Reservation::IDLE);
        Ok(())
    }

    pub fn unlock_either(&mut self, offset: i32, id1: NodeId, id2: NodeId) -> Result<()> {
        match self.unlock(offset, id1) {
            Err(Error::IdMismatch) => self.unlock(offset, id2),
            other => other,
        }
    }

    /// Progresses time: the first `num_slots` future slots scroll into the
    /// past, new future slots take the channel's default reservation.
    pub fn update(&mut self, num_slots: u64) {
        self.current_slot += num_slots;
        let len = self.slots.len();
        let window = self.horizon as u64 + 1;
        if num_slots as usize >= len {
            self.slots.fill(self.default_reservation);
            self.num_idle_future_slots = if self.default_reservation.is_idle() { window } else { 0 };
            return;
        }
        let n = num_slots as usize;
        if num_slots >= window {
            // every slot of the old window leaves; recount after the shift
            self.slots.rotate_left(n);
            for slot in &mut self.slots[len - n..] {
                *slot = self.default_reservation;
            }
            self.num_idle_future_slots =
                (0..=self.horizon as i32).filter(|&t| self.slots[self.index(t)].is_idle()).count()
                    as u64;
            return;
        }
        let idle_leaving =
            (0..n as i32).filter(|&t| self.slots[self.index(t)].is_idle()).count() as u64;
        self.slots.rotate_left(n);
        for slot in &mut self.slots[len - n..] {
            *slot = self.default_reservation;
        }
        self.num_idle_future_slots -= idle_leaving;
        if self.default_reservation.is_idle() {
            self.num_idle_future_slots += num_slots;
        }
    }

    fn is_tx_valid(&self, offset: i32, hw: &HardwareTables) -> bool {
        matches!(self.is_idle(offset), Ok(true))
            && matches!(hw.tx.is_idle(offset), Ok(true))
    }

    fn is_rx_valid(&self, offset: i32, hw: &HardwareTables) -> bool {
        matches!(self.is_idle(offset), Ok(true))
            && hw.rxs.iter().any(|t| matches!(t.is_idle(offset), Ok(true)))
    }

    /// Returns up to `num_candidates` earliest offsets at or after
    /// `min_offset` where a single-slot transmission is feasible: this table
    /// idle and the transmitter idle.
    pub fn find_sh_candidates(
        &self,
        hw: &HardwareTables,
        num_candidates: usize,
        min_offset: i32,
    ) -> Vec<u32> {
        let mut candidates = Vec::new();
        let mut t = min_offset.max(0);
        while candidates.len() < num_candidates && t <= self.horizon as i32 {
            if self.is_tx_valid(t, hw) {
                candidates.push(t as u32);
            }
            t += 1;
        }
        candidates
    }

    /// Whether the complete alternating-burst schedule starting at
    /// `start_offset` fits this table and the hardware tables.
    fn is_pp_start_valid(
        &self,
        hw: &HardwareTables,
        start_offset: i32,
        num_forward_bursts: u8,
        num_reverse_bursts: u8,
        period: u8,
        timeout: u16,
    ) -> Result<bool> {
        let (tx_slots, rx_slots) = slots::alternating_bursts(
            start_offset,
            num_forward_bursts,
            num_reverse_bursts,
            period,
            timeout,
        );
        let last = slots::last_slot_offset(
            start_offset,
            num_forward_bursts,
            num_reverse_bursts,
            period,
            timeout,
        );
        if last > self.horizon as i32 {
            return Err(Error::OutOfHorizon);
        }
        Ok(tx_slots.iter().all(|&t| self.is_tx_valid(t, hw))
            && rx_slots.iter().all(|&t| self.is_rx_valid(t, hw)))
    }

    /// Returns up to `num_candidates` earliest start offsets at or after
    /// `min_offset` at which a complete PP link is realizable on this channel
    /// and the hardware tables.
    #[allow(clippy::too_many_arguments)]
    pub fn find_pp_candidates(
        &self,
        hw: &HardwareTables,
        num_candidates: usize,
        min_offset: i32,
        num_forward_bursts: u8,
        num_reverse_bursts: u8,
        period: u8,
        timeout: u16,
    ) -> Vec<u32> {
        let mut candidates = Vec::new();
        let mut t = min_offset.max(0);
        while candidates.len() < num_candidates && t <= self.horizon as i32 {
            match self.is_pp_start_valid(hw, t, num_forward_bursts, num_reverse_bursts, period, timeout)
            {
                Ok(true) => candidates.push(t as u32),
                Ok(false) => {}
                // later starts only push the schedule further out
                Err(_) => break,
            }
            t += 1;
        }
        candidates
    }

    /// Validates a proposed link from either side's perspective. The forward
    /// slots belong to the link initiator; from the recipient's side they
    /// must be receivable instead.
    #[allow(clippy::too_many_arguments)]
    pub fn is_link_valid(
        &self,
        hw: &HardwareTables,
        start_offset: i32,
        period: u8,
        num_tx_initiator: u8,
        num_tx_recipient: u8,
        timeout: u16,
        is_link_initiator: bool,
    ) -> bool {
        let (forward, reverse) = slots::alternating_bursts(
            start_offset,
            num_tx_initiator,
            num_tx_recipient,
            period,
            timeout,
        );
        let last =
            slots::last_slot_offset(start_offset, num_tx_initiator, num_tx_recipient, period, timeout);
        if last > self.horizon as i32 {
            return false;
        }
        let (own_tx, own_rx) = if is_link_initiator { (forward, reverse) } else { (reverse, forward) };
        own_tx.iter().all(|&t| self.is_tx_valid(t, hw)) && own_rx.iter().all(|&t| self.is_rx_valid(t, hw))
    }

    /// Offset of the earliest slot at or after `start_offset` holding exactly
    /// this reservation.
    pub fn find_earliest_offset(&self, start_offset: i32, reservation: Reservation) -> Option<i32> {
        (start_offset.max(-(self.horizon as i32))..=self.horizon as i32)
            .find(|&t| self.slots[self.index(t)] == reservation)
    }

    /// Number of TX reservations targeted at `peer` across the whole table.
    pub fn count_reserved_tx(&self, peer: NodeId) -> usize {
        self.slots.iter().filter(|r| r.is_any_tx() && r.target() == peer).count()
    }

    /// A standalone table containing only the TX reservations targeted at
    /// `peer`, e.g. for broadcasting one's own transmission plan.
    pub fn tx_reservations_copy(&self, peer: NodeId) -> ReservationTable {
        let mut copy = ReservationTable::new(self.horizon);
        for (i, r) in self.slots.iter().enumerate() {
            if r.is_any_tx() && r.target() == peer {
                let offset = i as i64 - self.horizon as i64;
                copy.write(offset as i32, *r);
            }
        }
        copy
    }

    /// Copies all TX reservations from `other` into this table, e.g. to
    /// ingest a neighbor's advertised transmission plan.
    pub fn integrate_tx_reservations(&mut self, other: &ReservationTable) -> Result<()> {
        if other.horizon != self.horizon {
            return Err(Error::OutOfHorizon);
        }
        for (i, r) in other.slots.iter().enumerate() {
            if r.is_any_tx() {
                let offset = (i as i64 - self.horizon as i64) as i32;
                self.write(offset, *r);
            }
        }
        Ok(())
    }
}

impl PartialEq for ReservationTable {
    fn eq(&self, other: &Self) -> bool {
        self.horizon == other.horizon && self.slots == other.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_and_hw(horizon: u32) -> (ReservationTable, HardwareTables) {
        (ReservationTable::new(horizon), HardwareTables::new(horizon, 2))
    }

    fn tx_res(id: i32) -> Reservation {
        Reservation::new(NodeId::new(id), Action::Tx)
    }

    fn rx_res(id: i32) -> Reservation {
        Reservation::new(NodeId::new(id), Action::Rx)
    }

    #[test]
    fn horizon_boundaries() {
        let (mut table, mut hw) = table_and_hw(8);
        assert!(table.mark(8, tx_res(1), &mut hw).is_ok());
        assert!(table.mark(-8, Reservation::new(NodeId::new(1), Action::Busy), &mut hw).is_ok());
        assert_eq!(table.mark(9, tx_res(1), &mut hw), Err(Error::OutOfHorizon));
        assert_eq!(table.is_idle(9), Err(Error::OutOfHorizon));
        assert_eq!(table.is_idle(-9), Err(Error::OutOfHorizon));
        assert!(table.is_idle(-8).is_ok());
    }

    #[test]
    fn mark_mirrors_tx_to_hardware() {
        let (mut table, mut hw) = table_and_hw(16);
        table.mark(3, tx_res(7), &mut hw).unwrap();
        assert!(hw.tx().reservation(3).unwrap().is_any_tx());
        // single transmitter: a second table cannot claim the same slot
        let mut other = ReservationTable::new(16);
        assert_eq!(other.mark(3, tx_res(9), &mut hw), Err(Error::NoTxAvailable));
        // release restores the transmitter
        table.mark(3, Reservation::IDLE, &mut hw).unwrap();
        assert!(hw.tx().is_idle(3).unwrap());
        assert!(other.mark(3, tx_res(9), &mut hw).is_ok());
    }

    #[test]
    fn mark_mirrors_rx_and_respects_receiver_count() {
        let (mut table, mut hw) = table_and_hw(16);
        let mut second = ReservationTable::new(16);
        let mut third = ReservationTable::new(16);
        table.mark(5, rx_res(1), &mut hw).unwrap();
        second.mark(5, rx_res(2), &mut hw).unwrap();
        assert_eq!(third.mark(5, rx_res(3), &mut hw), Err(Error::NoRxAvailable));
        // releasing one receiver frees capacity for the third
        second.mark(5, Reservation::IDLE, &mut hw).unwrap();
        assert!(third.mark(5, rx_res(3), &mut hw).is_ok());
    }

    #[test]
    fn mark_roundtrip_restores_hardware() {
        let (mut table, mut hw) = table_and_hw(16);
        let clean = hw.clone();
        table.mark(4, tx_res(1), &mut hw).unwrap();
        table.mark(7, rx_res(1), &mut hw).unwrap();
        table.mark(4, Reservation::IDLE, &mut hw).unwrap();
        table.mark(7, Reservation::IDLE, &mut hw).unwrap();
        assert_eq!(hw, clean);
    }

    #[test]
    fn lock_unlock_roundtrip() {
        let (mut table, _) = table_and_hw(16);
        assert!(table.lock(3, NodeId::new(1)).unwrap());
        assert!(table.reservation(3).unwrap().is_locked());
        // idempotent for the same peer
        assert!(!table.lock(3, NodeId::new(1)).unwrap());
        assert_eq!(table.lock(3, NodeId::new(2)), Err(Error::IdMismatch));
        table.unlock(3, NodeId::new(1)).unwrap();
        assert!(table.is_idle(3).unwrap());
    }

    #[test]
    fn lock_rejects_utilized_slots() {
        let (mut table, mut hw) = table_and_hw(16);
        table.mark(2, Reservation::new(NodeId::new(5), Action::Busy), &mut hw).unwrap();
        assert_eq!(table.lock(2, NodeId::new(1)), Err(Error::CannotLock));
    }

    #[test]
    fn lock_either_accepts_second_id() {
        let (mut table, _) = table_and_hw(16);
        table.lock(3, NodeId::new(2)).unwrap();
        // locked to id2 already: lock_either(id1, id2) accepts it
        assert!(!table.lock_either(3, NodeId::new(1), NodeId::new(2)).unwrap());
        assert_eq!(
            table.lock_either(3, NodeId::new(1), NodeId::new(9)),
            Err(Error::IdMismatch)
        );
    }

    #[test]
    fn idle_count_tracks_future_half() {
        let (mut table, mut hw) = table_and_hw(8);
        assert_eq!(table.num_idle_slots(), 9);
        table.mark(0, tx_res(1), &mut hw).unwrap();
        table.mark(5, rx_res(1), &mut hw).unwrap();
        assert_eq!(table.num_idle_slots(), 7);
        // past slots do not count
        table.mark(-3, Reservation::new(NodeId::new(1), Action::Busy), &mut hw).unwrap();
        assert_eq!(table.num_idle_slots(), 7);
    }

    #[test]
    fn update_scrolls_and_corrects_idle_count() {
        let (mut table, mut hw) = table_and_hw(8);
        table.mark(1, tx_res(1), &mut hw).unwrap();
        table.mark(4, Reservation::new(NodeId::new(2), Action::Busy), &mut hw).unwrap();
        assert_eq!(table.num_idle_slots(), 7);
        table.update(2);
        // the TX at +1 left the future window; the busy slot is now at +2
        assert_eq!(table.num_idle_slots(), 8);
        assert!(table.reservation(2).unwrap().is_busy());
        assert!(table.reservation(-1).unwrap().is_any_tx());
        assert_eq!(table.current_slot(), 2);
        table.update(3);
        assert_eq!(table.num_idle_slots(), 9);
    }

    #[test]
    fn update_past_whole_window() {
        let (mut table, mut hw) = table_and_hw(4);
        table.mark(2, tx_res(1), &mut hw).unwrap();
        table.update(100);
        assert_eq!(table.num_idle_slots(), 5);
        assert!(table.is_idle_range(-4, 9).unwrap());
    }

    #[test]
    fn sh_candidates_skip_busy_and_hardware_conflicts() {
        let (mut table, mut hw) = table_and_hw(16);
        table.mark(2, Reservation::new(NodeId::new(9), Action::Busy), &mut hw).unwrap();
        // transmitter taken at +3 by another channel
        let mut other = ReservationTable::new(16);
        other.mark(3, tx_res(9), &mut hw).unwrap();
        let candidates = table.find_sh_candidates(&hw, 3, 1);
        assert_eq!(candidates, [1, 4, 5]);
    }

    #[test]
    fn sh_candidates_returns_fewer_when_exhausted() {
        let (mut table, mut hw) = table_and_hw(4);
        for t in 0..=3 {
            table.mark(t, Reservation::new(NodeId::new(9), Action::Busy), &mut hw).unwrap();
        }
        let candidates = table.find_sh_candidates(&hw, 3, 0);
        assert_eq!(candidates, [4]);
    }

    #[test]
    fn pp_candidates_respect_full_schedule() {
        let (mut table, mut hw) = table_and_hw(64);
        // one exchange: TX at t, RX at t+5, for timeout=2 -> t, t+5, t+10, t+15
        let candidates = table.find_pp_candidates(&hw, 2, 2, 1, 1, 0, 2);
        assert_eq!(candidates, [2, 3]);
        // block the RX slot of a start at 2
        table.mark(7, Reservation::new(NodeId::new(9), Action::Busy), &mut hw).unwrap();
        let candidates = table.find_pp_candidates(&hw, 2, 2, 1, 1, 0, 2);
        assert_eq!(candidates, [3, 4]);
    }

    #[test]
    fn pp_candidates_stop_at_horizon() {
        let (table, hw) = table_and_hw(16);
        // schedule needs 16 slots; starting at 2 would end at 17 > horizon
        let candidates = table.find_pp_candidates(&hw, 3, 0, 1, 1, 0, 2);
        assert_eq!(candidates, [0, 1]);
    }

    #[test]
    fn link_validity_swaps_roles_for_recipient() {
        let (mut table, mut hw) = table_and_hw(64);
        assert!(table.is_link_valid(&hw, 4, 0, 1, 1, 2, true));
        assert!(table.is_link_valid(&hw, 4, 0, 1, 1, 2, false));
        // initiator transmits at 4; if our transmitter is taken there we can
        // still be the recipient (we only listen at 4)
        let mut other = ReservationTable::new(64);
        other.mark(4, tx_res(9), &mut hw).unwrap();
        assert!(!table.is_link_valid(&hw, 4, 0, 1, 1, 2, true));
        assert!(table.is_link_valid(&hw, 4, 0, 1, 1, 2, false));
    }

    #[test]
    fn tx_plan_copy_and_integrate() {
        let (mut table, mut hw) = table_and_hw(8);
        let peer = NodeId::new(3);
        table.mark(1, Reservation::new(peer, Action::Tx), &mut hw).unwrap();
        table.mark(4, Reservation::new(peer, Action::Tx), &mut hw).unwrap();
        table.mark(5, Reservation::new(NodeId::new(4), Action::Tx), &mut hw).unwrap();
        assert_eq!(table.count_reserved_tx(peer), 2);
        let copy = table.tx_reservations_copy(peer);
        assert_eq!(copy.count_reserved_tx(peer), 2);
        assert!(copy.is_idle(5).unwrap());
        let mut other = ReservationTable::new(8);
        other.integrate_tx_reservations(&copy).unwrap();
        assert!(other.reservation(1).unwrap().is_any_tx());
        assert!(other.reservation(4).unwrap().is_any_tx());
        assert_eq!(other.num_idle_slots(), 7);
    }

    #[test]
    fn find_earliest_offset_matches_exact_reservation() {
        let (mut table, mut hw) = table_and_hw(8);
        table.mark(3, tx_res(2), &mut hw).unwrap();
        assert_eq!(table.find_earliest_offset(0, tx_res(2)), Some(3));
        assert_eq!(table.find_earliest_offset(4, tx_res(2)), None);
        assert_eq!(table.find_earliest_offset(0, tx_res(5)), None);
    }
}
