//! Owns the per-channel reservation tables and the hardware tables, and
//! schedules the alternating-burst pattern of a PP link.

use alloc::vec::Vec;

use mcsotdma_encoding::{LinkProposal, NodeId};

use super::map::{ReservationMap, TableRef};
use super::table::{HardwareTables, ReservationTable};
use super::{Action, Reservation};
use crate::channel::{ChannelKind, FrequencyChannel};
use crate::slots;
use crate::{Error, Result};

/// Handle to one managed channel table. Channel tables never move once
/// created, so the handle stays valid for the manager's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ChannelRef {
    Sh,
    Pp(usize),
}

/// For one node, wraps the reservation tables of every logical frequency
/// channel plus the tables of the transmitter and receiver hardware.
#[derive(Debug)]
pub struct ReservationManager {
    planning_horizon: u32,
    sh_channel: Option<FrequencyChannel>,
    sh_table: ReservationTable,
    pp_channels: Vec<FrequencyChannel>,
    pp_tables: Vec<ReservationTable>,
    hw: HardwareTables,
}

impl ReservationManager {
    pub fn new(planning_horizon: u32, num_receivers: usize) -> Self {
        ReservationManager {
            planning_horizon,
            sh_channel: None,
            sh_table: ReservationTable::new(planning_horizon),
            pp_channels: Vec::new(),
            pp_tables: Vec::new(),
            hw: HardwareTables::new(planning_horizon, num_receivers),
        }
    }

    pub fn planning_horizon(&self) -> u32 {
        self.planning_horizon
    }

    /// Registers a frequency channel and creates its reservation table. Only
    /// one SH channel may be added.
    pub fn add_channel(&mut self, kind: ChannelKind, center_freq_khz: u64, bandwidth_khz: u64) {
        let channel = FrequencyChannel::new(kind, center_freq_khz, bandwidth_khz);
        match kind {
            ChannelKind::Sh => {
                debug_assert!(self.sh_channel.is_none(), "SH channel added twice");
                self.sh_channel = Some(channel);
                self.sh_table = ReservationTable::new(self.planning_horizon);
            }
            ChannelKind::Pp => {
                self.pp_channels.push(channel);
                self.pp_tables.push(ReservationTable::new(self.planning_horizon));
            }
        }
    }

    pub fn num_pp_channels(&self) -> usize {
        self.pp_channels.len()
    }

    pub fn channel(&self, cref: ChannelRef) -> &FrequencyChannel {
        match cref {
            ChannelRef::Sh => self.sh_channel.as_ref().expect("SH channel not configured"),
            ChannelRef::Pp(i) => &self.pp_channels[i],
        }
    }

    pub fn channel_mut(&mut self, cref: ChannelRef) -> &mut FrequencyChannel {
        match cref {
            ChannelRef::Sh => self.sh_channel.as_mut().expect("SH channel not configured"),
            ChannelRef::Pp(i) => &mut self.pp_channels[i],
        }
    }

    pub fn table(&self, cref: ChannelRef) -> &ReservationTable {
        match cref {
            ChannelRef::Sh => &self.sh_table,
            ChannelRef::Pp(i) => &self.pp_tables[i],
        }
    }

    pub fn hw(&self) -> &HardwareTables {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut HardwareTables {
        &mut self.hw
    }

    /// Splits the borrow so a channel table can be marked while mirroring
    /// into the hardware tables.
    pub fn table_and_hw_mut(
        &mut self,
        cref: ChannelRef,
    ) -> (&mut ReservationTable, &mut HardwareTables) {
        match cref {
            ChannelRef::Sh => (&mut self.sh_table, &mut self.hw),
            ChannelRef::Pp(i) => (&mut self.pp_tables[i], &mut self.hw),
        }
    }

    pub fn mark(&mut self, cref: ChannelRef, offset: i32, reservation: Reservation) -> Result<()> {
        let (table, hw) = self.table_and_hw_mut(cref);
        table.mark(offset, reservation, hw)
    }

    pub fn lock(&mut self, cref: ChannelRef, offset: i32, peer: NodeId) -> Result<bool> {
        match cref {
            ChannelRef::Sh => self.sh_table.lock(offset, peer),
            ChannelRef::Pp(i) => self.pp_tables[i].lock(offset, peer),
        }
    }

    pub fn unlock(&mut self, cref: ChannelRef, offset: i32, peer: NodeId) -> Result<()> {
        match cref {
            ChannelRef::Sh => self.sh_table.unlock(offset, peer),
            ChannelRef::Pp(i) => self.pp_tables[i].unlock(offset, peer),
        }
    }

    /// Resolves a channel by its center frequency.
    pub fn channel_by_freq(&self, center_freq_khz: u64) -> Option<ChannelRef> {
        if self.sh_channel.as_ref().is_some_and(|c| c.center_freq_khz() == center_freq_khz) {
            return Some(ChannelRef::Sh);
        }
        self.pp_channels
            .iter()
            .position(|c| c.center_freq_khz() == center_freq_khz)
            .map(ChannelRef::Pp)
    }

    pub fn sh_freq_khz(&self) -> u64 {
        self.channel(ChannelRef::Sh).center_freq_khz()
    }

    /// PP channel handles sorted by descending idle count, so proposal
    /// finders prefer emptier channels. Blacklisted channels are skipped.
    pub fn sorted_pp_refs(&self) -> Vec<ChannelRef> {
        let mut order: Vec<usize> = (0..self.pp_tables.len())
            .filter(|&i| !self.pp_channels[i].is_blacklisted())
            .collect();
        order.sort_by(|&a, &b| {
            self.pp_tables[b]
                .num_idle_slots()
                .cmp(&self.pp_tables[a].num_idle_slots())
                .then(self.pp_channels[a].cmp(&self.pp_channels[b]))
        });
        order.into_iter().map(ChannelRef::Pp).collect()
    }

    /// Advances all tables by `num_slots`.
    pub fn update(&mut self, num_slots: u64) {
        self.sh_table.update(num_slots);
        for table in &mut self.pp_tables {
            table.update(num_slots);
        }
        self.hw.update(num_slots);
    }

    /// The reservation of every channel at the given offset.
    pub fn collect_reservations(&self, offset: i32) -> Vec<(ChannelRef, Reservation)> {
        let mut out = Vec::new();
        if self.sh_channel.is_some() {
            if let Ok(r) = self.sh_table.reservation(offset) {
                out.push((ChannelRef::Sh, *r));
            }
        }
        for (i, table) in self.pp_tables.iter().enumerate() {
            if let Ok(r) = table.reservation(offset) {
                out.push((ChannelRef::Pp(i), *r));
            }
        }
        out
    }

    /// Walks the alternating-burst schedule of a link and reserves each slot.
    ///
    /// A slot is written if it is idle, or overwritten if it is busy with the
    /// link peer as target (that is how an advertisement propagates into the
    /// local table before the actual transmission). Slots whose hardware is
    /// unavailable are skipped. If no TX or no RX slot at all could be
    /// reserved, the schedule is useless and the whole operation fails.
    #[allow(clippy::too_many_arguments)]
    pub fn schedule_bursts(
        &mut self,
        cref: ChannelRef,
        start_slot_offset: i32,
        num_forward_bursts: u8,
        num_reverse_bursts: u8,
        period: u8,
        timeout: u16,
        initiator_id: NodeId,
        recipient_id: NodeId,
        is_link_initiator: bool,
    ) -> Result<ReservationMap> {
        let mut map = ReservationMap::new();
        let forward_action = if is_link_initiator { Action::Tx } else { Action::Rx };
        let reverse_action = if is_link_initiator { Action::Rx } else { Action::Tx };
        let target_id = if is_link_initiator { recipient_id } else { initiator_id };

        let (forward_slots, reverse_slots) = slots::alternating_bursts(
            start_slot_offset,
            num_forward_bursts,
            num_reverse_bursts,
            period,
            timeout,
        );
        let mut num_tx_scheduled = 0usize;
        let mut num_rx_scheduled = 0usize;
        for (slot_list, action) in [(forward_slots, forward_action), (reverse_slots, reverse_action)]
        {
            for slot_offset in slot_list {
                if self.try_schedule_one(cref, slot_offset, action, target_id)? {
                    map.add_scheduled(TableRef::Channel(cref), slot_offset);
                    match action {
                        Action::Tx => num_tx_scheduled += 1,
                        Action::Rx => num_rx_scheduled += 1,
                        _ => unreachable!(),
                    }
                }
            }
        }
        if num_tx_scheduled == 0 || num_rx_scheduled == 0 {
            // a schedule empty in either direction is useless; undo it
            for (tref, slot_offset) in map.scheduled() {
                if let TableRef::Channel(c) = tref {
                    self.mark(c, slot_offset, Reservation::IDLE)?;
                }
            }
            return Err(if num_tx_scheduled == 0 {
                Error::NoTxAvailable
            } else {
                Error::NoRxAvailable
            });
        }
        Ok(map)
    }

    /// Attempts to reserve one slot of a burst schedule. Returns whether the
    /// slot was taken; unavailable hardware or foreign reservations skip it.
    fn try_schedule_one(
        &mut self,
        cref: ChannelRef,
        slot_offset: i32,
        action: Action,
        target_id: NodeId,
    ) -> Result<bool> {
        if slot_offset > self.planning_horizon as i32 {
            return Ok(false);
        }
        let current = *self.table(cref).reservation(slot_offset)?;
        let can_write = current.is_idle();
        let can_overwrite = current.is_busy() && current.target() == target_id;
        if !can_write && !can_overwrite {
            return Ok(false);
        }
        let hardware_available = match action {
            Action::Tx => {
                let r = self.hw.tx().reservation(slot_offset)?;
                r.is_idle() || (can_overwrite && r.is_busy() && r.target() == target_id)
            }
            Action::Rx => self.hw.rxs().iter().any(|t| {
                matches!(t.reservation(slot_offset), Ok(r) if r.is_idle()
                    || (can_overwrite && r.is_busy() && r.target() == target_id))
            }),
            _ => unreachable!(),
        };
        if !hardware_available {
            return Ok(false);
        }
        // an overwritten Busy slot never made it into the hardware tables, so
        // the plain mark path applies either way
        self.mark(cref, slot_offset, Reservation::new(target_id, action))?;
        Ok(true)
    }

    /// Finds link proposals on up to `num_channels` channels with up to
    /// `slots_per_channel` start offsets each, preferring the emptiest
    /// channels.
    #[allow(clippy::too_many_arguments)]
    pub fn find_link_proposals(
        &self,
        num_channels: usize,
        slots_per_channel: usize,
        min_slot_offset: i32,
        num_forward_bursts: u8,
        num_reverse_bursts: u8,
        period: u8,
        timeout: u16,
    ) -> Vec<LinkProposal> {
        let mut proposals = Vec::new();
        let mut channels_used = 0;
        for cref in self.sorted_pp_refs() {
            if channels_used >= num_channels {
                break;
            }
            let table = self.table(cref);
            let candidates = table.find_pp_candidates(
                &self.hw,
                slots_per_channel,
                min_slot_offset,
                num_forward_bursts,
                num_reverse_bursts,
                period,
                timeout,
            );
            if candidates.is_empty() {
                continue;
            }
            channels_used += 1;
            for &start in &candidates {
                proposals.push(LinkProposal {
                    center_freq_khz: self.channel(cref).center_freq_khz(),
                    slot_offset: start as i32,
                    period,
                    num_tx_initiator: num_forward_bursts,
                    num_tx_recipient: num_reverse_bursts,
                });
            }
        }
        proposals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ReservationManager {
        let mut rm = ReservationManager::new(128, 2);
        rm.add_channel(ChannelKind::Sh, 1_000_000, 500);
        rm.add_channel(ChannelKind::Pp, 960_000, 500);
        rm.add_channel(ChannelKind::Pp, 962_000, 500);
        rm.add_channel(ChannelKind::Pp, 964_000, 500);
        rm
    }

    #[test]
    fn channel_lookup_by_frequency() {
        let rm = manager();
        assert_eq!(rm.channel_by_freq(1_000_000), Some(ChannelRef::Sh));
        assert_eq!(rm.channel_by_freq(962_000), Some(ChannelRef::Pp(1)));
        assert_eq!(rm.channel_by_freq(5), None);
    }

    #[test]
    fn sorted_refs_prefer_idle_channels() {
        let mut rm = manager();
        for t in 1..=10 {
            rm.mark(ChannelRef::Pp(0), t, Reservation::new(NodeId::new(9), Action::Busy)).unwrap();
        }
        for t in 1..=5 {
            rm.mark(ChannelRef::Pp(2), t, Reservation::new(NodeId::new(9), Action::Busy)).unwrap();
        }
        let sorted = rm.sorted_pp_refs();
        assert_eq!(sorted, [ChannelRef::Pp(1), ChannelRef::Pp(2), ChannelRef::Pp(0)]);
    }

    #[test]
    fn sorted_refs_skip_blacklisted() {
        let mut rm = manager();
        rm.channel_mut(ChannelRef::Pp(1)).set_blacklisted(true);
        assert_eq!(rm.sorted_pp_refs().len(), 2);
    }

    #[test]
    fn schedule_bursts_writes_alternating_pattern() {
        let mut rm = manager();
        let initiator = NodeId::new(1);
        let recipient = NodeId::new(2);
        let map =
            rm.schedule_bursts(ChannelRef::Pp(0), 4, 1, 1, 0, 3, initiator, recipient, true).unwrap();
        assert_eq!(map.num_scheduled(), 6);
        let table = rm.table(ChannelRef::Pp(0));
        for (t, action) in [(4, Action::Tx), (9, Action::Rx), (14, Action::Tx), (19, Action::Rx)] {
            let r = table.reservation(t).unwrap();
            assert_eq!(r.action(), action);
            assert_eq!(r.target(), recipient);
        }
        // the initiator's TX slots hit the hardware transmitter table
        assert!(rm.hw().tx().reservation(4).unwrap().is_any_tx());
        assert!(rm.hw().tx().is_idle(9).unwrap());
    }

    #[test]
    fn schedule_bursts_recipient_mirror() {
        let mut rm = manager();
        let initiator = NodeId::new(1);
        let recipient = NodeId::new(2);
        rm.schedule_bursts(ChannelRef::Pp(0), 4, 1, 1, 0, 3, initiator, recipient, false).unwrap();
        let table = rm.table(ChannelRef::Pp(0));
        let first = table.reservation(4).unwrap();
        assert_eq!(first.action(), Action::Rx);
        assert_eq!(first.target(), initiator);
        assert_eq!(table.reservation(9).unwrap().action(), Action::Tx);
    }

    #[test]
    fn schedule_bursts_overwrites_busy_peer_slots() {
        let mut rm = manager();
        let initiator = NodeId::new(1);
        let recipient = NodeId::new(2);
        rm.mark(ChannelRef::Pp(0), 4, Reservation::new(recipient, Action::Busy)).unwrap();
        rm.mark(ChannelRef::Pp(0), 9, Reservation::new(NodeId::new(9), Action::Busy)).unwrap();
        let map =
            rm.schedule_bursts(ChannelRef::Pp(0), 4, 1, 1, 0, 2, initiator, recipient, true).unwrap();
        // slot 4 overwritten (busy with our peer), slot 9 skipped (foreign)
        assert!(rm.table(ChannelRef::Pp(0)).reservation(4).unwrap().is_any_tx());
        assert!(rm.table(ChannelRef::Pp(0)).reservation(9).unwrap().is_busy());
        assert_eq!(map.num_scheduled(), 3);
    }

    #[test]
    fn schedule_bursts_fails_when_no_direction_possible() {
        let mut rm = manager();
        let initiator = NodeId::new(1);
        let recipient = NodeId::new(2);
        // take the transmitter on every forward slot via another channel
        for t in [4, 14] {
            rm.mark(ChannelRef::Pp(1), t, Reservation::new(NodeId::new(9), Action::Tx)).unwrap();
        }
        let result = rm.schedule_bursts(ChannelRef::Pp(0), 4, 1, 1, 0, 2, initiator, recipient, true);
        assert_eq!(result.unwrap_err(), Error::NoTxAvailable);
    }

    #[test]
    fn find_link_proposals_spread_over_channels() {
        let rm = manager();
        let proposals = rm.find_link_proposals(3, 1, 2, 1, 1, 0, 4);
        assert_eq!(proposals.len(), 3);
        for p in &proposals {
            assert_eq!(p.slot_offset, 2);
            assert_eq!(p.period, 0);
        }
        let freqs: Vec<u64> = proposals.iter().map(|p| p.center_freq_khz).collect();
        assert!(freqs.contains(&960_000) && freqs.contains(&962_000) && freqs.contains(&964_000));

        let multi = rm.find_link_proposals(2, 3, 2, 1, 1, 0, 4);
        assert_eq!(multi.len(), 6);
    }
}
