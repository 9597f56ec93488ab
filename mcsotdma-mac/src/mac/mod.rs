//! The per-slot MAC engine: advances time, fires reservations, demultiplexes
//! received packets, and enforces the single-transmitter constraint.

use alloc::collections::BTreeMap;

use mcsotdma_encoding::headers::{BaseHeader, PacketRecord};
use mcsotdma_encoding::{Header, NodeId, Packet, Position};
use rand_core::RngCore;

use crate::channel::ChannelKind;
use crate::config::Config;
use crate::duty_cycle::DutyCycle;
use crate::link::{
    new_pp_manager, pair_key, used_pp_budgets, Ctx, LinkStatus, PpMap, ShLinkManager,
    ThirdPartyMap, ThirdPartyStatus,
};
use crate::neighbors::NeighborObserver;
use crate::radio::{Phy, UpperLayer};
use crate::reservation::{ChannelRef, Reservation, ReservationManager};
use crate::stats::Stats;
use crate::{Error, Result};

/// Builds a [`Ctx`] from disjoint fields of `self`, leaving the link-manager
/// fields free to borrow alongside it.
macro_rules! ctx {
    ($mac:expr) => {
        Ctx {
            own_id: $mac.own_id,
            current_slot: $mac.current_slot,
            current_datarate: $mac.current_datarate,
            cfg: &$mac.cfg,
            rm: &mut $mac.rm,
            duty_cycle: &mut $mac.duty_cycle,
            neighbors: &mut $mac.neighbors,
            stats: &mut $mac.stats,
            rng: &mut $mac.rng,
        }
    };
}

/// One node's MAC instance.
pub struct Mac<RNG: RngCore> {
    own_id: NodeId,
    cfg: Config,
    rm: ReservationManager,
    duty_cycle: DutyCycle,
    neighbors: NeighborObserver,
    sh: ShLinkManager,
    pp: PpMap,
    third_party: ThirdPartyMap,
    stats: Stats,
    rng: RNG,
    current_slot: u64,
    current_datarate: u32,
    transmissions_this_slot: u32,
    position: Position,
    hops_to_ground: u8,
    neighbor_positions: BTreeMap<NodeId, Position>,
}

impl<RNG: RngCore> Mac<RNG> {
    pub fn new(own_id: NodeId, cfg: Config, rng: RNG) -> Self {
        let rm = ReservationManager::new(cfg.planning_horizon, cfg.num_receivers);
        let mut duty_cycle =
            DutyCycle::new(cfg.duty_cycle_period, cfg.max_duty_cycle, cfg.min_supported_pp_links);
        duty_cycle.set_strategy(cfg.duty_cycle_strategy);
        let neighbors = NeighborObserver::new(cfg.neighbor_activity_window as u64);
        Mac {
            own_id,
            cfg,
            rm,
            duty_cycle,
            neighbors,
            sh: ShLinkManager::new(),
            pp: BTreeMap::new(),
            third_party: BTreeMap::new(),
            stats: Stats::default(),
            rng,
            current_slot: 0,
            current_datarate: 1_000,
            transmissions_this_slot: 0,
            position: Position::default(),
            hops_to_ground: u8::MAX,
            neighbor_positions: BTreeMap::new(),
        }
    }

    pub fn own_id(&self) -> NodeId {
        self.own_id
    }

    pub fn current_slot(&self) -> u64 {
        self.current_slot
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn set_hops_to_ground(&mut self, hops: u8) {
        self.hops_to_ground = hops;
    }

    /// Registers the shared channel. Must happen before the first slot.
    pub fn add_sh_channel(&mut self, center_freq_khz: u64, bandwidth_khz: u64) {
        self.rm.add_channel(ChannelKind::Sh, center_freq_khz, bandwidth_khz);
    }

    pub fn add_pp_channel(&mut self, center_freq_khz: u64, bandwidth_khz: u64) {
        self.rm.add_channel(ChannelKind::Pp, center_freq_khz, bandwidth_khz);
    }

    /// The upper layer announces new outgoing data toward `peer`
    /// ([`NodeId::BROADCAST`] for broadcast traffic).
    pub fn notify_outgoing(&mut self, num_bits: u32, peer: NodeId) -> Result<()> {
        let budgets = used_pp_budgets(&self.pp);
        let budgets = (budgets.0.as_slice(), budgets.1.as_slice());
        if peer == NodeId::BROADCAST {
            let mut ctx = ctx!(self);
            return self.sh.notify_outgoing(&mut ctx, budgets);
        }
        if !peer.is_unicast() {
            return Err(Error::UnexpectedState);
        }
        let mut ctx = ctx!(self);
        let manager =
            self.pp.entry(peer).or_insert_with(|| new_pp_manager(&ctx, peer));
        manager.notify_outgoing(&mut ctx, &mut self.sh, budgets, num_bits);
        Ok(())
    }

    /// Advances time by `num_slots`. Runs before [`Self::execute`]; all nodes
    /// of a simulation must be updated before any of them executes.
    pub fn update(&mut self, num_slots: u64) -> Result<()> {
        self.current_slot += num_slots;
        self.rm.update(num_slots);
        let budgets = used_pp_budgets(&self.pp);
        {
            let mut ctx = ctx!(self);
            self.sh.on_slot_start(&mut ctx, (&budgets.0, &budgets.1), num_slots)?;
        }
        {
            let mut ctx = ctx!(self);
            for manager in self.pp.values_mut() {
                manager.on_slot_start(&mut ctx, num_slots);
            }
        }
        // third-party upkeep; a reset frees resources its siblings may want
        let mut reset_keys = alloc::vec::Vec::new();
        {
            let mut ctx = ctx!(self);
            for (key, link) in self.third_party.iter_mut() {
                if link.on_slot_start(&mut ctx, num_slots) {
                    reset_keys.push(*key);
                }
            }
        }
        for reset_key in reset_keys {
            let mut ctx = ctx!(self);
            for (key, link) in self.third_party.iter_mut() {
                if *key != reset_key {
                    link.on_another_third_party_reset(&mut ctx);
                }
            }
        }
        Ok(())
    }

    /// Fires the reservations of the current slot: transmit reservations pull
    /// a packet from the owning link manager and hand it to the PHY, receive
    /// reservations tune a receiver. Returns (transmissions, receptions).
    pub fn execute<U: UpperLayer, P: Phy>(
        &mut self,
        upper: &mut U,
        phy: &mut P,
    ) -> Result<(usize, usize)> {
        self.current_datarate = phy.current_datarate();
        let reservations = self.rm.collect_reservations(0);
        let num_tx_reserved =
            reservations.iter().filter(|(_, r)| r.is_any_tx()).count();
        if num_tx_reserved > 1 {
            // the tables guarantee this cannot happen; a violation means the
            // substrate was corrupted
            return Err(Error::UnexpectedState);
        }
        let mut num_transmissions = 0;
        let mut num_receptions = 0;
        for (cref, reservation) in reservations {
            let center_freq_khz = self.rm.channel(cref).center_freq_khz();
            if reservation.is_any_tx() {
                let packet = match cref {
                    ChannelRef::Sh => {
                        let (header, payload) = {
                            let mut ctx = ctx!(self);
                            self.sh.on_transmission_reservation(&mut ctx, &mut self.pp, upper)?
                        };
                        self.build_packet(Header::Sh(header), &payload)
                    }
                    ChannelRef::Pp(_) => {
                        let peer = reservation.target();
                        let (header, payload) = {
                            let Some(manager) = self.pp.get_mut(&peer) else {
                                self.stats.dropped_packets += 1;
                                continue;
                            };
                            let mut ctx = ctx!(self);
                            manager.on_transmission_reservation(&mut ctx, upper)?
                        };
                        self.build_packet(Header::Unicast(header), &payload)
                    }
                };
                self.stats.packets_sent += 1;
                phy.pass_to_lower(packet, center_freq_khz);
                num_transmissions += 1;
            } else if reservation.is_any_rx() {
                phy.tune_receiver(center_freq_khz);
                num_receptions += 1;
            }
        }
        self.transmissions_this_slot = num_transmissions as u32;
        Ok((num_transmissions, num_receptions))
    }

    fn build_packet(&self, header: Header, payload: &[u8]) -> Packet {
        let mut packet = Packet::new();
        let base = BaseHeader {
            src_id: self.own_id,
            position: self.position,
            hops_to_ground: self.hops_to_ground,
        };
        let _ = packet.push(PacketRecord::header_only(Header::Base(base)));
        match PacketRecord::with_payload(header.clone(), payload) {
            Ok(record) => {
                let _ = packet.push(record);
            }
            Err(_) => {
                let _ = packet.push(PacketRecord::header_only(header));
            }
        }
        packet
    }

    /// A packet arrived from the PHY. Headers are dispatched in order; the
    /// payload is handed upward afterwards.
    pub fn receive_from_lower<U: UpperLayer>(
        &mut self,
        packet: Packet,
        center_freq_khz: u64,
        upper: &mut U,
    ) -> Result<()> {
        let _ = center_freq_khz;
        self.stats.packets_received += 1;
        let mut deliver = false;
        for record in &packet.records {
            match &record.header {
                Header::Base(base) => {
                    let mut ctx = ctx!(self);
                    ctx.neighbors.report_activity(base.src_id, ctx.current_slot);
                    self.neighbor_positions.insert(base.src_id, base.position);
                }
                Header::Sh(header) => {
                    let mut ctx = ctx!(self);
                    self.sh.process_broadcast(
                        &mut ctx,
                        &mut self.pp,
                        &mut self.third_party,
                        header,
                    )?;
                    deliver = deliver || !record.payload.is_empty();
                }
                Header::Unicast(header) => {
                    if header.dest_id != self.own_id {
                        self.stats.dropped_packets += 1;
                        continue;
                    }
                    let Some(src_id) = packet.base().map(|b| b.src_id) else {
                        self.stats.dropped_packets += 1;
                        continue;
                    };
                    let mut ctx = ctx!(self);
                    let manager = self
                        .pp
                        .entry(src_id)
                        .or_insert_with(|| new_pp_manager(&ctx, src_id));
                    manager.process_unicast(&mut ctx, &mut self.sh, header)?;
                    deliver = deliver || !record.payload.is_empty();
                }
            }
        }
        if deliver {
            upper.pass_to_upper(packet);
        }
        Ok(())
    }

    /// Slot-close hook; runs strictly after [`Self::execute`].
    pub fn on_slot_end(&mut self) {
        self.duty_cycle.report_num_transmissions(self.transmissions_this_slot);
        self.transmissions_this_slot = 0;
        self.sh.on_slot_end();
        let mut ctx = ctx!(self);
        for manager in self.pp.values_mut() {
            manager.on_slot_end(&mut ctx);
        }
        self.neighbors.on_slot_end(self.current_slot);
    }

    // ------------------------------------------------------------------
    // introspection, mostly for the host simulator and tests

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn reservation_manager(&self) -> &ReservationManager {
        &self.rm
    }

    /// Mutable access for host-simulator configuration (pre-marking tables,
    /// blacklisting channels).
    pub fn reservation_manager_mut(&mut self) -> &mut ReservationManager {
        &mut self.rm
    }

    pub fn duty_cycle(&self) -> &DutyCycle {
        &self.duty_cycle
    }

    pub fn duty_cycle_mut(&mut self) -> &mut DutyCycle {
        &mut self.duty_cycle
    }

    pub fn neighbors(&self) -> &NeighborObserver {
        &self.neighbors
    }

    pub fn sh_link_manager(&self) -> &ShLinkManager {
        &self.sh
    }

    pub fn set_should_transmit(&mut self, value: bool) {
        self.sh.set_should_transmit(value);
    }

    pub fn pp_link_status(&self, peer: NodeId) -> LinkStatus {
        self.pp.get(&peer).map(|m| m.status()).unwrap_or(LinkStatus::Unestablished)
    }

    pub fn pp_link_remaining_timeout(&self, peer: NodeId) -> Option<u16> {
        self.pp.get(&peer).and_then(|m| m.remaining_timeout())
    }

    pub fn pp_establishment_attempts(&self, peer: NodeId) -> u32 {
        self.pp.get(&peer).map(|m| m.establishment_attempts()).unwrap_or(0)
    }

    pub fn third_party_status(&self, a: NodeId, b: NodeId) -> ThirdPartyStatus {
        self.third_party
            .get(&pair_key(a, b))
            .map(|l| l.status())
            .unwrap_or(ThirdPartyStatus::Uninitialized)
    }

    pub fn third_party_held_resources(&self, a: NodeId, b: NodeId) -> usize {
        self.third_party.get(&pair_key(a, b)).map(|l| l.num_held_resources()).unwrap_or(0)
    }

    pub fn neighbor_position(&self, id: NodeId) -> Option<&Position> {
        self.neighbor_positions.get(&id)
    }

    /// All channels' reservations at the given offset.
    pub fn reservations_at(&self, offset: i32) -> alloc::vec::Vec<(ChannelRef, Reservation)> {
        self.rm.collect_reservations(offset)
    }
}
