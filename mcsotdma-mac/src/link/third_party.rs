//! Mirrors link negotiations overheard between two other nodes, reserving
//! the resources they are about to agree on so our own scheduling steers
//! clear of them.

use mcsotdma_encoding::{LinkProposal, LinkReply, LinkRequest, NodeId};
use rand_core::RngCore;

use super::Ctx;
use crate::reservation::{
    Action, Reservation, ReservationManager, ReservationMap, TableRef,
};
use crate::slots;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ThirdPartyStatus {
    /// Not in use; no reservations held.
    Uninitialized,
    /// A request has been overheard and resources are locked.
    AwaitingReply,
    /// The reply has been overheard; the agreed schedule is marked busy.
    Established,
}

/// What the overheard pair has agreed on, kept so resources can be re-taken
/// if another tracker frees shared ones.
#[derive(Debug, Clone)]
struct LinkDescription {
    proposal: LinkProposal,
    timeout: u16,
}

/// Tracks the link between one overheard (initiator, recipient) pair.
#[derive(Debug)]
pub struct ThirdPartyLink {
    initiator: NodeId,
    recipient: NodeId,
    status: ThirdPartyStatus,
    locks_initiator: ReservationMap,
    locks_recipient: ReservationMap,
    scheduled: ReservationMap,
    /// Countdown until the reply is expected; unanswered requests are
    /// released when it runs out.
    reply_in: Option<i32>,
    /// Countdown until the mirrored link expires.
    expiry_in: Option<i32>,
    /// Slots since the overheard request/reply, to re-normalize its offsets.
    normalization_offset: i32,
    description: Option<LinkDescription>,
}

impl ThirdPartyLink {
    pub fn new(initiator: NodeId, recipient: NodeId) -> Self {
        ThirdPartyLink {
            initiator,
            recipient,
            status: ThirdPartyStatus::Uninitialized,
            locks_initiator: ReservationMap::new(),
            locks_recipient: ReservationMap::new(),
            scheduled: ReservationMap::new(),
            reply_in: None,
            expiry_in: None,
            normalization_offset: 0,
            description: None,
        }
    }

    pub fn initiator(&self) -> NodeId {
        self.initiator
    }

    pub fn recipient(&self) -> NodeId {
        self.recipient
    }

    pub fn status(&self) -> ThirdPartyStatus {
        self.status
    }

    pub fn expected_reply_in(&self) -> Option<i32> {
        self.reply_in
    }

    /// Read-only view of the resources held (test hook).
    pub fn num_held_resources(&self) -> usize {
        self.locks_initiator.num_locked()
            + self.locks_recipient.num_locked()
            + self.scheduled.num_scheduled()
    }

    /// An overheard request between the pair: locks whatever of the proposed
    /// resources is still lockable, on the proposed channel and the hardware
    /// tables alike.
    ///
    /// `expected_reply_in` is the recipient's advertised next broadcast; when
    /// unknown, the reply must at latest precede the proposed link start.
    pub fn process_request<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        request: &LinkRequest,
        expected_reply_in: Option<i32>,
    ) {
        let proposal = request.proposal;
        // request and reply may swap the pair's roles; the request fixes them
        if request.dest_id == self.initiator {
            core::mem::swap(&mut self.initiator, &mut self.recipient);
        }
        self.lock_proposal(ctx, &proposal);
        self.reply_in = Some(expected_reply_in.unwrap_or(proposal.slot_offset).max(0));
        self.normalization_offset = 0;
        self.description =
            Some(LinkDescription { proposal, timeout: ctx.cfg.default_pp_timeout });
        self.status = ThirdPartyStatus::AwaitingReply;
    }

    fn lock_proposal<RNG: RngCore>(&mut self, ctx: &mut Ctx<'_, RNG>, proposal: &LinkProposal) {
        let Some(cref) = ctx.rm.channel_by_freq(proposal.center_freq_khz) else {
            return;
        };
        let timeout = ctx.cfg.default_pp_timeout;
        let (fwd_slots, rev_slots) = slots::alternating_bursts(
            proposal.slot_offset,
            proposal.num_tx_initiator,
            proposal.num_tx_recipient,
            proposal.period,
            timeout,
        );
        let (id1, id2) = (self.initiator, self.recipient);
        for (slot_list, locks) in [
            (&fwd_slots, &mut self.locks_initiator),
            (&rev_slots, &mut self.locks_recipient),
        ] {
            for &t in slot_list {
                let (table, hw) = ctx.rm.table_and_hw_mut(cref);
                if table.lock_either(t, id1, id2).is_ok() {
                    locks.add_locked(TableRef::Channel(cref), t);
                }
                if hw.tx_mut().lock_either(t, id1, id2).is_ok() {
                    locks.add_locked(TableRef::HwTx, t);
                }
                if let Some(i) =
                    (0..hw.num_receivers()).find(|&i| hw.rxs()[i].can_lock(t))
                {
                    if hw.rxs_mut()[i].lock_either(t, id1, id2).is_ok() {
                        locks.add_locked(TableRef::HwRx(i), t);
                    }
                }
            }
        }
    }

    /// The overheard reply seals the pair's link: all negotiation locks are
    /// released and the agreed schedule is marked busy for its whole
    /// lifetime.
    pub fn process_reply<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        reply: &LinkReply,
        origin: NodeId,
    ) {
        // the reply's sender is the link recipient
        if origin == self.initiator {
            core::mem::swap(&mut self.initiator, &mut self.recipient);
        }
        self.release_locks(ctx.rm);
        let proposal = reply.proposal;
        let timeout = self
            .description
            .as_ref()
            .map(|d| d.timeout)
            .unwrap_or(ctx.cfg.default_pp_timeout);
        self.schedule_busy(ctx.rm, &proposal, timeout);
        self.reply_in = None;
        self.normalization_offset = 0;
        self.expiry_in = Some(slots::last_slot_offset(
            proposal.slot_offset,
            proposal.num_tx_initiator,
            proposal.num_tx_recipient,
            proposal.period,
            timeout,
        ));
        self.description = Some(LinkDescription { proposal, timeout });
        self.status = ThirdPartyStatus::Established;
    }

    /// Marks the agreed schedule `Busy@initiator` / `Busy@recipient` wherever
    /// the local table allows it.
    fn schedule_busy(
        &mut self,
        rm: &mut ReservationManager,
        proposal: &LinkProposal,
        timeout: u16,
    ) {
        let Some(cref) = rm.channel_by_freq(proposal.center_freq_khz) else {
            return;
        };
        let (fwd_slots, rev_slots) = slots::alternating_bursts(
            proposal.slot_offset,
            proposal.num_tx_initiator,
            proposal.num_tx_recipient,
            proposal.period,
            timeout,
        );
        for (slot_list, owner) in [(&fwd_slots, self.initiator), (&rev_slots, self.recipient)] {
            for &t in slot_list {
                let writable = matches!(
                    rm.table(cref).reservation(t),
                    Ok(r) if r.is_idle() || r.is_locked()
                );
                if writable && rm.mark(cref, t, Reservation::new(owner, Action::Busy)).is_ok() {
                    self.scheduled.add_scheduled(TableRef::Channel(cref), t);
                }
            }
        }
    }

    fn release_locks(&mut self, rm: &mut ReservationManager) {
        let (id1, id2) = (self.initiator, self.recipient);
        self.locks_initiator.unlock_either(rm, id1, id2);
        self.locks_recipient.unlock_either(rm, id1, id2);
    }

    /// Per-slot upkeep: counts down the reply and expiry windows. Returns
    /// whether the tracker released its resources this slot, so siblings can
    /// be given a chance to take them.
    pub fn on_slot_start<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        num_slots: u64,
    ) -> bool {
        for _ in 0..num_slots {
            self.locks_initiator.on_slot_start();
            self.locks_recipient.on_slot_start();
            self.scheduled.on_slot_start();
        }
        self.normalization_offset += num_slots as i32;
        if let Some(reply_in) = &mut self.reply_in {
            *reply_in -= num_slots as i32;
            if *reply_in < 0 && self.status == ThirdPartyStatus::AwaitingReply {
                // no reply came: the negotiation failed, free everything
                debug!(
                    "third-party link ({}, {}): reply never came",
                    self.initiator.get(),
                    self.recipient.get()
                );
                self.reset(ctx.rm);
                return true;
            }
        }
        if let Some(expiry_in) = &mut self.expiry_in {
            *expiry_in -= num_slots as i32;
            if *expiry_in < 0 && self.status == ThirdPartyStatus::Established {
                debug!(
                    "third-party link ({}, {}): expired",
                    self.initiator.get(),
                    self.recipient.get()
                );
                self.reset(ctx.rm);
                return true;
            }
        }
        false
    }

    /// Releases every lock and scheduled reservation this tracker holds.
    pub fn reset(&mut self, rm: &mut ReservationManager) {
        self.release_locks(rm);
        let _ = self.scheduled.unschedule(rm, &[Action::Busy]);
        self.locks_initiator.reset();
        self.locks_recipient.reset();
        self.scheduled.reset();
        self.reply_in = None;
        self.expiry_in = None;
        self.normalization_offset = 0;
        self.status = ThirdPartyStatus::Uninitialized;
    }

    /// Another tracker released resources: re-attempt whatever this link
    /// could not lock or schedule before.
    pub fn on_another_third_party_reset<RNG: RngCore>(&mut self, ctx: &mut Ctx<'_, RNG>) {
        let Some(description) = self.description.clone() else {
            return;
        };
        let mut proposal = description.proposal;
        proposal.slot_offset -= self.normalization_offset;
        match self.status {
            ThirdPartyStatus::AwaitingReply => {
                self.lock_proposal(ctx, &proposal);
            }
            ThirdPartyStatus::Established => {
                self.schedule_busy(ctx.rm, &proposal, description.timeout);
            }
            ThirdPartyStatus::Uninitialized => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use crate::config::Config;
    use crate::duty_cycle::DutyCycle;
    use crate::neighbors::NeighborObserver;
    use crate::reservation::ChannelRef;
    use crate::stats::Stats;
    use crate::Prng;

    struct Fixture {
        cfg: Config,
        rm: ReservationManager,
        duty: DutyCycle,
        neighbors: NeighborObserver,
        stats: Stats,
        rng: Prng,
    }

    impl Fixture {
        fn new() -> Self {
            let cfg = Config { default_pp_timeout: 3, ..Config::default() };
            let mut rm = ReservationManager::new(256, 2);
            rm.add_channel(ChannelKind::Sh, 1_000_000, 500);
            rm.add_channel(ChannelKind::Pp, 960_000, 500);
            Fixture {
                cfg,
                rm,
                duty: DutyCycle::new(100, 0.1, 4),
                neighbors: NeighborObserver::new(1000),
                stats: Stats::default(),
                rng: Prng::new(42),
            }
        }

        fn ctx(&mut self) -> Ctx<'_, Prng> {
            Ctx {
                own_id: NodeId::new(99),
                current_slot: 0,
                current_datarate: 1000,
                cfg: &self.cfg,
                rm: &mut self.rm,
                duty_cycle: &mut self.duty,
                neighbors: &mut self.neighbors,
                stats: &mut self.stats,
                rng: &mut self.rng,
            }
        }
    }

    // the initiator id travels in the surrounding SH header; the request
    // itself only names the recipient
    fn request(recipient: i32, offset: i32) -> LinkRequest {
        LinkRequest {
            dest_id: NodeId::new(recipient),
            proposal: LinkProposal {
                center_freq_khz: 960_000,
                slot_offset: offset,
                period: 0,
                num_tx_initiator: 1,
                num_tx_recipient: 1,
            },
            generation_time: 0,
        }
    }

    #[test]
    fn request_locks_proposed_slots() {
        let mut fx = Fixture::new();
        let mut link = ThirdPartyLink::new(NodeId::new(1), NodeId::new(2));
        let mut ctx = fx.ctx();
        link.process_request(&mut ctx, &request(2, 10), Some(5));
        assert_eq!(link.status(), ThirdPartyStatus::AwaitingReply);
        // timeout 3, one forward + one reverse each exchange, spacing 5:
        // slots 10, 20, 30 forward and 15, 25, 35 reverse
        let table = fx.rm.table(ChannelRef::Pp(0));
        for t in [10, 15, 20, 25, 30, 35] {
            assert!(table.reservation(t).unwrap().is_locked(), "slot {t} not locked");
        }
    }

    #[test]
    fn unanswered_request_releases_everything() {
        let mut fx = Fixture::new();
        let mut link = ThirdPartyLink::new(NodeId::new(1), NodeId::new(2));
        let mut ctx = fx.ctx();
        link.process_request(&mut ctx, &request(2, 10), Some(2));
        let mut released = false;
        for _ in 0..4 {
            fx.rm.update(1);
            let mut ctx = fx.ctx();
            released |= link.on_slot_start(&mut ctx, 1);
        }
        assert!(released);
        assert_eq!(link.status(), ThirdPartyStatus::Uninitialized);
        assert_eq!(link.num_held_resources(), 0);
        let table = fx.rm.table(ChannelRef::Pp(0));
        // request started at +10; four slots have passed since
        for t in [6, 11, 16, 21, 26, 31] {
            assert!(table.is_idle(t).unwrap(), "slot {t} still reserved");
        }
    }

    #[test]
    fn reply_converts_locks_to_busy_schedule() {
        let mut fx = Fixture::new();
        let mut link = ThirdPartyLink::new(NodeId::new(1), NodeId::new(2));
        let mut ctx = fx.ctx();
        link.process_request(&mut ctx, &request(2, 10), Some(5));
        let reply = LinkReply {
            dest_id: NodeId::new(1),
            proposal: LinkProposal {
                center_freq_khz: 960_000,
                slot_offset: 10,
                period: 0,
                num_tx_initiator: 1,
                num_tx_recipient: 1,
            },
        };
        let mut ctx = fx.ctx();
        link.process_reply(&mut ctx, &reply, NodeId::new(2));
        assert_eq!(link.status(), ThirdPartyStatus::Established);
        let table = fx.rm.table(ChannelRef::Pp(0));
        for (t, owner) in [(10, 1), (20, 1), (30, 1), (15, 2), (25, 2), (35, 2)] {
            let r = table.reservation(t).unwrap();
            assert!(r.is_busy(), "slot {t} not busy");
            assert_eq!(r.target(), NodeId::new(owner));
        }
        // the lock on the hardware tables is gone
        assert!(fx.rm.hw().tx().is_idle(10).unwrap());
    }

    #[test]
    fn expiry_clears_the_schedule() {
        let mut fx = Fixture::new();
        let mut link = ThirdPartyLink::new(NodeId::new(1), NodeId::new(2));
        let mut ctx = fx.ctx();
        link.process_request(&mut ctx, &request(2, 10), Some(5));
        let reply = LinkReply {
            dest_id: NodeId::new(1),
            proposal: LinkProposal {
                center_freq_khz: 960_000,
                slot_offset: 10,
                period: 0,
                num_tx_initiator: 1,
                num_tx_recipient: 1,
            },
        };
        let mut ctx = fx.ctx();
        link.process_reply(&mut ctx, &reply, NodeId::new(2));
        // the last scheduled slot is +35; walk past it
        for _ in 0..=36 {
            fx.rm.update(1);
            let mut ctx = fx.ctx();
            link.on_slot_start(&mut ctx, 1);
        }
        assert_eq!(link.status(), ThirdPartyStatus::Uninitialized);
        assert_eq!(link.num_held_resources(), 0);
    }
}
