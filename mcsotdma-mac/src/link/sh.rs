//! Shared-channel link management: randomized slot selection with
//! contention-aware candidate sizing, broadcast assembly, and the fan-out of
//! received control messages.

use alloc::vec::Vec;

use mcsotdma_encoding::headers::ShHeader;
use mcsotdma_encoding::{LinkProposal, LinkReply, LinkRequest, NodeId};
use rand_core::RngCore;

use super::pp::{LinkStatus, PpLinkManager};
use super::third_party::ThirdPartyLink;
use super::{pair_key, used_pp_budgets, Ctx, PpMap, ThirdPartyMap};
use crate::config::ContentionMethod;
use crate::moving_average::MovingAverage;
use crate::radio::UpperLayer;
use crate::reservation::{Action, ChannelRef, Reservation};
use crate::rng;
use crate::{Error, Result};

/// Manages access to the shared channel. One per node.
#[derive(Debug)]
pub struct ShLinkManager {
    /// Offset of the scheduled next broadcast; `None` while nothing is
    /// scheduled.
    next_broadcast: Option<u32>,
    /// Link requests waiting to ride the next broadcast, with the slot they
    /// were generated in.
    pending_requests: Vec<(NodeId, u64)>,
    /// Link replies waiting to ride a broadcast, with the slot they were
    /// enqueued in (their proposals' offsets are relative to that slot).
    pending_replies: Vec<(u64, LinkReply)>,
    /// Slots between packet generations, for congestion estimation.
    avg_generation_gap: MovingAverage,
    slots_since_last_generation: u32,
    packet_generated_this_slot: bool,
    do_transmit: bool,
}

impl ShLinkManager {
    pub fn new() -> Self {
        ShLinkManager {
            next_broadcast: None,
            pending_requests: Vec::new(),
            pending_replies: Vec::new(),
            avg_generation_gap: MovingAverage::new(100),
            slots_since_last_generation: 0,
            packet_generated_this_slot: false,
            do_transmit: true,
        }
    }

    pub fn next_broadcast_offset(&self) -> Option<u32> {
        self.next_broadcast
    }

    pub fn set_should_transmit(&mut self, value: bool) {
        self.do_transmit = value;
    }

    pub fn num_pending_requests(&self) -> usize {
        self.pending_requests.len()
    }

    pub fn num_pending_replies(&self) -> usize {
        self.pending_replies.len()
    }

    /// Average slots between packet generations.
    pub fn average_generation_gap(&self) -> f64 {
        self.avg_generation_gap.get()
    }

    /// New broadcast data: makes sure a broadcast slot is scheduled.
    pub fn notify_outgoing<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp_budgets: (&[f64], &[i32]),
    ) -> Result<()> {
        self.packet_generated_this_slot = true;
        if self.next_broadcast.is_none() {
            self.schedule_broadcast_slot(ctx, pp_budgets, None)?;
        }
        Ok(())
    }

    /// Queues a link request toward `peer` for the next broadcast.
    pub fn enqueue_link_request<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp_budgets: (&[f64], &[i32]),
        peer: NodeId,
    ) {
        debug!("queueing link request to {}", peer.get());
        self.pending_requests.push((peer, ctx.current_slot));
        if self.notify_outgoing(ctx, pp_budgets).is_err() {
            warn!("no broadcast slot available for a pending link request");
        }
    }

    /// Queues a link reply. The proposal's offset must be relative to
    /// `current_slot`; it is re-normalized when the reply is transmitted.
    pub fn enqueue_link_reply(&mut self, current_slot: u64, reply: LinkReply) {
        self.pending_replies.push((current_slot, reply));
    }

    pub fn cancel_link_request(&mut self, peer: NodeId) -> usize {
        let before = self.pending_requests.len();
        self.pending_requests.retain(|(id, _)| *id != peer);
        before - self.pending_requests.len()
    }

    pub fn cancel_link_reply(&mut self, peer: NodeId) -> usize {
        let before = self.pending_replies.len();
        self.pending_replies.retain(|(_, reply)| reply.dest_id != peer);
        before - self.pending_replies.len()
    }

    /// Number of candidate slots to draw from, sized by the configured
    /// contention method.
    fn num_candidate_slots<RNG: RngCore>(&self, ctx: &Ctx<'_, RNG>) -> u32 {
        let k = match ctx.cfg.contention_method {
            ContentionMethod::Naive => ctx.cfg.min_candidates,
            ContentionMethod::RandomizedSlottedAloha => {
                let m = ctx.neighbors.num_active_neighbors(ctx.current_slot);
                if m == 0 {
                    ctx.cfg.min_candidates
                } else {
                    let p = ctx.cfg.target_collision_prob;
                    let per_slot = 1.0 - libm::pow(1.0 - p, 1.0 / m as f64);
                    libm::ceil(1.0 / per_slot) as u32
                }
            }
        };
        k.clamp(ctx.cfg.min_candidates, ctx.cfg.max_candidates)
    }

    /// Selects and reserves the next broadcast slot: contention-sized
    /// candidate set, duty-cycle-derived minimum offset, uniform draw.
    fn schedule_broadcast_slot<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp_budgets: (&[f64], &[i32]),
        min_offset_override: Option<i32>,
    ) -> Result<()> {
        if !self.do_transmit {
            return Ok(());
        }
        self.unschedule_broadcast_slot(ctx)?;
        let mut min_offset =
            if ctx.cfg.consider_duty_cycle { ctx.duty_cycle.sh_offset(pp_budgets.0)? } else { 1 };
        if let Some(override_offset) = min_offset_override {
            min_offset = min_offset.max(override_offset);
        }
        let num_candidates = self.num_candidate_slots(ctx);
        let candidates =
            ctx.rm.table(ChannelRef::Sh).find_sh_candidates(ctx.rm.hw(), num_candidates as usize, min_offset);
        if candidates.is_empty() {
            return Err(Error::NoCandidates);
        }
        ctx.stats.broadcast_candidate_slots += candidates.len() as u64;
        ctx.stats.broadcast_slot_selections += 1;
        let selected = candidates[rng::index(ctx.rng, candidates.len())];
        ctx.rm.mark(
            ChannelRef::Sh,
            selected as i32,
            Reservation::new(NodeId::BROADCAST, Action::Tx),
        )?;
        self.next_broadcast = Some(selected);
        debug!("next broadcast in {} slots", selected);
        Ok(())
    }

    fn unschedule_broadcast_slot<RNG: RngCore>(&mut self, ctx: &mut Ctx<'_, RNG>) -> Result<()> {
        if let Some(t) = self.next_broadcast.take() {
            ctx.rm.mark(ChannelRef::Sh, t as i32, Reservation::IDLE)?;
        }
        Ok(())
    }

    /// A higher-priority reservation claims our scheduled broadcast slot:
    /// give the slot to the collider and reselect strictly later.
    pub fn broadcast_collision_detected<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp_budgets: (&[f64], &[i32]),
        collider: NodeId,
        mark_as: Action,
    ) -> Result<()> {
        let Some(old_slot) = self.next_broadcast else {
            return Ok(());
        };
        self.unschedule_broadcast_slot(ctx)?;
        ctx.rm.mark(ChannelRef::Sh, old_slot as i32, Reservation::new(collider, mark_as))?;
        ctx.stats.broadcast_collisions_detected += 1;
        self.schedule_broadcast_slot(ctx, pp_budgets, Some(old_slot as i32 + 1))
    }

    /// A third-party link reply is expected from `sender` at the given
    /// offset: make sure we listen there, rescheduling our own broadcast if
    /// it collides.
    pub fn report_third_party_expected_link_reply<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp_budgets: (&[f64], &[i32]),
        slot_offset: i32,
        sender: NodeId,
    ) -> Result<()> {
        if slot_offset <= 0 {
            return Ok(());
        }
        let reservation = *ctx.rm.table(ChannelRef::Sh).reservation(slot_offset)?;
        if reservation.is_tx() && self.next_broadcast == Some(slot_offset as u32) {
            self.broadcast_collision_detected(ctx, pp_budgets, sender, Action::Rx)
        } else if !reservation.is_any_tx() {
            ctx.rm.mark(ChannelRef::Sh, slot_offset, Reservation::new(sender, Action::Rx))
        } else {
            Ok(())
        }
    }

    /// Duty-cycle-derived minimum offset and period for a new PP link,
    /// honoring a forced period.
    fn pp_min_offset_and_period<RNG: RngCore>(
        &self,
        ctx: &Ctx<'_, RNG>,
        pp_budgets: (&[f64], &[i32]),
    ) -> Result<(i32, u8)> {
        let sh_budget = if ctx.cfg.consider_duty_cycle {
            ctx.duty_cycle.sh_budget(pp_budgets.0)?
        } else {
            1.0
        };
        let sh_offset = self.next_broadcast.map(|t| t as i32).unwrap_or(-1);
        let (min_offset, period) = ctx.duty_cycle.pp_min_offset_and_period(
            pp_budgets.0,
            pp_budgets.1,
            sh_budget,
            sh_offset,
        )?;
        Ok((min_offset, ctx.cfg.force_pp_period.unwrap_or(period)))
    }

    /// Per-slot upkeep. Must run after the tables have been advanced and
    /// before `execute` fires reservations.
    pub fn on_slot_start<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp_budgets: (&[f64], &[i32]),
        num_slots: u64,
    ) -> Result<()> {
        if let Some(t) = self.next_broadcast {
            let Some(remaining) = (t as u64).checked_sub(num_slots) else {
                return Err(Error::MissedScheduledSlot);
            };
            self.next_broadcast = Some(remaining as u32);
        } else if self.packet_generated_this_slot
            || !self.pending_requests.is_empty()
            || !self.pending_replies.is_empty()
        {
            self.schedule_broadcast_slot(ctx, pp_budgets, None)?;
        }
        // listen on the shared channel whenever nothing else claims the slot
        let current = *ctx.rm.table(ChannelRef::Sh).reservation(0)?;
        if current.is_idle() || current.is_busy() {
            if ctx
                .rm
                .mark(ChannelRef::Sh, 0, Reservation::new(NodeId::BROADCAST, Action::Rx))
                .is_err()
            {
                trace!("no receiver available for shared-channel listening");
            }
        }
        Ok(())
    }

    /// Slot-close hook: updates the generation-gap estimate.
    pub fn on_slot_end(&mut self) {
        if self.packet_generated_this_slot {
            self.packet_generated_this_slot = false;
            self.avg_generation_gap.put(self.slots_since_last_generation as f64 + 1.0);
            self.slots_since_last_generation = 0;
        } else {
            self.slots_since_last_generation += 1;
        }
        self.avg_generation_gap.tick_close_slot();
    }

    /// The broadcast reservation fires: assembles the full shared-channel
    /// header in order — own advertisement, pending link requests (locking
    /// their proposed resources), at most one reply, advertised proposals,
    /// and the utilization summary.
    pub fn on_transmission_reservation<RNG: RngCore, U: UpperLayer>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp: &mut PpMap,
        upper: &mut U,
    ) -> Result<(ShHeader, Vec<u8>)> {
        let payload = upper.request_segment(ctx.current_datarate, NodeId::BROADCAST);
        let mut header = ShHeader::new(ctx.own_id);
        self.next_broadcast = None;

        // schedule the following broadcast first so that the advertisement
        // and all reply-slot reasoning below refer to it
        let budgets = used_pp_budgets(pp);
        self.schedule_broadcast_slot(ctx, (&budgets.0, &budgets.1), None)?;
        if ctx.cfg.advertise_next_slot_in_header {
            header.slot_offset = self.next_broadcast.unwrap_or(0) as u16;
        }

        self.attach_link_requests(ctx, pp, &mut header);
        self.attach_link_reply(ctx, &mut header);
        self.attach_link_proposals(ctx, pp, &mut header);
        for manager in pp.values() {
            if let Some(cref) = manager.current_channel() {
                if let Some(utilization) =
                    manager.utilization(ctx.rm.channel(cref).center_freq_khz())
                {
                    if header.link_utilizations.push(utilization).is_err() {
                        break;
                    }
                }
            }
        }

        ctx.stats.broadcasts_sent += 1;
        Ok((header, payload))
    }

    /// Attaches the queued link requests, preferring proposals the peer has
    /// advertised, and locks every proposed resource.
    fn attach_link_requests<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp: &mut PpMap,
        header: &mut ShHeader,
    ) {
        let pending = core::mem::take(&mut self.pending_requests);
        for (peer, generation_time) in pending {
            let budgets = used_pp_budgets(pp);
            let budgets = (budgets.0.as_slice(), budgets.1.as_slice());
            let Some(manager) = pp.get_mut(&peer) else { continue };
            let (fwd, rev) =
                manager.burst_split(ctx.current_datarate, ctx.cfg.force_bidirectional_links);
            let (duty_min_offset, period) = match self.pp_min_offset_and_period(ctx, budgets) {
                Ok(pair) => pair,
                Err(_) => {
                    // no budget: the attempt is aborted and will be retried on
                    // the next outgoing-data notification
                    debug!("dropping link request to {}: no duty-cycle budget", peer.get());
                    manager.request_aborted();
                    continue;
                }
            };

            let timeout = ctx.cfg.default_pp_timeout;
            let proposals = self.select_proposals_for_request(
                ctx,
                budgets,
                peer,
                fwd,
                rev,
                period,
                duty_min_offset,
                timeout,
            );
            if proposals.is_empty() {
                debug!("no proposable resources for link request to {}", peer.get());
                // keep the request queued for the next broadcast
                self.pending_requests.push((peer, generation_time));
                continue;
            }

            let expected_reply_in = ctx
                .neighbors
                .next_expected_broadcast_slot(peer, ctx.current_slot)
                .map(|t| t as i32)
                .unwrap_or_else(|| proposals[0].slot_offset);
            manager.notify_link_request_sent(expected_reply_in);
            let mut attached = 0usize;
            for proposal in proposals {
                if header.link_requests.is_full() {
                    break;
                }
                if manager.lock_proposed_resources(ctx, &proposal, timeout).is_err() {
                    continue;
                }
                header
                    .link_requests
                    .push(LinkRequest { dest_id: peer, proposal, generation_time })
                    .ok();
                attached += 1;
            }
            if attached == 0 {
                manager.request_aborted();
                continue;
            }
            // listen for the reply on the shared channel
            if expected_reply_in > 0
                && matches!(ctx.rm.table(ChannelRef::Sh).is_idle(expected_reply_in), Ok(true))
                && ctx
                    .rm
                    .mark(ChannelRef::Sh, expected_reply_in, Reservation::new(peer, Action::Rx))
                    .is_ok()
            {
                manager.note_reply_slot_reserved(expected_reply_in);
            }
            ctx.stats.link_requests_sent += 1;
        }
    }

    /// Picks the proposals to send with a request: the earliest feasible
    /// peer-advertised link if any, otherwise locally computed ones.
    #[allow(clippy::too_many_arguments)]
    fn select_proposals_for_request<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp_budgets: (&[f64], &[i32]),
        peer: NodeId,
        num_forward_bursts: u8,
        num_reverse_bursts: u8,
        period: u8,
        duty_min_offset: i32,
        timeout: u16,
    ) -> Vec<LinkProposal> {
        let advertised = ctx.neighbors.advertised_link_proposals(peer, ctx.current_slot);
        let mut feasible: Vec<LinkProposal> = advertised
            .into_iter()
            .filter(|proposal| {
                ctx.rm
                    .channel_by_freq(proposal.center_freq_khz)
                    .map(|cref| {
                        ctx.rm.table(cref).is_link_valid(
                            ctx.rm.hw(),
                            proposal.slot_offset,
                            proposal.period,
                            num_forward_bursts,
                            num_reverse_bursts,
                            timeout,
                            true,
                        )
                    })
                    .unwrap_or(false)
                    && PpLinkManager::proposal_duty_cycle_conformant(
                        ctx.duty_cycle,
                        pp_budgets.0,
                        proposal,
                        ctx.cfg.consider_duty_cycle,
                    )
            })
            .collect();
        if !feasible.is_empty() {
            // earliest advertised link; ties break toward the lower frequency
            feasible.sort_by(|a, b| {
                a.slot_offset.cmp(&b.slot_offset).then(a.center_freq_khz.cmp(&b.center_freq_khz))
            });
            ctx.stats.saved_proposals_sent += 1;
            let mut chosen = feasible[0];
            chosen.num_tx_initiator = num_forward_bursts;
            chosen.num_tx_recipient = num_reverse_bursts;
            return alloc::vec![chosen];
        }
        // nothing usable advertised: propose links that work locally, after
        // the peer can have replied
        ctx.stats.own_proposals_sent += 1;
        let reply_bound = ctx
            .neighbors
            .next_expected_broadcast_slot(peer, ctx.current_slot)
            .map(|t| t as i32 + 1)
            .unwrap_or_else(|| self.next_broadcast.map(|t| t as i32).unwrap_or(1));
        let min_offset =
            duty_min_offset.max(reply_bound).max(ctx.cfg.min_offset_to_allow_processing as i32);
        ctx.rm.find_link_proposals(
            ctx.cfg.num_proposed_channels,
            ctx.cfg.num_proposed_slots,
            min_offset,
            num_forward_bursts,
            num_reverse_bursts,
            period,
            timeout,
        )
    }

    /// Attaches the oldest queued reply whose proposal is still in the
    /// future, re-normalized to this broadcast slot.
    fn attach_link_reply<RNG: RngCore>(&mut self, ctx: &mut Ctx<'_, RNG>, header: &mut ShHeader) {
        while !self.pending_replies.is_empty() {
            let (enqueued_at, mut reply) = self.pending_replies.remove(0);
            let age = (ctx.current_slot - enqueued_at) as i32;
            reply.proposal.slot_offset -= age;
            if reply.proposal.slot_offset <= 0 {
                debug!("dropping stale link reply to {}", reply.dest_id.get());
                ctx.stats.dropped_packets += 1;
                continue;
            }
            header.link_reply = Some(reply);
            ctx.stats.link_replies_sent += 1;
            break;
        }
    }

    /// Advertises up to `num_proposed_channels` links others may adopt.
    fn attach_link_proposals<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp: &PpMap,
        header: &mut ShHeader,
    ) {
        let budgets = used_pp_budgets(pp);
        let Ok((min_offset, period)) =
            self.pp_min_offset_and_period(ctx, (&budgets.0, &budgets.1))
        else {
            return;
        };
        // strictly after the advertised broadcast, so an adopter's reply at
        // that broadcast still precedes the link start
        let min_offset = min_offset.max(self.next_broadcast.map(|t| t as i32 + 1).unwrap_or(1));
        let proposals = ctx.rm.find_link_proposals(
            ctx.cfg.num_proposed_channels,
            1,
            min_offset,
            1,
            1,
            period,
            ctx.cfg.default_pp_timeout,
        );
        for proposal in proposals {
            if header.link_proposals.push(proposal).is_err() {
                break;
            }
        }
    }

    /// Fans a received shared-channel header out into the advertisement,
    /// request, reply and utilization handlers.
    pub fn process_broadcast<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp: &mut PpMap,
        third_party: &mut ThirdPartyMap,
        header: &ShHeader,
    ) -> Result<()> {
        let origin = header.src_id;
        ctx.stats.broadcasts_received += 1;
        ctx.stats.broadcast_messages_processed += 1;
        ctx.neighbors.report_activity(origin, ctx.current_slot);

        self.process_advertised_slot(ctx, pp, header)?;

        if !header.link_proposals.is_empty() {
            ctx.neighbors.clear_advertised_link_proposals(origin);
            for message in &header.link_proposals {
                ctx.neighbors.add_advertised_link_proposal(origin, ctx.current_slot, *message);
            }
        }

        self.process_link_requests(ctx, pp, third_party, header)?;
        self.process_link_reply(ctx, pp, third_party, header)?;

        for _ in &header.link_utilizations {
            ctx.stats.link_utilizations_received += 1;
        }
        Ok(())
    }

    /// Handles the sender's next-broadcast advertisement: listen there, or
    /// reselect our own broadcast if it collides.
    fn process_advertised_slot<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp: &PpMap,
        header: &ShHeader,
    ) -> Result<()> {
        if header.slot_offset == 0 {
            return Ok(());
        }
        let offset = header.slot_offset as u32;
        ctx.neighbors.report_broadcast_slot_advertisement(header.src_id, offset, ctx.current_slot);
        if offset > ctx.rm.planning_horizon() {
            return Ok(());
        }
        let reservation = *ctx.rm.table(ChannelRef::Sh).reservation(offset as i32)?;
        if reservation.is_idle() {
            if ctx
                .rm
                .mark(ChannelRef::Sh, offset as i32, Reservation::new(header.src_id, Action::Rx))
                .is_err()
            {
                trace!("no receiver left for the advertised broadcast slot");
            }
        } else if reservation.is_tx() && self.next_broadcast == Some(offset) {
            debug!("broadcast collision with {} in {} slots", header.src_id.get(), offset);
            let budgets = used_pp_budgets(pp);
            self.broadcast_collision_detected(
                ctx,
                (&budgets.0, &budgets.1),
                header.src_id,
                Action::Rx,
            )?;
        }
        Ok(())
    }

    /// Examines each link request: requests to us are validated and answered,
    /// requests between other nodes feed the third-party tracker.
    fn process_link_requests<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp: &mut PpMap,
        third_party: &mut ThirdPartyMap,
        header: &ShHeader,
    ) -> Result<()> {
        let origin = header.src_id;
        let mut acceptable: Vec<(LinkProposal, u64)> = Vec::new();
        let mut received_request = false;
        let mut reset_pairs: Vec<(NodeId, NodeId)> = Vec::new();
        for request in &header.link_requests {
            if request.dest_id == ctx.own_id {
                ctx.stats.link_requests_received += 1;
                received_request = true;
                let proposal = request.proposal;
                // we must be able to reply before the proposed link starts
                let next_broadcast = self.next_broadcast.unwrap_or(0);
                if proposal.slot_offset <= next_broadcast as i32 {
                    ctx.stats.pp_requests_rejected_unacceptable_reply_slot += 1;
                    continue;
                }
                let budgets = used_pp_budgets(pp);
                let valid = ctx
                    .rm
                    .channel_by_freq(proposal.center_freq_khz)
                    .map(|cref| {
                        ctx.rm.table(cref).is_link_valid(
                            ctx.rm.hw(),
                            proposal.slot_offset,
                            proposal.period,
                            proposal.num_tx_initiator,
                            proposal.num_tx_recipient,
                            ctx.cfg.default_pp_timeout,
                            false,
                        )
                    })
                    .unwrap_or(false)
                    && PpLinkManager::proposal_duty_cycle_conformant(
                        ctx.duty_cycle,
                        &budgets.0,
                        &proposal,
                        ctx.cfg.consider_duty_cycle,
                    );
                if valid {
                    acceptable.push((proposal, request.generation_time));
                }
            } else {
                ctx.stats.third_party_requests_received += 1;
                let key = pair_key(origin, request.dest_id);
                let link = third_party.entry(key).or_insert_with(|| {
                    ThirdPartyLink::new(origin, request.dest_id)
                });
                // the first request of a pair in this header supersedes
                // whatever state the tracker held
                if !reset_pairs.contains(&key) {
                    link.reset(ctx.rm);
                    reset_pairs.push(key);
                }
                let expected_reply_in = ctx
                    .neighbors
                    .next_expected_broadcast_slot(request.dest_id, ctx.current_slot)
                    .map(|t| t as i32);
                link.process_request(ctx, request, expected_reply_in);
                if let Some(reply_offset) = link.expected_reply_in() {
                    let budgets = used_pp_budgets(pp);
                    self.report_third_party_expected_link_reply(
                        ctx,
                        (&budgets.0, &budgets.1),
                        reply_offset,
                        request.dest_id,
                    )?;
                }
            }
        }
        if received_request {
            if let Some((proposal, generation_time)) = Self::pick_earliest(acceptable) {
                let manager = pp
                    .entry(origin)
                    .or_insert_with(|| new_pp_manager(ctx, origin));
                manager.set_reported_resource_requirement(proposal.num_tx_recipient.max(1));
                if manager.accept_link(ctx, &proposal, true, generation_time).is_ok() {
                    // our own establishment toward them is superseded
                    let cancelled = self.cancel_link_request(origin);
                    if cancelled > 0 {
                        debug!("cancelled own link request to {}", origin.get());
                    }
                    self.enqueue_link_reply(
                        ctx.current_slot,
                        LinkReply { dest_id: origin, proposal },
                    );
                } else {
                    ctx.stats.pp_requests_rejected_unacceptable_proposals += 1;
                }
            } else {
                // nothing acceptable: counter-propose by starting our own
                // establishment attempt
                ctx.stats.pp_requests_rejected_unacceptable_proposals += 1;
                let budgets = used_pp_budgets(pp);
                let manager = pp
                    .entry(origin)
                    .or_insert_with(|| new_pp_manager(ctx, origin));
                if manager.status() == LinkStatus::Unestablished {
                    manager.notify_outgoing(ctx, self, (&budgets.0, &budgets.1), 1);
                }
            }
        }
        Ok(())
    }

    fn pick_earliest(acceptable: Vec<(LinkProposal, u64)>) -> Option<(LinkProposal, u64)> {
        acceptable.into_iter().min_by(|(a, _), (b, _)| {
            a.slot_offset.cmp(&b.slot_offset).then(a.center_freq_khz.cmp(&b.center_freq_khz))
        })
    }

    /// Handles the at-most-one link reply of a header.
    fn process_link_reply<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        pp: &mut PpMap,
        third_party: &mut ThirdPartyMap,
        header: &ShHeader,
    ) -> Result<()> {
        let Some(reply) = &header.link_reply else {
            return Ok(());
        };
        let origin = header.src_id;
        if reply.dest_id == ctx.own_id {
            ctx.stats.link_replies_received += 1;
            let budgets = used_pp_budgets(pp);
            if !PpLinkManager::proposal_duty_cycle_conformant(
                ctx.duty_cycle,
                &budgets.0,
                &reply.proposal,
                ctx.cfg.consider_duty_cycle,
            ) {
                debug!("rejecting link reply from {}: duty cycle", origin.get());
                ctx.stats.pp_requests_rejected_unacceptable_proposals += 1;
                return Ok(());
            }
            let manager = pp.entry(origin).or_insert_with(|| new_pp_manager(ctx, origin));
            if manager.accept_link(ctx, &reply.proposal, false, 0).is_err() {
                ctx.stats.pp_requests_rejected_unacceptable_proposals += 1;
            }
        } else {
            ctx.stats.third_party_replies_received += 1;
            let key = pair_key(reply.dest_id, origin);
            if let Some(link) = third_party.get_mut(&key) {
                link.process_reply(ctx, reply, origin);
            }
        }
        Ok(())
    }
}

impl Default for ShLinkManager {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn new_pp_manager<RNG: RngCore>(ctx: &Ctx<'_, RNG>, peer: NodeId) -> PpLinkManager {
    PpLinkManager::new(peer, ctx.cfg.max_link_renewal_attempts)
}
