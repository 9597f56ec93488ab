//! Per-peer point-to-point link management: establishment through the
//! three-way request/reply/first-burst handshake, data bursts, timeout
//! accounting, renewal and expiry.

use alloc::vec::Vec;

use mcsotdma_encoding::{LinkProposal, LinkReply, LinkRequest, LinkUtilization, NodeId, UnicastHeader};
use rand_core::RngCore;

use super::sh::ShLinkManager;
use super::Ctx;
use crate::duty_cycle::DutyCycle;
use crate::moving_average::MovingAverage;
use crate::radio::UpperLayer;
use crate::reservation::{Action, ChannelRef, ReservationMap, TableRef};
use crate::slots;
use crate::{Error, Result};

/// Lifecycle of a PP link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum LinkStatus {
    /// No link and none being established.
    Unestablished,
    /// A request is queued and will ride the next shared-channel broadcast.
    AwaitingRequestGeneration,
    /// The request is out; the proposed resources are locked until the reply
    /// arrives or its slot passes.
    AwaitingReply,
    /// The schedule is committed; the first data burst seals the link.
    AwaitingFirstData,
    Established,
}

/// Parameters of a committed (or renewing) link schedule.
#[derive(Debug, Clone)]
struct LinkState {
    channel: ChannelRef,
    period: u8,
    num_tx_initiator: u8,
    num_tx_recipient: u8,
    /// Remaining exchanges until expiry.
    timeout: u16,
    is_initiator: bool,
    /// Offset of the final scheduled slot, decremented as time passes.
    expiry_offset: i32,
}

#[derive(Debug)]
struct PendingRenewal {
    state: LinkState,
    scheduled: ReservationMap,
}

/// Window of the outgoing-traffic moving average, in slots. Sized to one
/// nominal inter-burst spacing so the estimate captures the bits that accrue
/// between two bursts of a running link.
const TRAFFIC_ESTIMATE_WINDOW: usize = 20;

/// Manages the link toward one peer.
#[derive(Debug)]
pub struct PpLinkManager {
    peer: NodeId,
    status: LinkStatus,
    /// Resources locked while a request is in flight.
    locked: ReservationMap,
    /// Resources of the committed schedule.
    scheduled: ReservationMap,
    state: Option<LinkState>,
    renewal: Option<PendingRenewal>,
    outgoing_traffic_estimate: MovingAverage,
    /// Slots in which the peer would like to transmit per exchange.
    reported_resource_requirement: u8,
    establishment_attempts: u32,
    request_generation_time: Option<u64>,
    /// Countdown to the slot the reply is expected in.
    expected_reply_in: Option<i32>,
    renewal_requests_left: u32,
    updated_timeout_this_slot: bool,
    seq_num: u16,
}

impl PpLinkManager {
    pub fn new(peer: NodeId, max_renewal_attempts: u32) -> Self {
        PpLinkManager {
            peer,
            status: LinkStatus::Unestablished,
            locked: ReservationMap::new(),
            scheduled: ReservationMap::new(),
            state: None,
            renewal: None,
            outgoing_traffic_estimate: MovingAverage::new(TRAFFIC_ESTIMATE_WINDOW),
            reported_resource_requirement: 1,
            establishment_attempts: 0,
            request_generation_time: None,
            expected_reply_in: None,
            renewal_requests_left: max_renewal_attempts,
            updated_timeout_this_slot: false,
            seq_num: 0,
        }
    }

    pub fn peer(&self) -> NodeId {
        self.peer
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    /// Whether a committed schedule exists (budget-wise the link is live).
    pub fn is_active(&self) -> bool {
        matches!(self.status, LinkStatus::AwaitingFirstData | LinkStatus::Established)
    }

    pub fn establishment_attempts(&self) -> u32 {
        self.establishment_attempts
    }

    /// Budget contribution of the running link and its slots until expiry.
    pub fn budget_contribution(&self) -> Option<(f64, i32)> {
        let state = self.state.as_ref()?;
        if !self.is_active() {
            return None;
        }
        let cycle = (state.num_tx_initiator as i32 + state.num_tx_recipient as i32)
            * slots::burst_increment(state.period);
        let own_tx_per_cycle =
            if state.is_initiator { state.num_tx_initiator } else { state.num_tx_recipient };
        Some((own_tx_per_cycle as f64 / cycle as f64, state.expiry_offset.max(0)))
    }

    /// Summary of the running link for utilization broadcasts.
    pub fn utilization(&self, center_freq_khz: u64) -> Option<LinkUtilization> {
        let state = self.state.as_ref()?;
        if !self.is_active() {
            return None;
        }
        Some(LinkUtilization {
            center_freq_khz,
            slot_offset: state.expiry_offset.max(0),
            period: state.period,
            timeout: state.timeout,
        })
    }

    /// New outgoing data. Triggers link establishment unless one is already
    /// underway or running.
    pub fn notify_outgoing<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        sh: &mut ShLinkManager,
        pp_budgets: (&[f64], &[i32]),
        num_bits: u32,
    ) {
        self.outgoing_traffic_estimate.put(num_bits as f64);
        if self.status != LinkStatus::Unestablished {
            return;
        }
        if self.establishment_attempts >= ctx.cfg.max_link_establishment_attempts {
            ctx.stats.pp_link_establishment_attempts_exceeded += 1;
            return;
        }
        debug!("pp link to {}: triggering establishment", self.peer.get());
        self.status = LinkStatus::AwaitingRequestGeneration;
        self.request_generation_time = Some(ctx.current_slot);
        sh.enqueue_link_request(ctx, pp_budgets, self.peer);
    }

    /// Splits one exchange into forward and reverse bursts from the
    /// initiator's perspective, derived from the traffic estimate and the
    /// peer's reported requirement.
    pub fn burst_split(&self, current_datarate: u32, force_bidirectional: bool) -> (u8, u8) {
        let bits_per_burst = self.outgoing_traffic_estimate.get();
        let datarate = current_datarate.max(1);
        let mut tx = (bits_per_burst / datarate as f64) as u8;
        let mut rx = self.reported_resource_requirement;
        if force_bidirectional {
            tx = tx.max(1);
            rx = rx.max(1);
        }
        // at least one direction must exist for the handshake to conclude
        if tx == 0 && rx == 0 {
            tx = 1;
        }
        (tx.min(3), rx.min(3))
    }

    /// The queued request could not be sent (no budget, no resources). The
    /// link falls back to unestablished and a later outgoing-data
    /// notification retries.
    pub fn request_aborted(&mut self) {
        self.locked.reset();
        self.expected_reply_in = None;
        if !self.is_active() {
            self.status = LinkStatus::Unestablished;
        }
    }

    /// Remembers the parameters of the request that is about to be sent and
    /// clears any stale locks. Must be called before the first
    /// [`Self::lock_proposed_resources`] of a request.
    pub fn notify_link_request_sent(&mut self, expected_reply_in: i32) {
        self.locked.reset();
        self.expected_reply_in = Some(expected_reply_in);
        self.status = LinkStatus::AwaitingReply;
    }

    /// Locks every slot of one proposed burst pattern in the channel table
    /// and the hardware tables, so it cannot be double-proposed while the
    /// negotiation is in flight.
    pub fn lock_proposed_resources<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        proposal: &LinkProposal,
        timeout: u16,
    ) -> Result<()> {
        let cref =
            ctx.rm.channel_by_freq(proposal.center_freq_khz).ok_or(Error::UnexpectedState)?;
        let (fwd, rev) = (proposal.num_tx_initiator, proposal.num_tx_recipient);
        let (tx_slots, rx_slots) =
            slots::alternating_bursts(proposal.slot_offset, fwd, rev, proposal.period, timeout);
        // verify everything can be locked before touching any table
        {
            let table = ctx.rm.table(cref);
            let hw = ctx.rm.hw();
            for &t in &tx_slots {
                if !table.can_lock(t) || !hw.tx().can_lock(t) {
                    return Err(Error::CannotLock);
                }
            }
            for &t in &rx_slots {
                if !table.can_lock(t) || !hw.rxs().iter().any(|r| r.can_lock(t)) {
                    return Err(Error::CannotLock);
                }
            }
        }
        for &t in tx_slots.iter().chain(rx_slots.iter()) {
            ctx.rm.lock(cref, t, self.peer)?;
            self.locked.add_locked(TableRef::Channel(cref), t);
        }
        for &t in &tx_slots {
            ctx.rm.hw_mut().tx_mut().lock(t, self.peer)?;
            self.locked.add_locked(TableRef::HwTx, t);
        }
        for &t in &rx_slots {
            let i = (0..ctx.rm.hw().num_receivers())
                .find(|&i| ctx.rm.hw().rxs()[i].can_lock(t))
                .ok_or(Error::CannotLock)?;
            ctx.rm.hw_mut().rxs_mut()[i].lock(t, self.peer)?;
            self.locked.add_locked(TableRef::HwRx(i), t);
        }
        Ok(())
    }

    /// Records the reply slot reserved on the shared channel so it is part of
    /// this link's lock set.
    pub fn note_reply_slot_reserved(&mut self, slot_offset: i32) {
        self.locked.add_locked(TableRef::Channel(ChannelRef::Sh), slot_offset);
    }

    /// Commits an agreed link: releases the negotiation locks and schedules
    /// TX/RX reservations for `timeout` exchanges.
    ///
    /// Called with `is_recipient = true` when accepting a received request,
    /// and `false` when the peer's reply to our own request arrives. If the
    /// link is already established this begins a renewal instead: the new
    /// schedule starts after the current link expires and takes over at
    /// expiry.
    pub fn accept_link<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        proposal: &LinkProposal,
        is_recipient: bool,
        generation_time: u64,
    ) -> Result<()> {
        let cref =
            ctx.rm.channel_by_freq(proposal.center_freq_khz).ok_or(Error::UnexpectedState)?;
        let is_renewal = self.status == LinkStatus::Established;
        if !is_renewal {
            match (self.status, is_recipient) {
                // a schedule is already committed; a competing proposal now
                // would orphan it
                (LinkStatus::AwaitingFirstData, _) => return Err(Error::UnexpectedState),
                (_, true) => {}
                (LinkStatus::AwaitingReply | LinkStatus::AwaitingRequestGeneration, false) => {}
                (_, false) => return Err(Error::UnexpectedState),
            }
        }
        self.locked.unlock(ctx.rm, self.peer);
        let (initiator_id, recipient_id) = if is_recipient {
            (self.peer, ctx.own_id)
        } else {
            (ctx.own_id, self.peer)
        };
        let timeout = ctx.cfg.default_pp_timeout;
        let map = ctx.rm.schedule_bursts(
            cref,
            proposal.slot_offset,
            proposal.num_tx_initiator,
            proposal.num_tx_recipient,
            proposal.period,
            timeout,
            initiator_id,
            recipient_id,
            !is_recipient,
        )?;
        let state = LinkState {
            channel: cref,
            period: proposal.period,
            num_tx_initiator: proposal.num_tx_initiator,
            num_tx_recipient: proposal.num_tx_recipient,
            timeout,
            is_initiator: !is_recipient,
            expiry_offset: slots::last_slot_offset(
                proposal.slot_offset,
                proposal.num_tx_initiator,
                proposal.num_tx_recipient,
                proposal.period,
                timeout,
            ),
        };
        if is_renewal {
            self.renewal = Some(PendingRenewal { state, scheduled: map });
            return Ok(());
        }
        self.scheduled = map;
        self.state = Some(state);
        self.status = LinkStatus::AwaitingFirstData;
        self.expected_reply_in = None;
        self.establishment_attempts = 0;
        if !is_recipient {
            // the initiator measures latency from the request's generation
            let generated = self.request_generation_time.take().unwrap_or(ctx.current_slot);
            ctx.stats.pp_link_establishment_time_slots +=
                ctx.current_slot.saturating_sub(generated);
        } else {
            ctx.stats.pp_link_requests_accepted += 1;
            if generation_time > 0 {
                ctx.stats.pp_link_establishment_time_slots +=
                    ctx.current_slot.saturating_sub(generation_time);
            }
        }
        Ok(())
    }

    /// Whether the remaining timeout is inside the renewal window: every
    /// second exchange among the last `2 * max_renewal_attempts`.
    fn in_renewal_window(&self, max_renewal_attempts: u32) -> bool {
        match &self.state {
            Some(state) => {
                let t = state.timeout as u32;
                t > 0 && t <= 2 * max_renewal_attempts && t % 2 == 0
            }
            None => false,
        }
    }

    /// A transmit reservation of this link fires: pulls a segment from the
    /// upper layer and builds the unicast header, piggybacking a renewal
    /// request when the link nears expiry.
    pub fn on_transmission_reservation<RNG: RngCore, U: UpperLayer>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        upper: &mut U,
    ) -> Result<(UnicastHeader, Vec<u8>)> {
        if self.state.is_none() {
            return Err(Error::UnexpectedState);
        }
        let payload = upper.request_segment(ctx.current_datarate, self.peer);
        let mut header = UnicastHeader::new(self.peer, self.seq_num);
        self.seq_num = self.seq_num.wrapping_add(1);

        let is_initiator = self.state.as_ref().map(|s| s.is_initiator).unwrap_or(false);
        if is_initiator
            && self.renewal.is_none()
            && self.renewal_requests_left > 0
            && self.in_renewal_window(ctx.cfg.max_link_renewal_attempts)
            && upper.is_there_more_data(self.peer)
        {
            if let Some(request) = self.prepare_renewal_request(ctx) {
                header.link_request = Some(request);
                self.renewal_requests_left -= 1;
                ctx.stats.link_requests_sent += 1;
            }
        }

        // the forward burst is the exchange's anchor; we transmit it only as
        // the initiator
        self.mark_communication(ctx, is_initiator);
        ctx.stats.unicasts_sent += 1;
        Ok((header, payload))
    }

    /// Builds a renewal request whose schedule starts after the current link
    /// expires, and locks its resources.
    fn prepare_renewal_request<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
    ) -> Option<LinkRequest> {
        let state = self.state.as_ref()?;
        let min_offset = state.expiry_offset + 1;
        let (fwd, rev) = (state.num_tx_initiator, state.num_tx_recipient);
        let period = state.period;
        let timeout = ctx.cfg.default_pp_timeout;
        let proposals = ctx.rm.find_link_proposals(1, 1, min_offset, fwd, rev, period, timeout);
        let proposal = *proposals.first()?;
        // a previously rejected renewal attempt may still hold locks
        self.locked.unlock(ctx.rm, self.peer);
        if self.lock_proposed_resources(ctx, &proposal, timeout).is_err() {
            return None;
        }
        debug!(
            "pp link to {}: renewal request at t={}",
            self.peer.get(),
            proposal.slot_offset
        );
        Some(LinkRequest {
            dest_id: self.peer,
            proposal,
            generation_time: ctx.current_slot,
        })
    }

    /// Processes a received data burst: seals a fresh link, counts the
    /// exchange, and handles a piggybacked renewal request.
    pub fn process_unicast<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        sh: &mut ShLinkManager,
        header: &UnicastHeader,
    ) -> Result<()> {
        ctx.stats.unicasts_received += 1;
        if let Some(request) = &header.link_request {
            self.process_renewal_request(ctx, sh, request);
        }
        // receiving the forward burst anchors the exchange on the recipient
        let is_forward = self.state.as_ref().map(|s| !s.is_initiator).unwrap_or(false);
        self.mark_communication(ctx, is_forward);
        Ok(())
    }

    fn process_renewal_request<RNG: RngCore>(
        &mut self,
        ctx: &mut Ctx<'_, RNG>,
        sh: &mut ShLinkManager,
        request: &LinkRequest,
    ) {
        ctx.stats.link_requests_received += 1;
        let proposal = request.proposal;
        let Some(cref) = ctx.rm.channel_by_freq(proposal.center_freq_khz) else {
            ctx.stats.pp_requests_rejected_unacceptable_proposals += 1;
            return;
        };
        let valid = ctx.rm.table(cref).is_link_valid(
            ctx.rm.hw(),
            proposal.slot_offset,
            proposal.period,
            proposal.num_tx_initiator,
            proposal.num_tx_recipient,
            ctx.cfg.default_pp_timeout,
            false,
        );
        if !valid {
            ctx.stats.pp_requests_rejected_unacceptable_proposals += 1;
            return;
        }
        if self.accept_link(ctx, &proposal, true, request.generation_time).is_ok() {
            sh.enqueue_link_reply(
                ctx.current_slot,
                LinkReply { dest_id: self.peer, proposal },
            );
        } else {
            ctx.stats.pp_requests_rejected_unacceptable_proposals += 1;
        }
    }

    /// Seals the link on its first burst; forward bursts additionally count
    /// down one exchange, at most once per slot and never past zero.
    fn mark_communication<RNG: RngCore>(&mut self, ctx: &mut Ctx<'_, RNG>, is_forward_burst: bool) {
        if self.status == LinkStatus::AwaitingFirstData {
            self.status = LinkStatus::Established;
            ctx.stats.pp_links_established += 1;
        }
        if !is_forward_burst || self.updated_timeout_this_slot {
            return;
        }
        self.updated_timeout_this_slot = true;
        if let Some(state) = &mut self.state {
            if state.timeout > 0 {
                state.timeout -= 1;
            }
        }
    }

    /// Whether the schedule has run out; resolved at slot end. The timeout
    /// reaches zero at the last forward burst, but the link lives until its
    /// final reverse slot has passed.
    fn timeout_expired(&self) -> bool {
        self.is_active() && self.state.as_ref().is_some_and(|s| s.expiry_offset < 0)
    }

    fn on_timeout_expiry<RNG: RngCore>(&mut self, ctx: &mut Ctx<'_, RNG>) {
        if let Some(renewal) = self.renewal.take() {
            // swap in the renewed schedule and stay established
            debug!("pp link to {}: renewed", self.peer.get());
            self.scheduled = renewal.scheduled;
            self.state = Some(renewal.state);
            self.renewal_requests_left = ctx.cfg.max_link_renewal_attempts;
            return;
        }
        debug!("pp link to {}: expired", self.peer.get());
        ctx.stats.pp_links_expired += 1;
        let _ = self.scheduled.unschedule(ctx.rm, &[Action::Tx, Action::Rx]);
        // a renewal request whose reply never came leaves locks behind
        self.locked.unlock(ctx.rm, self.peer);
        self.state = None;
        self.status = LinkStatus::Unestablished;
    }

    /// Per-slot upkeep: ages the maps, counts down the reply window, and
    /// handles a missed reply.
    pub fn on_slot_start<RNG: RngCore>(&mut self, ctx: &mut Ctx<'_, RNG>, num_slots: u64) {
        for _ in 0..num_slots {
            self.locked.on_slot_start();
            self.scheduled.on_slot_start();
            if let Some(r) = &mut self.renewal {
                r.scheduled.on_slot_start();
            }
        }
        if let Some(state) = &mut self.state {
            state.expiry_offset -= num_slots as i32;
        }
        if let Some(renewal) = &mut self.renewal {
            renewal.state.expiry_offset -= num_slots as i32;
        }
        if self.status == LinkStatus::AwaitingReply {
            if let Some(expected) = &mut self.expected_reply_in {
                *expected -= num_slots as i32;
                if *expected < 0 {
                    // reply never came: release locks and retry from scratch
                    // on the next outgoing data
                    debug!("pp link to {}: reply missed", self.peer.get());
                    ctx.stats.pp_link_missed_reply_opportunity += 1;
                    self.locked.unlock(ctx.rm, self.peer);
                    self.expected_reply_in = None;
                    self.status = LinkStatus::Unestablished;
                    self.establishment_attempts += 1;
                }
            }
        }
    }

    /// Slot-close hook: closes the traffic-estimate sample and resolves an
    /// expired timeout.
    pub fn on_slot_end<RNG: RngCore>(&mut self, ctx: &mut Ctx<'_, RNG>) {
        if !self.outgoing_traffic_estimate.updated_this_slot() {
            self.outgoing_traffic_estimate.put(0.0);
        }
        self.outgoing_traffic_estimate.tick_close_slot();
        if self.timeout_expired() {
            self.on_timeout_expiry(ctx);
        }
        self.updated_timeout_this_slot = false;
    }

    /// The channel the running link occupies.
    pub fn current_channel(&self) -> Option<ChannelRef> {
        self.state.as_ref().map(|s| s.channel)
    }

    /// Remaining exchanges of the running link.
    pub fn remaining_timeout(&self) -> Option<u16> {
        self.state.as_ref().map(|s| s.timeout)
    }

    /// Read-only view of the locked resources (test hook).
    pub fn locked_resources(&self) -> &ReservationMap {
        &self.locked
    }

    /// Read-only view of the scheduled resources (test hook).
    pub fn scheduled_resources(&self) -> &ReservationMap {
        &self.scheduled
    }

    /// Marks the link as failed from outside (collision invalidated it).
    pub fn cancel_link<RNG: RngCore>(&mut self, ctx: &mut Ctx<'_, RNG>) {
        self.locked.unlock(ctx.rm, self.peer);
        let _ = self.scheduled.unschedule(ctx.rm, &[Action::Tx, Action::Rx]);
        if let Some(renewal) = &mut self.renewal {
            let _ = renewal.scheduled.unschedule(ctx.rm, &[Action::Tx, Action::Rx]);
        }
        self.renewal = None;
        self.state = None;
        self.expected_reply_in = None;
        self.status = LinkStatus::Unestablished;
    }

    pub(crate) fn set_reported_resource_requirement(&mut self, value: u8) {
        self.reported_resource_requirement = value;
    }

    /// Validates whether adding a link with the proposal's period would keep
    /// the duty cycle below its ceiling.
    pub(crate) fn proposal_duty_cycle_conformant(
        duty_cycle: &DutyCycle,
        used_pp_budgets: &[f64],
        proposal: &LinkProposal,
        consider_duty_cycle: bool,
    ) -> bool {
        if !consider_duty_cycle {
            return true;
        }
        let Ok(sh_budget) = duty_cycle.sh_budget(used_pp_budgets) else {
            return false;
        };
        let mut sum = sh_budget;
        for budget in used_pp_budgets {
            sum += budget;
        }
        sum += DutyCycle::contribution_of_period(proposal.period);
        sum <= duty_cycle.total_budget()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_split_floors_at_one_when_bidirectional() {
        let manager = PpLinkManager::new(NodeId::new(1), 3);
        assert_eq!(manager.burst_split(1000, true), (1, 1));
        assert_eq!(manager.burst_split(1000, false), (1, 0));
    }

    #[test]
    fn burst_split_scales_with_traffic() {
        let mut manager = PpLinkManager::new(NodeId::new(1), 3);
        for _ in 0..20 {
            manager.outgoing_traffic_estimate.put(2500.0);
        }
        assert_eq!(manager.burst_split(1000, true), (2, 1));
    }

    #[test]
    fn renewal_window_covers_last_even_exchanges() {
        let mut manager = PpLinkManager::new(NodeId::new(1), 3);
        manager.state = Some(LinkState {
            channel: ChannelRef::Pp(0),
            period: 0,
            num_tx_initiator: 1,
            num_tx_recipient: 1,
            timeout: 20,
            is_initiator: true,
            expiry_offset: 200,
        });
        assert!(!manager.in_renewal_window(3));
        manager.state.as_mut().unwrap().timeout = 6;
        assert!(manager.in_renewal_window(3));
        manager.state.as_mut().unwrap().timeout = 5;
        assert!(!manager.in_renewal_window(3));
        manager.state.as_mut().unwrap().timeout = 2;
        assert!(manager.in_renewal_window(3));
        manager.state.as_mut().unwrap().timeout = 0;
        assert!(!manager.in_renewal_window(3));
    }

    #[test]
    fn budget_contribution_matches_period() {
        let mut manager = PpLinkManager::new(NodeId::new(1), 3);
        manager.status = LinkStatus::Established;
        manager.state = Some(LinkState {
            channel: ChannelRef::Pp(0),
            period: 3,
            num_tx_initiator: 1,
            num_tx_recipient: 1,
            timeout: 20,
            is_initiator: true,
            expiry_offset: 500,
        });
        let (budget, expiry) = manager.budget_contribution().unwrap();
        assert!((budget - 1.0 / 80.0).abs() < 1e-12);
        assert_eq!(expiry, 500);
    }
}
