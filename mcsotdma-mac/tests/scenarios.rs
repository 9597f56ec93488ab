//! Multi-node scenarios driving complete link lifecycles over a simulated
//! shared medium.

use std::collections::BTreeMap;

use mcsotdma_mac::link::LinkStatus;
use mcsotdma_mac::link::ThirdPartyStatus;
use mcsotdma_mac::radio::{Phy, UpperLayer};
use mcsotdma_mac::reservation::{Action, ChannelRef, Reservation};
use mcsotdma_mac::{Config, ContentionMethod, Header, Mac, NodeId, Packet, Prng};

const SH_FREQ: u64 = 1_000_000;
const PP_FREQ: u64 = 960_000;

struct TestUpper {
    received: Vec<Packet>,
    more_data: BTreeMap<NodeId, bool>,
}

impl TestUpper {
    fn new() -> Self {
        TestUpper { received: Vec::new(), more_data: BTreeMap::new() }
    }
}

impl UpperLayer for TestUpper {
    fn request_segment(&mut self, num_bits: u32, _peer: NodeId) -> Vec<u8> {
        vec![0xA5; (num_bits as usize / 8).min(256)]
    }

    fn is_there_more_data(&self, peer: NodeId) -> bool {
        *self.more_data.get(&peer).unwrap_or(&false)
    }

    fn pass_to_upper(&mut self, packet: Packet) {
        self.received.push(packet);
    }
}

struct TestPhy {
    sent: Vec<(Packet, u64)>,
    tuned: Vec<u64>,
    all_sent: Vec<(u64, Packet, u64)>,
    datarate: u32,
    now: u64,
}

impl TestPhy {
    fn new() -> Self {
        TestPhy { sent: Vec::new(), tuned: Vec::new(), all_sent: Vec::new(), datarate: 1_000, now: 0 }
    }
}

impl Phy for TestPhy {
    fn pass_to_lower(&mut self, packet: Packet, center_freq_khz: u64) {
        self.all_sent.push((self.now, packet.clone(), center_freq_khz));
        self.sent.push((packet, center_freq_khz));
    }

    fn tune_receiver(&mut self, center_freq_khz: u64) {
        self.tuned.push(center_freq_khz);
    }

    fn current_datarate(&self) -> u32 {
        self.datarate
    }
}

struct Node {
    mac: Mac<Prng>,
    upper: TestUpper,
    phy: TestPhy,
}

impl Node {
    fn new(id: i32, cfg: &Config, num_pp_channels: usize) -> Self {
        let mut mac = Mac::new(NodeId::new(id), cfg.clone(), Prng::new(0xC0FFEE + id as u64));
        mac.add_sh_channel(SH_FREQ, 500);
        for i in 0..num_pp_channels {
            mac.add_pp_channel(PP_FREQ + 2_000 * i as u64, 500);
        }
        Node { mac, upper: TestUpper::new(), phy: TestPhy::new() }
    }
}

/// One slot for all nodes: update, execute, in-slot delivery, slot end.
fn tick(nodes: &mut [Node]) {
    for node in nodes.iter_mut() {
        node.mac.update(1).unwrap();
    }
    let mut on_air: Vec<(usize, Packet, u64)> = Vec::new();
    for (i, node) in nodes.iter_mut().enumerate() {
        node.phy.sent.clear();
        node.phy.tuned.clear();
        node.phy.now = node.mac.current_slot();
        node.mac.execute(&mut node.upper, &mut node.phy).unwrap();
        for (packet, freq) in node.phy.sent.drain(..) {
            on_air.push((i, packet, freq));
        }
    }
    for (sender, packet, freq) in on_air {
        for (j, node) in nodes.iter_mut().enumerate() {
            if j != sender && node.phy.tuned.contains(&freq) {
                node.mac.receive_from_lower(packet.clone(), freq, &mut node.upper).unwrap();
            }
        }
    }
    for node in nodes.iter_mut() {
        node.mac.on_slot_end();
        if node.mac.current_slot() % 8 == 0 {
            check_invariants(&node.mac);
        }
    }
}

/// I1/I2/I4: hardware mirroring and the cached idle count.
fn check_invariants(mac: &Mac<Prng>) {
    let rm = mac.reservation_manager();
    let horizon = rm.planning_horizon() as i32;
    for t in 0..=horizon {
        let mut num_rx = 0;
        for (_, reservation) in mac.reservations_at(t) {
            if reservation.is_any_tx() {
                assert!(
                    !rm.hw().tx().reservation(t).unwrap().is_idle(),
                    "TX at offset {t} without transmitter backing"
                );
            }
            if reservation.is_any_rx() {
                num_rx += 1;
            }
        }
        assert!(num_rx <= rm.hw().num_receivers(), "more RX at offset {t} than receivers");
    }
    for cref in [ChannelRef::Sh, ChannelRef::Pp(0)] {
        let table = rm.table(cref);
        let counted =
            (0..=horizon).filter(|&t| table.reservation(t).unwrap().is_idle()).count() as u64;
        assert_eq!(counted, table.num_idle_slots(), "idle count drifted on {cref:?}");
    }
}

fn fast_config() -> Config {
    Config {
        planning_horizon: 256,
        default_pp_timeout: 5,
        consider_duty_cycle: false,
        force_pp_period: Some(0),
        contention_method: ContentionMethod::Naive,
        min_candidates: 3,
        ..Config::default()
    }
}

/// Slots of the link committed between two nodes, read from the initiator's
/// tables: (offset, action, target) on the PP channel.
fn pp_schedule(mac: &Mac<Prng>) -> Vec<(i32, Action, NodeId)> {
    let rm = mac.reservation_manager();
    let table = rm.table(ChannelRef::Pp(0));
    (1..=rm.planning_horizon() as i32)
        .filter_map(|t| {
            let r = *table.reservation(t).unwrap();
            (r.is_any_tx() || r.is_any_rx()).then_some((t, r.action(), r.target()))
        })
        .collect()
}

#[test]
fn s1_two_node_link_establishment() {
    let cfg = fast_config();
    let mut nodes = vec![Node::new(1, &cfg, 1), Node::new(2, &cfg, 1)];
    // both nodes broadcast periodically so each learns the other's schedule
    nodes[0].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    nodes[1].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    for _ in 0..30 {
        tick(&mut nodes);
    }
    nodes[0].mac.notify_outgoing(512, NodeId::new(2)).unwrap();

    let mut a_first_tx: Option<u64> = None;
    for _ in 0..120 {
        tick(&mut nodes);
        // the upper layer keeps pushing data until the link carries it
        if nodes[0].mac.pp_link_status(NodeId::new(2)) == LinkStatus::Unestablished {
            nodes[0].mac.notify_outgoing(512, NodeId::new(2)).unwrap();
        }
        let a = nodes[0].mac.pp_link_status(NodeId::new(2));
        let b = nodes[1].mac.pp_link_status(NodeId::new(1));
        if a_first_tx.is_none() {
            a_first_tx = nodes[0]
                .phy
                .all_sent
                .iter()
                .find(|(_, _, freq)| *freq == PP_FREQ)
                .map(|(slot, _, _)| *slot);
        }
        if a == LinkStatus::Established && b == LinkStatus::Established {
            break;
        }
    }
    assert_eq!(nodes[0].mac.pp_link_status(NodeId::new(2)), LinkStatus::Established);
    assert_eq!(nodes[1].mac.pp_link_status(NodeId::new(1)), LinkStatus::Established);
    assert!(nodes[0].mac.stats().link_requests_sent >= 1);
    assert!(nodes[1].mac.stats().link_replies_sent >= 1);
    assert!(a_first_tx.is_some(), "initiator never transmitted a data burst");

    // I5: the initiator's TX slots are the responder's RX slots
    let a_schedule = pp_schedule(&nodes[0].mac);
    let b_schedule = pp_schedule(&nodes[1].mac);
    for &(t, action, target) in &a_schedule {
        let counterpart = b_schedule.iter().find(|&&(tb, _, _)| tb == t);
        let Some(&(_, b_action, b_target)) = counterpart else {
            panic!("no responder reservation at offset {t}");
        };
        match action {
            Action::Tx => assert_eq!(b_action, Action::Rx),
            Action::Rx => assert_eq!(b_action, Action::Tx),
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(target, NodeId::new(2));
        assert_eq!(b_target, NodeId::new(1));
    }
    // alternating bursts, spaced 5 * 2^0 apart
    if a_schedule.len() >= 2 {
        assert_eq!(a_schedule[1].0 - a_schedule[0].0, 5);
    }
}

#[test]
fn s2_unreachable_reply_slot_is_rejected_and_retried() {
    let cfg = fast_config();
    let mut nodes = vec![Node::new(1, &cfg, 1), Node::new(2, &cfg, 1)];
    // B's shared channel is fully occupied for the near future, so its own
    // broadcast (and any reply) can only happen late
    for t in 1..=60 {
        nodes[1]
            .mac
            .reservation_manager_mut()
            .mark(ChannelRef::Sh, t, Reservation::new(NodeId::new(7), Action::Busy))
            .unwrap();
    }
    nodes[1].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    nodes[0].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    for _ in 0..3 {
        tick(&mut nodes);
    }
    nodes[0].mac.notify_outgoing(512, NodeId::new(2)).unwrap();
    for _ in 0..50 {
        tick(&mut nodes);
    }
    // B could not accept; A's attempt timed out
    assert!(nodes[1].mac.stats().pp_requests_rejected_unacceptable_reply_slot >= 1);
    assert_eq!(nodes[0].mac.pp_link_status(NodeId::new(2)), LinkStatus::Unestablished);
    assert_eq!(nodes[0].mac.pp_establishment_attempts(NodeId::new(2)), 1);
    // the next outgoing data retries from scratch
    nodes[0].mac.notify_outgoing(512, NodeId::new(2)).unwrap();
    assert_eq!(
        nodes[0].mac.pp_link_status(NodeId::new(2)),
        LinkStatus::AwaitingRequestGeneration
    );
}

#[test]
fn s3_third_party_mirrors_overheard_link() {
    let cfg = fast_config();
    let mut nodes = vec![Node::new(1, &cfg, 1), Node::new(2, &cfg, 1), Node::new(3, &cfg, 1)];
    for node in nodes.iter_mut() {
        node.mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    }
    for _ in 0..30 {
        tick(&mut nodes);
    }
    nodes[0].mac.notify_outgoing(512, NodeId::new(2)).unwrap();
    for _ in 0..120 {
        tick(&mut nodes);
        if nodes[0].mac.pp_link_status(NodeId::new(2)) == LinkStatus::Unestablished {
            nodes[0].mac.notify_outgoing(512, NodeId::new(2)).unwrap();
        }
        if nodes[2].mac.third_party_status(NodeId::new(1), NodeId::new(2))
            == ThirdPartyStatus::Established
        {
            break;
        }
    }
    assert_eq!(
        nodes[2].mac.third_party_status(NodeId::new(1), NodeId::new(2)),
        ThirdPartyStatus::Established
    );
    // every slot of the overheard schedule is busy for one of the two peers
    let a_schedule = pp_schedule(&nodes[0].mac);
    assert!(!a_schedule.is_empty());
    let c_table = nodes[2].mac.reservation_manager().table(ChannelRef::Pp(0));
    for &(t, _, _) in &a_schedule {
        let r = *c_table.reservation(t).unwrap();
        assert!(r.is_busy(), "observer slot {t} not busy: {r}");
        assert!(
            r.target() == NodeId::new(1) || r.target() == NodeId::new(2),
            "observer slot {t} reserved for {}",
            r.target()
        );
    }
    // after the link has run its course the mirror is dropped
    for _ in 0..400 {
        tick(&mut nodes);
    }
    assert_eq!(
        nodes[2].mac.third_party_status(NodeId::new(1), NodeId::new(2)),
        ThirdPartyStatus::Uninitialized
    );
    assert_eq!(nodes[2].mac.third_party_held_resources(NodeId::new(1), NodeId::new(2)), 0);
    let c_table = nodes[2].mac.reservation_manager().table(ChannelRef::Pp(0));
    for t in 1..=nodes[2].mac.reservation_manager().planning_horizon() as i32 {
        assert!(!c_table.reservation(t).unwrap().is_busy(), "stale mirror at offset {t}");
    }
}

#[test]
fn s4_advertisement_collision_triggers_reselection() {
    let cfg = fast_config();
    let mut nodes = vec![Node::new(2, &cfg, 1)];
    nodes[0].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    for _ in 0..5 {
        tick(&mut nodes);
    }
    let own_slot = nodes[0].mac.sh_link_manager().next_broadcast_offset().unwrap();
    assert!(own_slot > 0);

    // node 1 claims exactly that slot for its own broadcast
    use mcsotdma_mac::encoding::{BaseHeader, PacketRecord, ShHeader};
    let mut packet = Packet::new();
    packet
        .push(PacketRecord::header_only(Header::Base(BaseHeader {
            src_id: NodeId::new(1),
            position: Default::default(),
            hops_to_ground: 3,
        })))
        .unwrap();
    let mut sh = ShHeader::new(NodeId::new(1));
    sh.slot_offset = own_slot as u16;
    packet.push(PacketRecord::header_only(Header::Sh(sh))).unwrap();

    let collisions_before = nodes[0].mac.stats().broadcast_collisions_detected;
    let mut upper = TestUpper::new();
    nodes[0].mac.receive_from_lower(packet, SH_FREQ, &mut upper).unwrap();

    assert_eq!(nodes[0].mac.stats().broadcast_collisions_detected, collisions_before + 1);
    let new_slot = nodes[0].mac.sh_link_manager().next_broadcast_offset().unwrap();
    assert!(new_slot > own_slot, "reselection must land strictly later");
    // the contested slot now listens to the collider
    let reservation = nodes[0]
        .mac
        .reservations_at(own_slot as i32)
        .into_iter()
        .find(|(cref, _)| *cref == ChannelRef::Sh)
        .map(|(_, r)| r)
        .unwrap();
    assert_eq!(reservation.action(), Action::Rx);
    assert_eq!(reservation.target(), NodeId::new(1));
}

#[test]
fn s5_static_duty_cycle_forces_period() {
    // d_max = 0.1 over 5 shares (4 PP links + SH) caps each at 0.02, which
    // maps to period 3
    let cfg = Config {
        planning_horizon: 2048,
        default_pp_timeout: 5,
        contention_method: ContentionMethod::Naive,
        min_candidates: 3,
        ..Config::default()
    };
    let mut nodes = vec![Node::new(1, &cfg, 1), Node::new(2, &cfg, 1)];
    nodes[0].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    nodes[1].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    for _ in 0..200 {
        tick(&mut nodes);
    }
    nodes[0].mac.notify_outgoing(512, NodeId::new(2)).unwrap();
    for _ in 0..400 {
        tick(&mut nodes);
    }
    let mut saw_request = false;
    for (_, packet, freq) in &nodes[0].phy.all_sent {
        if *freq != SH_FREQ {
            continue;
        }
        for record in &packet.records {
            if let Header::Sh(header) = &record.header {
                for request in &header.link_requests {
                    saw_request = true;
                    assert!(
                        request.proposal.period >= 3,
                        "proposal period {} violates the duty-cycle budget",
                        request.proposal.period
                    );
                }
            }
        }
    }
    assert!(saw_request, "no link request was ever sent");
}

#[test]
fn renewal_keeps_link_established_past_first_timeout() {
    let cfg = Config {
        planning_horizon: 1024,
        default_pp_timeout: 6,
        ..fast_config()
    };
    let mut nodes = vec![Node::new(1, &cfg, 1), Node::new(2, &cfg, 1)];
    nodes[0].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    nodes[1].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    for _ in 0..30 {
        tick(&mut nodes);
    }
    // the initiator always has more data, so renewal requests ride the late
    // data bursts
    nodes[0].upper.more_data.insert(NodeId::new(2), true);
    nodes[0].mac.notify_outgoing(512, NodeId::new(2)).unwrap();
    let mut was_established = false;
    // long enough for the initial schedule (6 exchanges of 10 slots) to run
    // out twice over
    for _ in 0..250 {
        tick(&mut nodes);
        if !was_established
            && nodes[0].mac.pp_link_status(NodeId::new(2)) == LinkStatus::Unestablished
        {
            nodes[0].mac.notify_outgoing(512, NodeId::new(2)).unwrap();
        }
        was_established |=
            nodes[0].mac.pp_link_status(NodeId::new(2)) == LinkStatus::Established;
    }
    assert!(was_established);
    assert_eq!(nodes[0].mac.pp_link_status(NodeId::new(2)), LinkStatus::Established);
    assert_eq!(nodes[1].mac.pp_link_status(NodeId::new(1)), LinkStatus::Established);
    assert_eq!(nodes[0].mac.stats().pp_links_expired, 0);
    assert_eq!(nodes[1].mac.stats().pp_links_expired, 0);
}

#[test]
fn s6_link_expires_after_timeout_exchanges() {
    let cfg = Config { default_pp_timeout: 20, ..fast_config() };
    let mut nodes = vec![Node::new(1, &cfg, 1), Node::new(2, &cfg, 1)];
    nodes[0].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    nodes[1].mac.notify_outgoing(64, NodeId::BROADCAST).unwrap();
    for _ in 0..30 {
        tick(&mut nodes);
    }
    // zero outstanding bits, bidirectional forced: a 1/1 split
    nodes[0].mac.notify_outgoing(0, NodeId::new(2)).unwrap();
    let mut established_at = None;
    for slot in 0..700u32 {
        tick(&mut nodes);
        if established_at.is_none()
            && nodes[0].mac.pp_link_status(NodeId::new(2)) == LinkStatus::Unestablished
        {
            nodes[0].mac.notify_outgoing(0, NodeId::new(2)).unwrap();
        }
        if established_at.is_none()
            && nodes[0].mac.pp_link_status(NodeId::new(2)) == LinkStatus::Established
        {
            established_at = Some(slot);
        }
        if established_at.is_some()
            && nodes[0].mac.pp_link_status(NodeId::new(2)) == LinkStatus::Unestablished
        {
            break;
        }
    }
    assert!(established_at.is_some(), "link never established");
    assert_eq!(nodes[0].mac.pp_link_status(NodeId::new(2)), LinkStatus::Unestablished);
    assert_eq!(nodes[1].mac.pp_link_status(NodeId::new(1)), LinkStatus::Unestablished);
    assert!(nodes[0].mac.stats().pp_links_expired >= 1);
    // no reservations toward the peer survive expiry
    for node in &nodes {
        let table = node.mac.reservation_manager().table(ChannelRef::Pp(0));
        for t in 1..=node.mac.reservation_manager().planning_horizon() as i32 {
            let r = *table.reservation(t).unwrap();
            assert!(
                !(r.is_any_tx() || r.is_any_rx()),
                "reservation {r} at offset {t} survived expiry"
            );
        }
    }
    // both sides counted down through the full exchange schedule
    assert_eq!(nodes[0].mac.pp_link_remaining_timeout(NodeId::new(2)), None);
}
