//! Tracks which neighbors have recently been heard, their advertised next
//! broadcast slots, and the link proposals they have advertised.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use mcsotdma_encoding::{LinkProposal, NodeId};

use crate::moving_average::MovingAverage;

#[derive(Debug, Clone)]
struct NeighborEntry {
    last_seen: u64,
    /// Absolute slot of the neighbor's advertised next broadcast.
    advertised_broadcast_slot: Option<u64>,
    /// Advertised proposals together with the absolute slot they were heard
    /// in, so offsets can be normalized later.
    advertised_proposals: Vec<(u64, LinkProposal)>,
}

#[derive(Debug)]
pub struct NeighborObserver {
    entries: BTreeMap<NodeId, NeighborEntry>,
    /// Slots after which a silent neighbor no longer counts as active.
    activity_window: u64,
    /// Gap between consecutive overheard broadcasts, averaged over all
    /// neighbors.
    broadcast_gap: MovingAverage,
}

impl NeighborObserver {
    pub fn new(activity_window: u64) -> Self {
        NeighborObserver {
            entries: BTreeMap::new(),
            activity_window,
            broadcast_gap: MovingAverage::new(100),
        }
    }

    /// Reports any overheard activity from a neighbor.
    pub fn report_activity(&mut self, id: NodeId, current_slot: u64) {
        if !id.is_unicast() {
            return;
        }
        let entry = self.entries.entry(id).or_insert(NeighborEntry {
            last_seen: current_slot,
            advertised_broadcast_slot: None,
            advertised_proposals: Vec::new(),
        });
        if current_slot > entry.last_seen {
            self.broadcast_gap.put((current_slot - entry.last_seen) as f64);
        }
        entry.last_seen = current_slot;
    }

    /// Remembers a neighbor's advertised next-broadcast offset.
    pub fn report_broadcast_slot_advertisement(
        &mut self,
        id: NodeId,
        slot_offset: u32,
        current_slot: u64,
    ) {
        self.report_activity(id, current_slot);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.advertised_broadcast_slot = Some(current_slot + slot_offset as u64);
        }
    }

    /// The neighbor's next expected broadcast as an offset from the current
    /// slot, if a future one has been advertised.
    pub fn next_expected_broadcast_slot(&self, id: NodeId, current_slot: u64) -> Option<u32> {
        let slot = self.entries.get(&id)?.advertised_broadcast_slot?;
        if slot >= current_slot {
            Some((slot - current_slot) as u32)
        } else {
            None
        }
    }

    /// Replaces the advertised proposals of a neighbor.
    pub fn clear_advertised_link_proposals(&mut self, id: NodeId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.advertised_proposals.clear();
        }
    }

    pub fn add_advertised_link_proposal(
        &mut self,
        id: NodeId,
        current_slot: u64,
        proposal: LinkProposal,
    ) {
        self.report_activity(id, current_slot);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.advertised_proposals.push((current_slot, proposal));
        }
    }

    /// The neighbor's advertised proposals with their slot offsets normalized
    /// to the current slot. Proposals whose start has already passed are
    /// dropped.
    pub fn advertised_link_proposals(&self, id: NodeId, current_slot: u64) -> Vec<LinkProposal> {
        let Some(entry) = self.entries.get(&id) else {
            return Vec::new();
        };
        entry
            .advertised_proposals
            .iter()
            .filter_map(|&(heard_at, proposal)| {
                let age = (current_slot - heard_at) as i32;
                let normalized_offset = proposal.slot_offset - age;
                (normalized_offset > 0)
                    .then_some(LinkProposal { slot_offset: normalized_offset, ..proposal })
            })
            .collect()
    }

    /// Number of neighbors heard within the activity window.
    pub fn num_active_neighbors(&self, current_slot: u64) -> usize {
        self.entries
            .values()
            .filter(|e| current_slot.saturating_sub(e.last_seen) <= self.activity_window)
            .count()
    }

    /// Average number of slots between overheard broadcasts.
    pub fn average_broadcast_gap(&self) -> f64 {
        self.broadcast_gap.get()
    }

    /// Drops neighbors that have fallen out of the activity window and
    /// proposals that have aged out.
    pub fn on_slot_end(&mut self, current_slot: u64) {
        let window = self.activity_window;
        self.entries.retain(|_, e| current_slot.saturating_sub(e.last_seen) <= window);
        for entry in self.entries.values_mut() {
            entry.advertised_proposals.retain(|&(heard_at, proposal)| {
                proposal.slot_offset as i64 - (current_slot - heard_at) as i64 > 0
            });
        }
    }
}
