//! Link managers: one for the shared channel, one per point-to-point peer,
//! and one tracker per overheard third-party link.

mod pp;
mod sh;
mod third_party;

pub use pp::{LinkStatus, PpLinkManager};
pub(crate) use sh::new_pp_manager;
pub use sh::ShLinkManager;
pub use third_party::{ThirdPartyLink, ThirdPartyStatus};

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use mcsotdma_encoding::NodeId;
use rand_core::RngCore;

use crate::config::Config;
use crate::duty_cycle::DutyCycle;
use crate::neighbors::NeighborObserver;
use crate::reservation::ReservationManager;
use crate::stats::Stats;

pub(crate) type PpMap = BTreeMap<NodeId, PpLinkManager>;
pub(crate) type ThirdPartyMap = BTreeMap<(NodeId, NodeId), ThirdPartyLink>;

/// Mutable view of the node state the link managers operate on. The MAC core
/// assembles one per call from its own fields, which keeps the managers free
/// of back-pointers.
pub(crate) struct Ctx<'a, RNG: RngCore> {
    pub own_id: NodeId,
    pub current_slot: u64,
    pub current_datarate: u32,
    pub cfg: &'a Config,
    pub rm: &'a mut ReservationManager,
    pub duty_cycle: &'a mut DutyCycle,
    pub neighbors: &'a mut NeighborObserver,
    pub stats: &'a mut Stats,
    pub rng: &'a mut RNG,
}

/// Budget contribution and slots-until-expiry of every committed PP link.
pub(crate) fn used_pp_budgets(pp: &PpMap) -> (Vec<f64>, Vec<i32>) {
    let mut budgets = Vec::new();
    let mut timeouts = Vec::new();
    for manager in pp.values() {
        if let Some((budget, expiry)) = manager.budget_contribution() {
            budgets.push(budget);
            timeouts.push(expiry);
        }
    }
    (budgets, timeouts)
}

/// Key for the third-party tracker map: the pair is unordered, request and
/// reply name the two ends in opposite order.
pub(crate) fn pair_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
