//! MAC configuration knobs.

/// How the number of candidate slots for shared-channel access is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ContentionMethod {
    /// A fixed number of candidate slots, no contention estimation.
    Naive,
    /// Candidate count derived from the active-neighbor estimate so that the
    /// collision probability stays below the configured target.
    RandomizedSlottedAloha,
}

/// How the duty-cycle allocator grants budget to new point-to-point links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DutyCycleStrategy {
    /// Every link (and the shared channel) receives an equal, fixed share.
    Static,
    /// Links receive whatever budget is currently unused; if none is left,
    /// access is deferred until a running link times out.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Number of slots the reservation tables cover into the future and into
    /// the past. Offsets outside `[-planning_horizon, planning_horizon]` are
    /// invalid.
    pub planning_horizon: u32,
    /// Receiver chains the hardware provides. The transmitter count is
    /// always one.
    pub num_receivers: usize,
    /// Distinct frequency channels a link request proposes.
    pub num_proposed_channels: usize,
    /// Start-slot candidates per proposed channel.
    pub num_proposed_slots: usize,
    /// Exchanges before a newly established PP link expires.
    pub default_pp_timeout: u16,
    /// Slots between a request and the earliest acceptable reply, giving the
    /// recipient time to process.
    pub min_offset_to_allow_processing: u32,
    /// Establishment attempts before giving up on a peer.
    pub max_link_establishment_attempts: u32,
    /// Renewal requests that may be piggybacked near link expiry.
    pub max_link_renewal_attempts: u32,
    /// Target collision probability for slotted-ALOHA candidate sizing.
    pub target_collision_prob: f64,
    pub min_candidates: u32,
    pub max_candidates: u32,
    pub contention_method: ContentionMethod,
    /// Window, in slots, of the duty-cycle moving average.
    pub duty_cycle_period: u32,
    /// Ceiling on the fraction of slots this node transmits in.
    pub max_duty_cycle: f64,
    /// PP links the budget must always be able to support concurrently.
    pub min_supported_pp_links: u32,
    pub duty_cycle_strategy: DutyCycleStrategy,
    /// Whether the duty-cycle allocator is consulted at all.
    pub consider_duty_cycle: bool,
    /// Guarantee at least one slot per direction in every PP burst.
    pub force_bidirectional_links: bool,
    /// Use this period for every PP link instead of deriving it from budget.
    pub force_pp_period: Option<u8>,
    /// Write the own next-broadcast offset into outgoing SH headers.
    pub advertise_next_slot_in_header: bool,
    /// Slots a neighbor counts as active after its last heard transmission.
    pub neighbor_activity_window: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            planning_horizon: 1024,
            num_receivers: 2,
            num_proposed_channels: 3,
            num_proposed_slots: 3,
            default_pp_timeout: 20,
            min_offset_to_allow_processing: 2,
            max_link_establishment_attempts: 5,
            max_link_renewal_attempts: 3,
            target_collision_prob: 0.05,
            min_candidates: 3,
            max_candidates: 10_000,
            contention_method: ContentionMethod::RandomizedSlottedAloha,
            duty_cycle_period: 100,
            max_duty_cycle: 0.1,
            min_supported_pp_links: 4,
            duty_cycle_strategy: DutyCycleStrategy::Static,
            consider_duty_cycle: true,
            force_bidirectional_links: true,
            force_pp_period: None,
            advertise_next_slot_in_header: true,
            neighbor_activity_window: 50_000,
        }
    }
}
