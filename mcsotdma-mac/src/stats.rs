//! Counters for user-visible events. No packet is dropped and no request is
//! rejected without one of these being bumped.

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub broadcasts_received: u64,
    pub broadcasts_sent: u64,
    pub broadcast_messages_processed: u64,
    pub unicasts_received: u64,
    pub unicasts_sent: u64,
    pub link_requests_received: u64,
    pub link_requests_sent: u64,
    pub link_replies_received: u64,
    pub link_replies_sent: u64,
    pub third_party_requests_received: u64,
    pub third_party_replies_received: u64,
    pub link_utilizations_received: u64,
    pub own_proposals_sent: u64,
    pub saved_proposals_sent: u64,
    pub broadcast_collisions_detected: u64,
    pub broadcast_candidate_slots: u64,
    pub broadcast_slot_selections: u64,
    pub pp_links_established: u64,
    pub pp_links_expired: u64,
    pub pp_link_requests_accepted: u64,
    pub pp_requests_rejected_unacceptable_reply_slot: u64,
    pub pp_requests_rejected_unacceptable_proposals: u64,
    pub pp_link_missed_reply_opportunity: u64,
    pub pp_link_establishment_attempts_exceeded: u64,
    /// Sum of establishment latencies in slots; divide by
    /// `pp_links_established` for the mean.
    pub pp_link_establishment_time_slots: u64,
    pub dropped_packets: u64,
}

impl Stats {
    pub fn average_broadcast_candidates(&self) -> f64 {
        if self.broadcast_slot_selections == 0 {
            0.0
        } else {
            self.broadcast_candidate_slots as f64 / self.broadcast_slot_selections as f64
        }
    }

    pub fn average_link_establishment_time(&self) -> f64 {
        if self.pp_links_established == 0 {
            0.0
        } else {
            self.pp_link_establishment_time_slots as f64 / self.pp_links_established as f64
        }
    }
}
