use serde::Serialize;
use udp_sr_abstract::LinkConfig;

use crate::engine::LinkEventSummary;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: LinkConfig,
    pub duration_ms: u64,
    /// Data frames the sender handed to the link, including dropped ones.
    pub sender_packet_count: u32,
    pub sent_data_seqs: Vec<i32>,
    pub receiver_ack_count: u32,
    pub dropped: u32,
    pub duplicated: u32,
    pub link_events: Vec<LinkEventSummary>,
}
