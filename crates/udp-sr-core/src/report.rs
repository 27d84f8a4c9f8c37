use serde::Serialize;

/// Counters one endpoint collects over a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// Payload bytes read (sender) or written (receiver).
    pub bytes: u64,
    pub rounds: u64,
    /// Data frames sent, retransmissions included.
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub acks_sent: u64,
    /// Data frames that arrived for an already filled slot.
    pub duplicate_packets: u64,
    /// Acks that arrived for an already acknowledged slot.
    pub duplicate_acks: u64,
    pub protocol_errors: u64,
}
