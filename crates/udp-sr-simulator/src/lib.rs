//! In-memory lossy link for exercising the transfer engines without sockets.

pub mod engine;
pub mod trace;

pub use engine::{LinkEventSummary, LinkSimulator, NodeId, SimTransport};
pub use trace::SimulationReport;
