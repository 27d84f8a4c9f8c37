//! Wire format, configuration and collaborator interfaces shared by the
//! selective-repeat engines, the link simulator and the command-line tools.

pub mod config;
pub mod interface;
pub mod packet;
pub mod scenario;

pub use config::{ConfigError, LinkConfig, MAX_INTERVAL_MS, MAX_WINDOW, TransferConfig};
pub use interface::{FileSink, FileSource, Transport, TransportError};
pub use packet::{
    ACK_FRAME_LEN, Ack, CodecError, DATA_FRAME_LEN, DataPacket, EOF_SENTINEL, Frame,
    PAYLOAD_CAPACITY, PREAMBLE_ACK, PREAMBLE_LEN, Preamble,
};
pub use scenario::{
    LinkConfigOverride, PayloadSpec, ScenarioAction, ScenarioAssertion, TransferConfigOverride,
    TransferScenario,
};
