//! Round-based selective-repeat ARQ over an unreliable datagram transport.
//!
//! Both endpoints move through the stream one window (round) at a time. The
//! sender transmits a round, retransmits only the slots that are still
//! unacknowledged, and reads the next round once every slot is confirmed. The
//! receiver fills slots in any order, acknowledges each one, and writes the
//! round to its sink in slot order.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use udp_sr_core::{SenderEngine, TransferConfig, UdpTransport};
//!
//! let transport = Arc::new(UdpTransport::bind("0.0.0.0:0").await?);
//! let peer = "127.0.0.1:4950".parse()?;
//! let data = b"hello".to_vec();
//! let engine = SenderEngine::new(transport, peer, TransferConfig::default())?;
//! let report = engine.run(&mut &data[..], data.len() as u64).await?;
//! println!("{} bytes", report.bytes);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod listener;
pub mod receiver;
pub mod report;
pub mod retry;
pub mod sender;
pub mod udp;
pub mod window;

pub use error::{ProtocolError, TransferError};
pub use receiver::ReceiverEngine;
pub use report::TransferReport;
pub use sender::SenderEngine;
pub use udp::UdpTransport;
pub use window::{SlotUpdate, Window};

pub use udp_sr_abstract::{FileSink, FileSource, TransferConfig, Transport, TransportError};
