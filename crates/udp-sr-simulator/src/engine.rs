use crate::trace::SimulationReport;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use udp_sr_abstract::{Frame, LinkConfig, Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeId {
    Sender,
    Receiver,
}

impl NodeId {
    pub fn peer(&self) -> Self {
        match self {
            NodeId::Sender => NodeId::Receiver,
            NodeId::Receiver => NodeId::Sender,
        }
    }

    /// Address the node appears under on the simulated link.
    pub fn addr(&self) -> SocketAddr {
        match self {
            NodeId::Sender => SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 40000),
            NodeId::Receiver => SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 4950),
        }
    }

    fn index(&self) -> usize {
        match self {
            NodeId::Sender => 0,
            NodeId::Receiver => 1,
        }
    }
}

/// A compact textual summary of one link decision.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

type Datagram = (Bytes, SocketAddr);

struct LinkState {
    config: LinkConfig,
    rng: StdRng,
    // Deterministic fault injection: drop the first data frame from Sender with this seq
    drop_data_seq_once: Vec<i32>,
    // Deterministic fault injection: drop the first ack from Receiver with this seq
    drop_ack_once: Vec<i32>,
    link_events: Vec<LinkEventSummary>,
    sender_packet_count: u32,
    sent_data_seqs: Vec<i32>,
    receiver_ack_count: u32,
    dropped: u32,
    duplicated: u32,
}

struct Shared {
    state: Mutex<LinkState>,
    inboxes: [mpsc::UnboundedSender<Datagram>; 2],
    started: Instant,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn push_event(&self, state: &mut LinkState, description: String) {
        state.link_events.push(LinkEventSummary {
            time: self.elapsed_ms(),
            description,
        });
    }

    fn route(&self, source: NodeId, frame: &[u8]) -> Option<Delivery> {
        let mut state = self.lock();
        let target = source.peer();

        let (label, data_seq, ack_seq) = match Frame::decode(frame) {
            Ok(Frame::Data(packet)) => (format!("data seq={}", packet.seq), Some(packet.seq), None),
            Ok(Frame::Ack(ack)) => (format!("ack seq={}", ack.seq), None, Some(ack.seq)),
            Ok(Frame::Preamble(preamble)) => (format!("preamble len={}", preamble.total_len), None, None),
            Err(_) => (format!("{} raw bytes", frame.len()), None, None),
        };

        if source == NodeId::Sender
            && let Some(seq) = data_seq
        {
            state.sender_packet_count += 1;
            state.sent_data_seqs.push(seq);

            if let Some(pos) = state.drop_data_seq_once.iter().position(|s| *s == seq) {
                state.drop_data_seq_once.remove(pos);
                state.dropped += 1;
                self.push_event(
                    &mut state,
                    format!("[Sender->Receiver] DROP (deterministic seq) {}", label),
                );
                debug!("Deterministically dropping data frame with seq={}", seq);
                return None;
            }
        }

        if source == NodeId::Receiver
            && let Some(seq) = ack_seq
        {
            state.receiver_ack_count += 1;

            if let Some(pos) = state.drop_ack_once.iter().position(|s| *s == seq) {
                state.drop_ack_once.remove(pos);
                state.dropped += 1;
                self.push_event(
                    &mut state,
                    format!("[Receiver->Sender] DROP (deterministic ack) {}", label),
                );
                debug!("Deterministically dropping ack with seq={}", seq);
                return None;
            }
        }

        // 1. Check loss
        let loss_rate = state.config.loss_rate;
        if state.rng.random::<f64>() < loss_rate {
            state.dropped += 1;
            self.push_event(
                &mut state,
                format!("[{:?}->{:?}] DROP (random loss) {}", source, target, label),
            );
            debug!("Frame lost in channel");
            return None;
        }

        // 2. Check duplication
        let duplicate_rate = state.config.duplicate_rate;
        let copies = if state.rng.random::<f64>() < duplicate_rate {
            state.duplicated += 1;
            self.push_event(
                &mut state,
                format!("[{:?}->{:?}] DUPLICATE {}", source, target, label),
            );
            2
        } else {
            1
        };

        // 3. Calculate latency
        let (min, max) = (state.config.min_latency, state.config.max_latency);
        let latency = if max > min {
            state.rng.random_range(min..=max)
        } else {
            min
        };

        self.push_event(
            &mut state,
            format!("[{:?}->{:?}] SEND {} (latency={}ms)", source, target, label, latency),
        );

        Some(Delivery {
            copies,
            latency: Duration::from_millis(latency),
        })
    }
}

/// What the link decided to do with one outgoing datagram.
struct Delivery {
    copies: usize,
    latency: Duration,
}

/// In-memory lossy link between a sender and a receiver.
///
/// Loss, duplication and latency are drawn from a seeded RNG, so a run with
/// the same seed and the same traffic makes the same decisions. Latency is
/// per datagram, which reorders frames whenever `min_latency < max_latency`.
#[derive(Clone)]
pub struct LinkSimulator {
    shared: Arc<Shared>,
}

impl LinkSimulator {
    /// Build a link and the two transports attached to its ends.
    pub fn pair(config: LinkConfig) -> (Self, SimTransport, SimTransport) {
        let rng = StdRng::seed_from_u64(config.seed);
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (receiver_tx, receiver_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState {
                config,
                rng,
                drop_data_seq_once: Vec::new(),
                drop_ack_once: Vec::new(),
                link_events: Vec::new(),
                sender_packet_count: 0,
                sent_data_seqs: Vec::new(),
                receiver_ack_count: 0,
                dropped: 0,
                duplicated: 0,
            }),
            inboxes: [sender_tx, receiver_tx],
            started: Instant::now(),
        });

        let sender = SimTransport {
            node: NodeId::Sender,
            shared: shared.clone(),
            inbox: tokio::sync::Mutex::new(sender_rx),
        };
        let receiver = SimTransport {
            node: NodeId::Receiver,
            shared: shared.clone(),
            inbox: tokio::sync::Mutex::new(receiver_rx),
        };
        (Self { shared }, sender, receiver)
    }

    /// Register a deterministic fault: drop the first data frame sent by Sender whose seq equals `seq`.
    pub fn add_drop_data_seq_once(&self, seq: i32) {
        self.shared.lock().drop_data_seq_once.push(seq);
    }

    /// Register a deterministic fault: drop the first ack sent by Receiver whose seq equals `seq`.
    pub fn add_drop_ack_once(&self, seq: i32) {
        self.shared.lock().drop_ack_once.push(seq);
    }

    /// Deliver a raw datagram to `to` as if it came from `from`, bypassing
    /// every fault.
    pub fn inject(&self, to: NodeId, from: SocketAddr, frame: Bytes) {
        let mut state = self.shared.lock();
        self.shared.push_event(
            &mut state,
            format!("[{}->{:?}] INJECT {} bytes", from, to, frame.len()),
        );
        let _ = self.shared.inboxes[to.index()].send((frame, from));
    }

    pub fn config(&self) -> LinkConfig {
        self.shared.lock().config.clone()
    }

    pub fn sender_packet_count(&self) -> u32 {
        self.shared.lock().sender_packet_count
    }

    /// Sequence numbers of every data frame Sender handed to the link, in order.
    pub fn sent_data_seqs(&self) -> Vec<i32> {
        self.shared.lock().sent_data_seqs.clone()
    }

    /// Produce a serializable snapshot of the link so far.
    pub fn export_report(&self) -> SimulationReport {
        let state = self.shared.lock();
        SimulationReport {
            config: state.config.clone(),
            duration_ms: self.shared.elapsed_ms(),
            sender_packet_count: state.sender_packet_count,
            sent_data_seqs: state.sent_data_seqs.clone(),
            receiver_ack_count: state.receiver_ack_count,
            dropped: state.dropped,
            duplicated: state.duplicated,
            link_events: state.link_events.clone(),
        }
    }
}

/// One end of a [`LinkSimulator`].
pub struct SimTransport {
    node: NodeId,
    shared: Arc<Shared>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl SimTransport {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.node.addr()
    }
}

impl Transport for SimTransport {
    async fn send_to(&self, frame: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        let target = self.node.peer();
        if dest != target.addr() {
            let shared = &self.shared;
            let mut state = shared.lock();
            shared.push_event(
                &mut state,
                format!("[{:?}->{}] DROP (no route) {} bytes", self.node, dest, frame.len()),
            );
            return Ok(());
        }

        let Some(delivery) = self.shared.route(self.node, frame) else {
            return Ok(());
        };

        let inbox = self.shared.inboxes[target.index()].clone();
        let datagram = (Bytes::copy_from_slice(frame), self.node.addr());

        if delivery.latency.is_zero() {
            for _ in 0..delivery.copies {
                let _ = inbox.send(datagram.clone());
            }
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delivery.latency).await;
                for _ in 0..delivery.copies {
                    let _ = inbox.send(datagram.clone());
                }
            });
        }
        Ok(())
    }

    async fn recv_from(&self, timeout: Duration) -> Result<(Bytes, SocketAddr), TransportError> {
        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some(datagram)) => Ok(datagram),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}
