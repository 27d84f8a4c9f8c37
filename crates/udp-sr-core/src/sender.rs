//! Sending endpoint.
//!
//! ```text
//!  BUILD_ROUND ─▶ TRANSMIT_ALL ─▶ AWAIT_ACKS ─┬─▶ QUIESCE ─▶ ADVANCE
//!                                    ▲        │
//!                                    └─ RETRANSMIT_MISSING
//! ```
//!
//! Rounds are strictly sequential: the next window is read from the source
//! only after every slot of the current one has been acknowledged and the
//! link has stayed free of acks for one ack timeout. Sequence numbers restart
//! every round, so that quiet period is what keeps a late ack for round N
//! from being taken for one of round N+1.
//!
//! Slots whose packet is identical to the previous round's packet in the same
//! position are held back until the receiver acknowledges something new,
//! because before that it would take them for retransmissions.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use udp_sr_abstract::{
    DataPacket, FileSource, Frame, Preamble, TransferConfig, Transport, TransportError,
};

use crate::error::{ProtocolError, TransferError};
use crate::listener::{Inbound, Listener, settle};
use crate::report::TransferReport;
use crate::retry::{Backoff, send_with_retry};
use crate::window::{SlotUpdate, Window};

pub struct SenderEngine<T: Transport> {
    transport: Arc<T>,
    peer: SocketAddr,
    config: TransferConfig,
    report: TransferReport,
}

impl<T: Transport> SenderEngine<T> {
    pub fn new(transport: Arc<T>, peer: SocketAddr, config: TransferConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            transport,
            peer,
            config,
            report: TransferReport::default(),
        })
    }

    /// Push all of `source` to the peer. `total_len` is announced up front.
    pub async fn run<S: FileSource + ?Sized>(
        mut self,
        source: &mut S,
        total_len: u64,
    ) -> Result<TransferReport, TransferError> {
        self.announce(total_len).await?;

        let mut previous: Option<Window> = None;
        loop {
            let window = Window::build_round(source, self.config.window_size)
                .map_err(TransferError::Source)?;
            let last = window.has_sentinel();
            self.report.bytes += window.payload_bytes();
            let window = self.run_round(window, previous.as_ref()).await?;
            if last {
                break;
            }
            previous = Some(window);
        }

        info!(
            "transfer complete: {} bytes in {} rounds, {} packets ({} retransmitted)",
            self.report.bytes, self.report.rounds, self.report.packets_sent, self.report.retransmissions
        );
        Ok(self.report)
    }

    /// Send the preamble until the receiver acknowledges it.
    async fn announce(&mut self, total_len: u64) -> Result<(), TransferError> {
        let frame = Preamble { total_len }.encode();
        let mut backoff = Backoff::retransmission(&self.config);
        let mut errors = Backoff::transport(&self.config);

        loop {
            send_with_retry(&*self.transport, &frame, self.peer, &self.config).await?;
            debug!("sent preamble ({} bytes) to {}", total_len, self.peer);

            let deadline = Instant::now() + backoff.current();
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                match self.transport.recv_from(left).await {
                    Ok((bytes, from)) => {
                        let inbound = Inbound {
                            from,
                            frame: Frame::decode(&bytes),
                        };
                        if self.is_preamble_ack(inbound) {
                            info!("receiver {} accepted a {} byte stream", self.peer, total_len);
                            return Ok(());
                        }
                    }
                    Err(TransportError::Timeout(_)) => break,
                    Err(err) => {
                        let delay = errors.current();
                        if !errors.advance() {
                            return Err(TransferError::Receive(err));
                        }
                        warn!("receive failed ({}), retrying in {:?}", err, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }

            if !backoff.advance() {
                return Err(TransferError::PeerUnresponsive {
                    retries: self.config.max_retries,
                });
            }
            warn!("no preamble acknowledgment from {}, resending", self.peer);
        }
    }

    fn is_preamble_ack(&mut self, inbound: Inbound) -> bool {
        match self.check(inbound) {
            Some(Frame::Ack(ack)) if ack.is_preamble() => true,
            Some(other) => {
                debug!("ignoring {} frame while waiting for preamble ack", other.kind());
                false
            }
            None => false,
        }
    }

    async fn run_round(&mut self, mut window: Window, previous: Option<&Window>) -> Result<Window, TransferError> {
        let round = self.report.rounds;
        let mut held = match previous {
            Some(previous) => window.repeats(previous),
            None => Vec::new(),
        };
        if held.len() == window.effective_len() {
            // Nothing tells this round apart from the last one, so there is nothing to wait for.
            held.clear();
        }
        debug!("round {}: {} slots, holding {:?}", round, window.effective_len(), held);

        let (listener, mut events) = Listener::spawn(self.transport.clone(), &self.config);
        let mut outcome = self.exchange(&mut window, held, &mut events).await;
        if outcome.is_ok() && !window.has_sentinel() {
            outcome = self.quiesce(&mut window, &mut events).await;
        }
        let joined = listener.stop().await;
        settle(outcome, joined)?;
        while let Ok(inbound) = events.try_recv() {
            self.apply(&mut window, inbound);
        }

        self.report.rounds += 1;
        info!("round {} acknowledged ({} bytes)", round, window.payload_bytes());
        Ok(window)
    }

    async fn exchange(
        &mut self,
        window: &mut Window,
        mut held: Vec<i32>,
        events: &mut mpsc::UnboundedReceiver<Inbound>,
    ) -> Result<(), TransferError> {
        // TRANSMIT_ALL
        for packet in window.packets().filter(|p| !held.contains(&p.seq)) {
            self.transmit(packet, false).await?;
        }

        let mut backoff = Backoff::retransmission(&self.config);
        let mut deadline = Instant::now() + backoff.current();

        while !window.is_complete() {
            match timeout_at(deadline, events.recv()).await {
                // AWAIT_ACKS
                Ok(Some(inbound)) => {
                    if self.apply(window, inbound) == Some(SlotUpdate::New) {
                        backoff.reset();
                        if !held.is_empty() {
                            for seq in std::mem::take(&mut held) {
                                if let Some(packet) = window.packet(seq as usize) {
                                    self.transmit(packet, false).await?;
                                }
                            }
                            deadline = Instant::now() + backoff.current();
                        }
                    }
                }
                Ok(None) => return Err(TransferError::ListenerClosed),
                // RETRANSMIT_MISSING
                Err(_) => {
                    if !backoff.advance() {
                        return Err(TransferError::PeerUnresponsive {
                            retries: self.config.max_retries,
                        });
                    }
                    let missing: Vec<i32> = window
                        .missing()
                        .into_iter()
                        .filter(|seq| !held.contains(seq))
                        .collect();
                    debug!("ack timeout, retransmitting {:?}", missing);
                    for seq in missing {
                        if let Some(packet) = window.packet(seq as usize) {
                            self.transmit(packet, true).await?;
                        }
                    }
                    deadline = Instant::now() + backoff.current();
                }
            }
        }
        Ok(())
    }

    /// Wait until no ack has arrived for one ack timeout. Late acks still
    /// belong to this round and are counted as duplicates.
    async fn quiesce(
        &mut self,
        window: &mut Window,
        events: &mut mpsc::UnboundedReceiver<Inbound>,
    ) -> Result<(), TransferError> {
        let quiet = self.config.ack_timeout();
        let mut deadline = Instant::now() + quiet;
        loop {
            match timeout_at(deadline, events.recv()).await {
                Ok(Some(inbound)) => {
                    if self.apply(window, inbound).is_some() {
                        deadline = Instant::now() + quiet;
                    }
                }
                Ok(None) => return Err(TransferError::ListenerClosed),
                Err(_) => return Ok(()),
            }
        }
    }

    /// Apply one listener event. Returns what the ack did to the window, or
    /// `None` when the datagram was not an ack for a data slot.
    fn apply(&mut self, window: &mut Window, inbound: Inbound) -> Option<SlotUpdate> {
        let frame = self.check(inbound)?;
        let ack = match frame {
            Frame::Ack(ack) => ack,
            other => {
                debug!("ignoring {} frame from receiver", other.kind());
                return None;
            }
        };
        if ack.is_preamble() {
            debug!("late preamble acknowledgment");
            return None;
        }

        let update = window.record_ack(ack.seq);
        match update {
            SlotUpdate::New => debug!("ack {}", ack.seq),
            SlotUpdate::Duplicate => {
                self.report.duplicate_acks += 1;
                debug!("duplicate ack {}", ack.seq);
            }
            SlotUpdate::OutOfRange => self.reject(ProtocolError::OutOfRange {
                seq: ack.seq,
                window: window.effective_len(),
            }),
        }
        Some(update)
    }

    /// Drop datagrams that are malformed or come from someone other than the peer.
    fn check(&mut self, inbound: Inbound) -> Option<Frame> {
        if inbound.from != self.peer {
            self.reject(ProtocolError::ForeignPeer { from: inbound.from });
            return None;
        }
        match inbound.frame {
            Ok(frame) => Some(frame),
            Err(source) => {
                self.reject(ProtocolError::Malformed {
                    from: inbound.from,
                    source,
                });
                None
            }
        }
    }

    fn reject(&mut self, err: ProtocolError) {
        self.report.protocol_errors += 1;
        warn!("dropping datagram: {}", err);
    }

    async fn transmit(&mut self, packet: &DataPacket, retransmission: bool) -> Result<(), TransferError> {
        send_with_retry(&*self.transport, &packet.encode(), self.peer, &self.config).await?;
        self.report.packets_sent += 1;
        if retransmission {
            self.report.retransmissions += 1;
        }
        debug!(
            "sent packet {} (len {}){}",
            packet.seq,
            packet.payload_len,
            if retransmission { " again" } else { "" }
        );
        Ok(())
    }
}
