//! Receiving endpoint.
//!
//! ```text
//!  AWAIT_PACKETS ─▶ ACK_NEW ─┬─▶ FLUSH_ROUND
//!        ▲                   │
//!        └─ RETRY_ACK_UNCONFIRMED
//! ```
//!
//! Every filled slot is acknowledged at least once before the round's
//! payload is written, in slot order, to the sink.
//!
//! The receiver finishes a round before the sender knows it has, so the
//! sender may still be retransmitting round N while round N+1 is collected.
//! Until the first packet that differs from round N arrives, packets equal to
//! round N's packet in the same slot are answered but not stored. If every
//! slot of the new round turns out to be such a copy, the sender is repeating
//! round N byte for byte and the new round resolves to the same content.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};
use udp_sr_abstract::{
    Ack, DataPacket, FileSink, Frame, PREAMBLE_ACK, TransferConfig, Transport, TransportError,
};

use crate::error::{ProtocolError, TransferError};
use crate::listener::{Inbound, Listener, settle};
use crate::report::TransferReport;
use crate::retry::Backoff;
use crate::window::{SlotUpdate, Window};

/// Stream position: the only state that outlives a round.
#[derive(Debug)]
struct Stream {
    peer: SocketAddr,
    total: u64,
    remaining: u64,
}

impl Stream {
    fn received(&self) -> u64 {
        self.total - self.remaining
    }
}

/// The round being collected, plus the previous round for as long as the
/// sender may still be sending it.
struct Collecting<'a> {
    window: Window,
    closing: Option<&'a Window>,
    copies: Vec<bool>,
}

impl<'a> Collecting<'a> {
    fn new(capacity: usize, closing: Option<&'a Window>) -> Self {
        Self {
            window: Window::new(capacity),
            closing,
            copies: vec![false; capacity],
        }
    }

    fn is_copy(&self, packet: &DataPacket) -> bool {
        self.closing
            .and_then(|closing| closing.packet(usize::try_from(packet.seq).ok()?))
            .is_some_and(|previous| previous == packet)
    }

    /// Every slot of the closing round has been seen again and nothing else.
    fn is_repeat(&self) -> bool {
        self.closing
            .is_some_and(|closing| self.copies[..closing.effective_len()].iter().all(|&c| c))
    }

    fn is_resolved(&self) -> bool {
        self.window.is_complete() || self.is_repeat()
    }

    fn resolve(self) -> Window {
        match self.closing {
            Some(closing) if self.is_repeat() => closing.clone(),
            _ => self.window,
        }
    }
}

pub struct ReceiverEngine<T: Transport> {
    transport: Arc<T>,
    config: TransferConfig,
    report: TransferReport,
}

impl<T: Transport> ReceiverEngine<T> {
    pub fn new(transport: Arc<T>, config: TransferConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            report: TransferReport::default(),
        })
    }

    /// Wait for a sender, then write its whole stream to `sink`.
    pub async fn run<K: FileSink + ?Sized>(mut self, sink: &mut K) -> Result<TransferReport, TransferError> {
        let mut stream = self.accept().await?;
        let mut previous: Option<Window> = None;

        loop {
            let window = self.collect_round(stream.peer, previous.as_ref()).await?;
            let finished = self.flush(&window, sink, &mut stream)?;
            self.report.rounds += 1;
            if finished {
                sink.finish().map_err(TransferError::Sink)?;
                info!(
                    "received {} bytes from {} in {} rounds",
                    self.report.bytes, stream.peer, self.report.rounds
                );
                self.linger(stream.peer, &window).await;
                return Ok(self.report);
            }
            previous = Some(window);
        }
    }

    async fn accept(&mut self) -> Result<Stream, TransferError> {
        let started = Instant::now();
        let mut errors = Backoff::transport(&self.config);

        loop {
            let wait = match self.config.accept_timeout() {
                Some(limit) => {
                    let left = limit.saturating_sub(started.elapsed());
                    if left.is_zero() {
                        return Err(TransferError::AcceptTimeout(limit));
                    }
                    left.min(self.config.poll_interval())
                }
                None => self.config.poll_interval(),
            };

            match self.transport.recv_from(wait).await {
                Ok((bytes, from)) => match Frame::decode(&bytes) {
                    Ok(Frame::Preamble(preamble)) => {
                        info!("{} announced a {} byte stream", from, preamble.total_len);
                        self.ack_now(from, PREAMBLE_ACK).await;
                        return Ok(Stream {
                            peer: from,
                            total: preamble.total_len,
                            remaining: preamble.total_len,
                        });
                    }
                    Ok(other) => self.reject(ProtocolError::UnexpectedFrame {
                        kind: other.kind(),
                        from,
                    }),
                    Err(source) => self.reject(ProtocolError::Malformed { from, source }),
                },
                Err(TransportError::Timeout(_)) => {}
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
    }

    async fn collect_round(&mut self, peer: SocketAddr, closing: Option<&Window>) -> Result<Window, TransferError> {
        let mut round = Collecting::new(self.config.window_size, closing);
        let (listener, mut events) = Listener::spawn(self.transport.clone(), &self.config);
        let outcome = self.exchange(peer, &mut round, &mut events).await;
        let joined = listener.stop().await;
        settle(outcome, joined)?;

        if round.is_repeat() {
            debug!("round {} repeats the previous one", self.report.rounds);
        }
        let window = round.resolve();
        // Anything the listener already picked up belongs to the round just resolved.
        while let Ok(inbound) = events.try_recv() {
            self.answer_late(peer, &window, inbound).await;
        }
        debug!("round {} resolved with {} slots", self.report.rounds, window.effective_len());
        Ok(window)
    }

    async fn exchange(
        &mut self,
        peer: SocketAddr,
        round: &mut Collecting<'_>,
        events: &mut mpsc::UnboundedReceiver<Inbound>,
    ) -> Result<(), TransferError> {
        let mut retry = Backoff::transport(&self.config);

        loop {
            // ACK_NEW, and RETRY_ACK_UNCONFIRMED after a failed send
            let mut failure = None;
            for seq in round.window.unconfirmed() {
                match self.send_ack(peer, seq).await {
                    Ok(()) => {
                        round.window.record_ack(seq);
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            let next = match failure {
                Some(err) => {
                    let delay = retry.current();
                    if !retry.advance() {
                        return Err(TransferError::SendFailed {
                            attempts: retry.failures(),
                            source: err,
                        });
                    }
                    warn!("ack to {} failed ({}), retrying in {:?}", peer, err, delay);
                    match timeout(delay, events.recv()).await {
                        Ok(next) => next,
                        Err(_) => continue,
                    }
                }
                None => {
                    retry.reset();
                    if round.is_resolved() {
                        return Ok(());
                    }
                    // AWAIT_PACKETS
                    events.recv().await
                }
            };

            let Some(inbound) = next else {
                return Err(TransferError::ListenerClosed);
            };
            self.handle(peer, round, inbound).await;
        }
    }

    async fn handle(&mut self, peer: SocketAddr, round: &mut Collecting<'_>, inbound: Inbound) {
        let Some(frame) = self.check(peer, inbound) else {
            return;
        };
        match frame {
            Frame::Data(packet) => {
                let seq = packet.seq;
                if round.is_copy(&packet) {
                    round.copies[seq as usize] = true;
                    self.report.duplicate_packets += 1;
                    debug!("packet {} repeats the previous round, acknowledging again", seq);
                    self.ack_now(peer, seq).await;
                    return;
                }
                match round.window.store(packet) {
                    SlotUpdate::OutOfRange => self.reject(ProtocolError::OutOfRange {
                        seq,
                        window: round.window.effective_len(),
                    }),
                    update => {
                        if round.closing.take().is_some() {
                            debug!("sender has moved on to round {}", self.report.rounds);
                        }
                        if update == SlotUpdate::New {
                            debug!("packet {} received", seq);
                        } else {
                            self.report.duplicate_packets += 1;
                            debug!("duplicate packet {}, acknowledging again", seq);
                            if self.ack_now(peer, seq).await {
                                round.window.record_ack(seq);
                            }
                        }
                    }
                }
            }
            Frame::Preamble(_) => {
                debug!("repeated preamble from {}", peer);
                self.ack_now(peer, PREAMBLE_ACK).await;
            }
            Frame::Ack(_) => self.reject(ProtocolError::UnexpectedFrame { kind: "ack", from: peer }),
        }
    }

    /// Re-acknowledge a datagram that arrived for a round already resolved.
    async fn answer_late(&mut self, peer: SocketAddr, resolved: &Window, inbound: Inbound) {
        match self.check(peer, inbound) {
            Some(Frame::Data(packet)) if resolved.packet(packet.seq as usize) == Some(&packet) => {
                self.report.duplicate_packets += 1;
                debug!("late copy of packet {}, acknowledging again", packet.seq);
                self.ack_now(peer, packet.seq).await;
            }
            Some(Frame::Preamble(_)) => {
                self.ack_now(peer, PREAMBLE_ACK).await;
            }
            Some(other) => debug!("ignoring {} frame between rounds", other.kind()),
            None => {}
        }
    }

    /// Write a resolved round. Returns true once the sentinel has been reached.
    fn flush<K: FileSink + ?Sized>(
        &mut self,
        window: &Window,
        sink: &mut K,
        stream: &mut Stream,
    ) -> Result<bool, TransferError> {
        for packet in window.packets() {
            if packet.is_eof() {
                if stream.remaining != 0 {
                    return Err(TransferError::LengthMismatch {
                        expected: stream.total,
                        received: stream.received(),
                    });
                }
                return Ok(true);
            }

            let len = packet.data().len() as u64;
            if len > stream.remaining {
                return Err(TransferError::LengthMismatch {
                    expected: stream.total,
                    received: stream.received() + len,
                });
            }
            sink.write_chunk(packet.data()).map_err(TransferError::Sink)?;
            stream.remaining -= len;
            self.report.bytes += len;
            debug!("wrote packet {} ({} bytes)", packet.seq, len);
        }
        debug!(
            "received {} bytes, {} remaining",
            stream.received(),
            stream.remaining
        );
        Ok(false)
    }

    /// Keep acknowledging retransmissions of the final round for a while, in
    /// case the sender never saw our last acks.
    async fn linger(&mut self, peer: SocketAddr, last: &Window) {
        let linger = self.config.linger();
        if linger.is_zero() {
            return;
        }
        let deadline = Instant::now() + linger;

        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            match self.transport.recv_from(left).await {
                Ok((bytes, from)) => {
                    let inbound = Inbound {
                        from,
                        frame: Frame::decode(&bytes),
                    };
                    match self.check(peer, inbound) {
                        Some(Frame::Data(packet)) if (packet.seq as usize) < last.effective_len() => {
                            self.report.duplicate_packets += 1;
                            self.ack_now(peer, packet.seq).await;
                        }
                        Some(Frame::Preamble(_)) => {
                            self.ack_now(peer, PREAMBLE_ACK).await;
                        }
                        Some(other) => debug!("ignoring {} frame after transfer", other.kind()),
                        None => {}
                    }
                }
                Err(err) if err.is_timeout() => {}
                Err(err) => {
                    warn!("receive failed while lingering: {}", err);
                    return;
                }
            }
        }
    }

    fn check(&mut self, peer: SocketAddr, inbound: Inbound) -> Option<Frame> {
        if inbound.from != peer {
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

    async fn send_ack(&mut self, peer: SocketAddr, seq: i32) -> Result<(), TransportError> {
        self.transport.send_to(&Ack::new(seq).encode(), peer).await?;
        self.report.acks_sent += 1;
        debug!("ack {} sent", seq);
        Ok(())
    }

    /// Single-shot ack; a failure is only logged since the peer will retransmit.
    async fn ack_now(&mut self, peer: SocketAddr, seq: i32) -> bool {
        match self.send_ack(peer, seq).await {
            Ok(()) => true,
            Err(err) => {
                warn!("ack {} to {} failed: {}", seq, peer, err);
                false
            }
        }
    }
}
