//! Background receive loop for one round.
//!
//! The listener only reads and decodes. Every datagram is posted to the
//! engine's main loop, which owns the round's [`crate::window::Window`] and
//! applies the event itself.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use udp_sr_abstract::{CodecError, Frame, Transport, TransferConfig, TransportError};

use crate::error::TransferError;
use crate::retry::Backoff;

/// One received datagram, decoded or not.
#[derive(Debug)]
pub struct Inbound {
    pub from: SocketAddr,
    pub frame: Result<Frame, CodecError>,
}

#[derive(Debug)]
enum Exit {
    Stopped,
    Idle(Duration),
    Failed(TransportError),
}

pub struct Listener {
    stop: watch::Sender<bool>,
    handle: JoinHandle<Exit>,
}

impl Listener {
    /// Start draining `transport`. Events arrive on the returned channel until
    /// [`Listener::stop`] is called or the listener gives up.
    pub fn spawn<T: Transport>(
        transport: Arc<T>,
        config: &TransferConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(transport, events_tx, stop_rx, config.clone()));
        (
            Self {
                stop: stop_tx,
                handle,
            },
            events_rx,
        )
    }

    /// Signal the listener and wait for it to finish.
    pub async fn stop(self) -> Result<(), TransferError> {
        // The task may already have exited, dropping the receiver.
        let _ = self.stop.send(true);
        match self.handle.await? {
            Exit::Stopped => Ok(()),
            Exit::Idle(idle) => Err(TransferError::PeerIdle(idle)),
            Exit::Failed(err) => Err(TransferError::Receive(err)),
        }
    }
}

/// Combine a round's outcome with the listener's exit status.
///
/// When the round failed because the listener went away, the listener's own
/// error is the more useful one.
pub fn settle(
    outcome: Result<(), TransferError>,
    joined: Result<(), TransferError>,
) -> Result<(), TransferError> {
    match outcome {
        Err(TransferError::ListenerClosed) => joined.and(Err(TransferError::ListenerClosed)),
        other => other.and(joined),
    }
}

async fn run<T: Transport>(
    transport: Arc<T>,
    events: mpsc::UnboundedSender<Inbound>,
    mut stop: watch::Receiver<bool>,
    config: TransferConfig,
) -> Exit {
    let poll = config.poll_interval();
    let idle = config.idle_timeout();
    let mut last_heard = Instant::now();
    let mut errors = Backoff::transport(&config);

    loop {
        if *stop.borrow_and_update() {
            return Exit::Stopped;
        }
        let received = tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() {
                    return Exit::Stopped;
                }
                continue;
            }
            received = transport.recv_from(poll) => received,
        };

        match received {
            Ok((bytes, from)) => {
                last_heard = Instant::now();
                errors.reset();
                let inbound = Inbound {
                    from,
                    frame: Frame::decode(&bytes),
                };
                if events.send(inbound).is_err() {
                    debug!("engine dropped the event channel, listener exiting");
                    return Exit::Stopped;
                }
            }
            Err(err) if err.is_timeout() => {
                if last_heard.elapsed() >= idle {
                    return Exit::Idle(idle);
                }
            }
            Err(err) => {
                let delay = errors.current();
                if !errors.advance() {
                    return Exit::Failed(err);
                }
                warn!("receive failed ({}), retrying in {:?}", err, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
