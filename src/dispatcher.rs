//! Unbounded FIFO between the detection loop and the transport worker.
//!
//! The sampling loop must never wait on the network, so enqueueing always returns
//! immediately; the transport blocks on the other end until an event arrives.

use crate::detector::SilenceEvent;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("notification queue closed; transport worker is gone")]
pub struct QueueClosed(pub SilenceEvent);

/// Create the queue. Only the detector holds the sender and only the transport holds the
/// receiver; neither half is `Clone`.
pub fn notification_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = unbounded();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug)]
pub struct EventSender {
    tx: Sender<SilenceEvent>,
}

impl EventSender {
    /// Never blocks. Fails only once the receiver has been dropped.
    pub fn enqueue(&self, event: SilenceEvent) -> Result<(), QueueClosed> {
        self.tx.send(event).map_err(|err| QueueClosed(err.into_inner()))
    }

    /// Events waiting for the transport.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<SilenceEvent>,
}

impl EventReceiver {
    /// Block until the next event; `None` once the sender is gone and the queue drained.
    pub fn dequeue(&self) -> Option<SilenceEvent> {
        self.rx.recv().ok()
    }

    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<SilenceEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
