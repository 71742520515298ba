//! # Bounded Frame Hand-off
//!
//! Moves notification payloads out of radio callback context. The producer
//! side never blocks: a full queue drops the frame. The consumer side waits
//! indefinitely for the next frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use super::slots::SlotId;
use crate::error::{FrameError, Result, TrackerError};
use crate::wire::FRAME_LEN;

/// One received frame, copied out of the radio buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundFrame {
    /// Connection slot the frame arrived on
    pub slot: SlotId,

    /// Raw frame bytes
    pub bytes: [u8; FRAME_LEN],
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

/// Delivery counters of a hand-off queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandoffStats {
    /// Frames enqueued
    pub accepted: u64,

    /// Frames shed because the queue was full
    pub dropped: u64,

    /// Payloads refused for having the wrong length
    pub rejected: u64,
}

/// Create a hand-off queue holding at most `capacity` frames
pub fn channel(capacity: usize) -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let counters = Arc::new(Counters::default());
    (
        FrameProducer {
            tx,
            counters: Arc::clone(&counters),
        },
        FrameConsumer { rx, counters },
    )
}

/// Non-blocking producer end
#[derive(Debug, Clone)]
pub struct FrameProducer {
    tx: mpsc::Sender<InboundFrame>,
    counters: Arc<Counters>,
}

impl FrameProducer {
    /// Validate and enqueue a notification payload
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The payload is not exactly one frame long (`Frame`)
    /// - The queue is full and the frame was dropped (`QueueFull`)
    /// - The consumer has gone away (`QueueClosed`)
    pub fn offer(&self, slot: SlotId, payload: &[u8]) -> Result<()> {
        if payload.len() != FRAME_LEN {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(FrameError::Length {
                expected: FRAME_LEN,
                actual: payload.len(),
            }
            .into());
        }

        let mut bytes = [0u8; FRAME_LEN];
        bytes.copy_from_slice(payload);

        match self.tx.try_send(InboundFrame { slot, bytes }) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Hand-off queue full, dropped frame from slot {} ({} dropped)", slot, dropped);
                Err(TrackerError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(TrackerError::QueueClosed),
        }
    }

    /// Snapshot of the delivery counters
    pub fn stats(&self) -> HandoffStats {
        snapshot(&self.counters)
    }
}

/// Blocking consumer end
#[derive(Debug)]
pub struct FrameConsumer {
    rx: mpsc::Receiver<InboundFrame>,
    counters: Arc<Counters>,
}

impl FrameConsumer {
    /// Wait for the next frame; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<InboundFrame> {
        self.rx.recv().await
    }

    /// Snapshot of the delivery counters
    pub fn stats(&self) -> HandoffStats {
        snapshot(&self.counters)
    }
}

fn snapshot(counters: &Counters) -> HandoffStats {
    HandoffStats {
        accepted: counters.accepted.load(Ordering::Relaxed),
        dropped: counters.dropped.load(Ordering::Relaxed),
        rejected: counters.rejected.load(Ordering::Relaxed),
    }
}
