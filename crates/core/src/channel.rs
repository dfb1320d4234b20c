//! Relay channel: an unbounded FIFO shared between any number of producer
//! threads and the single consumer context.
//!
//! The sender half is a cheap cloneable handle; the receiver half is unique and
//! drains by swapping the whole buffer out under the lock, so a drain is one
//! short critical section regardless of how many producers are active.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::progress::{ProgressReporter, ProgressValue};

struct Buffer {
    values: Vec<ProgressValue>,
    receiver_alive: bool,
}

struct Shared {
    buffer: Mutex<Buffer>,
}

/// Create a connected sender/receiver pair.
pub fn relay() -> (RelaySender, RelayReceiver) {
    let shared = Arc::new(Shared {
        buffer: Mutex::new(Buffer {
            values: Vec::new(),
            receiver_alive: true,
        }),
    });
    (
        RelaySender {
            shared: Arc::clone(&shared),
        },
        RelayReceiver { shared },
    )
}

/// Producer half. Safe to clone and call from any thread.
#[derive(Clone)]
pub struct RelaySender {
    shared: Arc<Shared>,
}

impl RelaySender {
    /// Enqueue a value. Never blocks beyond the buffer lock and never fails.
    /// Values sent after the receiver is gone are dropped.
    pub fn send(&self, value: ProgressValue) {
        let mut buf = self.shared.buffer.lock();
        if buf.receiver_alive {
            buf.values.push(value);
        } else {
            tracing::trace!("Dropping progress {} sent to an abandoned relay", value);
        }
    }

    /// True once the receiver has been dropped.
    pub fn is_abandoned(&self) -> bool {
        !self.shared.buffer.lock().receiver_alive
    }
}

impl ProgressReporter for RelaySender {
    fn send(&self, value: ProgressValue) {
        RelaySender::send(self, value);
    }
}

impl std::fmt::Debug for RelaySender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySender").finish_non_exhaustive()
    }
}

/// Consumer half. Not `Clone`: exactly one context drains.
pub struct RelayReceiver {
    shared: Arc<Shared>,
}

impl RelayReceiver {
    /// Remove and return everything buffered, in arrival order. Empty when
    /// nothing is pending.
    pub fn drain(&mut self) -> Vec<ProgressValue> {
        std::mem::take(&mut self.shared.buffer.lock().values)
    }

    /// Number of values currently buffered.
    pub fn pending(&self) -> usize {
        self.shared.buffer.lock().values.len()
    }
}

impl Drop for RelayReceiver {
    fn drop(&mut self) {
        let mut buf = self.shared.buffer.lock();
        buf.receiver_alive = false;
        buf.values = Vec::new();
    }
}

impl std::fmt::Debug for RelayReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayReceiver")
            .field("pending", &self.pending())
            .finish()
    }
}
