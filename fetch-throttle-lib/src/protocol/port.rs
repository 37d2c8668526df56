use log::trace;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    watch,
};

use super::WorkerMessage;

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// The worker's handle on a client endpoint.
///
/// Clients hand a `ReplyPort` to the worker with every message; the worker
/// answers on it and keeps it to broadcast busy/idle updates. Two ports are
/// the same endpoint if they feed the same channel, no matter how often
/// they were cloned.
#[derive(Debug, Clone)]
pub struct ReplyPort {
    id: u64,
    sender: UnboundedSender<Value>,
}

impl ReplyPort {
    /// Wrap the sending half of a channel
    #[must_use]
    pub fn new(sender: UnboundedSender<Value>) -> Self {
        Self {
            id: NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed),
            sender,
        }
    }

    /// Create a port together with the receiver the client listens on
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<Value>) {
        let (sender, receiver) = unbounded_channel();
        (Self::new(sender), receiver)
    }

    /// Process-unique id, for logging
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Send a message; returns `false` if the client end is gone
    pub fn post(&self, message: &WorkerMessage) -> bool {
        let delivered = self.sender.send(message.to_value()).is_ok();
        if !delivered {
            trace!("Reply port {} is closed", self.id);
        }
        delivered
    }

    /// Whether both ports lead to the same client endpoint
    #[must_use]
    pub fn same_endpoint(&self, other: &ReplyPort) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

/// A message on its way to the worker, together with the port to answer on
#[derive(Debug)]
pub struct Envelope {
    /// The raw message, validated by the worker
    pub message: Value,
    /// Where replies and broadcasts go
    pub reply_to: ReplyPort,
}

/// The client's handle on a running worker.
///
/// Obtained from [`crate::AdmissionController::serve`].
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    inbox: UnboundedSender<Envelope>,
    ready: watch::Receiver<bool>,
}

impl WorkerHandle {
    /// Assemble a handle from the worker's inbox and readiness flag
    #[must_use]
    pub const fn new(inbox: UnboundedSender<Envelope>, ready: watch::Receiver<bool>) -> Self {
        Self { inbox, ready }
    }

    /// Whether the worker has stopped listening
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    /// Completes once the worker has stopped listening
    pub async fn closed(&self) {
        self.inbox.closed().await;
    }

    /// Wait until the worker is ready to take messages.
    ///
    /// Returns `false` if the worker went away before it became ready.
    pub async fn ready(&self) -> bool {
        let mut ready = self.ready.clone();
        ready.wait_for(|ready| *ready).await.is_ok()
    }

    /// Queue a message for the worker; returns `false` if it is gone
    pub fn post(&self, message: Value, reply_to: ReplyPort) -> bool {
        self.inbox.send(Envelope { message, reply_to }).is_ok()
    }
}
