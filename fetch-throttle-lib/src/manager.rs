//! Client side of the throttle.
//!
//! A [`ThrottleManager`] holds the throttling parameters an application
//! wants, sends them to the worker on [`ThrottleManager::configure`] and
//! turns the worker's busy/idle broadcasts into local [`NetworkEvent`]s.
use log::{debug, trace};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::{broadcast, mpsc::UnboundedReceiver, oneshot};

use crate::config::DEFAULT_MAX_DOWNLOADS;
use crate::filter::{PriorityFilter, PriorityFilters};
use crate::protocol::{
    Acknowledgment, ClientMessage, ReplyPort, ThrottleSettings, WorkerHandle, WorkerMessage,
};
use crate::{Result, ThrottleConfig};

/// Number of network events buffered for slow subscribers
const EVENT_CAPACITY: usize = 64;

/// Busy/idle notifications relayed from the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkEvent {
    /// At least one download is in flight
    Busy,
    /// No download is in flight
    Idle,
}

impl From<bool> for NetworkEvent {
    fn from(busy: bool) -> Self {
        if busy { Self::Busy } else { Self::Idle }
    }
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("busy"),
            Self::Idle => f.write_str("idle"),
        }
    }
}

/// Waiters for acknowledgments, oldest first
type Acks = Arc<Mutex<VecDeque<oneshot::Sender<Acknowledgment>>>>;

fn lock(acks: &Acks) -> MutexGuard<'_, VecDeque<oneshot::Sender<Acknowledgment>>> {
    acks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The channel the worker answers on, created on first use
#[derive(Debug)]
struct Listener {
    port: ReplyPort,
    // Dropping the manager stops the listener task
    _shutdown: oneshot::Sender<()>,
}

/// Configures an [`AdmissionController`](crate::AdmissionController)
/// through its message protocol.
///
/// ```
/// use fetch_throttle_lib::{AdmissionController, ThrottleManager};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let controller = AdmissionController::new(Duration::from_millis(50));
/// let mut manager = ThrottleManager::new(Some(controller.serve()));
/// manager.set_max_downloads(Some(2));
/// assert!(manager.configure().await);
/// assert_eq!(controller.stats().max_downloads, 2);
///
/// // Without a worker there is nothing to configure
/// assert!(!ThrottleManager::detached().configure().await);
/// # }
/// ```
#[derive(Debug)]
pub struct ThrottleManager {
    max_downloads: usize,
    priority_filters: PriorityFilters,
    debug: bool,
    worker: Option<WorkerHandle>,
    listener: OnceLock<Listener>,
    acks: Acks,
    events: broadcast::Sender<NetworkEvent>,
}

impl Default for ThrottleManager {
    fn default() -> Self {
        Self::detached()
    }
}

impl ThrottleManager {
    /// Create a manager talking to `worker`, with default parameters
    #[must_use]
    pub fn new(worker: Option<WorkerHandle>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            max_downloads: DEFAULT_MAX_DOWNLOADS,
            priority_filters: PriorityFilters::builtin(),
            debug: false,
            worker,
            listener: OnceLock::new(),
            acks: Arc::default(),
            events,
        }
    }

    /// A manager without a worker; [`Self::configure`] always yields `false`
    #[must_use]
    pub fn detached() -> Self {
        Self::new(None)
    }

    /// Create a manager with the parameters of a configuration file
    ///
    /// # Errors
    ///
    /// Fails if a configured priority filter is invalid
    pub fn from_config(config: &ThrottleConfig, worker: Option<WorkerHandle>) -> Result<Self> {
        let mut manager = Self::new(worker);
        manager.set_max_downloads(Some(config.max_downloads));
        manager.set_priority_filters(Some(config.priority_filters()?));
        manager.set_debug(config.debug);
        Ok(manager)
    }

    /// Maximum number of concurrent throttled downloads; 0 means unlimited
    #[must_use]
    pub const fn max_downloads(&self) -> usize {
        self.max_downloads
    }

    /// Set the download limit; `None` and `Some(0)` disable throttling
    pub fn set_max_downloads(&mut self, max_downloads: Option<usize>) {
        self.max_downloads = max_downloads.unwrap_or_default();
    }

    /// The filters sent to the worker, built-in ones first
    #[must_use]
    pub const fn priority_filters(&self) -> &PriorityFilters {
        &self.priority_filters
    }

    /// Replace the caller-supplied filters.
    ///
    /// The built-in filters always stay in front; `None` leaves only them.
    pub fn set_priority_filters(&mut self, filters: Option<Vec<PriorityFilter>>) {
        self.priority_filters = PriorityFilters::with_builtin(filters.unwrap_or_default());
    }

    /// Whether the worker logs every admission decision
    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }

    /// Ask the worker to log every admission decision
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// The settings [`Self::configure`] sends
    #[must_use]
    pub fn settings(&self) -> ThrottleSettings {
        ThrottleSettings {
            max_downloads: self.max_downloads,
            priority_filters: self.priority_filters.clone(),
            debug: self.debug,
        }
    }

    /// Receive the worker's busy/idle transitions.
    ///
    /// Transitions are only relayed after [`Self::configure`] succeeded,
    /// since that is when the worker learns about this manager.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    /// Send the current parameters to the worker and wait until it applied
    /// them.
    ///
    /// Returns `false` without doing anything if there is no worker, and
    /// `false` if the worker goes away before acknowledging. Never fails
    /// otherwise.
    pub async fn configure(&self) -> bool {
        let Some(worker) = &self.worker else {
            debug!("No worker to configure, downloads stay unthrottled");
            return false;
        };
        if worker.is_closed() || !worker.ready().await {
            debug!("Worker is gone, downloads stay unthrottled");
            return false;
        }

        let message = ClientMessage::ConfigureThrottling(self.settings()).to_value();
        let (ack, acknowledged) = oneshot::channel();
        {
            // Waiters are queued in the order their messages are sent
            let mut acks = lock(&self.acks);
            acks.push_back(ack);
            if !worker.post(message, self.reply_port()) {
                acks.pop_back();
                return false;
            }
        }

        tokio::select! {
            biased;
            ack = acknowledged => match ack {
                Ok(ack) => {
                    debug!(
                        "Worker applied throttling: max downloads {}, {} priority filters",
                        ack.max_downloads,
                        ack.priority_filters.len()
                    );
                    true
                }
                Err(_) => false,
            },
            () = worker.closed() => {
                debug!("Worker went away before acknowledging");
                false
            }
        }
    }

    fn reply_port(&self) -> ReplyPort {
        self.listener
            .get_or_init(|| {
                let (port, replies) = ReplyPort::channel();
                let (shutdown, stopped) = oneshot::channel();
                tokio::spawn(listen(
                    replies,
                    stopped,
                    Arc::clone(&self.acks),
                    self.events.clone(),
                ));
                Listener {
                    port,
                    _shutdown: shutdown,
                }
            })
            .port
            .clone()
    }
}

/// Dispatch worker messages until the manager is dropped
async fn listen(
    mut replies: UnboundedReceiver<Value>,
    mut stopped: oneshot::Receiver<()>,
    acks: Acks,
    events: broadcast::Sender<NetworkEvent>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = &mut stopped => break,
            message = replies.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        match WorkerMessage::parse(&message) {
            Ok(WorkerMessage::ConfiguredThrottling(ack)) => match lock(&acks).pop_front() {
                Some(waiter) => {
                    let _ = waiter.send(ack);
                }
                None => trace!("Dropping unexpected acknowledgment"),
            },
            Ok(WorkerMessage::NetworkBusyStatus { network_busy }) => {
                let event = NetworkEvent::from(network_busy);
                debug!("Network {event}");
                // No subscribers is fine
                let _ = events.send(event);
            }
            Err(e) => debug!("Ignoring worker message: {e}"),
        }
    }
    trace!("Throttle manager listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_WINDOW, hold, settle};
    use crate::{AdmissionController, DownloadRequest, Priority};
    use pretty_assertions::assert_eq;
    use tokio::sync::{mpsc::unbounded_channel, watch};

    #[test]
    fn test_defaults() {
        let manager = ThrottleManager::detached();
        assert_eq!(manager.max_downloads(), DEFAULT_MAX_DOWNLOADS);
        assert_eq!(manager.priority_filters(), &PriorityFilters::builtin());
        assert!(!manager.debug());
    }

    #[test]
    fn test_property_contract() {
        let mut manager = ThrottleManager::detached();
        manager.set_max_downloads(None);
        assert_eq!(manager.max_downloads(), 0);
        manager.set_max_downloads(Some(7));
        assert_eq!(manager.max_downloads(), 7);
        manager.set_max_downloads(Some(0));
        assert_eq!(manager.max_downloads(), 0);

        let custom = PriorityFilter::new(r"\.json$", Priority::Low).unwrap();
        manager.set_priority_filters(Some(vec![custom.clone()]));
        let filters: Vec<_> = manager.priority_filters().iter().cloned().collect();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0], PriorityFilters::builtin().iter().next().unwrap().clone());
        assert_eq!(filters[1], custom);

        manager.set_priority_filters(None);
        assert_eq!(manager.priority_filters(), &PriorityFilters::builtin());
    }

    #[tokio::test]
    async fn test_detached_configure_is_noop() {
        let manager = ThrottleManager::detached();
        assert!(!manager.configure().await);
        assert!(!manager.configure().await);
    }

    #[tokio::test]
    async fn test_configure_round_trip() {
        let controller = AdmissionController::new(TEST_WINDOW);
        let mut manager = ThrottleManager::new(Some(controller.serve()));
        manager.set_max_downloads(Some(3));
        manager.set_debug(true);

        assert!(manager.configure().await);
        let stats = controller.stats();
        assert_eq!(stats.max_downloads, 3);
        assert_eq!(stats.clients, 1);

        // Reconfiguring reuses the same endpoint
        manager.set_max_downloads(None);
        assert!(manager.configure().await);
        let stats = controller.stats();
        assert_eq!(stats.max_downloads, 0);
        assert_eq!(stats.clients, 1);
    }

    #[tokio::test]
    async fn test_worker_gone() {
        let (inbox, messages) = unbounded_channel();
        let (_ready, ready_rx) = watch::channel(true);
        drop(messages);
        let manager = ThrottleManager::new(Some(WorkerHandle::new(inbox, ready_rx)));
        assert!(!manager.configure().await);
    }

    #[tokio::test]
    async fn test_worker_gone_before_acknowledging() {
        let (inbox, mut messages) = unbounded_channel();
        let (_ready, ready_rx) = watch::channel(true);
        let manager = ThrottleManager::new(Some(WorkerHandle::new(inbox, ready_rx)));

        // A worker that reads one message and dies without answering
        tokio::spawn(async move {
            let _ = messages.recv().await;
        });
        assert!(!manager.configure().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_idle_are_relayed() {
        let controller = AdmissionController::new(TEST_WINDOW);
        let manager = ThrottleManager::new(Some(controller.serve()));
        let mut events = manager.subscribe();
        assert!(manager.configure().await);

        let download = hold(&controller, DownloadRequest::new("https://a/x")).await;
        tokio::time::sleep(TEST_WINDOW * 2).await;
        assert_eq!(events.recv().await.unwrap(), NetworkEvent::Busy);

        download.release().await;
        tokio::time::sleep(TEST_WINDOW * 2).await;
        settle().await;
        assert_eq!(events.recv().await.unwrap(), NetworkEvent::Idle);
    }
}
