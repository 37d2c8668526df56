use log::Level;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::Slot;
use super::queue::PendingQueues;
use crate::Priority;
use crate::protocol::{ReplyPort, ThrottleSettings};

/// A download waiting for a free slot
#[derive(Debug)]
pub(crate) struct Pending {
    pub(crate) url: String,
    pub(crate) deferred_at: Instant,
    /// Resolves the waiting `intercept` call with its slot
    pub(crate) admit: oneshot::Sender<Slot>,
}

/// Everything guarded by the controller's lock
#[derive(Debug, Default)]
pub(crate) struct ThrottleState {
    pub(crate) settings: ThrottleSettings,
    pub(crate) in_flight: usize,
    pub(crate) pending: PendingQueues<Pending>,
    pub(crate) reply_ports: Vec<ReplyPort>,
    pub(crate) last_broadcast_busy: bool,
    admitted: u64,
    deferred: u64,
    completed: u64,
}

impl ThrottleState {
    pub(crate) fn new(settings: ThrottleSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Admission decisions are logged at debug level only in debug mode
    pub(crate) const fn decision_level(&self) -> Level {
        if self.settings.debug {
            Level::Debug
        } else {
            Level::Trace
        }
    }

    /// Whether a download of the given priority may start right now
    pub(crate) fn has_capacity(&self, priority: Priority) -> bool {
        self.settings.max_downloads == 0
            || !priority.is_throttled()
            || self.in_flight < self.settings.max_downloads
    }

    /// How many queued downloads may be admitted; `None` means all of them
    pub(crate) fn available(&self) -> Option<usize> {
        match self.settings.max_downloads {
            0 => None,
            max => Some(max.saturating_sub(self.in_flight)),
        }
    }

    pub(crate) fn start(&mut self) {
        self.in_flight += 1;
        self.admitted += 1;
    }

    /// Undo a [`Self::start`] for a download nobody waited for anymore
    pub(crate) fn retract(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.admitted = self.admitted.saturating_sub(1);
    }

    pub(crate) fn defer(&mut self, priority: Priority, pending: Pending) {
        self.pending.push(priority, pending);
        self.deferred += 1;
    }

    pub(crate) fn finish(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.completed += 1;
    }

    /// Remember `port` for broadcasts, unless that endpoint is known already
    pub(crate) fn register(&mut self, port: ReplyPort) {
        if !self.reply_ports.iter().any(|known| known.same_endpoint(&port)) {
            self.reply_ports.push(port);
        }
    }

    /// Forget configuration, clients and counters.
    ///
    /// Downloads in flight and in the queues are kept: their fetches are
    /// already running or awaited by someone.
    pub(crate) fn reset(&mut self, settings: ThrottleSettings) {
        self.settings = settings;
        self.reply_ports.clear();
        self.last_broadcast_busy = false;
        self.admitted = 0;
        self.deferred = 0;
        self.completed = 0;
    }

    pub(crate) fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            max_downloads: self.settings.max_downloads,
            in_flight: self.in_flight,
            queued_high: self.pending.len(Priority::High),
            queued_normal: self.pending.len(Priority::Normal),
            queued_low: self.pending.len(Priority::Low),
            admitted: self.admitted,
            deferred: self.deferred,
            completed: self.completed,
            clients: self.reply_ports.len(),
            busy: self.last_broadcast_busy,
        }
    }
}

/// Point-in-time snapshot of an [`AdmissionController`](crate::AdmissionController)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThrottleStats {
    /// Configured concurrency limit; 0 means unlimited
    pub max_downloads: usize,
    /// Downloads currently running, unthrottled ones included
    pub in_flight: usize,
    /// Downloads waiting in the high priority queue
    pub queued_high: usize,
    /// Downloads waiting in the normal priority queue
    pub queued_normal: usize,
    /// Downloads waiting in the low priority queue
    pub queued_low: usize,
    /// Downloads admitted since the last reset
    pub admitted: u64,
    /// Downloads that had to wait since the last reset
    pub deferred: u64,
    /// Downloads finished since the last reset
    pub completed: u64,
    /// Registered client endpoints
    pub clients: usize,
    /// Last busy state broadcast to clients
    pub busy: bool,
}

impl ThrottleStats {
    /// Total number of queued downloads
    #[must_use]
    pub const fn queued(&self) -> usize {
        self.queued_high + self.queued_normal + self.queued_low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn limited(max_downloads: usize) -> ThrottleState {
        ThrottleState::new(ThrottleSettings {
            max_downloads,
            ..ThrottleSettings::default()
        })
    }

    #[test]
    fn test_capacity() {
        let mut state = limited(1);
        assert!(state.has_capacity(Priority::Low));
        assert_eq!(state.available(), Some(1));

        state.start();
        assert!(!state.has_capacity(Priority::High));
        assert!(state.has_capacity(Priority::Unthrottled));
        assert_eq!(state.available(), Some(0));

        // Unthrottled admissions still count as in flight
        state.start();
        assert_eq!(state.in_flight, 2);
        assert_eq!(state.available(), Some(0));
    }

    #[test]
    fn test_unlimited() {
        let mut state = limited(0);
        for _ in 0..100 {
            assert!(state.has_capacity(Priority::Low));
            state.start();
        }
        assert_eq!(state.available(), None);
    }

    #[test]
    fn test_finish_saturates() {
        let mut state = limited(2);
        state.finish();
        assert_eq!(state.in_flight, 0);
        assert_eq!(state.stats().completed, 1);
    }

    #[test]
    fn test_register_deduplicates() {
        let mut state = limited(2);
        let (port, _receiver) = ReplyPort::channel();
        let (other, _other_receiver) = ReplyPort::channel();

        state.register(port.clone());
        state.register(port);
        state.register(other);
        assert_eq!(state.reply_ports.len(), 2);
    }

    #[test]
    fn test_reset_keeps_work() {
        let mut state = limited(1);
        let (port, _receiver) = ReplyPort::channel();
        state.register(port);
        state.start();
        state.last_broadcast_busy = true;

        state.reset(ThrottleSettings::default());
        let stats = state.stats();
        assert_eq!(
            stats,
            ThrottleStats {
                in_flight: 1,
                ..ThrottleStats::default()
            }
        );
    }
}
