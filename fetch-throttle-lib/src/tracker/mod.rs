//! Worker side of the throttle: admission control for intercepted downloads.
//!
//! An [`AdmissionController`] sits in front of every download. Downloads
//! with a free slot (or an unthrottled priority) start immediately, the rest
//! wait in per-priority FIFO queues until a running download finishes.
//! Busy/idle transitions are broadcast to every client that configured the
//! controller, coalesced over a short window.
mod coalesce;
mod event;
mod queue;
mod state;

use log::{debug, log, trace, warn};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{
    broadcast,
    mpsc::{UnboundedReceiver, unbounded_channel},
    oneshot, watch,
};
use tokio::time::Instant;

pub use coalesce::Coalescer;
pub use event::TrackerEvent;
pub use state::ThrottleStats;

use state::{Pending, ThrottleState};

use crate::protocol::{
    Acknowledgment, ClientMessage, Envelope, ReplyPort, ThrottleSettings, WorkerHandle,
    WorkerMessage,
};
use crate::{DownloadRequest, ErrorKind, Priority, Result, ThrottleConfig};

/// Number of events buffered for slow [`AdmissionController::subscribe`]rs
const EVENT_CAPACITY: usize = 1024;

/// Tracks in-flight downloads and decides when queued ones may start.
///
/// Cloning is cheap; all clones share the same state.
///
/// ```
/// use fetch_throttle_lib::{AdmissionController, DownloadRequest};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let controller = AdmissionController::new(Duration::from_millis(50));
/// let request = DownloadRequest::new("https://example.com/app.js");
/// let status = controller.intercept(request, || async { 200 }).await;
/// assert_eq!(status, 200);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<ThrottleState>,
    events: broadcast::Sender<TrackerEvent>,
    busy_broadcast: Coalescer,
}

enum Admission {
    Now(Slot),
    Later(Priority, oneshot::Receiver<Slot>),
}

impl AdmissionController {
    /// Create an unconfigured controller.
    ///
    /// Until a client configures it, downloads are not throttled.
    #[must_use]
    pub fn new(busy_window: Duration) -> Self {
        Self::with_settings(ThrottleSettings::default(), busy_window)
    }

    /// Create a controller with the given settings already applied
    #[must_use]
    pub fn with_settings(settings: ThrottleSettings, busy_window: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ThrottleState::new(settings)),
                events,
                busy_broadcast: Coalescer::new(busy_window),
            }),
        }
    }

    /// Create a controller from a configuration file's settings
    ///
    /// # Errors
    ///
    /// Fails if a configured priority filter is invalid
    pub fn from_config(config: &ThrottleConfig) -> Result<Self> {
        Ok(Self::with_settings(config.settings()?, config.busy_window))
    }

    // The state stays consistent across a panicking fetch: the lock is
    // never held while user code runs.
    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Receive a [`TrackerEvent`] for every decision taken from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of counters and queue lengths
    #[must_use]
    pub fn stats(&self) -> ThrottleStats {
        self.lock().stats()
    }

    /// Return to the unconfigured state with `settings` applied.
    ///
    /// Registered clients, the last broadcast busy state and the counters
    /// are cleared. Downloads already running or queued are kept and
    /// queued ones are admitted as far as the new settings allow.
    pub fn reset(&self, settings: ThrottleSettings) {
        self.lock().reset(settings);
        self.release_pending();
    }

    /// Run `fetch` once the download described by `request` is admitted.
    ///
    /// The priority is resolved from the request's destination, the
    /// configured filters and its priority header. If the limit is reached
    /// the call waits in the queue of that priority. Whatever `fetch`
    /// returns, errors included, is handed back unchanged; the slot is
    /// freed as soon as it completes.
    ///
    /// Dropping the returned future cancels the download: a queued entry is
    /// skipped without using up capacity and a running one frees its slot.
    pub async fn intercept<F, Fut>(&self, request: DownloadRequest, fetch: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let admission = {
            let mut state = self.lock();
            let priority = request.priority(&state.settings.priority_filters);
            if state.has_capacity(priority) {
                Admission::Now(self.admit(&mut state, request.url(), priority))
            } else {
                let (admit, admitted) = oneshot::channel();
                state.defer(
                    priority,
                    Pending {
                        url: request.url().to_string(),
                        deferred_at: Instant::now(),
                        admit,
                    },
                );
                log!(
                    state.decision_level(),
                    "Queued {request} [{priority}], {} in flight, {} waiting",
                    state.in_flight,
                    state.pending.total()
                );
                self.emit(TrackerEvent::Queued {
                    url: request.url().to_string(),
                    priority,
                });
                Admission::Later(priority, admitted)
            }
        };

        let slot = match admission {
            Admission::Now(slot) => slot,
            Admission::Later(priority, admitted) => match admitted.await {
                Ok(slot) => slot,
                // Only reachable if the queue was torn down with us in it
                Err(_) => {
                    warn!("Lost queue entry for {request}, starting it now");
                    let mut state = self.lock();
                    self.admit(&mut state, request.url(), priority)
                }
            },
        };

        self.schedule_busy_broadcast();
        let output = fetch().await;
        drop(slot);
        output
    }

    fn admit(&self, state: &mut ThrottleState, url: &str, priority: Priority) -> Slot {
        state.start();
        log!(
            state.decision_level(),
            "Started {url} [{priority}], {} in flight",
            state.in_flight
        );
        self.emit(TrackerEvent::Started {
            url: url.to_string(),
            priority,
        });
        Slot::new(self.clone(), url.to_string(), priority)
    }

    /// Admit queued downloads while there is capacity, most urgent first.
    ///
    /// Returns the number of downloads admitted.
    pub fn release_pending(&self) -> usize {
        let mut admitted = 0;
        loop {
            // The slot is counted before it is handed over and handed over
            // outside the lock, since a slot dropped on the way finishes
            // itself.
            let (priority, pending, level, in_flight) = {
                let mut state = self.lock();
                if state.available() == Some(0) {
                    break;
                }
                let Some((priority, pending)) = state.pending.pop_next() else {
                    break;
                };
                state.start();
                (priority, pending, state.decision_level(), state.in_flight)
            };

            let slot = Slot::new(self.clone(), pending.url.clone(), priority);
            if let Err(mut slot) = pending.admit.send(slot) {
                // The caller gave up while waiting
                slot.disarm();
                self.lock().retract();
                trace!("Skipping cancelled download {}", pending.url);
                continue;
            }

            log!(
                level,
                "Started {} [{priority}] after {:?}, {in_flight} in flight",
                pending.url,
                pending.deferred_at.elapsed(),
            );
            self.emit(TrackerEvent::Started {
                url: pending.url,
                priority,
            });
            admitted += 1;
        }
        if admitted > 0 {
            self.schedule_busy_broadcast();
        }
        admitted
    }

    fn finish(&self, url: &str, priority: Priority) {
        {
            let mut state = self.lock();
            state.finish();
            log!(
                state.decision_level(),
                "Finished {url} [{priority}], {} in flight",
                state.in_flight
            );
        }
        self.emit(TrackerEvent::Completed {
            url: url.to_string(),
            priority,
        });
        self.release_pending();
        self.schedule_busy_broadcast();
    }

    fn schedule_busy_broadcast(&self) {
        let controller = self.clone();
        self.inner.busy_broadcast.schedule(move || {
            controller.flush_busy_state();
        });
    }

    /// Broadcast the busy state to every client if it changed since the
    /// last broadcast.
    ///
    /// This normally runs at the end of each coalescing window. Returns the
    /// new state if a broadcast went out. Clients whose endpoint is gone are
    /// forgotten.
    pub fn flush_busy_state(&self) -> Option<bool> {
        let busy = {
            let mut state = self.lock();
            let busy = state.in_flight > 0;
            if busy == state.last_broadcast_busy {
                return None;
            }
            state.last_broadcast_busy = busy;
            let message = WorkerMessage::NetworkBusyStatus { network_busy: busy };
            state.reply_ports.retain(|port| port.post(&message));
            log!(
                state.decision_level(),
                "Network {} ({} clients)",
                if busy { "busy" } else { "idle" },
                state.reply_ports.len()
            );
            busy
        };
        self.emit(TrackerEvent::BusyChanged(busy));
        Some(busy)
    }

    /// Apply new settings on behalf of the client behind `reply_to`.
    ///
    /// The client is registered for busy/idle broadcasts and receives a
    /// `configured-throttling` acknowledgment before any queued download is
    /// released under the new limit.
    pub fn configure(&self, settings: ThrottleSettings, reply_to: &ReplyPort) -> Acknowledgment {
        let acknowledgment = {
            let mut state = self.lock();
            state.settings = settings;
            state.register(reply_to.clone());
            Acknowledgment::from(&state.settings)
        };
        debug!(
            "Throttling configured by port {}: max downloads {}, {} priority filters",
            reply_to.id(),
            acknowledgment.max_downloads,
            acknowledgment.priority_filters.len()
        );
        reply_to.post(&WorkerMessage::ConfiguredThrottling(acknowledgment.clone()));
        self.release_pending();
        acknowledgment
    }

    /// Validate and dispatch a raw client message.
    ///
    /// Unknown and malformed messages are logged and otherwise ignored.
    pub fn handle_message(&self, message: &Value, reply_to: ReplyPort) {
        match ClientMessage::parse(message) {
            Ok(ClientMessage::ConfigureThrottling(settings)) => {
                self.configure(settings, &reply_to);
            }
            Err(e @ ErrorKind::MalformedMessage { .. }) => {
                debug!("Ignoring message from port {}: {e}", reply_to.id());
            }
            Err(e) => warn!("Ignoring message from port {}: {e}", reply_to.id()),
        }
    }

    /// Handle messages until every sender of `inbox` is gone
    pub async fn listen(&self, mut inbox: UnboundedReceiver<Envelope>) {
        while let Some(Envelope { message, reply_to }) = inbox.recv().await {
            self.handle_message(&message, reply_to);
        }
        debug!("Worker inbox closed");
    }

    /// Start listening for client messages on a background task.
    ///
    /// The worker keeps running until every clone of the returned handle is
    /// dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime
    #[must_use]
    pub fn serve(&self) -> WorkerHandle {
        let (inbox, messages) = unbounded_channel();
        let (ready, ready_rx) = watch::channel(false);
        let controller = self.clone();
        tokio::spawn(async move {
            ready.send_replace(true);
            controller.listen(messages).await;
        });
        WorkerHandle::new(inbox, ready_rx)
    }
}

/// An admitted download's claim on the controller.
///
/// Dropping the slot marks the download as finished and lets the next
/// queued one in.
#[derive(Debug)]
pub(crate) struct Slot {
    controller: AdmissionController,
    url: String,
    priority: Priority,
    armed: bool,
}

impl Slot {
    const fn new(controller: AdmissionController, url: String, priority: Priority) -> Self {
        Self {
            controller,
            url,
            priority,
            armed: true,
        }
    }

    /// Drop without finishing; used for slots that were never taken
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.armed {
            self.controller.finish(&self.url, self.priority);
        }
    }
}
