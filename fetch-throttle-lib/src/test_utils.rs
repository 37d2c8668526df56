use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::protocol::ThrottleSettings;
use crate::{AdmissionController, DownloadRequest, PriorityFilters, TrackerEvent};

/// Busy window used by controllers created in tests
pub(crate) const TEST_WINDOW: Duration = Duration::from_millis(50);

/// A controller limited to `max_downloads`, with the built-in filters
pub(crate) fn limited(max_downloads: usize) -> AdmissionController {
    AdmissionController::with_settings(
        ThrottleSettings {
            max_downloads,
            priority_filters: PriorityFilters::builtin(),
            debug: false,
        },
        TEST_WINDOW,
    )
}

/// A download whose fetch runs until it is released
pub(crate) struct Held {
    release: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Held {
    /// Let the fetch complete and wait for the download to finish
    pub(crate) async fn release(self) {
        let _ = self.release.send(());
        let _ = self.task.await;
        settle().await;
    }

    /// Drop the download, wherever it is
    pub(crate) async fn abort(self) {
        self.task.abort();
        let _ = self.task.await;
        settle().await;
    }
}

/// Start intercepting `request` on a background task and let it get as far
/// as it can: into its fetch if admitted, into a queue otherwise.
pub(crate) async fn hold(controller: &AdmissionController, request: DownloadRequest) -> Held {
    let (release, released) = oneshot::channel::<()>();
    let controller = controller.clone();
    let task = tokio::spawn(async move {
        controller
            .intercept(request, || async move {
                let _ = released.await;
            })
            .await;
    });
    settle().await;
    Held { release, task }
}

/// Give spawned tasks the chance to run until they block
pub(crate) async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Everything received so far, without waiting
pub(crate) fn drain(events: &mut broadcast::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

/// URLs of the `Started` events, in admission order
pub(crate) fn started_urls(events: &[TrackerEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            TrackerEvent::Started { url, .. } => Some(url.as_str()),
            _ => None,
        })
        .collect()
}
