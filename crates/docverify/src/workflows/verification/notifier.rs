use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::domain::{Actor, CaseId, CaseSnapshot};

struct CaseChannel {
    sender: broadcast::Sender<CaseSnapshot>,
    latest: Arc<Mutex<Option<CaseSnapshot>>>,
}

/// Fans case snapshots out to every viewer subscribed to that case.
///
/// Each case has its own broadcast channel, so ordering holds per case and nothing is
/// promised across cases. Delivery is at-least-once: a subscriber that falls behind is
/// handed the latest snapshot instead of the ones it missed.
pub struct ChangeNotifier {
    capacity: usize,
    channels: Mutex<HashMap<CaseId, CaseChannel>>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn publish(&self, snapshot: CaseSnapshot) {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let channel = channels
            .entry(snapshot.case_id().clone())
            .or_insert_with(|| CaseChannel::new(self.capacity));

        if let Ok(mut latest) = channel.latest.lock() {
            *latest = Some(snapshot.clone());
        }
        // No receivers is fine; late subscribers start from `latest`.
        let _ = channel.sender.send(snapshot);
    }

    pub fn subscribe(&self, case_id: &CaseId, viewer: Actor) -> CaseSubscription {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let channel = channels
            .entry(case_id.clone())
            .or_insert_with(|| CaseChannel::new(self.capacity));

        let receiver = channel.sender.subscribe();
        let initial = channel
            .latest
            .lock()
            .ok()
            .and_then(|latest| latest.clone());

        debug!(case_id = %case_id, viewer = %viewer.id, role = viewer.role.label(), "viewer subscribed");

        CaseSubscription {
            case_id: case_id.clone(),
            viewer,
            pending: initial,
            receiver,
            latest: channel.latest.clone(),
            last_revision: None,
        }
    }

    pub fn subscriber_count(&self, case_id: &CaseId) -> usize {
        let channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .get(case_id)
            .map_or(0, |channel| channel.sender.receiver_count())
    }
}

impl CaseChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            latest: Arc::new(Mutex::new(None)),
        }
    }
}

/// One viewer's ordered feed of snapshots for a single case.
pub struct CaseSubscription {
    case_id: CaseId,
    viewer: Actor,
    pending: Option<CaseSnapshot>,
    receiver: broadcast::Receiver<CaseSnapshot>,
    latest: Arc<Mutex<Option<CaseSnapshot>>>,
    last_revision: Option<u64>,
}

impl CaseSubscription {
    /// Next snapshot newer than anything already delivered; `None` once the notifier is gone.
    pub async fn next_snapshot(&mut self) -> Option<CaseSnapshot> {
        if let Some(snapshot) = self.pending.take() {
            return Some(self.deliver(snapshot));
        }

        loop {
            let snapshot = match self.receiver.recv().await {
                Ok(snapshot) => snapshot,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        case_id = %self.case_id,
                        viewer = %self.viewer.id,
                        skipped,
                        "subscriber lagged, replaying latest snapshot"
                    );
                    let latest = self.latest.lock().ok().and_then(|latest| latest.clone());
                    match latest {
                        Some(snapshot) => snapshot,
                        None => continue,
                    }
                }
                Err(RecvError::Closed) => return None,
            };

            if self
                .last_revision
                .is_some_and(|seen| snapshot.case.revision <= seen)
            {
                continue;
            }
            return Some(self.deliver(snapshot));
        }
    }

    pub fn into_stream(mut self) -> impl Stream<Item = CaseSnapshot> {
        async_stream::stream! {
            while let Some(snapshot) = self.next_snapshot().await {
                yield snapshot;
            }
        }
    }

    fn deliver(&mut self, snapshot: CaseSnapshot) -> CaseSnapshot {
        self.last_revision = Some(snapshot.case.revision);
        snapshot
    }
}
