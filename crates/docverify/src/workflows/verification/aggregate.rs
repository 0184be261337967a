use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::domain::{
    CaseId, CaseRecord, CaseSnapshot, CaseStatus, DocumentSlot, SlotChanged, SlotSet, SlotStatus,
};
use super::notifier::ChangeNotifier;
use super::repository::{RepositoryError, SlotRepository};

/// Derive the case status from the three slot statuses.
///
/// Total over all 64 combinations: all empty, all uploaded and all terminal each map to
/// one status, every other mix is still in progress.
pub fn derive_case_status(statuses: [SlotStatus; 3]) -> CaseStatus {
    if statuses.iter().all(|status| *status == SlotStatus::Empty) {
        CaseStatus::NotStarted
    } else if statuses.iter().all(|status| *status == SlotStatus::Uploaded) {
        CaseStatus::ReadyForReview
    } else if statuses.iter().all(|status| status.is_terminal()) {
        if statuses.iter().all(|status| *status == SlotStatus::Approved) {
            CaseStatus::Approved
        } else {
            CaseStatus::Rejected
        }
    } else {
        CaseStatus::InProgress
    }
}

/// Owns the case record: recomputes it after every slot change and publishes the result.
pub struct CaseAggregator<R> {
    repository: Arc<R>,
    notifier: Arc<ChangeNotifier>,
    case_locks: Mutex<HashMap<CaseId, Arc<Mutex<()>>>>,
}

impl<R> CaseAggregator<R>
where
    R: SlotRepository + 'static,
{
    pub fn new(repository: Arc<R>, notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            repository,
            notifier,
            case_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Entry point for the slot store.
    pub fn on_slot_changed(&self, event: &SlotChanged) -> Result<CaseSnapshot, RepositoryError> {
        debug!(
            case_id = %event.case_id,
            kind = %event.kind,
            status = %event.status,
            "slot changed"
        );
        self.recompute(&event.case_id)
    }

    /// Re-derive and persist the case from a fresh read of its slots.
    ///
    /// Serialized per case so snapshots are published in revision order.
    pub fn recompute(&self, case_id: &CaseId) -> Result<CaseSnapshot, RepositoryError> {
        let lock = self.case_lock(case_id);
        let _serialized = lock.lock().map_err(|_| poisoned())?;

        let slots = self.repository.load_slots(case_id)?;
        let previous = self
            .repository
            .fetch_case(case_id)?
            .unwrap_or_else(|| CaseRecord::new(case_id.clone()));

        let case = derive_record(&previous, &slots);
        self.repository.save_case(case.clone())?;

        if previous.overall_status != case.overall_status {
            info!(
                case_id = %case_id,
                from = %previous.overall_status,
                to = %case.overall_status,
                "case status changed"
            );
        }

        let snapshot = CaseSnapshot { case, slots };
        self.notifier.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// Recompute a case whose stored record no longer matches its slots, which happens when
    /// a slot write committed but the case update after it failed. `true` when it did.
    pub fn reconcile(&self, case_id: &CaseId) -> Result<bool, RepositoryError> {
        let slots = self.repository.load_slots(case_id)?;
        let record = self.repository.fetch_case(case_id)?;
        if !is_stale(record.as_ref(), &slots) {
            return Ok(false);
        }
        warn!(case_id = %case_id, "case record behind its slots, recomputing");
        self.recompute(case_id)?;
        Ok(true)
    }

    /// Current snapshot; `None` for cases never touched.
    ///
    /// A stale case record is recomputed first. If that fails again the caller gets the
    /// derived, unsaved view so no status from older slot data is ever handed out.
    pub fn snapshot(&self, case_id: &CaseId) -> Result<Option<CaseSnapshot>, RepositoryError> {
        let slots = self.repository.load_slots(case_id)?;
        let record = self.repository.fetch_case(case_id)?;
        if !is_stale(record.as_ref(), &slots) {
            return Ok(record.map(|case| CaseSnapshot { case, slots }));
        }

        match self.recompute(case_id) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                warn!(case_id = %case_id, error = %err, "case recompute failed, serving derived view");
                let previous = record.unwrap_or_else(|| CaseRecord::new(case_id.clone()));
                Ok(Some(unsaved(&previous, slots)))
            }
        }
    }

    /// View of a case right after `committed` landed but the case update did not.
    ///
    /// Built from whatever can still be read; nothing is saved or published.
    pub(crate) fn provisional(&self, case_id: &CaseId, committed: &DocumentSlot) -> CaseSnapshot {
        let mut slots = self
            .repository
            .load_slots(case_id)
            .unwrap_or_else(|_| SlotSet::empty());
        slots.0[committed.kind.index()] = committed.clone();
        let previous = self
            .repository
            .fetch_case(case_id)
            .ok()
            .flatten()
            .unwrap_or_else(|| CaseRecord::new(case_id.clone()));
        unsaved(&previous, slots)
    }

    fn case_lock(&self, case_id: &CaseId) -> Arc<Mutex<()>> {
        let mut locks = self
            .case_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(case_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Next case record for `slots`: status, first submission, finalization and a new revision.
fn derive_record(previous: &CaseRecord, slots: &SlotSet) -> CaseRecord {
    let status = derive_case_status(slots.statuses());
    let now = Utc::now();

    let mut case = previous.clone();
    case.overall_status = status;
    if status == CaseStatus::ReadyForReview && case.submitted_at.is_none() {
        case.submitted_at = Some(now);
    }
    if status.is_final() {
        if case.finalized_at.is_none() {
            case.finalized_at = Some(now);
        }
    } else {
        case.finalized_at = None;
    }
    case.revision = previous.revision + 1;
    case
}

/// Derived snapshot that keeps the stored revision, since nothing was written.
fn unsaved(previous: &CaseRecord, slots: SlotSet) -> CaseSnapshot {
    let mut case = derive_record(previous, &slots);
    case.revision = previous.revision;
    CaseSnapshot { case, slots }
}

/// A missing record is stale once any slot has been written.
fn is_stale(record: Option<&CaseRecord>, slots: &SlotSet) -> bool {
    match record {
        Some(case) => case.overall_status != derive_case_status(slots.statuses()),
        None => slots.iter().any(|slot| slot.revision > 0),
    }
}

fn poisoned() -> RepositoryError {
    RepositoryError::Unavailable("case lock poisoned".to_string())
}
