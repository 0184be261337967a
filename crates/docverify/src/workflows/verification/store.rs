use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::aggregate::CaseAggregator;
use super::domain::{
    ActorId, CaseId, CaseSnapshot, CaseStatus, DocumentKind, DocumentSlot, FileLocator,
    ReviewDecision, SlotChanged, SlotStatus,
};
use super::error::VerificationError;
use super::fields::{SlotFields, ValidationError};
use super::machine::{self, SlotAction};
use super::repository::{RepositoryError, SlotRepository};

/// Outcome of a committed slot write.
#[derive(Debug, Clone)]
pub struct SlotMutation {
    pub previous: DocumentSlot,
    pub slot: DocumentSlot,
    pub case: CaseSnapshot,
}

/// Guards every slot write: validation, transition table, compare-and-set, then aggregation.
pub struct SlotStore<R> {
    repository: Arc<R>,
    aggregator: Arc<CaseAggregator<R>>,
    retry_limit: u32,
}

impl<R> SlotStore<R>
where
    R: SlotRepository + 'static,
{
    pub fn new(repository: Arc<R>, aggregator: Arc<CaseAggregator<R>>, retry_limit: u32) -> Self {
        Self {
            repository,
            aggregator,
            retry_limit: retry_limit.max(1),
        }
    }

    /// Store submitter fields. Malformed input is refused before any read or write.
    pub fn put_fields(
        &self,
        case_id: &CaseId,
        kind: DocumentKind,
        fields: SlotFields,
    ) -> Result<SlotMutation, VerificationError> {
        let fields = fields.validated(kind)?;
        self.mutate(case_id, kind, SlotAction::Upload, |slot| {
            slot.fields = Some(fields.clone());
        })
    }

    /// Point the slot at a stored file. Either the locator and its transition commit together
    /// or the slot is left exactly as it was.
    pub fn attach_file(
        &self,
        case_id: &CaseId,
        kind: DocumentKind,
        locator: FileLocator,
    ) -> Result<SlotMutation, VerificationError> {
        self.mutate(case_id, kind, SlotAction::Upload, |slot| {
            slot.file_locator = Some(locator.clone());
        })
    }

    /// Record a reviewer decision.
    pub fn set_status(
        &self,
        case_id: &CaseId,
        kind: DocumentKind,
        decision: &ReviewDecision,
        actor: &ActorId,
    ) -> Result<SlotMutation, VerificationError> {
        let (action, reason) = match decision {
            ReviewDecision::Approve => (SlotAction::Approve, None),
            ReviewDecision::Reject { reason } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(ValidationError::MissingRejectionReason.into());
                }
                (SlotAction::Reject, Some(reason.to_string()))
            }
        };

        self.mutate(case_id, kind, action, |slot| {
            slot.reviewed_at = Some(Utc::now());
            slot.reviewed_by = Some(actor.clone());
            slot.rejection_reason = reason.clone();
        })
    }

    /// Check that an upload would be accepted right now, without writing anything.
    pub fn ensure_uploadable(
        &self,
        case_id: &CaseId,
        kind: DocumentKind,
    ) -> Result<(), VerificationError> {
        let current = self.repository.load_slot(case_id, kind)?;
        machine::check(self.case_status(case_id)?, kind, current.status, SlotAction::Upload)?;
        Ok(())
    }

    /// Record that an approved slot's projection reached the profile. Status is untouched;
    /// `None` when there was nothing left to mark.
    pub(crate) fn mark_extracted(
        &self,
        case_id: &CaseId,
        kind: DocumentKind,
    ) -> Result<Option<DocumentSlot>, RepositoryError> {
        for _ in 0..self.retry_limit {
            let current = self.repository.load_slot(case_id, kind)?;
            if !current.awaiting_extraction() {
                return Ok(None);
            }

            let mut next = current.clone();
            next.extracted_at = Some(Utc::now());
            match self.repository.compare_and_set(case_id, current.revision, next) {
                Ok(committed) => {
                    self.settle(case_id, &committed);
                    return Ok(Some(committed));
                }
                Err(RepositoryError::Conflict) => continue,
                Err(other) => return Err(other),
            }
        }

        Err(RepositoryError::Contention {
            attempts: self.retry_limit,
        })
    }

    /// Recompute a case whose record fell behind its slots.
    pub fn reconcile_case(&self, case_id: &CaseId) -> Result<bool, RepositoryError> {
        self.aggregator.reconcile(case_id)
    }

    /// Fold a committed slot into its case. The slot write stands either way; a failed case
    /// update is logged and picked up by the next read or sweep of that case.
    fn settle(&self, case_id: &CaseId, committed: &DocumentSlot) -> CaseSnapshot {
        let event = SlotChanged {
            case_id: case_id.clone(),
            kind: committed.kind,
            status: committed.status,
        };
        match self.aggregator.on_slot_changed(&event) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(
                    case_id = %case_id,
                    kind = %committed.kind,
                    status = %committed.status,
                    error = %err,
                    "slot committed but case update failed"
                );
                self.aggregator.provisional(case_id, committed)
            }
        }
    }

    fn case_status(&self, case_id: &CaseId) -> Result<CaseStatus, RepositoryError> {
        Ok(self
            .repository
            .fetch_case(case_id)?
            .map_or(CaseStatus::NotStarted, |case| case.overall_status))
    }

    fn mutate<F>(
        &self,
        case_id: &CaseId,
        kind: DocumentKind,
        action: SlotAction,
        apply: F,
    ) -> Result<SlotMutation, VerificationError>
    where
        F: Fn(&mut DocumentSlot),
    {
        for attempt in 1..=self.retry_limit {
            let current = self.repository.load_slot(case_id, kind)?;
            let status = machine::check(self.case_status(case_id)?, kind, current.status, action)?;

            let mut next = current.clone();
            apply(&mut next);
            let new_file = next.file_locator != current.file_locator;
            next.status = match current.status {
                // Fields or file alone only stage content on an empty slot.
                SlotStatus::Empty if !next.has_content() => SlotStatus::Empty,
                // A rejected file stays rejected until a different one is attached.
                SlotStatus::Rejected if action == SlotAction::Upload && !new_file => {
                    SlotStatus::Rejected
                }
                _ => status,
            };
            if action == SlotAction::Upload && next.status == SlotStatus::Uploaded {
                next.rejection_reason = None;
                next.reviewed_at = None;
                next.reviewed_by = None;
            }

            match self
                .repository
                .compare_and_set(case_id, current.revision, next)
            {
                Ok(committed) => {
                    debug!(
                        case_id = %case_id,
                        kind = %kind,
                        action = %action,
                        from = %current.status,
                        to = %committed.status,
                        "slot committed"
                    );
                    let case = self.settle(case_id, &committed);
                    return Ok(SlotMutation {
                        previous: current,
                        slot: committed,
                        case,
                    });
                }
                Err(RepositoryError::Conflict) => {
                    debug!(case_id = %case_id, kind = %kind, attempt, "lost slot race, re-reading");
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(RepositoryError::Contention {
            attempts: self.retry_limit,
        }
        .into())
    }
}
