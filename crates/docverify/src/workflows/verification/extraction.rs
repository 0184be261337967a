use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::domain::{CaseId, DocumentKind, SlotStatus};
use super::fields::{extraction_timestamp_key, SlotFields};
use super::repository::{ProfileStore, ProfileWriteError, RepositoryError, SlotRepository};
use super::store::SlotStore;

/// What a single extraction attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Extracted { at: DateTime<Utc> },
    AlreadyExtracted,
    /// Another attempt for the same slot is running.
    InFlight,
    NotApproved,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error(transparent)]
    ProfileWrite(#[from] ProfileWriteError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub extracted: usize,
    /// Case records recomputed because they had fallen behind their slots.
    pub reconciled: usize,
    pub failed: usize,
}

impl SweepReport {
    fn absorb(&mut self, other: SweepReport) {
        self.extracted += other.extracted;
        self.reconciled += other.reconciled;
        self.failed += other.failed;
    }
}

/// Projects approved slot fields into the owner's profile, at most once per slot.
pub struct ExtractionPipeline<R> {
    repository: Arc<R>,
    store: Arc<SlotStore<R>>,
    profiles: Arc<dyn ProfileStore>,
    write_timeout: Duration,
    in_flight: Mutex<HashSet<(CaseId, DocumentKind)>>,
}

impl<R> ExtractionPipeline<R>
where
    R: SlotRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        store: Arc<SlotStore<R>>,
        profiles: Arc<dyn ProfileStore>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            store,
            profiles,
            write_timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Patch the profile with the slot's projection unless that already happened.
    ///
    /// A failed or timed-out write leaves `extracted_at` unset so a later call retries; the
    /// slot's approval is never touched.
    pub async fn on_slot_approved(
        &self,
        case_id: &CaseId,
        kind: DocumentKind,
        fields: &SlotFields,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        let Some(_claim) = self.claim(case_id, kind) else {
            debug!(case_id = %case_id, kind = %kind, "extraction already running");
            return Ok(ExtractionOutcome::InFlight);
        };

        let slot = self.repository.load_slot(case_id, kind)?;
        if slot.extracted_at.is_some() {
            return Ok(ExtractionOutcome::AlreadyExtracted);
        }
        if slot.status != SlotStatus::Approved {
            return Ok(ExtractionOutcome::NotApproved);
        }

        let at = Utc::now();
        let mut patch = fields.profile_projection();
        patch.insert(
            extraction_timestamp_key(kind).to_string(),
            Value::from(at.to_rfc3339()),
        );

        match tokio::time::timeout(self.write_timeout, self.profiles.patch(case_id, patch)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                let millis = u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX);
                return Err(ProfileWriteError::Timeout(millis).into());
            }
        }

        self.store.mark_extracted(case_id, kind)?;
        info!(case_id = %case_id, kind = %kind, "approved fields extracted into profile");
        Ok(ExtractionOutcome::Extracted { at })
    }

    /// Retry every approved slot of one case that has not been extracted yet.
    pub async fn sweep_case(&self, case_id: &CaseId) -> Result<SweepReport, RepositoryError> {
        let slots = self.repository.load_slots(case_id)?;
        let mut report = SweepReport::default();

        for slot in slots.iter().filter(|slot| slot.awaiting_extraction()) {
            let Some(fields) = slot.fields.as_ref() else {
                continue;
            };
            match self.on_slot_approved(case_id, slot.kind, fields).await {
                Ok(ExtractionOutcome::Extracted { .. }) => report.extracted += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(case_id = %case_id, kind = %slot.kind, error = %err, "extraction retry failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Reconcile unset `extracted_at` values and stale case records across all cases.
    pub async fn sweep(&self) -> Result<SweepReport, RepositoryError> {
        let mut report = SweepReport::default();
        for case_id in self.repository.case_ids()? {
            match self.store.reconcile_case(&case_id) {
                Ok(true) => report.reconciled += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(case_id = %case_id, error = %err, "case reconciliation failed");
                    report.failed += 1;
                }
            }
            report.absorb(self.sweep_case(&case_id).await?);
        }
        Ok(report)
    }

    fn claim(&self, case_id: &CaseId, kind: DocumentKind) -> Option<InFlightClaim<'_>> {
        let key = (case_id.clone(), kind);
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(InFlightClaim {
            in_flight: &self.in_flight,
            key,
        })
    }
}

struct InFlightClaim<'a> {
    in_flight: &'a Mutex<HashSet<(CaseId, DocumentKind)>>,
    key: (CaseId, DocumentKind),
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.key);
    }
}

/// Background reconciliation loop; a zero interval disables it.
pub fn spawn_sweeper<R>(pipeline: Arc<ExtractionPipeline<R>>, every: Duration) -> Option<JoinHandle<()>>
where
    R: SlotRepository + 'static,
{
    if every.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match pipeline.sweep().await {
                Ok(report) if report != SweepReport::default() => {
                    info!(
                        extracted = report.extracted,
                        reconciled = report.reconciled,
                        failed = report.failed,
                        "extraction sweep finished"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "extraction sweep aborted"),
            }
        }
    }))
}
