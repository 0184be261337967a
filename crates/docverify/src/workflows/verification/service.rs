use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::aggregate::CaseAggregator;
use super::domain::{
    Actor, CaseId, CaseRecord, CaseSnapshot, CaseStatus, DocumentKind, FileLocator,
    ReviewDecision, Role, SlotSet, SlotStatus,
};
use super::error::VerificationError;
use super::extraction::ExtractionPipeline;
use super::fields::{SlotFields, ValidationError};
use super::notifier::{CaseSubscription, ChangeNotifier};
use super::repository::{
    Notification, NotificationChannel, ObjectStorage, ProfileStore, SlotRepository,
};
use super::store::{SlotMutation, SlotStore};
use crate::config::WorkflowConfig;

const ACCEPTED_MEDIA: [&str; 3] = ["image/jpeg", "image/png", "application/pdf"];

/// External services the workflow talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn ObjectStorage>,
    pub profiles: Arc<dyn ProfileStore>,
    pub notifications: Arc<dyn NotificationChannel>,
}

/// Entry in the reviewer's work queue.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewQueueItem {
    pub case_id: CaseId,
    pub status: CaseStatus,
    pub actionable: Vec<DocumentKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Result of approving every uploaded slot of a case in one request.
#[derive(Debug, Clone, Serialize)]
pub struct BulkApproval {
    pub approved: Vec<DocumentKind>,
    pub refused: BTreeMap<DocumentKind, String>,
    pub case: CaseSnapshot,
}

/// Service composing the slot store, aggregator, extraction pipeline and notifier.
pub struct VerificationService<R> {
    repository: Arc<R>,
    aggregator: Arc<CaseAggregator<R>>,
    store: Arc<SlotStore<R>>,
    extraction: Arc<ExtractionPipeline<R>>,
    storage: Arc<dyn ObjectStorage>,
    notifications: Arc<dyn NotificationChannel>,
}

impl<R> VerificationService<R>
where
    R: SlotRepository + 'static,
{
    pub fn new(repository: Arc<R>, collaborators: Collaborators, config: &WorkflowConfig) -> Self {
        let notifier = Arc::new(ChangeNotifier::new(config.notifier_buffer));
        let aggregator = Arc::new(CaseAggregator::new(repository.clone(), notifier));
        let store = Arc::new(SlotStore::new(
            repository.clone(),
            aggregator.clone(),
            config.cas_retry_limit,
        ));
        let extraction = Arc::new(ExtractionPipeline::new(
            repository.clone(),
            store.clone(),
            collaborators.profiles,
            Duration::from_millis(config.profile_write_timeout_ms),
        ));

        Self {
            repository,
            aggregator,
            store,
            extraction,
            storage: collaborators.storage,
            notifications: collaborators.notifications,
        }
    }

    pub fn extraction(&self) -> &Arc<ExtractionPipeline<R>> {
        &self.extraction
    }

    pub fn store(&self) -> &Arc<SlotStore<R>> {
        &self.store
    }

    /// Submitter writes the structured fields of one slot.
    pub fn put_fields(
        &self,
        actor: &Actor,
        case_id: &CaseId,
        kind: DocumentKind,
        fields: SlotFields,
    ) -> Result<SlotMutation, VerificationError> {
        require_owner(actor, case_id, "edit this case")?;
        self.store.put_fields(case_id, kind, fields)
    }

    /// Submitter attaches a file that already lives in object storage.
    pub fn attach_file(
        &self,
        actor: &Actor,
        case_id: &CaseId,
        kind: DocumentKind,
        locator: FileLocator,
    ) -> Result<SlotMutation, VerificationError> {
        require_owner(actor, case_id, "edit this case")?;
        self.store.attach_file(case_id, kind, locator)
    }

    /// Store the bytes, then attach them. A refused attach removes the stored blob again,
    /// and a replaced file is deleted once the new one is committed.
    pub async fn upload_file(
        &self,
        actor: &Actor,
        case_id: &CaseId,
        kind: DocumentKind,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<SlotMutation, VerificationError> {
        require_owner(actor, case_id, "edit this case")?;
        let content_type = accepted_media(content_type)?;
        if bytes.is_empty() {
            return Err(ValidationError::EmptyFile.into());
        }
        self.store.ensure_uploadable(case_id, kind)?;

        let locator = self.storage.store(bytes, &content_type).await?;
        let mutation = match self.store.attach_file(case_id, kind, locator.clone()) {
            Ok(mutation) => mutation,
            Err(err) => {
                self.discard(&locator).await;
                return Err(err);
            }
        };

        if let Some(replaced) = mutation.previous.file_locator.as_ref() {
            if *replaced != locator {
                self.discard(replaced).await;
            }
        }

        Ok(mutation)
    }

    pub async fn approve(
        &self,
        actor: &Actor,
        case_id: &CaseId,
        kind: DocumentKind,
    ) -> Result<SlotMutation, VerificationError> {
        self.review(actor, case_id, kind, ReviewDecision::Approve)
            .await
    }

    pub async fn reject(
        &self,
        actor: &Actor,
        case_id: &CaseId,
        kind: DocumentKind,
        reason: impl Into<String>,
    ) -> Result<SlotMutation, VerificationError> {
        let decision = ReviewDecision::Reject {
            reason: reason.into(),
        };
        self.review(actor, case_id, kind, decision).await
    }

    /// Record a reviewer decision and run its side effects.
    ///
    /// Extraction and notification failures are logged; once the slot status is committed
    /// the decision stands.
    pub async fn review(
        &self,
        actor: &Actor,
        case_id: &CaseId,
        kind: DocumentKind,
        decision: ReviewDecision,
    ) -> Result<SlotMutation, VerificationError> {
        require_reviewer(actor, "review documents")?;
        let mut mutation = self.store.set_status(case_id, kind, &decision, &actor.id)?;
        info!(
            case_id = %case_id,
            kind = %kind,
            status = %mutation.slot.status,
            actor = %actor.id,
            "review decision recorded"
        );

        if mutation.slot.status == SlotStatus::Approved {
            if let Some(fields) = mutation.slot.fields.as_ref() {
                if let Err(err) = self.extraction.on_slot_approved(case_id, kind, fields).await {
                    warn!(case_id = %case_id, kind = %kind, error = %err, "extraction deferred to sweep");
                }
            }
        }

        if mutation.case.status().is_final() {
            if let Err(err) = self.extraction.sweep_case(case_id).await {
                warn!(case_id = %case_id, error = %err, "finalization sweep failed");
            }
        }

        self.notify_decision(case_id, kind, &decision);
        if mutation.case.status().is_final() {
            self.notify_outcome(case_id, mutation.case.status());
        }

        match self.aggregator.snapshot(case_id) {
            Ok(Some(current)) => {
                mutation.slot = current.slot(kind).clone();
                mutation.case = current;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(case_id = %case_id, error = %err, "decision committed, refresh failed");
            }
        }
        Ok(mutation)
    }

    /// Approve every slot currently awaiting review. Each approval is an ordinary `approve`.
    pub async fn approve_all(
        &self,
        actor: &Actor,
        case_id: &CaseId,
    ) -> Result<BulkApproval, VerificationError> {
        require_reviewer(actor, "review documents")?;
        let snapshot = self.case(case_id)?;

        let mut approved = Vec::new();
        let mut refused = BTreeMap::new();
        for kind in snapshot.actionable_kinds() {
            match self.approve(actor, case_id, kind).await {
                Ok(_) => approved.push(kind),
                Err(VerificationError::IllegalTransition(err)) => {
                    refused.insert(kind, err.to_string());
                }
                Err(other) => return Err(other),
            }
        }

        Ok(BulkApproval {
            approved,
            refused,
            case: self.case(case_id)?,
        })
    }

    pub fn case(&self, case_id: &CaseId) -> Result<CaseSnapshot, VerificationError> {
        self.aggregator
            .snapshot(case_id)?
            .ok_or_else(|| VerificationError::NotFound(format!("case {case_id}")))
    }

    /// Case snapshot as visible to `actor`. Owners see an untouched case as `not_started`.
    pub fn case_for(
        &self,
        actor: &Actor,
        case_id: &CaseId,
    ) -> Result<CaseSnapshot, VerificationError> {
        require_viewer(actor, case_id)?;
        match self.aggregator.snapshot(case_id)? {
            Some(snapshot) => Ok(snapshot),
            None if actor.owns(case_id) => Ok(CaseSnapshot {
                case: CaseRecord::new(case_id.clone()),
                slots: SlotSet::empty(),
            }),
            None => Err(VerificationError::NotFound(format!("case {case_id}"))),
        }
    }

    /// Live feed of snapshots for one case, starting with the current one.
    pub fn subscribe(
        &self,
        actor: &Actor,
        case_id: &CaseId,
    ) -> Result<CaseSubscription, VerificationError> {
        require_viewer(actor, case_id)?;
        if actor.role == Role::Reviewer && self.repository.fetch_case(case_id)?.is_none() {
            return Err(VerificationError::NotFound(format!("case {case_id}")));
        }
        Ok(self.aggregator.notifier().subscribe(case_id, actor.clone()))
    }

    /// Retrieval URL for the file currently attached to a slot.
    pub async fn file_url(
        &self,
        actor: &Actor,
        case_id: &CaseId,
        kind: DocumentKind,
    ) -> Result<String, VerificationError> {
        require_viewer(actor, case_id)?;
        let slot = self.repository.load_slot(case_id, kind)?;
        let locator = slot
            .file_locator
            .ok_or_else(|| VerificationError::NotFound(format!("file for {kind} slot")))?;
        Ok(self.storage.retrieve(&locator).await?)
    }

    /// Cases with at least one slot a reviewer can act on, oldest submission first.
    pub fn review_queue(&self, actor: &Actor) -> Result<Vec<ReviewQueueItem>, VerificationError> {
        require_reviewer(actor, "view the review queue")?;

        let mut queue = Vec::new();
        for case_id in self.repository.case_ids()? {
            let Some(snapshot) = self.aggregator.snapshot(&case_id)? else {
                continue;
            };
            let actionable = snapshot.actionable_kinds();
            if actionable.is_empty() {
                continue;
            }
            queue.push(ReviewQueueItem {
                case_id,
                status: snapshot.status(),
                actionable,
                submitted_at: snapshot.case.submitted_at,
            });
        }

        queue.sort_by(|a, b| {
            a.submitted_at
                .is_none()
                .cmp(&b.submitted_at.is_none())
                .then(a.submitted_at.cmp(&b.submitted_at))
                .then(a.case_id.cmp(&b.case_id))
        });
        Ok(queue)
    }

    async fn discard(&self, locator: &FileLocator) {
        if let Err(err) = self.storage.delete(locator).await {
            warn!(locator = %locator.0, error = %err, "failed to delete stored file");
        }
    }

    fn notify_decision(&self, case_id: &CaseId, kind: DocumentKind, decision: &ReviewDecision) {
        let mut vars = BTreeMap::new();
        vars.insert("document".to_string(), kind.label().to_string());
        let template = match decision {
            ReviewDecision::Approve => "document_approved",
            ReviewDecision::Reject { reason } => {
                vars.insert("reason".to_string(), reason.trim().to_string());
                "document_rejected"
            }
        };
        self.send(case_id, template, vars);
    }

    fn notify_outcome(&self, case_id: &CaseId, status: CaseStatus) {
        let template = match status {
            CaseStatus::Approved => "verification_approved",
            _ => "verification_rejected",
        };
        self.send(case_id, template, BTreeMap::new());
    }

    fn send(&self, case_id: &CaseId, template: &str, vars: BTreeMap<String, String>) {
        let notification = Notification {
            destination: case_id.clone(),
            template: template.to_string(),
            vars,
        };
        if let Err(err) = self.notifications.send(notification) {
            warn!(case_id = %case_id, template, error = %err, "notification dropped");
        }
    }
}

fn accepted_media(raw: &str) -> Result<String, VerificationError> {
    let parsed: mime::Mime = raw
        .parse()
        .map_err(|_| VerificationError::UnsupportedMedia(raw.to_string()))?;
    let essence = parsed.essence_str().to_ascii_lowercase();
    if ACCEPTED_MEDIA.contains(&essence.as_str()) {
        Ok(essence)
    } else {
        Err(VerificationError::UnsupportedMedia(raw.to_string()))
    }
}

fn require_owner(
    actor: &Actor,
    case_id: &CaseId,
    operation: &'static str,
) -> Result<(), VerificationError> {
    if actor.owns(case_id) {
        Ok(())
    } else {
        Err(VerificationError::Forbidden {
            actor: actor.id.clone(),
            operation,
        })
    }
}

fn require_reviewer(actor: &Actor, operation: &'static str) -> Result<(), VerificationError> {
    if actor.role == Role::Reviewer {
        Ok(())
    } else {
        Err(VerificationError::Forbidden {
            actor: actor.id.clone(),
            operation,
        })
    }
}

fn require_viewer(actor: &Actor, case_id: &CaseId) -> Result<(), VerificationError> {
    match actor.role {
        Role::Reviewer => Ok(()),
        Role::Submitter => require_owner(actor, case_id, "view this case"),
    }
}
