use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fields::SlotFields;

/// Identifier of a verification case. Equal to the owning user's identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub String);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of whoever performed a review decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference handed out by object storage for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileLocator(pub String);

/// The three document kinds every case carries. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    TaxId,
    NationalId,
    BankProof,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [
        DocumentKind::TaxId,
        DocumentKind::NationalId,
        DocumentKind::BankProof,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            DocumentKind::TaxId => "tax_id",
            DocumentKind::NationalId => "national_id",
            DocumentKind::BankProof => "bank_proof",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "tax_id" => Some(DocumentKind::TaxId),
            "national_id" => Some(DocumentKind::NationalId),
            "bank_proof" => Some(DocumentKind::BankProof),
            _ => None,
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            DocumentKind::TaxId => 0,
            DocumentKind::NationalId => 1,
            DocumentKind::BankProof => 2,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-slot review status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Empty,
    Uploaded,
    Approved,
    Rejected,
}

impl SlotStatus {
    pub const ALL: [SlotStatus; 4] = [
        SlotStatus::Empty,
        SlotStatus::Uploaded,
        SlotStatus::Approved,
        SlotStatus::Rejected,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            SlotStatus::Empty => "empty",
            SlotStatus::Uploaded => "uploaded",
            SlotStatus::Approved => "approved",
            SlotStatus::Rejected => "rejected",
        }
    }

    /// Approved and rejected slots need a re-upload before a reviewer can act again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, SlotStatus::Approved | SlotStatus::Rejected)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Case level status derived from the three slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    NotStarted,
    InProgress,
    ReadyForReview,
    Approved,
    Rejected,
}

impl CaseStatus {
    pub const fn label(self) -> &'static str {
        match self {
            CaseStatus::NotStarted => "not_started",
            CaseStatus::InProgress => "in_progress",
            CaseStatus::ReadyForReview => "ready_for_review",
            CaseStatus::Approved => "approved",
            CaseStatus::Rejected => "rejected",
        }
    }

    pub const fn is_final(self) -> bool {
        matches!(self, CaseStatus::Approved | CaseStatus::Rejected)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One document kind's fields, file and review state within a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSlot {
    pub kind: DocumentKind,
    pub status: SlotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<SlotFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_locator: Option<FileLocator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
    /// Compare-and-set counter; zero means the slot has never been written.
    pub revision: u64,
}

impl DocumentSlot {
    pub fn empty(kind: DocumentKind) -> Self {
        Self {
            kind,
            status: SlotStatus::Empty,
            fields: None,
            file_locator: None,
            rejection_reason: None,
            reviewed_at: None,
            reviewed_by: None,
            extracted_at: None,
            revision: 0,
        }
    }

    pub fn has_content(&self) -> bool {
        self.fields.is_some() && self.file_locator.is_some()
    }

    /// Approved slots whose projection has not reached the profile yet.
    pub fn awaiting_extraction(&self) -> bool {
        self.status == SlotStatus::Approved && self.extracted_at.is_none()
    }
}

/// The three slots of a case, always in `DocumentKind::ALL` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotSet(pub [DocumentSlot; 3]);

impl SlotSet {
    pub fn empty() -> Self {
        Self([
            DocumentSlot::empty(DocumentKind::TaxId),
            DocumentSlot::empty(DocumentKind::NationalId),
            DocumentSlot::empty(DocumentKind::BankProof),
        ])
    }

    pub fn get(&self, kind: DocumentKind) -> &DocumentSlot {
        &self.0[kind.index()]
    }

    pub fn statuses(&self) -> [SlotStatus; 3] {
        [self.0[0].status, self.0[1].status, self.0[2].status]
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentSlot> {
        self.0.iter()
    }
}

/// Persisted case record, written only by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: CaseId,
    pub overall_status: CaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    pub revision: u64,
}

impl CaseRecord {
    pub fn new(case_id: CaseId) -> Self {
        Self {
            case_id,
            overall_status: CaseStatus::NotStarted,
            submitted_at: None,
            finalized_at: None,
            revision: 0,
        }
    }
}

/// Case plus all three slots as delivered to viewers and API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub case: CaseRecord,
    pub slots: SlotSet,
}

impl CaseSnapshot {
    pub fn case_id(&self) -> &CaseId {
        &self.case.case_id
    }

    pub fn status(&self) -> CaseStatus {
        self.case.overall_status
    }

    pub fn slot(&self, kind: DocumentKind) -> &DocumentSlot {
        self.slots.get(kind)
    }

    /// Slots a reviewer can act on right now.
    pub fn actionable_kinds(&self) -> Vec<DocumentKind> {
        self.slots
            .iter()
            .filter(|slot| slot.status == SlotStatus::Uploaded)
            .map(|slot| slot.kind)
            .collect()
    }
}

/// Event emitted by the slot store after every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotChanged {
    pub case_id: CaseId,
    pub kind: DocumentKind,
    pub status: SlotStatus,
}

/// Reviewer decision on a single slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject { reason: String },
}

/// The two roles permitted to act on a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Submitter,
    Reviewer,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "submitter" => Some(Role::Submitter),
            "reviewer" => Some(Role::Reviewer),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Role::Submitter => "submitter",
            Role::Reviewer => "reviewer",
        }
    }
}

/// Caller identity passed in by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn submitter(case_id: &CaseId) -> Self {
        Self {
            id: ActorId(case_id.0.clone()),
            role: Role::Submitter,
        }
    }

    pub fn reviewer(id: impl Into<String>) -> Self {
        Self {
            id: ActorId(id.into()),
            role: Role::Reviewer,
        }
    }

    /// Submitters own exactly one case: the one keyed by their own identifier.
    pub fn owns(&self, case_id: &CaseId) -> bool {
        self.role == Role::Submitter && self.id.0 == case_id.0
    }
}
