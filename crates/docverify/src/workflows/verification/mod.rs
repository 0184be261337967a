//! Identity document verification: three document slots per case, reviewed one by one,
//! folded into a single case decision, with approved data projected into the profile.

pub mod aggregate;
pub mod domain;
pub mod error;
pub mod extraction;
pub mod fields;
pub mod machine;
pub mod memory;
pub mod notifier;
pub mod repository;
pub mod router;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use aggregate::{derive_case_status, CaseAggregator};
pub use domain::{
    Actor, ActorId, CaseId, CaseRecord, CaseSnapshot, CaseStatus, DocumentKind, DocumentSlot,
    FileLocator, ReviewDecision, Role, SlotChanged, SlotSet, SlotStatus,
};
pub use error::VerificationError;
pub use extraction::{
    spawn_sweeper, ExtractionError, ExtractionOutcome, ExtractionPipeline, SweepReport,
};
pub use fields::{
    AccountType, BankProofFields, NationalIdFields, SlotFields, TaxIdFields, ValidationError,
};
pub use machine::{IllegalTransition, SlotAction, TransitionRule};
pub use memory::InMemorySlotRepository;
pub use notifier::{CaseSubscription, ChangeNotifier};
pub use repository::{
    Notification, NotificationChannel, NotificationError, ObjectStorage, ProfileStore,
    ProfileWriteError, RepositoryError, SlotRepository, StorageError,
};
pub use router::{verification_router, ApiError, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
pub use service::{BulkApproval, Collaborators, ReviewQueueItem, VerificationService};
pub use store::{SlotMutation, SlotStore};
