use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{CaseId, CaseRecord, DocumentKind, DocumentSlot, FileLocator, SlotSet};

/// Storage abstraction for slots and case records.
///
/// Slot writes are compare-and-set on `(case_id, kind)`: `expected_revision` must equal the
/// stored revision (zero for a slot never written) or the write fails with `Conflict`.
pub trait SlotRepository: Send + Sync {
    fn load_slot(&self, case_id: &CaseId, kind: DocumentKind)
        -> Result<DocumentSlot, RepositoryError>;
    fn load_slots(&self, case_id: &CaseId) -> Result<SlotSet, RepositoryError>;
    fn compare_and_set(
        &self,
        case_id: &CaseId,
        expected_revision: u64,
        slot: DocumentSlot,
    ) -> Result<DocumentSlot, RepositoryError>;
    fn fetch_case(&self, case_id: &CaseId) -> Result<Option<CaseRecord>, RepositoryError>;
    fn save_case(&self, record: CaseRecord) -> Result<(), RepositoryError>;
    /// Every case with a stored record or at least one written slot.
    fn case_ids(&self) -> Result<Vec<CaseId>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("slot was modified concurrently")]
    Conflict,
    #[error("slot kept changing underneath {attempts} attempts")]
    Contention { attempts: u32 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Blob storage for uploaded documents.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn store(&self, bytes: Vec<u8>, content_type: &str) -> Result<FileLocator, StorageError>;
    async fn retrieve(&self, locator: &FileLocator) -> Result<String, StorageError>;
    async fn delete(&self, locator: &FileLocator) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found")]
    NotFound,
    #[error("object storage unavailable: {0}")]
    Unavailable(String),
}

/// User profile records; only partial patches are ever written.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn patch(
        &self,
        user_id: &CaseId,
        fields: BTreeMap<String, Value>,
    ) -> Result<(), ProfileWriteError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileWriteError {
    #[error("profile write timed out after {0} ms")]
    Timeout(u64),
    #[error("profile store unavailable: {0}")]
    Unavailable(String),
}

/// Outbound best-effort messages (e-mail, push, SMS adapters).
pub trait NotificationChannel: Send + Sync {
    fn send(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Templated message for the notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub destination: CaseId,
    pub template: String,
    pub vars: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
