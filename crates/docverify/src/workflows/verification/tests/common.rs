use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::config::WorkflowConfig;
use crate::workflows::verification::domain::{
    Actor, CaseId, CaseRecord, DocumentKind, DocumentSlot, FileLocator, SlotSet,
};
use crate::workflows::verification::fields::{
    AccountType, BankProofFields, NationalIdFields, SlotFields, TaxIdFields,
};
use crate::workflows::verification::memory::InMemorySlotRepository;
use crate::workflows::verification::repository::{
    Notification, NotificationChannel, NotificationError, ObjectStorage, ProfileStore,
    ProfileWriteError, RepositoryError, SlotRepository, StorageError,
};
use crate::workflows::verification::service::{Collaborators, VerificationService};

pub(super) const PDF: &str = "application/pdf";

pub(super) fn case_id(raw: &str) -> CaseId {
    CaseId(raw.to_string())
}

pub(super) fn reviewer() -> Actor {
    Actor::reviewer("reviewer-1")
}

pub(super) fn tax_id_fields() -> SlotFields {
    SlotFields::TaxId(TaxIdFields {
        pan_number: "ABCDE1234F".to_string(),
        name_on_card: "Asha Rao".to_string(),
        date_of_birth: NaiveDate::from_ymd_opt(1991, 7, 14).expect("valid date"),
    })
}

pub(super) fn national_id_fields() -> SlotFields {
    SlotFields::NationalId(NationalIdFields {
        id_number: "234567890123".to_string(),
        name_on_card: "Asha Rao".to_string(),
        address: "14 Lake View Road, Pune".to_string(),
    })
}

pub(super) fn bank_proof_fields() -> SlotFields {
    SlotFields::BankProof(BankProofFields {
        account_holder_name: "Asha Rao".to_string(),
        account_number: "50100234567".to_string(),
        confirm_account_number: "50100234567".to_string(),
        bank_name: "HDFC Bank".to_string(),
        ifsc_code: "HDFC0001234".to_string(),
        branch_name: "Baner".to_string(),
        account_type: AccountType::Savings,
    })
}

pub(super) fn fields_for(kind: DocumentKind) -> SlotFields {
    match kind {
        DocumentKind::TaxId => tax_id_fields(),
        DocumentKind::NationalId => national_id_fields(),
        DocumentKind::BankProof => bank_proof_fields(),
    }
}

pub(super) fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.7 scanned document".to_vec()
}

pub(super) fn test_config() -> WorkflowConfig {
    WorkflowConfig {
        cas_retry_limit: 4,
        profile_write_timeout_ms: 100,
        sweep_interval_secs: 0,
        max_upload_bytes: 64 * 1024,
        notifier_buffer: 16,
    }
}

pub(super) struct Harness<R = InMemorySlotRepository> {
    pub(super) service: Arc<VerificationService<R>>,
    pub(super) repository: Arc<R>,
    pub(super) storage: Arc<MemoryStorage>,
    pub(super) profiles: Arc<MemoryProfiles>,
    pub(super) channel: Arc<MemoryChannel>,
}

pub(super) fn build_service() -> Harness {
    build_service_with(Arc::new(InMemorySlotRepository::default()), MemoryProfiles::default())
}

pub(super) fn build_service_with<R>(repository: Arc<R>, profiles: MemoryProfiles) -> Harness<R>
where
    R: SlotRepository + 'static,
{
    let storage = Arc::new(MemoryStorage::default());
    let profiles = Arc::new(profiles);
    let channel = Arc::new(MemoryChannel::default());
    let collaborators = Collaborators {
        storage: storage.clone(),
        profiles: profiles.clone(),
        notifications: channel.clone(),
    };
    let service = Arc::new(VerificationService::new(
        repository.clone(),
        collaborators,
        &test_config(),
    ));

    Harness {
        service,
        repository,
        storage,
        profiles,
        channel,
    }
}

impl<R> Harness<R>
where
    R: SlotRepository + 'static,
{
    /// Fill one slot with valid fields and a PDF so it lands in `uploaded`.
    pub(super) async fn upload(&self, case: &CaseId, kind: DocumentKind) {
        let owner = Actor::submitter(case);
        self.service
            .put_fields(&owner, case, kind, fields_for(kind))
            .expect("fields accepted");
        self.service
            .upload_file(&owner, case, kind, pdf_bytes(), PDF)
            .await
            .expect("file accepted");
    }

    pub(super) async fn upload_all(&self, case: &CaseId) {
        for kind in DocumentKind::ALL {
            self.upload(case, kind).await;
        }
    }

    pub(super) fn slot(&self, case: &CaseId, kind: DocumentKind) -> DocumentSlot {
        self.repository.load_slot(case, kind).expect("slot loads")
    }
}

/// Object storage keeping blobs in memory and recording deletions.
#[derive(Default)]
pub(super) struct MemoryStorage {
    next: AtomicUsize,
    blobs: Mutex<HashMap<FileLocator, (Vec<u8>, String)>>,
    deleted: Mutex<Vec<FileLocator>>,
}

impl MemoryStorage {
    pub(super) fn live(&self) -> Vec<FileLocator> {
        let mut live: Vec<FileLocator> = self
            .blobs
            .lock()
            .expect("storage mutex poisoned")
            .keys()
            .cloned()
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live
    }

    pub(super) fn deleted(&self) -> Vec<FileLocator> {
        self.deleted.lock().expect("storage mutex poisoned").clone()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn store(&self, bytes: Vec<u8>, content_type: &str) -> Result<FileLocator, StorageError> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let locator = FileLocator(format!("blob-{id}"));
        self.blobs
            .lock()
            .expect("storage mutex poisoned")
            .insert(locator.clone(), (bytes, content_type.to_string()));
        Ok(locator)
    }

    async fn retrieve(&self, locator: &FileLocator) -> Result<String, StorageError> {
        let blobs = self.blobs.lock().expect("storage mutex poisoned");
        if blobs.contains_key(locator) {
            Ok(format!("memory://{}", locator.0))
        } else {
            Err(StorageError::NotFound)
        }
    }

    async fn delete(&self, locator: &FileLocator) -> Result<(), StorageError> {
        self.blobs
            .lock()
            .expect("storage mutex poisoned")
            .remove(locator);
        self.deleted
            .lock()
            .expect("storage mutex poisoned")
            .push(locator.clone());
        Ok(())
    }
}

/// Profile store that can be switched into failing or slow mode.
#[derive(Default)]
pub(super) struct MemoryProfiles {
    profiles: Mutex<HashMap<CaseId, BTreeMap<String, Value>>>,
    writes: AtomicUsize,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl MemoryProfiles {
    pub(super) fn failing() -> Self {
        let profiles = Self::default();
        profiles.set_failing(true);
        profiles
    }

    pub(super) fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(super) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(super) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(super) fn profile(&self, case: &CaseId) -> BTreeMap<String, Value> {
        self.profiles
            .lock()
            .expect("profile mutex poisoned")
            .get(case)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfiles {
    async fn patch(
        &self,
        user_id: &CaseId,
        fields: BTreeMap<String, Value>,
    ) -> Result<(), ProfileWriteError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProfileWriteError::Unavailable("profile db offline".to_string()));
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.profiles
            .lock()
            .expect("profile mutex poisoned")
            .entry(user_id.clone())
            .or_default()
            .extend(fields);
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct MemoryChannel {
    sent: Mutex<Vec<Notification>>,
    offline: AtomicBool,
}

impl MemoryChannel {
    pub(super) fn templates(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("channel mutex poisoned")
            .iter()
            .map(|notification| notification.template.clone())
            .collect()
    }

    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("channel mutex poisoned").clone()
    }

    pub(super) fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }
}

impl NotificationChannel for MemoryChannel {
    fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("smtp relay down".to_string()));
        }
        self.sent
            .lock()
            .expect("channel mutex poisoned")
            .push(notification);
        Ok(())
    }
}

/// Repository whose slot writes always lose the compare-and-set race.
#[derive(Default)]
pub(super) struct ConflictingRepository {
    inner: InMemorySlotRepository,
    attempts: AtomicUsize,
}

impl ConflictingRepository {
    pub(super) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl SlotRepository for ConflictingRepository {
    fn load_slot(
        &self,
        case_id: &CaseId,
        kind: DocumentKind,
    ) -> Result<DocumentSlot, RepositoryError> {
        self.inner.load_slot(case_id, kind)
    }

    fn load_slots(&self, case_id: &CaseId) -> Result<SlotSet, RepositoryError> {
        self.inner.load_slots(case_id)
    }

    fn compare_and_set(
        &self,
        _case_id: &CaseId,
        _expected_revision: u64,
        _slot: DocumentSlot,
    ) -> Result<DocumentSlot, RepositoryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(RepositoryError::Conflict)
    }

    fn fetch_case(&self, case_id: &CaseId) -> Result<Option<CaseRecord>, RepositoryError> {
        self.inner.fetch_case(case_id)
    }

    fn save_case(&self, record: CaseRecord) -> Result<(), RepositoryError> {
        self.inner.save_case(record)
    }

    fn case_ids(&self) -> Result<Vec<CaseId>, RepositoryError> {
        self.inner.case_ids()
    }
}

/// Repository whose next `n` case-record saves fail; slot writes always go through.
#[derive(Default)]
pub(super) struct FlakyCaseRepository {
    inner: InMemorySlotRepository,
    failing_saves: AtomicUsize,
}

impl FlakyCaseRepository {
    pub(super) fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    pub(super) fn stored_case(&self, case_id: &CaseId) -> Option<CaseRecord> {
        self.inner.fetch_case(case_id).expect("case loads")
    }
}

impl SlotRepository for FlakyCaseRepository {
    fn load_slot(
        &self,
        case_id: &CaseId,
        kind: DocumentKind,
    ) -> Result<DocumentSlot, RepositoryError> {
        self.inner.load_slot(case_id, kind)
    }

    fn load_slots(&self, case_id: &CaseId) -> Result<SlotSet, RepositoryError> {
        self.inner.load_slots(case_id)
    }

    fn compare_and_set(
        &self,
        case_id: &CaseId,
        expected_revision: u64,
        slot: DocumentSlot,
    ) -> Result<DocumentSlot, RepositoryError> {
        self.inner.compare_and_set(case_id, expected_revision, slot)
    }

    fn fetch_case(&self, case_id: &CaseId) -> Result<Option<CaseRecord>, RepositoryError> {
        self.inner.fetch_case(case_id)
    }

    fn save_case(&self, record: CaseRecord) -> Result<(), RepositoryError> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RepositoryError::Unavailable("case table locked".to_string()));
        }
        self.inner.save_case(record)
    }

    fn case_ids(&self) -> Result<Vec<CaseId>, RepositoryError> {
        self.inner.case_ids()
    }
}

/// Repository that is down for every call.
pub(super) struct UnavailableRepository;

impl SlotRepository for UnavailableRepository {
    fn load_slot(
        &self,
        _case_id: &CaseId,
        _kind: DocumentKind,
    ) -> Result<DocumentSlot, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn load_slots(&self, _case_id: &CaseId) -> Result<SlotSet, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn compare_and_set(
        &self,
        _case_id: &CaseId,
        _expected_revision: u64,
        _slot: DocumentSlot,
    ) -> Result<DocumentSlot, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch_case(&self, _case_id: &CaseId) -> Result<Option<CaseRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn save_case(&self, _record: CaseRecord) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn case_ids(&self) -> Result<Vec<CaseId>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
