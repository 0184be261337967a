use async_trait::async_trait;
use docverify::workflows::verification::{
    CaseId, Collaborators, FileLocator, Notification, NotificationChannel, NotificationError,
    ObjectStorage, ProfileStore, ProfileWriteError, StorageError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Object storage held in process memory; locators look like `kyc/<n>`.
#[derive(Default)]
pub(crate) struct InMemoryObjectStorage {
    next_id: AtomicU64,
    objects: Mutex<HashMap<FileLocator, StoredObject>>,
}

impl InMemoryObjectStorage {
    pub(crate) fn object_count(&self) -> usize {
        self.objects.lock().map_or(0, |objects| objects.len())
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn store(&self, bytes: Vec<u8>, content_type: &str) -> Result<FileLocator, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let locator = FileLocator(format!("kyc/{id}"));
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Unavailable("object store mutex poisoned".to_string()))?;
        objects.insert(
            locator.clone(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(locator)
    }

    async fn retrieve(&self, locator: &FileLocator) -> Result<String, StorageError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Unavailable("object store mutex poisoned".to_string()))?;
        let object = objects.get(locator).ok_or(StorageError::NotFound)?;
        Ok(format!(
            "memory://{}?type={}&size={}",
            locator.0,
            object.content_type,
            object.bytes.len()
        ))
    }

    async fn delete(&self, locator: &FileLocator) -> Result<(), StorageError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Unavailable("object store mutex poisoned".to_string()))?;
        objects.remove(locator);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryProfileStore {
    profiles: Mutex<HashMap<CaseId, BTreeMap<String, Value>>>,
}

impl InMemoryProfileStore {
    pub(crate) fn profile(&self, user_id: &CaseId) -> BTreeMap<String, Value> {
        self.profiles
            .lock()
            .ok()
            .and_then(|profiles| profiles.get(user_id).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn patch(
        &self,
        user_id: &CaseId,
        fields: BTreeMap<String, Value>,
    ) -> Result<(), ProfileWriteError> {
        let mut profiles = self
            .profiles
            .lock()
            .map_err(|_| ProfileWriteError::Unavailable("profile mutex poisoned".to_string()))?;
        profiles.entry(user_id.clone()).or_default().extend(fields);
        Ok(())
    }
}

/// Notification channel that logs each message and keeps it for inspection.
#[derive(Default)]
pub(crate) struct LoggingNotificationChannel {
    sent: Mutex<Vec<Notification>>,
}

impl LoggingNotificationChannel {
    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl NotificationChannel for LoggingNotificationChannel {
    fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            destination = %notification.destination,
            template = %notification.template,
            "notification queued"
        );
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotificationError::Transport("outbox mutex poisoned".to_string()))?;
        sent.push(notification);
        Ok(())
    }
}

/// In-memory adapters plus the collaborator bundle wired from them.
pub(crate) struct InMemoryAdapters {
    pub(crate) storage: Arc<InMemoryObjectStorage>,
    pub(crate) profiles: Arc<InMemoryProfileStore>,
    pub(crate) notifications: Arc<LoggingNotificationChannel>,
}

impl InMemoryAdapters {
    pub(crate) fn new() -> Self {
        Self {
            storage: Arc::new(InMemoryObjectStorage::default()),
            profiles: Arc::new(InMemoryProfileStore::default()),
            notifications: Arc::new(LoggingNotificationChannel::default()),
        }
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        Collaborators {
            storage: self.storage.clone(),
            profiles: self.profiles.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_round_trips_locators() {
        let storage = InMemoryObjectStorage::default();
        let locator = storage
            .store(b"%PDF".to_vec(), "application/pdf")
            .await
            .expect("stored");
        assert_eq!(locator, FileLocator("kyc/0".to_string()));

        let url = storage.retrieve(&locator).await.expect("url");
        assert_eq!(url, "memory://kyc/0?type=application/pdf&size=4");

        storage.delete(&locator).await.expect("deleted");
        assert_eq!(storage.object_count(), 0);
        assert!(matches!(
            storage.retrieve(&locator).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn profile_patches_merge() {
        let profiles = InMemoryProfileStore::default();
        let user = CaseId("user-1".to_string());
        let mut first = BTreeMap::new();
        first.insert("panNumber".to_string(), Value::from("ABCDE1234F"));
        let mut second = BTreeMap::new();
        second.insert("bankName".to_string(), Value::from("HDFC Bank"));

        profiles.patch(&user, first).await.expect("patch");
        profiles.patch(&user, second).await.expect("patch");

        let stored = profiles.profile(&user);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored["bankName"], Value::from("HDFC Bank"));
    }
}
