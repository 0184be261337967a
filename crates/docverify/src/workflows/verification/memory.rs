use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::{CaseId, CaseRecord, DocumentKind, DocumentSlot, SlotSet};
use super::repository::{RepositoryError, SlotRepository};

#[derive(Default)]
struct Tables {
    slots: HashMap<(CaseId, DocumentKind), DocumentSlot>,
    cases: BTreeMap<CaseId, CaseRecord>,
}

/// Process-local repository used by the API server, the demo and tests.
#[derive(Default, Clone)]
pub struct InMemorySlotRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemorySlotRepository {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository mutex poisoned".to_string()))
    }
}

impl SlotRepository for InMemorySlotRepository {
    fn load_slot(
        &self,
        case_id: &CaseId,
        kind: DocumentKind,
    ) -> Result<DocumentSlot, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .slots
            .get(&(case_id.clone(), kind))
            .cloned()
            .unwrap_or_else(|| DocumentSlot::empty(kind)))
    }

    fn load_slots(&self, case_id: &CaseId) -> Result<SlotSet, RepositoryError> {
        let tables = self.tables()?;
        let load = |kind| {
            tables
                .slots
                .get(&(case_id.clone(), kind))
                .cloned()
                .unwrap_or_else(|| DocumentSlot::empty(kind))
        };
        Ok(SlotSet([
            load(DocumentKind::TaxId),
            load(DocumentKind::NationalId),
            load(DocumentKind::BankProof),
        ]))
    }

    fn compare_and_set(
        &self,
        case_id: &CaseId,
        expected_revision: u64,
        mut slot: DocumentSlot,
    ) -> Result<DocumentSlot, RepositoryError> {
        let mut tables = self.tables()?;
        let key = (case_id.clone(), slot.kind);
        let current = tables.slots.get(&key).map_or(0, |stored| stored.revision);
        if current != expected_revision {
            return Err(RepositoryError::Conflict);
        }

        slot.revision = expected_revision + 1;
        tables.slots.insert(key, slot.clone());
        Ok(slot)
    }

    fn fetch_case(&self, case_id: &CaseId) -> Result<Option<CaseRecord>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables.cases.get(case_id).cloned())
    }

    fn save_case(&self, record: CaseRecord) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        tables.cases.insert(record.case_id.clone(), record);
        Ok(())
    }

    fn case_ids(&self) -> Result<Vec<CaseId>, RepositoryError> {
        let tables = self.tables()?;
        let mut ids: BTreeSet<CaseId> = tables.cases.keys().cloned().collect();
        ids.extend(tables.slots.keys().map(|(case_id, _)| case_id.clone()));
        Ok(ids.into_iter().collect())
    }
}
