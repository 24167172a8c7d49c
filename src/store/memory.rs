//! In-memory `RecordStore`.
//!
//! Behaves like the SQLite backend (ordering, atomic patches, cascade on
//! delete) and records every write so tests can assert on store traffic.
//! Failures and latency can be injected per instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{build_contact, ContactPatch, NewContact, RecordStore, StageChange, StoreError};
use crate::types::{Contact, Phase};
use crate::util::now_rfc3339;

#[derive(Default)]
struct Tables {
    contacts: Vec<Contact>,
    history: Vec<StageChange>,
    patch_log: Vec<(String, ContactPatch)>,
}

impl Tables {
    /// All fields land or none do.
    fn apply_patch(&mut self, id: &str, patch: &ContactPatch) -> Result<(), StoreError> {
        let slot = self
            .contacts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut updated = slot.clone();
        for (field, value) in &patch.fields {
            updated
                .set(*field, value)
                .map_err(|e| StoreError::Unavailable(format!("rejected patch: {}", e)))?;
        }
        updated.updated_at = now_rfc3339();
        *slot = updated;

        self.patch_log.push((id.to_string(), patch.clone()));
        Ok(())
    }
}

pub struct MemoryRecordStore {
    tables: Mutex<Tables>,
    lead_stage: String,
    fail_writes: AtomicBool,
    fail_queries: AtomicBool,
    patch_delay: Mutex<Option<Duration>>,
}

impl MemoryRecordStore {
    pub fn new(lead_stage: impl Into<String>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            lead_stage: lead_stage.into(),
            fail_writes: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            patch_delay: Mutex::new(None),
        }
    }

    pub fn with_contacts(lead_stage: impl Into<String>, contacts: Vec<Contact>) -> Self {
        let store = Self::new(lead_stage);
        for contact in contacts {
            store.seed(contact);
        }
        store
    }

    /// Insert or replace a record without logging a write.
    pub fn seed(&self, contact: Contact) {
        let mut tables = self.tables.lock();
        match tables.contacts.iter_mut().find(|c| c.id == contact.id) {
            Some(existing) => *existing = contact,
            None => tables.contacts.push(contact),
        }
    }

    /// Make every subsequent write fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Hold each patch for `delay` before applying it.
    pub fn set_patch_delay(&self, delay: Option<Duration>) {
        *self.patch_delay.lock() = delay;
    }

    /// Every patch the store accepted, in arrival order.
    pub fn patch_log(&self) -> Vec<(String, ContactPatch)> {
        self.tables.lock().patch_log.clone()
    }

    pub fn write_count(&self) -> usize {
        self.tables.lock().patch_log.len()
    }

    /// Current stored copy of a record.
    pub fn snapshot(&self, id: &str) -> Option<Contact> {
        self.tables.lock().contacts.iter().find(|c| c.id == id).cloned()
    }

    async fn hold_patch(&self) {
        let delay = *self.patch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes are failing".to_string()));
        }
        Ok(())
    }

    fn check_queries(&self) -> Result<(), StoreError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("queries are failing".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn query(&self, category_id: &str, phase: Phase) -> Result<Vec<Contact>, StoreError> {
        self.check_queries()?;
        let tables = self.tables.lock();
        let mut rows: Vec<Contact> = tables
            .contacts
            .iter()
            .filter(|c| c.category_id == category_id && c.current_phase == phase)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn get(&self, id: &str) -> Result<Option<Contact>, StoreError> {
        self.check_queries()?;
        Ok(self.snapshot(id))
    }

    async fn patch(&self, id: &str, patch: &ContactPatch) -> Result<(), StoreError> {
        self.hold_patch().await;
        self.check_writes()?;
        self.tables.lock().apply_patch(id, patch)
    }

    async fn insert(&self, category_id: &str, new: &NewContact) -> Result<Contact, StoreError> {
        self.check_writes()?;
        let contact = build_contact(category_id, &self.lead_stage, new);
        self.tables.lock().contacts.push(contact.clone());
        Ok(contact)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.check_writes()?;
        let mut tables = self.tables.lock();
        let before = tables.contacts.len();
        tables.contacts.retain(|c| c.id != id);
        if tables.contacts.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tables.history.retain(|h| h.contact_id != id);
        Ok(())
    }

    async fn patch_with_history(
        &self,
        id: &str,
        patch: &ContactPatch,
        change: &StageChange,
    ) -> Result<(), StoreError> {
        self.hold_patch().await;
        self.check_writes()?;
        let mut tables = self.tables.lock();
        tables.apply_patch(id, patch)?;
        tables.history.push(change.clone());
        Ok(())
    }

    async fn stage_history(&self, id: &str) -> Result<Vec<StageChange>, StoreError> {
        self.check_queries()?;
        Ok(self
            .tables
            .lock()
            .history
            .iter()
            .filter(|h| h.contact_id == id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::contact_at;
    use crate::types::{ContactField, FieldValue};

    fn single_lead() -> MemoryRecordStore {
        MemoryRecordStore::with_contacts("Lead", vec![contact_at("c1", Phase::Lead, "Lead")])
    }

    #[tokio::test]
    async fn test_patch_is_all_or_nothing() {
        let store = single_lead();
        let bad = ContactPatch::new(vec![
            (ContactField::SalesStage, FieldValue::text("Approached")),
            (ContactField::ContactCount, FieldValue::text("many")),
        ]);
        assert!(store.patch("c1", &bad).await.is_err());
        assert_eq!(store.snapshot("c1").unwrap().sales_stage, "Lead");
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = single_lead();
        store.set_fail_writes(true);
        let patch = ContactPatch::single(ContactField::Notes, FieldValue::text("x"));
        assert!(matches!(
            store.patch("c1", &patch).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_fail_writes(false);
        store.patch("c1", &patch).await.unwrap();
        assert_eq!(store.patch_log().len(), 1);

        store.set_fail_queries(true);
        assert!(store.query("cat", Phase::Lead).await.is_err());
    }

    #[tokio::test]
    async fn test_stage_change_records_history_with_patch() {
        let store = single_lead();
        let change = StageChange {
            contact_id: "c1".to_string(),
            from_phase: Phase::Lead,
            from_stage: "Lead".to_string(),
            to_phase: Phase::Lead,
            to_stage: "Approached".to_string(),
            note: None,
            changed_at: now_rfc3339(),
        };
        let patch = ContactPatch::single(ContactField::SalesStage, FieldValue::text("Approached"));

        store.set_fail_writes(true);
        assert!(store.patch_with_history("c1", &patch, &change).await.is_err());
        assert!(store.stage_history("c1").await.unwrap().is_empty());

        store.set_fail_writes(false);
        store.patch_with_history("c1", &patch, &change).await.unwrap();
        assert_eq!(store.snapshot("c1").unwrap().sales_stage, "Approached");
        assert_eq!(store.stage_history("c1").await.unwrap(), vec![change]);
    }

    #[tokio::test]
    async fn test_query_filters_phase_and_category() {
        let mut other = contact_at("c3", Phase::Lead, "Lead");
        other.category_id = "other".to_string();
        let store = MemoryRecordStore::with_contacts(
            "Lead",
            vec![
                contact_at("c1", Phase::Lead, "Lead"),
                contact_at("c2", Phase::Presentation, "Request Demo"),
                other,
            ],
        );
        let rows = store.query("cat", Phase::Lead).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "c1");
    }
}
