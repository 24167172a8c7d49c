//! SQLite backend for `RecordStore`.
//!
//! `ContactDb` is synchronous; every call runs on the blocking pool with the
//! connection behind a mutex so the async side never stalls on disk I/O.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{build_contact, ContactPatch, NewContact, RecordStore, StageChange, StoreError};
use crate::db::{ContactDb, DbError};
use crate::stages::StageVocabulary;
use crate::types::{Config, Contact, Phase};

#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<Mutex<ContactDb>>,
    lead_stage: String,
}

impl SqliteRecordStore {
    /// Wrap an open database. New contacts start at `lead_stage`.
    pub fn new(db: ContactDb, lead_stage: impl Into<String>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            lead_stage: lead_stage.into(),
        }
    }

    /// Open the configured database for a vocabulary.
    pub fn open(config: &Config, vocab: &StageVocabulary) -> Result<Self, StoreError> {
        let db = ContactDb::open(config)?;
        log::info!(
            "Store: opened contact database (preset '{}')",
            vocab.preset_id()
        );
        Ok(Self::new(db, vocab.initial_stage(Phase::Lead)))
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&ContactDb) -> Result<T, DbError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock();
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(format!("{} task failed: {}", op, e)))?
        .map_err(StoreError::from)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn query(&self, category_id: &str, phase: Phase) -> Result<Vec<Contact>, StoreError> {
        let category_id = category_id.to_string();
        self.run("query", move |db| db.get_contacts_for_phase(&category_id, phase))
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<Contact>, StoreError> {
        let id = id.to_string();
        self.run("get", move |db| db.get_contact(&id)).await
    }

    async fn patch(&self, id: &str, patch: &ContactPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        let id = id.to_string();
        let fields = patch.fields.clone();
        self.run("patch", move |db| db.patch_contact(&id, &fields).map(|_| ()))
            .await
    }

    async fn insert(&self, category_id: &str, new: &NewContact) -> Result<Contact, StoreError> {
        let contact = build_contact(category_id, &self.lead_stage, new);
        self.run("insert", move |db| {
            db.insert_contact(&contact)?;
            Ok(contact)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.run("delete", move |db| db.delete_contact(&id)).await
    }

    async fn patch_with_history(
        &self,
        id: &str,
        patch: &ContactPatch,
        change: &StageChange,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let fields = patch.fields.clone();
        let change = change.clone();
        self.run("stage change", move |db| {
            db.patch_contact_with_history(&id, &fields, &change)
                .map(|_| ())
        })
        .await
    }

    async fn stage_history(&self, id: &str) -> Result<Vec<StageChange>, StoreError> {
        let id = id.to_string();
        self.run("history", move |db| db.get_stage_history(&id)).await
    }
}
