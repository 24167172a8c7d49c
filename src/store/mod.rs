//! Record store seam.
//!
//! The pipeline only talks to the persistent store through `RecordStore`.
//! `SqliteRecordStore` is the production backend; `MemoryRecordStore` is the
//! in-process fake used by tests and by callers that do not want a file.

use async_trait::async_trait;
use thiserror::Error;

use crate::db::{DbError, DbStageChange};
use crate::types::{Contact, ContactField, FieldValue, Phase};
use crate::util::{normalize_field_value, now_rfc3339};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

pub type StageChange = DbStageChange;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(DbError),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(id) => StoreError::NotFound(id),
            other => StoreError::Db(other),
        }
    }
}

/// A set of field writes for one record, applied atomically.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContactPatch {
    pub fields: Vec<(ContactField, FieldValue)>,
}

impl ContactPatch {
    pub fn new(fields: Vec<(ContactField, FieldValue)>) -> Self {
        Self { fields }
    }

    pub fn single(field: ContactField, value: FieldValue) -> Self {
        Self {
            fields: vec![(field, value)],
        }
    }

    pub fn contains(&self, field: ContactField) -> bool {
        self.fields.iter().any(|(f, _)| *f == field)
    }

    pub fn value_of(&self, field: ContactField) -> Option<&FieldValue> {
        self.fields.iter().find(|(f, _)| *f == field).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Operator-entered fields for a new lead.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub business_name: String,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub lead_source: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn normalized_text(field: ContactField, raw: Option<&str>) -> Option<String> {
    match normalize_field_value(field, FieldValue::from_opt_text(raw)) {
        FieldValue::Text(s) => Some(s),
        _ => None,
    }
}

/// Build a full record for a new lead at the start of phase 1.
pub fn build_contact(category_id: &str, lead_stage: &str, new: &NewContact) -> Contact {
    let now = now_rfc3339();
    Contact {
        id: uuid::Uuid::new_v4().to_string(),
        category_id: category_id.to_string(),
        current_phase: Phase::Lead,
        sales_stage: lead_stage.to_string(),
        business_name: new.business_name.trim().to_string(),
        contact_name: normalized_text(ContactField::ContactName, new.contact_name.as_deref()),
        mobile_number: normalized_text(ContactField::MobileNumber, new.mobile_number.as_deref()),
        email: normalized_text(ContactField::Email, new.email.as_deref()),
        link: normalized_text(ContactField::Link, new.link.as_deref()),
        demo_link: None,
        output_link: None,
        lead_source: normalized_text(ContactField::LeadSource, new.lead_source.as_deref()),
        assigned_to: normalized_text(ContactField::AssignedTo, new.assigned_to.as_deref()),
        notes: normalized_text(ContactField::Notes, new.notes.as_deref()),
        demo_instructions: None,
        value: None,
        deposit: None,
        contact_count: 0,
        last_contacted_at: None,
        created_at: now.clone(),
        updated_at: now,
    }
}

/// The persistent store the pipeline writes through to.
///
/// Each call is one round trip. `patch` is atomic per call: every field lands
/// or none does.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Contacts of a category in a phase, oldest first. Includes archived
    /// stages.
    async fn query(&self, category_id: &str, phase: Phase) -> Result<Vec<Contact>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Contact>, StoreError>;

    async fn patch(&self, id: &str, patch: &ContactPatch) -> Result<(), StoreError>;

    async fn insert(&self, category_id: &str, new: &NewContact) -> Result<Contact, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Apply a stage change patch and append its history row atomically.
    async fn patch_with_history(
        &self,
        id: &str,
        patch: &ContactPatch,
        change: &StageChange,
    ) -> Result<(), StoreError>;

    async fn stage_history(&self, id: &str) -> Result<Vec<StageChange>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_not_found_maps_to_store_not_found() {
        let err: StoreError = DbError::NotFound("c9".to_string()).into();
        assert!(matches!(err, StoreError::NotFound(ref id) if id == "c9"));
        let err: StoreError = DbError::Migration("bad".to_string()).into();
        assert!(matches!(err, StoreError::Db(_)));
    }

    #[test]
    fn test_build_contact_starts_at_lead() {
        let new = NewContact {
            business_name: "  Corner Cafe ".to_string(),
            email: Some("  ".to_string()),
            mobile_number: Some(" 555-0101 ".to_string()),
            ..Default::default()
        };
        let contact = build_contact("cat", "Lead", &new);
        assert_eq!(contact.current_phase, Phase::Lead);
        assert_eq!(contact.sales_stage, "Lead");
        assert_eq!(contact.business_name, "Corner Cafe");
        assert_eq!(contact.email, None);
        assert_eq!(contact.mobile_number.as_deref(), Some("555-0101"));
        assert_eq!(contact.contact_count, 0);
        assert_eq!(contact.created_at, contact.updated_at);
        assert!(uuid::Uuid::parse_str(&contact.id).is_ok());
    }

    #[test]
    fn test_patch_lookup() {
        let patch = ContactPatch::new(vec![
            (ContactField::SalesStage, FieldValue::text("Approached")),
            (ContactField::Notes, FieldValue::Null),
        ]);
        assert!(patch.contains(ContactField::Notes));
        assert!(!patch.contains(ContactField::Email));
        assert_eq!(
            patch.value_of(ContactField::SalesStage),
            Some(&FieldValue::text("Approached"))
        );
    }
}
