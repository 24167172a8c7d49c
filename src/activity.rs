//! Duplicate detection and contact-activity bookkeeping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::{Contact, ContactField, FieldValue};
use crate::util::identity_key;
use crate::view::ActiveView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Call,
    Email,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::Call => write!(f, "call"),
            ActivityKind::Email => write!(f, "email"),
        }
    }
}

fn ensure_identity(field: ContactField) -> Result<(), PipelineError> {
    if field.is_identity() {
        Ok(())
    } else {
        Err(PipelineError::NotIdentityField(field))
    }
}

fn key_of(contact: &Contact, field: ContactField) -> Option<String> {
    contact.get(field).as_str().and_then(identity_key)
}

/// Other contacts in the view whose `field` matches `value`, ignoring case
/// and surrounding whitespace. A blank value matches nothing.
pub fn find_duplicates<'a>(
    view: &'a ActiveView,
    field: ContactField,
    contact_id: &str,
    value: &str,
) -> Result<Vec<&'a Contact>, PipelineError> {
    ensure_identity(field)?;
    let Some(needle) = identity_key(value) else {
        return Ok(Vec::new());
    };
    Ok(view
        .contacts()
        .iter()
        .filter(|c| c.id != contact_id)
        .filter(|c| key_of(c, field).as_deref() == Some(needle.as_str()))
        .collect())
}

/// Ids of every contact in the view that shares `field` with another one,
/// in view order.
pub fn duplicate_ids(view: &ActiveView, field: ContactField) -> Result<Vec<String>, PipelineError> {
    ensure_identity(field)?;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for contact in view.contacts() {
        if let Some(key) = key_of(contact, field) {
            *counts.entry(key).or_default() += 1;
        }
    }
    Ok(view
        .contacts()
        .iter()
        .filter(|c| {
            key_of(c, field)
                .and_then(|k| counts.get(&k).copied())
                .is_some_and(|n| n > 1)
        })
        .map(|c| c.id.clone())
        .collect())
}

/// Fields written when an outreach attempt is logged.
pub fn activity_fields(contact: &Contact, at: &str) -> Vec<(ContactField, FieldValue)> {
    vec![
        (
            ContactField::ContactCount,
            FieldValue::Integer(contact.contact_count + 1),
        ),
        (ContactField::LastContactedAt, FieldValue::text(at)),
    ]
}
