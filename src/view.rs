//! Active view: the locally held working set of one (category, phase).
//!
//! Only two things mutate it: `apply_local` for optimistic edits and commits,
//! and `reconcile` when a fresh query arrives from the store. Membership is
//! always `vocab.is_active_in(contact, phase)`.

use std::sync::Arc;

use crate::error::PipelineError;
use crate::stages::StageVocabulary;
use crate::types::{Contact, ContactField, FieldValue, Phase};

/// What an optimistic apply did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    Updated,
    /// The contact left the working set (phase transition or archived stage).
    Removed,
    /// The contact is not in this view.
    Missing,
}

#[derive(Debug, Clone)]
pub struct ActiveView {
    category_id: String,
    phase: Phase,
    vocab: Arc<StageVocabulary>,
    contacts: Vec<Contact>,
}

impl ActiveView {
    pub fn new(category_id: impl Into<String>, phase: Phase, vocab: Arc<StageVocabulary>) -> Self {
        Self {
            category_id: category_id.into(),
            phase,
            vocab,
            contacts: Vec::new(),
        }
    }

    pub fn category_id(&self) -> &str {
        &self.category_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn get(&self, id: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Apply field values to a held contact and stamp `updated_at`.
    ///
    /// All-or-nothing: a value that does not fit its field leaves the contact
    /// untouched.
    pub fn apply_local(
        &mut self,
        id: &str,
        fields: &[(ContactField, FieldValue)],
        stamp: &str,
    ) -> Result<ViewChange, PipelineError> {
        let Some(idx) = self.contacts.iter().position(|c| c.id == id) else {
            return Ok(ViewChange::Missing);
        };

        let mut updated = self.contacts[idx].clone();
        for (field, value) in fields {
            updated.set(*field, value)?;
        }
        updated.updated_at = stamp.to_string();

        if self.vocab.is_active_in(&updated, self.phase) {
            self.contacts[idx] = updated;
            Ok(ViewChange::Updated)
        } else {
            self.contacts.remove(idx);
            log::debug!(
                "View: {} left phase {} working set (now {} / '{}')",
                id,
                self.phase,
                updated.current_phase,
                updated.sales_stage
            );
            Ok(ViewChange::Removed)
        }
    }

    /// Replace the working set with rows from the store.
    ///
    /// Rows outside this view's category or phase and rows at archived stages
    /// are dropped. Stages illegal for their phase are kept but reported.
    pub fn reconcile(&mut self, rows: Vec<Contact>) {
        for mismatch in self.vocab.audit(&rows) {
            log::warn!(
                "View: contact {} holds stage '{}' which is not valid in phase {} (belongs to {:?})",
                mismatch.contact_id,
                mismatch.stage,
                mismatch.phase,
                mismatch.belongs_to
            );
        }
        let category_id = &self.category_id;
        let phase = self.phase;
        let vocab = &self.vocab;
        self.contacts = rows
            .into_iter()
            .filter(|c| &c.category_id == category_id && vocab.is_active_in(c, phase))
            .collect();
    }

    /// Add a newly created contact if it belongs here.
    pub fn insert(&mut self, contact: Contact) -> bool {
        if contact.category_id != self.category_id
            || !self.vocab.is_active_in(&contact, self.phase)
            || self.get(&contact.id).is_some()
        {
            return false;
        }
        self.contacts.push(contact);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Contact> {
        let idx = self.contacts.iter().position(|c| c.id == id)?;
        Some(self.contacts.remove(idx))
    }
}
