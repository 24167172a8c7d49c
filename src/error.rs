//! Error types for pipeline operations
//!
//! Errors are classified by where they stop:
//! - Validation: rejected locally, nothing mutated, no store call
//! - Persistence: reported as a `SyncNotice`, never propagated out of a write
//! - Configuration: bad or unknown pipeline preset

use thiserror::Error;

use crate::pipeline::SideEffectKind;
use crate::store::StoreError;
use crate::types::{ContactField, Phase};

/// Error types for pipeline and sync operations
#[derive(Debug, Error)]
pub enum PipelineError {
    // Validation rejections
    #[error("Stage '{stage}' is not valid in phase {phase}")]
    StageNotInPhase { stage: String, phase: Phase },

    #[error("Contact not found in the active view: {0}")]
    ContactNotFound(String),

    #[error("Unknown contact field: {0}")]
    UnknownField(String),

    #[error("Field '{0}' can only change through a stage change")]
    GuardedField(ContactField),

    #[error("Field '{0}' is not an identity field")]
    NotIdentityField(ContactField),

    #[error("Field '{field}' expects {expected}")]
    TypeMismatch {
        field: ContactField,
        expected: &'static str,
    },

    // State machine protocol
    #[error("A stage change for {0} is already in progress")]
    StageChangeInProgress(String),

    #[error("No stage change is awaiting input")]
    NoPendingStageChange,

    #[error("Stage change expects {expected:?} input, got {actual:?}")]
    SideEffectMismatch {
        expected: SideEffectKind,
        actual: SideEffectKind,
    },

    #[error("Invalid {kind:?} input: {reason}")]
    InvalidSideEffect {
        kind: SideEffectKind,
        reason: String,
    },

    // Collaborators
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid pipeline preset: {0}")]
    Preset(String),
}

/// User-visible record of a failed persisted write.
///
/// One notice is emitted per failed write. The editing surface stays live;
/// the next edit or an explicit refresh is the retry.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncNotice {
    pub contact_id: String,
    pub fields: Vec<ContactField>,
    pub message: String,
    /// The active view was re-queried because the write changed view membership.
    pub view_refetched: bool,
}

impl SyncNotice {
    pub fn title(&self) -> String {
        match self.fields.as_slice() {
            [field] => format!("Couldn't save {}", field),
            _ => "Couldn't save changes".to_string(),
        }
    }
}
