//! Pipeline state machine.
//!
//! A stage change runs `Idle → (AwaitingSideEffect →) Committing → Idle`.
//! Everything up to `Committing` is pure: the machine only produces a
//! `StagePlan`, and the plan is handed to the sync layer for the optimistic
//! apply and the persisted write. Cancelling out of `AwaitingSideEffect`
//! therefore never has anything to undo.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::stages::StageVocabulary;
use crate::types::{Contact, ContactField, FieldValue, Phase};
use crate::util::{append_tagged_block, format_amount, normalize_field_value};

const REJECTION_TAG: &str = "Rejection reason";
const PAYMENT_TAG: &str = "Payment received";

/// Operator input a gated stage needs before it can be committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SideEffectKind {
    /// Demo instructions plus the developer assigned to build it.
    DemoRequest,
    /// Negotiated price; the contact moves on to conversion.
    Approval,
    /// Free-text reason; the contact is archived.
    Rejection,
    /// Amount received on close.
    Payment,
}

/// The captured payload for a gated stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SideEffectInput {
    DemoRequest { instructions: String, assignee: String },
    Approval { price: f64 },
    Rejection { reason: String },
    Payment { amount: f64 },
}

impl SideEffectInput {
    pub fn kind(&self) -> SideEffectKind {
        match self {
            SideEffectInput::DemoRequest { .. } => SideEffectKind::DemoRequest,
            SideEffectInput::Approval { .. } => SideEffectKind::Approval,
            SideEffectInput::Rejection { .. } => SideEffectKind::Rejection,
            SideEffectInput::Payment { .. } => SideEffectKind::Payment,
        }
    }
}

/// What a committed stage change does to active-view membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewEffect {
    /// Still in the same phase's working set.
    Stays,
    /// Moved to the next phase's view.
    Transitioned { from: Phase, to: Phase },
    /// Hidden from the phase's working set; the record is kept.
    Archived,
}

impl ViewEffect {
    pub fn changes_membership(self) -> bool {
        !matches!(self, ViewEffect::Stays)
    }
}

/// A fully decided stage change, ready to be applied and persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub contact_id: String,
    pub from_phase: Phase,
    pub from_stage: String,
    pub to_phase: Phase,
    pub to_stage: String,
    /// Written together in one patch. Phase and stage are never split.
    pub fields: Vec<(ContactField, FieldValue)>,
    pub effect: ViewEffect,
    /// Short summary of the captured input, kept in the stage history.
    pub note: Option<String>,
}

/// Result of asking the machine for a stage change.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The contact already holds the requested plain stage.
    Unchanged,
    /// Operator input of this kind is required first.
    NeedsInput(SideEffectKind),
    Commit(StagePlan),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStageChange {
    pub contact_id: String,
    pub requested_stage: String,
    pub kind: SideEffectKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    AwaitingSideEffect(PendingStageChange),
    Committing { contact_id: String, to_stage: String },
}

/// Explicit stage-change state machine. One change in flight at a time.
#[derive(Debug)]
pub struct StageMachine {
    state: MachineState,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            state: MachineState::Idle,
        }
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn pending(&self) -> Option<&PendingStageChange> {
        match self.state {
            MachineState::AwaitingSideEffect(ref pending) => Some(pending),
            _ => None,
        }
    }

    /// Start a stage change for `contact`.
    ///
    /// A stage outside the contact's current phase vocabulary is rejected and
    /// the machine stays `Idle`.
    pub fn request(
        &mut self,
        vocab: &StageVocabulary,
        contact: &Contact,
        requested: &str,
    ) -> Result<Decision, PipelineError> {
        self.ensure_idle()?;
        if !vocab.contains(contact.current_phase, requested) {
            return Err(PipelineError::StageNotInPhase {
                stage: requested.to_string(),
                phase: contact.current_phase,
            });
        }

        if let Some(kind) = vocab.side_effect_for(requested) {
            log::debug!(
                "Pipeline: {} -> '{}' awaits {:?} input",
                contact.id,
                requested,
                kind
            );
            self.state = MachineState::AwaitingSideEffect(PendingStageChange {
                contact_id: contact.id.clone(),
                requested_stage: requested.to_string(),
                kind,
            });
            return Ok(Decision::NeedsInput(kind));
        }

        if requested == contact.sales_stage && vocab.transition_for(requested).is_none() {
            return Ok(Decision::Unchanged);
        }

        let plan = plan_stage_change(vocab, contact, requested, None)?;
        self.state = MachineState::Committing {
            contact_id: plan.contact_id.clone(),
            to_stage: plan.to_stage.clone(),
        };
        Ok(Decision::Commit(plan))
    }

    /// Supply the operator input for the pending change.
    ///
    /// A payload of the wrong kind or with invalid content is rejected and the
    /// change keeps waiting. If the contact no longer holds a phase in which
    /// the requested stage is legal, the change is dropped.
    pub fn supply(
        &mut self,
        vocab: &StageVocabulary,
        contact: &Contact,
        input: &SideEffectInput,
    ) -> Result<StagePlan, PipelineError> {
        let pending = match self.state {
            MachineState::AwaitingSideEffect(ref pending) => pending.clone(),
            _ => return Err(PipelineError::NoPendingStageChange),
        };
        if pending.contact_id != contact.id {
            return Err(PipelineError::StageChangeInProgress(pending.contact_id));
        }
        if input.kind() != pending.kind {
            return Err(PipelineError::SideEffectMismatch {
                expected: pending.kind,
                actual: input.kind(),
            });
        }
        if !vocab.contains(contact.current_phase, &pending.requested_stage) {
            self.state = MachineState::Idle;
            return Err(PipelineError::StageNotInPhase {
                stage: pending.requested_stage,
                phase: contact.current_phase,
            });
        }

        let plan = plan_stage_change(vocab, contact, &pending.requested_stage, Some(input))?;
        self.state = MachineState::Committing {
            contact_id: plan.contact_id.clone(),
            to_stage: plan.to_stage.clone(),
        };
        Ok(plan)
    }

    /// Abandon the pending change. Nothing was mutated, so nothing is undone.
    pub fn cancel(&mut self) -> Result<PendingStageChange, PipelineError> {
        match std::mem::replace(&mut self.state, MachineState::Idle) {
            MachineState::AwaitingSideEffect(pending) => Ok(pending),
            other => {
                self.state = other;
                Err(PipelineError::NoPendingStageChange)
            }
        }
    }

    /// Mark the committing change as done.
    pub fn finish(&mut self) {
        if matches!(self.state, MachineState::Committing { .. }) {
            self.state = MachineState::Idle;
        }
    }

    fn ensure_idle(&self) -> Result<(), PipelineError> {
        match self.state {
            MachineState::Idle => Ok(()),
            MachineState::AwaitingSideEffect(ref p) => {
                Err(PipelineError::StageChangeInProgress(p.contact_id.clone()))
            }
            MachineState::Committing { ref contact_id, .. } => {
                Err(PipelineError::StageChangeInProgress(contact_id.clone()))
            }
        }
    }
}

/// Decide the writes for moving `contact` to `requested`.
///
/// Pure: reads the vocabulary and the contact snapshot, returns the plan.
pub fn plan_stage_change(
    vocab: &StageVocabulary,
    contact: &Contact,
    requested: &str,
    input: Option<&SideEffectInput>,
) -> Result<StagePlan, PipelineError> {
    let (to_phase, to_stage) = match vocab.transition_for(requested) {
        Some(t) => (t.target_phase, t.entry_stage.clone()),
        None => (contact.current_phase, requested.to_string()),
    };

    let mut fields = Vec::with_capacity(4);
    if to_phase != contact.current_phase {
        fields.push((
            ContactField::CurrentPhase,
            FieldValue::Integer(to_phase.number()),
        ));
    }
    fields.push((ContactField::SalesStage, FieldValue::Text(to_stage.clone())));

    let mut note = None;
    match input {
        None => {}
        Some(SideEffectInput::DemoRequest {
            instructions,
            assignee,
        }) => {
            fields.push((
                ContactField::DemoInstructions,
                normalize_field_value(
                    ContactField::DemoInstructions,
                    FieldValue::text(instructions.as_str()),
                ),
            ));
            fields.push((
                ContactField::AssignedTo,
                normalize_field_value(ContactField::AssignedTo, FieldValue::text(assignee.as_str())),
            ));
            note = Some(format!("Assigned to {}", assignee.trim()));
        }
        Some(SideEffectInput::Approval { price }) => {
            let price = checked_amount(SideEffectKind::Approval, *price)?;
            fields.push((ContactField::Value, FieldValue::Number(price)));
            note = Some(format!("Price {}", format_amount(price)));
        }
        Some(SideEffectInput::Rejection { reason }) => {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(PipelineError::InvalidSideEffect {
                    kind: SideEffectKind::Rejection,
                    reason: "a rejection reason is required".to_string(),
                });
            }
            fields.push((
                ContactField::Notes,
                FieldValue::Text(append_tagged_block(
                    contact.notes.as_deref(),
                    REJECTION_TAG,
                    reason,
                )),
            ));
            note = Some(reason.to_string());
        }
        Some(SideEffectInput::Payment { amount }) => {
            let amount = checked_amount(SideEffectKind::Payment, *amount)?;
            fields.push((ContactField::Value, FieldValue::Number(amount)));
            fields.push((
                ContactField::Notes,
                FieldValue::Text(append_tagged_block(
                    contact.notes.as_deref(),
                    PAYMENT_TAG,
                    &format_amount(amount),
                )),
            ));
            note = Some(format!("Paid {}", format_amount(amount)));
        }
    }

    let effect = if to_phase != contact.current_phase {
        ViewEffect::Transitioned {
            from: contact.current_phase,
            to: to_phase,
        }
    } else if vocab.is_archived(&to_stage) {
        ViewEffect::Archived
    } else {
        ViewEffect::Stays
    };

    Ok(StagePlan {
        contact_id: contact.id.clone(),
        from_phase: contact.current_phase,
        from_stage: contact.sales_stage.clone(),
        to_phase,
        to_stage,
        fields,
        effect,
        note,
    })
}

fn checked_amount(kind: SideEffectKind, amount: f64) -> Result<f64, PipelineError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(PipelineError::InvalidSideEffect {
            kind,
            reason: format!("amount must be a non-negative number, got {}", amount),
        });
    }
    Ok(amount)
}
