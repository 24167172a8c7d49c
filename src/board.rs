//! Pipeline board: one (category, phase) working set and everything that
//! edits it.
//!
//! The board owns the active view, the sync layer that writes it through to
//! the store, and the stage-change state machine. All operator actions enter
//! here.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::activity::{self, ActivityKind};
use crate::error::{PipelineError, SyncNotice};
use crate::pipeline::{
    Decision, PendingStageChange, SideEffectInput, SideEffectKind, StageMachine, StagePlan,
    ViewEffect,
};
use crate::stages::StageVocabulary;
use crate::store::{NewContact, RecordStore, StageChange};
use crate::sync::{SyncLayer, WriteOutcome};
use crate::types::{Config, Contact, ContactField, FieldValue, Phase};
use crate::util::now_rfc3339;
use crate::view::ActiveView;

/// Result of a stage selection or a submitted side-effect form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StageChangeOutcome {
    /// The stage needs operator input; nothing has changed yet.
    AwaitingInput { kind: SideEffectKind },
    /// The contact already holds that stage.
    Unchanged,
    /// Applied locally. `persisted` is false when the store write failed and a
    /// notice was emitted.
    Applied { effect: ViewEffect, persisted: bool },
}

/// Returns the stage machine to idle when a commit ends, however it ends.
struct FinishOnDrop<'a>(&'a Mutex<StageMachine>);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.lock().finish();
    }
}

pub struct PipelineBoard {
    category_id: String,
    phase: Phase,
    vocab: Arc<StageVocabulary>,
    store: Arc<dyn RecordStore>,
    view: Arc<Mutex<ActiveView>>,
    sync: SyncLayer,
    machine: Mutex<StageMachine>,
    notices: Mutex<mpsc::UnboundedReceiver<SyncNotice>>,
}

impl PipelineBoard {
    /// Open the board for a category and phase and load its working set.
    pub async fn open(
        store: Arc<dyn RecordStore>,
        vocab: Arc<StageVocabulary>,
        category_id: &str,
        phase: Phase,
        config: &Config,
    ) -> Result<Self, PipelineError> {
        let view = Arc::new(Mutex::new(ActiveView::new(
            category_id,
            phase,
            Arc::clone(&vocab),
        )));
        let (sync, notices) =
            SyncLayer::new(Arc::clone(&store), Arc::clone(&view), config.debounce());
        let loaded = sync.refetch().await?;
        log::info!(
            "Board: opened {} phase {} with {} active contacts",
            category_id,
            phase,
            loaded
        );
        Ok(Self {
            category_id: category_id.to_string(),
            phase,
            vocab,
            store,
            view,
            sync,
            machine: Mutex::new(StageMachine::new()),
            notices: Mutex::new(notices),
        })
    }

    pub fn category_id(&self) -> &str {
        &self.category_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Stage labels offered for this phase, in presentation order.
    pub fn stages(&self) -> &[String] {
        self.vocab.stages_for_phase(self.phase)
    }

    /// Snapshot of the active working set.
    pub fn contacts(&self) -> Vec<Contact> {
        self.view.lock().contacts().to_vec()
    }

    pub fn contact(&self, id: &str) -> Option<Contact> {
        self.view.lock().get(id).cloned()
    }

    pub fn sync(&self) -> &SyncLayer {
        &self.sync
    }

    /// Drain persistence-failure notices emitted since the last call.
    pub fn take_notices(&self) -> Vec<SyncNotice> {
        let mut rx = self.notices.lock();
        let mut out = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            out.push(notice);
        }
        out
    }

    // =========================================================================
    // Field edits
    // =========================================================================

    pub async fn update_field(
        &self,
        id: &str,
        field: ContactField,
        value: FieldValue,
        immediate: bool,
    ) -> Result<WriteOutcome, PipelineError> {
        self.sync.update_field(id, field, value, immediate).await
    }

    pub async fn flush_field(&self, id: &str, field: ContactField) -> WriteOutcome {
        self.sync.flush(id, field).await
    }

    /// Send every scheduled write. Call before dropping the board.
    pub async fn flush_all(&self) -> usize {
        self.sync.flush_all().await
    }

    /// Re-query the working set from the store.
    pub async fn refresh(&self) -> Result<usize, PipelineError> {
        Ok(self.sync.refetch().await?)
    }

    // =========================================================================
    // Stage changes
    // =========================================================================

    /// Operator picked `stage` for a contact.
    pub async fn apply_stage_change(
        &self,
        id: &str,
        stage: &str,
    ) -> Result<StageChangeOutcome, PipelineError> {
        let contact = self
            .contact(id)
            .ok_or_else(|| PipelineError::ContactNotFound(id.to_string()))?;
        let decision = self.machine.lock().request(&self.vocab, &contact, stage)?;
        match decision {
            Decision::Unchanged => Ok(StageChangeOutcome::Unchanged),
            Decision::NeedsInput(kind) => Ok(StageChangeOutcome::AwaitingInput { kind }),
            Decision::Commit(plan) => self.commit_plan(plan).await,
        }
    }

    /// Operator submitted the form for the pending stage change.
    pub async fn submit_side_effect(
        &self,
        input: SideEffectInput,
    ) -> Result<StageChangeOutcome, PipelineError> {
        let pending = self
            .pending_side_effect()
            .ok_or(PipelineError::NoPendingStageChange)?;
        let Some(contact) = self.contact(&pending.contact_id) else {
            // Left the view while the form was open (refresh, delete).
            let _ = self.machine.lock().cancel();
            return Err(PipelineError::ContactNotFound(pending.contact_id));
        };
        let plan = self.machine.lock().supply(&self.vocab, &contact, &input)?;
        self.commit_plan(plan).await
    }

    /// Operator dismissed the form. Nothing was changed, so nothing is undone.
    pub fn cancel_side_effect(&self) -> Result<PendingStageChange, PipelineError> {
        let pending = self.machine.lock().cancel()?;
        log::debug!(
            "Board: cancelled '{}' for {}",
            pending.requested_stage,
            pending.contact_id
        );
        Ok(pending)
    }

    pub fn pending_side_effect(&self) -> Option<PendingStageChange> {
        self.machine.lock().pending().cloned()
    }

    async fn commit_plan(&self, plan: StagePlan) -> Result<StageChangeOutcome, PipelineError> {
        // Held from here on so a dropped or failed commit still frees the machine.
        let _finish = FinishOnDrop(&self.machine);
        let change = StageChange {
            contact_id: plan.contact_id.clone(),
            from_phase: plan.from_phase,
            from_stage: plan.from_stage.clone(),
            to_phase: plan.to_phase,
            to_stage: plan.to_stage.clone(),
            note: plan.note.clone(),
            changed_at: now_rfc3339(),
        };
        let outcome = self
            .sync
            .commit(
                &plan.contact_id,
                plan.fields.clone(),
                Some(change),
                plan.effect.changes_membership(),
            )
            .await?;

        let persisted = outcome == WriteOutcome::Persisted;
        if persisted {
            log::info!(
                "Board: {} moved '{}' (phase {}) -> '{}' (phase {})",
                plan.contact_id,
                plan.from_stage,
                plan.from_phase,
                plan.to_stage,
                plan.to_phase
            );
        }
        Ok(StageChangeOutcome::Applied {
            effect: plan.effect,
            persisted,
        })
    }

    pub async fn stage_history(&self, id: &str) -> Result<Vec<StageChange>, PipelineError> {
        Ok(self.store.stage_history(id).await?)
    }

    // =========================================================================
    // Duplicates and activity
    // =========================================================================

    /// Other active contacts whose `field` matches `value`.
    pub fn find_duplicates(
        &self,
        field: ContactField,
        contact_id: &str,
        value: &str,
    ) -> Result<Vec<Contact>, PipelineError> {
        let view = self.view.lock();
        Ok(activity::find_duplicates(&view, field, contact_id, value)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn duplicate_ids(&self, field: ContactField) -> Result<Vec<String>, PipelineError> {
        activity::duplicate_ids(&self.view.lock(), field)
    }

    /// Log a call or email: bump the attempt count and stamp the time, in one
    /// immediate write.
    pub async fn track_contact_activity(
        &self,
        id: &str,
        kind: ActivityKind,
    ) -> Result<WriteOutcome, PipelineError> {
        let contact = self
            .contact(id)
            .ok_or_else(|| PipelineError::ContactNotFound(id.to_string()))?;
        let fields = activity::activity_fields(&contact, &now_rfc3339());
        log::debug!(
            "Board: {} logged for {} (attempt {})",
            kind,
            id,
            contact.contact_count + 1
        );
        self.sync.commit(id, fields, None, false).await
    }

    // =========================================================================
    // Create / delete
    // =========================================================================

    /// Create a lead in this board's category. It appears here only on a
    /// phase-1 board.
    pub async fn create_contact(&self, new: NewContact) -> Result<Contact, PipelineError> {
        let contact = self.store.insert(&self.category_id, &new).await?;
        log::info!(
            "Board: created contact {} ('{}')",
            contact.id,
            contact.business_name
        );
        self.view.lock().insert(contact.clone());
        Ok(contact)
    }

    /// Hard-delete a contact. There is no undo.
    pub async fn delete_contact(&self, id: &str) -> Result<(), PipelineError> {
        let dropped = self.sync.drop_pending_for(id);
        self.store.delete(id).await?;
        self.view.lock().remove(id);
        log::info!(
            "Board: deleted contact {} ({} unsent edits dropped)",
            id,
            dropped
        );
        Ok(())
    }
}
