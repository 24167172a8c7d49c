//! Write-through synchronization layer.
//!
//! Edits land in the active view immediately and reach the record store
//! later. Each `(contact, field)` key holds at most one scheduled write; a new
//! edit on the key aborts the scheduled one and takes its place, so after a
//! burst only the last value is sent. Writes to one record pass through a
//! per-record gate so they reach the store in the order they were issued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{PipelineError, SyncNotice};
use crate::store::{ContactPatch, RecordStore, StageChange, StoreError};
use crate::types::{ContactField, FieldValue};
use crate::util::{normalize_field_value, now_rfc3339};
use crate::view::{ActiveView, ViewChange};

type WriteKey = (String, ContactField);

/// Result of an edit or flush as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Applied locally; the store write runs after the quiescence delay.
    Scheduled,
    Persisted,
    /// The store rejected the write. A `SyncNotice` was emitted.
    Failed,
    /// `flush` found no scheduled write for the key.
    NothingPending,
}

struct PendingWrite {
    generation: u64,
    value: FieldValue,
    handle: JoinHandle<()>,
}

struct SyncInner {
    store: Arc<dyn RecordStore>,
    view: Arc<Mutex<ActiveView>>,
    delay: Duration,
    pending: Mutex<HashMap<WriteKey, PendingWrite>>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Mutex<HashMap<WriteKey, InFlight>>,
    generation: AtomicU64,
    notices: mpsc::UnboundedSender<SyncNotice>,
}

/// Cheap to clone; clones share timers, gates and the notice channel.
#[derive(Clone)]
pub struct SyncLayer {
    inner: Arc<SyncInner>,
}

impl SyncLayer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        view: Arc<Mutex<ActiveView>>,
        delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SyncNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = SyncInner {
            store,
            view,
            delay,
            pending: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            notices: tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Edit one field of a contact in the active view.
    ///
    /// Stage and phase are refused; they only move through the state machine.
    /// With `immediate` the write is sent now (blur, confirm, click) and any
    /// scheduled write for the key is dropped in its favour.
    pub async fn update_field(
        &self,
        id: &str,
        field: ContactField,
        raw: FieldValue,
        immediate: bool,
    ) -> Result<WriteOutcome, PipelineError> {
        if field.is_guarded() {
            return Err(PipelineError::GuardedField(field));
        }
        let value = normalize_field_value(field, raw);
        self.apply_local(id, &[(field, value.clone())])?;

        let key = (id.to_string(), field);
        if immediate {
            self.cancel_pending(&key);
            let patch = ContactPatch::single(field, value);
            return Ok(self.inner.persist(id, patch, None, false).await);
        }

        self.schedule(key, value);
        Ok(WriteOutcome::Scheduled)
    }

    /// Apply and persist a multi-field change in one patch, now.
    ///
    /// Used for stage changes and activity bookkeeping. Scheduled writes for
    /// any of the fields are superseded. A stage change carries its history
    /// row, stored atomically with the patch. When `membership_change` is set
    /// a failed write re-queries the view.
    pub async fn commit(
        &self,
        id: &str,
        fields: Vec<(ContactField, FieldValue)>,
        history: Option<StageChange>,
        membership_change: bool,
    ) -> Result<WriteOutcome, PipelineError> {
        self.apply_local(id, &fields)?;
        for (field, _) in &fields {
            self.cancel_pending(&(id.to_string(), *field));
        }
        let patch = ContactPatch::new(fields);
        Ok(self
            .inner
            .persist(id, patch, history, membership_change)
            .await)
    }

    /// Send the scheduled write for a key now.
    pub async fn flush(&self, id: &str, field: ContactField) -> WriteOutcome {
        let entry = self.inner.pending.lock().remove(&(id.to_string(), field));
        match entry {
            Some(entry) => {
                entry.handle.abort();
                self.inner
                    .persist(id, ContactPatch::single(field, entry.value), None, false)
                    .await
            }
            None => WriteOutcome::NothingPending,
        }
    }

    /// Send every scheduled write now, one patch per contact.
    ///
    /// Returns the number of patches that failed.
    pub async fn flush_all(&self) -> usize {
        let drained: Vec<(WriteKey, PendingWrite)> = self.inner.pending.lock().drain().collect();
        let mut by_contact: HashMap<String, Vec<(ContactField, FieldValue)>> = HashMap::new();
        for ((id, field), entry) in drained {
            entry.handle.abort();
            by_contact.entry(id).or_default().push((field, entry.value));
        }

        let mut failed = 0;
        for (id, fields) in by_contact {
            let outcome = self
                .inner
                .persist(&id, ContactPatch::new(fields), None, false)
                .await;
            if outcome == WriteOutcome::Failed {
                failed += 1;
            }
        }
        failed
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_pending(&self, id: &str, field: ContactField) -> bool {
        self.inner.pending.lock().contains_key(&(id.to_string(), field))
    }

    /// Forget scheduled writes for a contact that is being deleted.
    pub fn drop_pending_for(&self, id: &str) -> usize {
        let mut pending = self.inner.pending.lock();
        let keys: Vec<WriteKey> = pending.keys().filter(|(cid, _)| cid == id).cloned().collect();
        for key in &keys {
            if let Some(entry) = pending.remove(key) {
                entry.handle.abort();
            }
        }
        keys.len()
    }

    /// Re-query the view from the store.
    ///
    /// Values still on their way to the store, in flight or scheduled, are
    /// laid back over the fresh rows.
    pub async fn refetch(&self) -> Result<usize, StoreError> {
        self.inner.refetch().await
    }

    fn apply_local(
        &self,
        id: &str,
        fields: &[(ContactField, FieldValue)],
    ) -> Result<ViewChange, PipelineError> {
        let change = self.inner.view.lock().apply_local(id, fields, &now_rfc3339())?;
        if change == ViewChange::Missing {
            return Err(PipelineError::ContactNotFound(id.to_string()));
        }
        Ok(change)
    }

    fn cancel_pending(&self, key: &WriteKey) {
        if let Some(entry) = self.inner.pending.lock().remove(key) {
            entry.handle.abort();
            log::debug!("Sync: dropped scheduled write for {}.{}", key.0, key.1);
        }
    }

    fn schedule(&self, key: WriteKey, value: FieldValue) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + self.inner.delay;

        // Hold the map while spawning so the task cannot look up its entry
        // before it exists.
        let mut pending = self.inner.pending.lock();
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let value = {
                let mut pending = inner.pending.lock();
                match pending.get(&task_key) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&task_key).map(|e| e.value)
                    }
                    _ => None,
                }
            };
            if let Some(value) = value {
                let (id, field) = task_key;
                let patch = ContactPatch::single(field, value);
                inner.persist(&id, patch, None, false).await;
            }
        });

        if let Some(previous) = pending.insert(
            key.clone(),
            PendingWrite {
                generation,
                value,
                handle,
            },
        ) {
            previous.handle.abort();
            log::debug!("Sync: coalesced write for {}.{}", key.0, key.1);
        } else {
            log::debug!(
                "Sync: scheduled write for {}.{} in {}ms",
                key.0,
                key.1,
                self.inner.delay.as_millis()
            );
        }
    }
}

impl SyncInner {
    fn gate_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.gates
                .lock()
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Register a write as in flight and take a handle on the record gate.
    fn begin_write(&self, id: &str, patch: &ContactPatch) -> WriteTicket<'_> {
        let seq = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut in_flight = self.in_flight.lock();
            for (field, value) in &patch.fields {
                in_flight.insert(
                    (id.to_string(), *field),
                    InFlight {
                        seq,
                        value: value.clone(),
                    },
                );
            }
        }
        WriteTicket {
            inner: self,
            id: id.to_string(),
            seq,
            fields: patch.fields.iter().map(|(f, _)| *f).collect(),
            gate: self.gate_for(id),
        }
    }

    async fn persist(
        &self,
        id: &str,
        patch: ContactPatch,
        history: Option<StageChange>,
        membership_change: bool,
    ) -> WriteOutcome {
        let ticket = self.begin_write(id, &patch);
        let result = {
            let _turn = ticket.gate.lock().await;
            match history {
                Some(ref change) => self.store.patch_with_history(id, &patch, change).await,
                None => self.store.patch(id, &patch).await,
            }
        };

        let err = match result {
            Ok(()) => return WriteOutcome::Persisted,
            Err(e) => e,
        };
        log::warn!("Sync: write to {} failed: {}", id, err);
        // The refetch below must show what the store holds, not this write.
        ticket.settle();
        let view_refetched = if membership_change {
            match self.refetch().await {
                Ok(_) => true,
                Err(refetch_err) => {
                    log::warn!("Sync: refetch after failed write failed: {}", refetch_err);
                    false
                }
            }
        } else {
            false
        };
        let notice = SyncNotice {
            contact_id: id.to_string(),
            fields: patch.fields.iter().map(|(f, _)| *f).collect(),
            message: err.to_string(),
            view_refetched,
        };
        // Receiver gone means nobody is listening; the failure is logged.
        let _ = self.notices.send(notice);
        WriteOutcome::Failed
    }

    async fn refetch(&self) -> Result<usize, StoreError> {
        let (category_id, phase) = {
            let view = self.view.lock();
            (view.category_id().to_string(), view.phase())
        };
        let mut rows = self.store.query(&category_id, phase).await?;

        // Local values the store may not have yet: writes in flight, then
        // newer scheduled ones on top.
        {
            let in_flight = self.in_flight.lock();
            let pending = self.pending.lock();
            for row in rows.iter_mut() {
                let sent = in_flight.iter().map(|(key, w)| (key, &w.value));
                let unsent = pending.iter().map(|(key, w)| (key, &w.value));
                for ((id, field), value) in sent.chain(unsent) {
                    if *id == row.id {
                        let _ = row.set(*field, value);
                    }
                }
            }
        }

        let mut view = self.view.lock();
        view.reconcile(rows);
        log::debug!(
            "Sync: refetched {} contacts for {} phase {}",
            view.len(),
            category_id,
            phase
        );
        Ok(view.len())
    }
}

struct InFlight {
    seq: u64,
    value: FieldValue,
}

/// One write between registration and completion.
///
/// Dropping it, including when the awaiting future is cancelled, clears the
/// in-flight values it registered and releases the record gate once no other
/// write holds it.
struct WriteTicket<'a> {
    inner: &'a SyncInner,
    id: String,
    seq: u64,
    fields: Vec<ContactField>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl WriteTicket<'_> {
    fn settle(&self) {
        let mut in_flight = self.inner.in_flight.lock();
        for field in &self.fields {
            let key = (self.id.clone(), *field);
            if in_flight.get(&key).is_some_and(|w| w.seq == self.seq) {
                in_flight.remove(&key);
            }
        }
    }
}

impl Drop for WriteTicket<'_> {
    fn drop(&mut self) {
        self.settle();
        let mut gates = self.inner.gates.lock();
        let idle = gates
            .get(&self.id)
            .is_some_and(|g| Arc::ptr_eq(g, &self.gate) && Arc::strong_count(g) == 2);
        if idle {
            gates.remove(&self.id);
        }
    }
}
