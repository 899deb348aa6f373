use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::MemoryError;
use crate::insights;
use crate::store::PatientStore;
use crate::types::{ClearOutcome, ContextSummary, MemoryEntry, MemoryStats, PatientRecord};

/// Per-patient conversation memory. Wires a document store to the insight
/// extractor and handles the full lifecycle: load, save, summarize, clear.
///
/// Memory is a best-effort enhancement of the conversation, never a hard
/// dependency: store failures degrade to empty history on load and to a
/// skipped persist on save, logged but never surfaced. The one exception is
/// an invalid patient id, which is a caller bug and does propagate.
///
/// Updates to the same patient are serialized through a keyed lock, so two
/// concurrent turns cannot clobber each other's read-modify-write. Turns
/// for different patients never contend.
pub struct ConversationMemory {
    store: Box<dyn PatientStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationMemory {
    pub fn new(store: impl PatientStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The patient's full conversation history, oldest first. Empty if
    /// nothing is stored or the store is unavailable.
    ///
    /// First access for an unseen patient also creates their skeleton
    /// document. `get_context_summary` deliberately does not do this; the
    /// asymmetry matches the stored-document contract callers rely on.
    pub async fn load_history(&self, patient_id: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        validate_patient_id(patient_id)?;
        let lock = self.lock_for(patient_id).await;
        let _guard = lock.lock().await;

        match self.store.read(patient_id).await {
            Ok(Some(record)) => Ok(record.conversation_history),
            Ok(None) => {
                let record = PatientRecord::new(patient_id);
                if let Err(e) = self.store.write(&record).await {
                    warn!(patient_id, error = %e, "failed to create patient record");
                } else {
                    info!(patient_id, "created new patient record");
                }
                Ok(Vec::new())
            }
            Err(e) => {
                warn!(patient_id, error = %e, "failed to load history, continuing without memory");
                Ok(Vec::new())
            }
        }
    }

    /// The stored context summary, verbatim — no recomputation on read.
    /// Returns a default skeleton if no document exists (and does not
    /// create one).
    pub async fn get_context_summary(
        &self,
        patient_id: &str,
    ) -> Result<ContextSummary, MemoryError> {
        validate_patient_id(patient_id)?;

        match self.store.read(patient_id).await {
            Ok(Some(record)) => Ok(record.patient_context),
            Ok(None) => Ok(ContextSummary::for_patient(patient_id)),
            Err(e) => {
                warn!(patient_id, error = %e, "failed to load context summary, using default");
                Ok(ContextSummary::for_patient(patient_id))
            }
        }
    }

    /// Replace the stored history with `history` (callers pass the complete
    /// updated sequence, not a delta), re-derive insights from the trailing
    /// window, and persist. Best-effort: a store failure loses this turn
    /// from memory without failing the caller's request.
    pub async fn save_history(
        &self,
        patient_id: &str,
        history: Vec<MemoryEntry>,
    ) -> Result<(), MemoryError> {
        validate_patient_id(patient_id)?;
        let lock = self.lock_for(patient_id).await;
        let _guard = lock.lock().await;

        let mut record = match self.store.read(patient_id).await {
            Ok(Some(record)) => record,
            Ok(None) => PatientRecord::new(patient_id),
            Err(e) => {
                // A fresh record here would overwrite whatever the store
                // still holds. Skip the persist; the document keeps its
                // last good state and only this turn goes unrecorded.
                warn!(patient_id, error = %e, "failed to load record before save, turn not persisted");
                return Ok(());
            }
        };

        record.conversation_history = history;
        record.conversation_count = record.conversation_history.len();
        record.last_updated = Utc::now();

        let update = insights::scan_window(insights::recent_window(&record.conversation_history));
        if !update.is_empty() {
            debug!(
                patient_id,
                conditions = update.conditions.len(),
                concerns = update.concerns.len(),
                "insights extracted"
            );
        }
        insights::apply(
            &mut record.patient_context,
            update,
            &record.conversation_history,
        );

        match self.store.write(&record).await {
            Ok(()) => {
                info!(
                    patient_id,
                    messages = record.conversation_count,
                    "saved conversation history"
                );
            }
            Err(e) => {
                warn!(patient_id, error = %e, "failed to save history, turn not persisted");
            }
        }
        Ok(())
    }

    /// Delete the patient's document entirely. Idempotent; confirms either
    /// way.
    pub async fn clear(&self, patient_id: &str) -> Result<ClearOutcome, MemoryError> {
        validate_patient_id(patient_id)?;
        let lock = self.lock_for(patient_id).await;
        let _guard = lock.lock().await;

        self.store.delete(patient_id).await?;
        info!(patient_id, "cleared conversation history");
        Ok(ClearOutcome {
            patient_id: patient_id.to_string(),
            status: "cleared".into(),
            message: "Conversation history has been cleared".into(),
        })
    }

    /// Aggregate stats across every stored document. Scans all of them —
    /// O(patients), an operator surface, not part of the chat path.
    /// Unreadable documents are skipped with a warning.
    pub async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        let ids = self.store.list_ids().await?;

        let total_patients = ids.len();
        let mut total_conversations = 0;
        let mut total_messages = 0;

        for id in &ids {
            match self.store.read(id).await {
                Ok(Some(record)) => {
                    total_messages += record.conversation_history.len();
                    total_conversations += record
                        .conversation_history
                        .iter()
                        .filter(|e| e.role == crate::types::Role::User)
                        .count();
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(patient_id = %id, error = %e, "skipping unreadable record in stats");
                }
            }
        }

        let average_messages_per_patient = if total_patients > 0 {
            total_messages as f64 / total_patients as f64
        } else {
            0.0
        };

        Ok(MemoryStats {
            total_patients,
            total_conversations,
            total_messages,
            average_messages_per_patient,
        })
    }

    async fn lock_for(&self, patient_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // A strong count of 1 means only the map holds the lock; nobody is
        // in an update for that patient, so the entry can go.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(patient_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// The id becomes a file-name stem, so an empty id or one carrying path
/// traversal characters is a caller bug, not a runtime fault.
fn validate_patient_id(patient_id: &str) -> Result<(), MemoryError> {
    if patient_id.trim().is_empty()
        || patient_id.contains('/')
        || patient_id.contains('\\')
        || patient_id.contains("..")
    {
        return Err(MemoryError::InvalidPatientId(patient_id.to_string()));
    }
    Ok(())
}
