use async_trait::async_trait;

use crate::error::MemoryError;
use crate::types::PatientRecord;

/// Backend storage trait. Flat files, a KV store, a blob bucket — implement
/// this and plug it in. The memory manager handles lifecycle and insight
/// derivation; the store just reads and writes whole documents.
///
/// Absence of a document is a valid state, never an error: `read` returns
/// `Ok(None)` and `delete` succeeds whether or not anything was there.
#[async_trait]
pub trait PatientStore: Send + Sync {
    /// Fetch the full document for a patient, or `None` if one has never
    /// been written.
    async fn read(&self, patient_id: &str) -> Result<Option<PatientRecord>, MemoryError>;

    /// Fully overwrite the stored document. Must be atomic from the
    /// caller's perspective: a concurrent reader sees the old version or
    /// the new one, never a partial write.
    async fn write(&self, record: &PatientRecord) -> Result<(), MemoryError>;

    /// Remove the document. Idempotent.
    async fn delete(&self, patient_id: &str) -> Result<(), MemoryError>;

    /// Every patient id with a stored document. Used by the stats
    /// aggregate, which scans all of them.
    async fn list_ids(&self) -> Result<Vec<String>, MemoryError>;
}
