use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::MemoryError;
use crate::store::PatientStore;
use crate::types::PatientRecord;

const FILE_SUFFIX: &str = "_conversations.json";

/// One pretty-printed JSON document per patient on disk, named
/// `<patient_id>_conversations.json`. Writes go to a temp file in the same
/// directory and rename into place, so readers see either the old document
/// or the new one.
pub struct FilePatientStore {
    dir: PathBuf,
}

impl FilePatientStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, patient_id: &str) -> PathBuf {
        self.dir.join(format!("{patient_id}{FILE_SUFFIX}"))
    }
}

#[async_trait]
impl PatientStore for FilePatientStore {
    async fn read(&self, patient_id: &str) -> Result<Option<PatientRecord>, MemoryError> {
        let path = self.path_for(patient_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let record: PatientRecord = serde_json::from_str(&json)
                    .map_err(|e| MemoryError::Malformed(format!("{}: {e}", path.display())))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MemoryError::Storage(e.to_string())),
        }
    }

    async fn write(&self, record: &PatientRecord) -> Result<(), MemoryError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| MemoryError::Malformed(e.to_string()))?;

        // Temp file in the same directory so the rename stays on one filesystem.
        let path = self.path_for(&record.patient_id);
        let tmp = self.dir.join(format!("{}{FILE_SUFFIX}.tmp", record.patient_id));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, patient_id: &str) -> Result<(), MemoryError> {
        match tokio::fs::remove_file(self.path_for(patient_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MemoryError::Storage(e.to_string())),
        }
    }

    async fn list_ids(&self) -> Result<Vec<String>, MemoryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            // Directory not created yet means nothing stored yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoryError::Storage(e.to_string())),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(FILE_SUFFIX) {
                if !id.is_empty() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
