use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who spoke. Matches the wire format used by every chat provider this
/// crate talks to, so entries can be forwarded without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One turn in a patient's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Where the patient was in their care journey when this was said.
    /// Free-form tag, not a closed enum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journey_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_state: Option<String>,
    /// Which AI backend produced an assistant entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl MemoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            journey_stage: None,
            user_role: None,
            emotional_state: None,
            model: None,
            latency_ms: None,
        }
    }

    pub fn with_journey_stage(mut self, stage: impl Into<String>) -> Self {
        self.journey_stage = Some(stage.into());
        self
    }

    pub fn with_user_role(mut self, role: impl Into<String>) -> Self {
        self.user_role = Some(role.into());
        self
    }

    pub fn with_emotional_state(mut self, state: impl Into<String>) -> Self {
        self.emotional_state = Some(state.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// The derived, cumulative profile of a patient: everything learned from
/// their history so far. Maintained by the insight extractor at save time;
/// reads hand it back verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub name: String,
    pub journey_stage: String,
    pub user_role: String,
    /// Condition labels detected by keyword matching. Union-only: a
    /// condition mentioned once is remembered until the record is cleared.
    #[serde(default)]
    pub conditions: BTreeSet<String>,
    /// Text captured around concern-indicating phrases, capped at five
    /// entries.
    #[serde(default)]
    pub key_concerns: BTreeSet<String>,
    #[serde(default)]
    pub preferences: Map<String, Value>,
    /// Count of user-role entries in the full history.
    #[serde(default)]
    pub total_conversations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_interaction: Option<DateTime<Utc>>,
}

impl ContextSummary {
    /// Fresh summary skeleton for a patient nobody has met yet.
    pub fn for_patient(patient_id: &str) -> Self {
        Self {
            name: display_name(patient_id),
            journey_stage: "awareness".into(),
            user_role: "patient".into(),
            conditions: BTreeSet::new(),
            key_concerns: BTreeSet::new(),
            preferences: Map::new(),
            total_conversations: 0,
            last_interaction: None,
        }
    }
}

impl Default for ContextSummary {
    fn default() -> Self {
        Self::for_patient("")
    }
}

/// The durable per-patient document: raw history plus derived context.
/// Single source of truth — nothing else holds a copy past one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub conversation_history: Vec<MemoryEntry>,
    #[serde(default)]
    pub conversation_count: usize,
    pub patient_context: ContextSummary,
}

impl PatientRecord {
    /// Empty record for a first contact. History and collections start
    /// empty; the display name is derived from the key.
    pub fn new(patient_id: impl Into<String>) -> Self {
        let patient_id = patient_id.into();
        let now = Utc::now();
        Self {
            patient_context: ContextSummary::for_patient(&patient_id),
            patient_id,
            created_at: now,
            last_updated: now,
            conversation_history: Vec::new(),
            conversation_count: 0,
        }
    }
}

/// Aggregate view across every stored patient document. Computed by a full
/// scan — fine at clinic scale, not beyond.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total_patients: usize,
    /// User-role entries across all histories (one per exchange).
    pub total_conversations: usize,
    pub total_messages: usize,
    pub average_messages_per_patient: f64,
}

/// Confirmation returned by a clear, whether or not a document existed.
#[derive(Debug, Clone, Serialize)]
pub struct ClearOutcome {
    pub patient_id: String,
    pub status: String,
    pub message: String,
}

/// Derive a display name from a patient key: `patient_jane_doe` becomes
/// `Jane Doe`.
pub fn display_name(patient_id: &str) -> String {
    let stripped = patient_id.strip_prefix("patient_").unwrap_or(patient_id);
    title_case(&stripped.replace('_', " "))
}

/// Title-case each whitespace-separated word, lowercasing the rest.
pub(crate) fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
