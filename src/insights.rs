use std::collections::BTreeSet;

use chrono::Utc;

use crate::types::{title_case, ContextSummary, MemoryEntry, Role};

/// How many trailing history entries each save re-scans.
pub const INSIGHT_WINDOW: usize = 10;

/// Hard cap on stored key concerns. First five in set order survive.
pub const KEY_CONCERN_CAP: usize = 5;

/// Context captured around a concern phrase: this many chars before the
/// phrase start, and this many after it.
const CONCERN_LEAD: usize = 20;
const CONCERN_TRAIL: usize = 50;

/// Captures this short or shorter (after trimming) are noise, not concerns.
const MIN_CONCERN_CHARS: usize = 10;

/// Condition vocabulary. Matched case-insensitively by substring; a hit
/// contributes the title-cased keyword to the patient's condition set.
const CONDITION_KEYWORDS: &[&str] = &[
    "cancer",
    "diabetes",
    "heart disease",
    "arthritis",
    "lupus",
    "fibromyalgia",
    "depression",
    "anxiety",
    "chronic pain",
    "rare disease",
    "autoimmune",
    "neurological",
    "hypertension",
    "asthma",
    "copd",
    "stroke",
    "alzheimer",
    "parkinson",
];

/// Phrases that flag a patient concern. A match captures the surrounding
/// text as a key-concern snippet.
const CONCERN_PHRASES: &[&str] = &[
    "worried about",
    "concerned about",
    "afraid of",
    "struggling with",
    "pain",
    "symptoms",
    "treatment",
    "side effects",
    "diagnosis",
    "diagnosed",
    "scared",
];

/// What one scan of a history window produced. Deterministic and purely
/// lexical — no model call, no I/O, nothing to fail.
#[derive(Debug, Clone, Default)]
pub struct InsightUpdate {
    pub conditions: BTreeSet<String>,
    pub concerns: BTreeSet<String>,
    /// Last journey-stage tag seen in the window, if any entry carried one.
    pub journey_stage: Option<String>,
}

impl InsightUpdate {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.concerns.is_empty() && self.journey_stage.is_none()
    }
}

/// Scan a window of entries for condition keywords, concern phrases, and
/// journey-stage tags. Callers pass the trailing [`INSIGHT_WINDOW`] entries;
/// this function scans exactly what it is given.
pub fn scan_window(entries: &[MemoryEntry]) -> InsightUpdate {
    let mut update = InsightUpdate::default();

    for entry in entries {
        let content = entry.content.to_lowercase();

        for keyword in CONDITION_KEYWORDS {
            if content.contains(keyword) {
                update.conditions.insert(title_case(keyword));
            }
        }

        for phrase in CONCERN_PHRASES {
            if let Some(at) = content.find(phrase) {
                if let Some(snippet) = capture_around(&content, at) {
                    update.concerns.insert(snippet);
                }
            }
        }

        if let Some(stage) = &entry.journey_stage {
            update.journey_stage = Some(stage.clone());
        }
    }

    update
}

/// Merge a scan result into the stored summary. Conditions accumulate
/// forever (union, never retracted); concerns accumulate then truncate to
/// the cap; the stage follows the last tag seen. Interaction bookkeeping is
/// refreshed from the full history.
pub fn apply(summary: &mut ContextSummary, update: InsightUpdate, history: &[MemoryEntry]) {
    summary.conditions.extend(update.conditions);

    summary.key_concerns.extend(update.concerns);
    if summary.key_concerns.len() > KEY_CONCERN_CAP {
        summary.key_concerns = summary
            .key_concerns
            .iter()
            .take(KEY_CONCERN_CAP)
            .cloned()
            .collect();
    }

    if let Some(stage) = update.journey_stage {
        summary.journey_stage = stage;
    }

    summary.total_conversations = history.iter().filter(|e| e.role == Role::User).count();
    summary.last_interaction = Some(Utc::now());
}

/// The trailing window of a history that insight scans look at.
pub fn recent_window(history: &[MemoryEntry]) -> &[MemoryEntry] {
    let start = history.len().saturating_sub(INSIGHT_WINDOW);
    &history[start..]
}

/// Slice `CONCERN_LEAD` chars before `at` through `CONCERN_TRAIL` after it,
/// snapped to char boundaries, trimmed. Returns `None` for captures too
/// short to mean anything.
fn capture_around(content: &str, at: usize) -> Option<String> {
    let start = floor_boundary(content, at.saturating_sub(CONCERN_LEAD));
    let end = floor_boundary(content, (at + CONCERN_TRAIL).min(content.len()));

    let snippet = content[start..end].trim();
    if snippet.chars().count() > MIN_CONCERN_CHARS {
        Some(snippet.to_string())
    } else {
        None
    }
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
