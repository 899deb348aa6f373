//! System-prompt assembly. Pure string building over static tables — no
//! error conditions, no I/O.

use crate::types::ContextSummary;

/// At most this many key concerns make it into the prompt.
const PROMPT_CONCERN_LIMIT: usize = 3;

/// Build the provider-agnostic system instruction for one turn: the care
/// companion identity, the memory-continuity block (omitted entirely on
/// first contact), and stage- and role-specific guidance from the static
/// tables below.
pub fn build_context_prompt(
    summary: &ContextSummary,
    journey_stage: &str,
    user_role: &str,
    patient_name: &str,
) -> String {
    let memory_block = memory_context(summary);
    let stage_block = stage_expertise(journey_stage);
    let role_block = role_guidance(user_role);

    format!(
        "You are Dr. Maya, a warm and empathetic AI healthcare companion helping {patient_name}.\n\
         \n\
         CORE IDENTITY:\n\
         - Caring, knowledgeable healthcare companion with continuity of care\n\
         - Speak naturally and warmly, like a trusted doctor friend\n\
         - Expert in patient healthcare guidance and emotional support\n\
         \n\
         CURRENT CONTEXT:\n\
         - Patient: {patient_name}\n\
         - Journey stage: {stage_label}\n\
         - Role: {role_label}{memory_block}\n\
         \n\
         {stage_block}\n\
         \n\
         {role_block}\n\
         \n\
         COMMUNICATION STANDARDS:\n\
         - Keep responses conversational, clear, and free of jargon\n\
         - Acknowledge emotions before information\n\
         - Offer specific, actionable next steps\n\
         - Respond directly, without thinking out loud\n\
         \n\
         IMPORTANT MEDICAL GUIDANCE:\n\
         - You are a supportive AI companion, not a replacement for medical care\n\
         - Encourage regular consultation with their healthcare team\n\
         - Respect patient privacy at all times\n\
         - Direct to emergency services for urgent medical situations",
        stage_label = label(journey_stage),
        role_label = label(user_role),
    )
}

/// The continuity block. Empty on first contact so the model never claims a
/// relationship that does not exist yet.
fn memory_context(summary: &ContextSummary) -> String {
    if summary.total_conversations == 0 {
        return String::new();
    }

    let conditions = if summary.conditions.is_empty() {
        "None specified yet".to_string()
    } else {
        summary
            .conditions
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };

    let concerns = if summary.key_concerns.is_empty() {
        "Exploring together".to_string()
    } else {
        summary
            .key_concerns
            .iter()
            .take(PROMPT_CONCERN_LIMIT)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "\n\nPATIENT MEMORY & CONTINUITY:\n\
         - You have had {count} previous conversations with this patient\n\
         - Known conditions: {conditions}\n\
         - Key concerns: {concerns}\n\
         - Continue the conversation with full awareness of previous discussions\n\
         - Reference past conversations naturally and show you remember their journey",
        count = summary.total_conversations,
    )
}

/// `first_hints` reads better as `First Hints` in a prompt.
fn label(tag: &str) -> String {
    crate::types::title_case(&tag.replace('_', " "))
}

/// Stage-specific expertise text, keyed by journey-stage tag. Static
/// lookup, not inferred; unknown stages fall back to general guidance.
pub fn stage_expertise(stage: &str) -> &'static str {
    match stage {
        "first_hints" => {
            "STAGE FOCUS - First Hints & Initial Doctor Visit:\n\
             - Help recognize early symptoms and organize medical history\n\
             - Prepare the patient for a productive first doctor visit\n\
             - Guide initial testing and documentation strategies\n\
             - Flag symptoms that need immediate attention"
        }
        "getting_answers" => {
            "STAGE FOCUS - Getting Answers & Testing:\n\
             - Explain diagnostic tests and what results mean\n\
             - Guide the patient through complex medical workups\n\
             - Help plan sensible next steps after each result\n\
             - Coordinate between multiple specialists and tests"
        }
        "the_diagnosis" => {
            "STAGE FOCUS - The Diagnosis:\n\
             - Explain the condition in plain, unhurried language\n\
             - Support processing the emotional impact of the news\n\
             - Clarify prognosis and the treatment landscape\n\
             - Prepare questions for care-team discussions"
        }
        "second_opinions" => {
            "STAGE FOCUS - Second Opinions & Care Teams:\n\
             - Help evaluate providers and seek second opinions\n\
             - Guide building the right care team\n\
             - Navigate specialist referrals and coordination"
        }
        "treatment_decisions" => {
            "STAGE FOCUS - Treatment Decisions:\n\
             - Compare treatment options, risks, and benefits\n\
             - Support shared decision-making with the care team\n\
             - Weigh personal preferences alongside the evidence"
        }
        "insurance_advocacy" => {
            "STAGE FOCUS - Insurance & Advocacy:\n\
             - Help make sense of coverage, appeals, and prior authorization\n\
             - Guide healthcare financing decisions\n\
             - Support self-advocacy with insurers and billing offices"
        }
        "active_treatment" => {
            "STAGE FOCUS - Active Treatment:\n\
             - Track treatment schedules and side effects\n\
             - Support adherence and day-to-day coping\n\
             - Know when a symptom needs the care team now"
        }
        "care_coordination" => {
            "STAGE FOCUS - Care Coordination:\n\
             - Keep multiple providers on the same page\n\
             - Help manage complex appointment schedules\n\
             - Smooth transitions between care settings"
        }
        "monitoring_adjustments" => {
            "STAGE FOCUS - Monitoring & Adjustments:\n\
             - Track symptoms and treatment response over time\n\
             - Explain dose adjustments and protocol changes\n\
             - Support long-term treatment optimization"
        }
        "family_impact" => {
            "STAGE FOCUS - Family & Relationships:\n\
             - Support family dynamics during illness\n\
             - Guide caregiver communication and planning\n\
             - Help manage relationship strain"
        }
        "financial_work" => {
            "STAGE FOCUS - Financial & Work Impact:\n\
             - Help plan for healthcare costs\n\
             - Guide workplace accommodations and leave policies\n\
             - Point to financial assistance programs"
        }
        "long_term_living" => {
            "STAGE FOCUS - Long-term Living:\n\
             - Support chronic condition management\n\
             - Guide lifestyle adaptations that stick\n\
             - Keep quality of life front and center"
        }
        _ => {
            "STAGE FOCUS - General:\n\
             - Comprehensive healthcare guidance across all journey stages"
        }
    }
}

/// Role-specific communication guidance. Same static-table contract as
/// [`stage_expertise`].
pub fn role_guidance(role: &str) -> &'static str {
    match role {
        "patient" => {
            "ROLE GUIDANCE - Patient:\n\
             - Speak directly to the patient's experience and concerns\n\
             - Keep explanations clear and accessible\n\
             - Build confidence and self-advocacy\n\
             - Tend to the emotional side as much as the medical side"
        }
        "caregiver" => {
            "ROLE GUIDANCE - Caregiver:\n\
             - Address the caregiver's own challenges, not just the patient's\n\
             - Offer practical ways to support the patient effectively\n\
             - Watch for caregiver burnout and encourage self-care\n\
             - Help navigate family communication"
        }
        "provider" => {
            "ROLE GUIDANCE - Provider:\n\
             - Use clinical terminology and evidence-based framing\n\
             - Focus on care coordination and optimization\n\
             - Support clinical decision-making"
        }
        _ => {
            "ROLE GUIDANCE - General:\n\
             - Comprehensive support for anyone involved in the patient's care"
        }
    }
}

/// Tone adjustment for the patient's current emotional state. Appended to
/// the system prompt by the chat pipeline.
pub fn emotional_tone(state: &str) -> &'static str {
    match state {
        "anxious" => "Extra gentle, reassuring approach",
        "overwhelmed" => "Clear, simple explanations, one step at a time",
        "hopeful" => "Encouraging, momentum-building tone",
        "confused" => "Patient clarification and simplification",
        _ => "Supportive, informative tone",
    }
}

/// Provider-output sanitization: if the reply contains a closing
/// `</thinking>` delimiter, only the text after it is the actual response.
/// Replies without the delimiter pass through unchanged.
pub fn strip_thinking(raw: &str) -> &str {
    const CLOSE_TAG: &str = "</thinking>";
    match raw.find(CLOSE_TAG) {
        Some(at) => raw[at + CLOSE_TAG.len()..].trim(),
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryEntry;

    fn returning_summary() -> ContextSummary {
        let history = vec![
            MemoryEntry::user("I'm really worried about the upcoming biopsy next week"),
            MemoryEntry::assistant("That is completely understandable."),
            MemoryEntry::user("my doctor confirmed it is lupus"),
        ];
        let mut summary = ContextSummary::for_patient("patient_jane_doe");
        crate::insights::apply(
            &mut summary,
            crate::insights::scan_window(&history),
            &history,
        );
        summary
    }

    #[test]
    fn first_contact_omits_continuity_language() {
        let summary = ContextSummary::for_patient("patient_jane_doe");
        let prompt = build_context_prompt(&summary, "awareness", "patient", "Jane Doe");
        assert!(!prompt.contains("previous conversations"));
        assert!(!prompt.contains("PATIENT MEMORY"));
        assert!(prompt.contains("Jane Doe"));
    }

    #[test]
    fn returning_patient_gets_memory_block() {
        let summary = returning_summary();
        let prompt = build_context_prompt(&summary, "the_diagnosis", "patient", "Jane Doe");
        assert!(prompt.contains("2 previous conversations"));
        assert!(prompt.contains("Known conditions: Lupus"));
        assert!(prompt.contains("worried about"));
    }

    #[test]
    fn placeholders_when_context_is_sparse() {
        let mut summary = ContextSummary::for_patient("patient_jane_doe");
        summary.total_conversations = 1;
        let prompt = build_context_prompt(&summary, "awareness", "patient", "Jane Doe");
        assert!(prompt.contains("None specified yet"));
        assert!(prompt.contains("Exploring together"));
    }

    #[test]
    fn prompt_caps_concerns_at_three() {
        let mut summary = returning_summary();
        for i in 0..5 {
            summary.key_concerns.insert(format!("concern number {i}"));
        }
        let prompt = build_context_prompt(&summary, "awareness", "patient", "Jane Doe");
        let line = prompt
            .lines()
            .find(|l| l.contains("Key concerns:"))
            .unwrap();
        assert_eq!(line.matches("concern number").count(), 3);
    }

    #[test]
    fn stage_and_role_tables_fall_back_gracefully() {
        assert!(stage_expertise("the_diagnosis").contains("The Diagnosis"));
        assert!(stage_expertise("no_such_stage").contains("General"));
        assert!(role_guidance("caregiver").contains("Caregiver"));
        assert!(role_guidance("martian").contains("General"));
        assert_eq!(emotional_tone("anxious"), "Extra gentle, reassuring approach");
        assert!(emotional_tone("unlisted").starts_with("Supportive"));
    }

    #[test]
    fn stage_tags_render_as_readable_labels() {
        let summary = ContextSummary::for_patient("patient_jane_doe");
        let prompt = build_context_prompt(&summary, "first_hints", "caregiver", "Jane Doe");
        assert!(prompt.contains("Journey stage: First Hints"));
        assert!(prompt.contains("Role: Caregiver"));
    }

    #[test]
    fn strip_thinking_keeps_only_the_reply() {
        let raw = "<thinking>weighing options here</thinking>\n  You should rest today.";
        assert_eq!(strip_thinking(raw), "You should rest today.");
    }

    #[test]
    fn strip_thinking_passes_plain_replies_through() {
        assert_eq!(strip_thinking("Take it easy."), "Take it easy.");
        assert_eq!(strip_thinking(""), "");
    }
}
