use tracing::debug;

use crate::models::{CheckInAnswers, RefillDecision};

/// Phrases in free text that always route a check-in to a provider.
pub const RED_FLAG_KEYWORDS: [&str; 8] = [
    "chest pain",
    "shortness of breath",
    "fainting",
    "suicidal",
    "allergic reaction",
    "swelling",
    "vision loss",
    "seizure",
];

pub const SEVERE_SIDE_EFFECT: u8 = 7;
pub const LOW_EFFECTIVENESS: u8 = 2;

/// Escalation table for refill check-ins. Every rule that fires adds a reason;
/// no reasons means the refill can be approved without a provider.
pub struct RefillRules;

impl RefillRules {
    pub fn evaluate(answers: &CheckInAnswers) -> RefillDecision {
        let mut reasons = Vec::new();

        if answers.side_effect_severity >= SEVERE_SIDE_EFFECT {
            reasons.push(format!(
                "side effect severity {} of 10",
                answers.side_effect_severity
            ));
        }

        for keyword in red_flags(answers) {
            reasons.push(format!("reported \"{}\"", keyword));
        }

        if !answers.taking_as_prescribed {
            reasons.push("not taking medication as prescribed".to_string());
        }

        if has_entries(&answers.new_medications) {
            reasons.push("started new medications".to_string());
        }

        if has_entries(&answers.new_conditions) {
            reasons.push("new medical conditions".to_string());
        }

        if answers.pregnant_or_planning {
            reasons.push("pregnant or planning pregnancy".to_string());
        }

        if answers.effectiveness <= LOW_EFFECTIVENESS {
            reasons.push(format!("low effectiveness rating ({})", answers.effectiveness));
        }

        debug!("Refill rules produced {} reasons", reasons.len());
        RefillDecision { reasons }
    }

    pub fn validate(answers: &CheckInAnswers) -> Result<(), String> {
        let mut problems = Vec::new();
        if answers.side_effect_severity > 10 {
            problems.push("side_effect_severity: must be between 0 and 10");
        }
        if !(1..=5).contains(&answers.effectiveness) {
            problems.push("effectiveness: must be between 1 and 5");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

fn has_entries(values: &[String]) -> bool {
    values.iter().any(|v| !v.trim().is_empty())
}

/// Each keyword is reported once even if it appears in several fields.
fn red_flags(answers: &CheckInAnswers) -> Vec<&'static str> {
    let mut text = String::new();
    for part in [answers.side_effects.as_deref(), answers.notes.as_deref()]
        .into_iter()
        .flatten()
    {
        text.push_str(&part.to_lowercase());
        text.push('\n');
    }
    for condition in &answers.new_conditions {
        text.push_str(&condition.to_lowercase());
        text.push('\n');
    }

    RED_FLAG_KEYWORDS
        .into_iter()
        .filter(|keyword| text.contains(keyword))
        .collect()
}
