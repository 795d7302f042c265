//! Heuristic structural checks for generated documents.
//!
//! Findings are [`ValidationWarning`]s: they are logged and never block the
//! workflow, since a generative stage cannot guarantee section presence.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// A non-fatal document finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

const PRD_SECTIONS: &[&str] = &[
    "overview",
    "user stories",
    "functional requirements",
    "non-functional requirements",
    "success metrics",
];

const DESIGN_SECTIONS: &[&str] = &[
    "architecture overview",
    "system design",
    "file structure",
    "implementation approach",
];

const MIN_PRD_CHARS: usize = 500;
const MIN_DESIGN_CHARS: usize = 800;

static USER_STORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)as an?\s+.+?\s+i want\s+.+?\s+so that").unwrap());

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\.\.|\b(etc|something|anything)\b").unwrap());

/// Check a requirements document for expected sections and story format.
pub fn validate_prd(content: &str) -> Vec<ValidationWarning> {
    let lower = content.to_lowercase();
    let mut warnings = missing_sections(&lower, PRD_SECTIONS);
    if !USER_STORY_RE.is_match(&lower) {
        warnings.push(ValidationWarning::new(
            "no user stories in 'As a... I want... so that...' form",
        ));
    }
    if content.chars().count() < MIN_PRD_CHARS {
        warnings.push(ValidationWarning::new(format!(
            "PRD is too short (under {MIN_PRD_CHARS} characters)"
        )));
    }
    if !lower.contains("acceptance criteria") {
        warnings.push(ValidationWarning::new("missing acceptance criteria"));
    }
    warnings
}

/// Check a design document for expected sections.
pub fn validate_design(content: &str) -> Vec<ValidationWarning> {
    let lower = content.to_lowercase();
    let mut warnings = missing_sections(&lower, DESIGN_SECTIONS);
    if !lower.contains("technology stack") && !lower.contains("tech stack") {
        warnings.push(ValidationWarning::new("missing technology stack"));
    }
    if !lower.contains("data model") {
        warnings.push(ValidationWarning::new("missing data model section"));
    }
    if content.chars().count() < MIN_DESIGN_CHARS {
        warnings.push(ValidationWarning::new(format!(
            "design is too short (under {MIN_DESIGN_CHARS} characters)"
        )));
    }
    warnings
}

/// Check a user requirement before a session starts.
pub fn validate_requirement(requirement: &str) -> Vec<ValidationWarning> {
    let trimmed = requirement.trim();
    let mut warnings = Vec::new();
    if trimmed.chars().count() < 10 {
        warnings.push(ValidationWarning::new(
            "requirement is too short (minimum 10 characters)",
        ));
    }
    if trimmed.split_whitespace().count() < 3 {
        warnings.push(ValidationWarning::new(
            "requirement must contain at least 3 words",
        ));
    }
    let lower = trimmed.to_lowercase();
    for found in PLACEHOLDER_RE.find_iter(&lower) {
        warnings.push(ValidationWarning::new(format!(
            "requirement contains placeholder '{}'",
            found.as_str()
        )));
    }
    warnings
}

fn missing_sections(lower: &str, sections: &[&str]) -> Vec<ValidationWarning> {
    sections
        .iter()
        .filter(|section| !lower.contains(*section))
        .map(|section| ValidationWarning::new(format!("missing section: {section}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_PRD: &str = "# Overview\nA todo app for small teams.\n\n\
## User Stories\nAs a team lead I want to assign tasks so that work is visible.\n\
Acceptance criteria: tasks show an assignee and a due date.\n\n\
## Functional Requirements\n- create, edit and delete tasks\n- assign tasks to members\n\n\
## Non-Functional Requirements\n- p95 latency under 200ms for list views\n- works offline\n\n\
## Success Metrics\n- 80% weekly active usage within a month of launch\n\
- fewer than 2 support tickets per 100 users per week\n\
- onboarding completed by 90% of invited members within two days\n";

    #[test]
    fn complete_prd_has_no_warnings() {
        assert!(GOOD_PRD.len() >= MIN_PRD_CHARS, "fixture must meet length");
        assert_eq!(validate_prd(GOOD_PRD), Vec::new());
    }

    #[test]
    fn short_prd_reports_each_gap() {
        let warnings = validate_prd("# Overview\nshort");
        let messages: Vec<String> = warnings.iter().map(ToString::to_string).collect();
        assert!(messages.contains(&"missing section: user stories".to_string()));
        assert!(messages.iter().any(|m| m.contains("too short")));
        assert!(messages.iter().any(|m| m.contains("acceptance criteria")));
        assert!(!messages.contains(&"missing section: overview".to_string()));
    }

    #[test]
    fn design_accepts_tech_stack_alias() {
        let warnings = validate_design("Tech stack: Rust");
        assert!(!warnings.iter().any(|w| w.message.contains("technology stack")));
        assert!(warnings.iter().any(|w| w.message.contains("data model")));
        assert!(warnings.iter().any(|w| w.message == "missing section: file structure"));
    }

    #[test]
    fn requirement_checks_length_words_and_placeholders() {
        assert!(validate_requirement("Build a REST API for managing todo lists").is_empty());

        let warnings = validate_requirement("app etc");
        assert_eq!(warnings.len(), 3);

        // `fetch` contains `etc` but is not a placeholder.
        assert!(validate_requirement("Fetch weather data every hour").is_empty());
    }
}
