//! Regex-based redaction, no network calls.

use regex::Regex;
use tracing::debug;

use crate::redaction::{REDACTED_PLACEHOLDER, RedactionOutcome};

/// A pattern rule mapping a regex to a category of sensitive data.
struct PatternRule {
    pattern: Regex,
    category: &'static str,
}

/// Pattern-matching redactor for the common sensitive-data shapes:
/// email addresses, credit card numbers, social security numbers, and
/// phone numbers.
pub struct HeuristicRedactor {
    rules: Vec<PatternRule>,
}

impl HeuristicRedactor {
    /// Compile the redaction patterns.
    ///
    /// # Errors
    /// Returns an error if any regex pattern is invalid.
    pub fn new() -> Result<Self, regex::Error> {
        // Card numbers before phone numbers: a spaced card number contains
        // phone-shaped digit runs.
        let rules = vec![
            PatternRule {
                pattern: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
                category: "email address",
            },
            PatternRule {
                pattern: Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b")?,
                category: "credit card number",
            },
            PatternRule {
                pattern: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b")?,
                category: "social security number",
            },
            PatternRule {
                pattern: Regex::new(
                    r"(?:\+\d{1,2}[ .-]?)?\(?\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}\b",
                )?,
                category: "phone number",
            },
        ];
        Ok(Self { rules })
    }

    /// Replace every sensitive match with the redaction placeholder.
    #[must_use]
    pub fn redact(&self, content: &str) -> RedactionOutcome {
        let mut redacted = content.to_string();
        let mut terms = Vec::new();

        for rule in &self.rules {
            for found in rule.pattern.find_iter(&redacted) {
                debug!("redacting {} match", rule.category);
                terms.push(found.as_str().to_string());
            }
            redacted = rule
                .pattern
                .replace_all(&redacted, REDACTED_PLACEHOLDER)
                .into_owned();
        }

        RedactionOutcome {
            redacted_content: redacted,
            sensitive_terms: terms,
        }
    }
}
