//! Optional sensitive-data screening for outgoing messages.
//!
//! Redaction is advisory: callers run a draft through [`RedactionService`]
//! before sending and decide what to do with the outcome. A redaction
//! failure never blocks the message path.

pub mod heuristic;
pub mod llm;

use crate::sync::core::config::{RedactionConfig, RedactionMode};
use crate::sync::core::errors::{SyncError, SyncResult};

pub use heuristic::HeuristicRedactor;
pub use llm::LlmRedactor;

/// Placeholder substituted for every sensitive value.
pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Result of screening one piece of content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedactionOutcome {
    /// The content with every sensitive value replaced.
    pub redacted_content: String,
    /// The original sensitive values that were found.
    pub sensitive_terms: Vec<String>,
}

impl RedactionOutcome {
    /// An outcome reporting nothing sensitive.
    #[must_use]
    pub fn clean(content: &str) -> Self {
        Self {
            redacted_content: content.to_string(),
            sensitive_terms: Vec::new(),
        }
    }

    /// Whether nothing sensitive was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.sensitive_terms.is_empty()
    }
}

enum Backend {
    Heuristic(HeuristicRedactor),
    Llm(LlmRedactor),
}

/// Mode-dispatching redaction front end.
pub struct RedactionService {
    backend: Backend,
}

impl RedactionService {
    /// Build the configured backend.
    ///
    /// # Errors
    /// Returns an error if the heuristic patterns fail to compile or the
    /// LLM client cannot be built.
    pub fn new(config: &RedactionConfig) -> SyncResult<Self> {
        let backend = match config.mode {
            RedactionMode::Heuristic => Backend::Heuristic(
                HeuristicRedactor::new()
                    .map_err(|err| SyncError::InvalidConfig(err.to_string()))?,
            ),
            RedactionMode::Llm => Backend::Llm(LlmRedactor::new(config)?),
        };
        Ok(Self { backend })
    }

    /// Screen `content` for sensitive values.
    ///
    /// Blank content short-circuits without touching the backend.
    ///
    /// # Errors
    /// Returns an error if the LLM backend call fails.
    pub async fn check(&self, content: &str) -> SyncResult<RedactionOutcome> {
        if content.trim().is_empty() {
            return Ok(RedactionOutcome::clean(content));
        }

        match &self.backend {
            Backend::Heuristic(redactor) => Ok(redactor.redact(content)),
            Backend::Llm(redactor) => redactor.redact(content).await,
        }
    }
}
