//! LLM-backed redaction via Ollama.

use reqwest::Client as ReqwestClient;
use rig::client::CompletionClient;
use rig::completion::CompletionModel;
use rig::message::AssistantContent;
use rig::providers::ollama;
use tracing::warn;

use crate::redaction::RedactionOutcome;
use crate::sync::core::config::RedactionConfig;
use crate::sync::core::errors::{SyncError, SyncResult};

const SYSTEM_PROMPT: &str = "You redact sensitive information from chat messages: \
phone numbers, email addresses, social security numbers, and credit card numbers. \
Replace each sensitive value with [REDACTED]. Return a strict JSON object with \
fields: redacted_content (string), sensitive_terms (array of the original values). \
If nothing is sensitive, return the message unchanged with an empty array.";

/// LLM-assisted redactor.
pub struct LlmRedactor {
    model: ollama::CompletionModel,
    temperature: f64,
}

impl LlmRedactor {
    /// Create a redactor using the configured completion model.
    ///
    /// # Errors
    /// Returns an error if the Ollama client cannot be built.
    pub fn new(config: &RedactionConfig) -> SyncResult<Self> {
        let builder = ollama::Client::<ReqwestClient>::builder().api_key(rig::client::Nothing);
        let builder = if let Some(base_url) = &config.base_url {
            builder.base_url(base_url)
        } else {
            builder
        };
        let client = builder
            .build()
            .map_err(|err| SyncError::ExternalService(err.to_string()))?;
        let model = client.completion_model(config.model.clone());
        Ok(Self {
            model,
            temperature: config.temperature,
        })
    }

    /// Redact sensitive values from `content` using the model.
    ///
    /// Output the model fails to produce as valid JSON is treated as "no
    /// redaction": the original content comes back with no terms.
    ///
    /// # Errors
    /// Returns an error if the completion call fails.
    pub async fn redact(&self, content: &str) -> SyncResult<RedactionOutcome> {
        let request = self
            .model
            .completion_request(content.to_string())
            .preamble(SYSTEM_PROMPT.to_string())
            .temperature(self.temperature)
            .build();

        let response = self
            .model
            .completion(request)
            .await
            .map_err(|err| SyncError::ExternalService(err.to_string()))?;
        let text = extract_text(&response.choice);

        Ok(parse_reply(&text, content))
    }
}

/// Interpret the model's output, falling back to the untouched content
/// when it is not the expected JSON object.
fn parse_reply(text: &str, content: &str) -> RedactionOutcome {
    match serde_json::from_str::<RedactionReply>(text) {
        Ok(reply) => RedactionOutcome {
            redacted_content: reply
                .redacted_content
                .unwrap_or_else(|| content.to_string()),
            sensitive_terms: reply.sensitive_terms.unwrap_or_default(),
        },
        Err(err) => {
            warn!("unparseable redaction output, passing content through: {err}");
            RedactionOutcome::clean(content)
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct RedactionReply {
    redacted_content: Option<String>,
    sensitive_terms: Option<Vec<String>>,
}

fn extract_text(choice: &rig::OneOrMany<AssistantContent>) -> String {
    let mut out = String::new();
    for content in choice.iter() {
        if let AssistantContent::Text(text) = content {
            out.push_str(&text.text);
        }
    }
    out
}
