use crate::error::AppError;
use crate::intake::{CollectedData, ExtractedFields};
use crate::openai_types::{OpenAIBatchResponse, OpenAIMessage, OpenAIPayload};

use async_trait::async_trait;
use tracing::{debug, error};

const EXTRACTION_INSTRUCTIONS: &str = "You extract intake fields from one utterance of a phone \
call to a service business.  Respond with ONLY a JSON object with the keys intent, caller_name, \
service, vehicle_or_item, location, preferred_time, notes.  intent is one of booking, \
service_request, pricing, hours, other.  Every other value is a string or null.  Only include \
what the caller explicitly stated in this utterance; never infer or invent values.  Use null \
for anything not stated.";

/// One strategy for turning raw speech into structured intake fields.
#[async_trait]
pub trait TurnExtractor: Send + Sync {
    async fn extract(
        &self,
        prior: &CollectedData,
        speech: &str,
    ) -> Result<ExtractedFields, AppError>;
}

/// AI-assisted strategy.  Sends the accumulated record plus the new speech
/// to the chat-completions API and parses the reply as the extraction
/// schema.  Any transport or parse problem is an error for the caller to
/// recover from, never a panic.
pub struct OpenAiExtractor {
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl OpenAiExtractor {
    pub fn new(api_key: String, http_client: reqwest::Client) -> Self {
        Self {
            api_key,
            model: "gpt-4o-mini".to_string(),
            http_client,
        }
    }
}

#[async_trait]
impl TurnExtractor for OpenAiExtractor {
    async fn extract(
        &self,
        prior: &CollectedData,
        speech: &str,
    ) -> Result<ExtractedFields, AppError> {
        let prior_json = serde_json::to_string(prior).map_err(|e| {
            error!(error=%e, "failed to serialize prior intake data");
            AppError("serialize prior data")
        })?;
        let payload = OpenAIPayload {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: EXTRACTION_INSTRUCTIONS.to_string(),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: format!(
                        "Known so far: {prior_json}\n\nCaller just said: \"{speech}\""
                    ),
                },
            ],
            temperature: Some(0.0),
            ..Default::default()
        };
        let resp = self
            .http_client
            .post("https://api.openai.com/v1/chat/completions")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send request to OpenAI");
                AppError("Failed to send request to OpenAI")
            })?;
        let resp = resp.json::<OpenAIBatchResponse>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize openai extraction response");
            AppError("deserialize")
        })?;
        let content = resp
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or(AppError("empty openai response"))?;
        debug!(content=%content, "openai extraction content");
        parse_extraction(content)
    }
}

/// Strip markdown code fences the model sometimes wraps JSON in, then parse
/// as the extraction schema.
pub fn parse_extraction(content: &str) -> Result<ExtractedFields, AppError> {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();
    serde_json::from_str::<ExtractedFields>(trimmed).map_err(|e| {
        error!(error=%e, content=%content, "unparseable extraction content");
        AppError("unparseable extraction content")
    })
}

/// Deterministic fallback strategy: keep the raw speech as a note and let
/// the accumulated record drive the rest.  Cannot fail.
pub struct RuleExtractor;

#[async_trait]
impl TurnExtractor for RuleExtractor {
    async fn extract(
        &self,
        prior: &CollectedData,
        speech: &str,
    ) -> Result<ExtractedFields, AppError> {
        Ok(rule_extract(prior, speech))
    }
}

pub fn rule_extract(_prior: &CollectedData, speech: &str) -> ExtractedFields {
    ExtractedFields {
        notes: Some(speech.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::Intent;

    #[tokio::test]
    async fn rule_extractor_never_fails() {
        let extracted = RuleExtractor
            .extract(&CollectedData::default(), "my hatchback makes a noise")
            .await
            .unwrap();
        assert_eq!(extracted.notes.as_deref(), Some("my hatchback makes a noise"));
        assert_eq!(extracted.service, None);
        assert_eq!(extracted.intent, None);
    }

    #[test]
    fn parses_plain_json() {
        let extracted = parse_extraction(
            r#"{"intent":"service_request","service":"oil change","caller_name":null,
                "vehicle_or_item":null,"location":"123 Main Street",
                "preferred_time":"tomorrow at 3pm","notes":null}"#,
        )
        .unwrap();
        assert_eq!(extracted.intent, Some(Intent::ServiceRequest));
        assert_eq!(extracted.service.as_deref(), Some("oil change"));
        assert_eq!(extracted.location.as_deref(), Some("123 Main Street"));
        assert_eq!(extracted.preferred_time.as_deref(), Some("tomorrow at 3pm"));
    }

    #[test]
    fn parses_fenced_json() {
        let extracted =
            parse_extraction("```json\n{\"intent\":\"pricing\",\"service\":\"haircut\"}\n```")
                .unwrap();
        assert_eq!(extracted.intent, Some(Intent::Pricing));
        assert_eq!(extracted.service.as_deref(), Some("haircut"));
    }

    #[test]
    fn tolerates_missing_keys() {
        let extracted = parse_extraction(r#"{"service":"detailing"}"#).unwrap();
        assert_eq!(extracted.service.as_deref(), Some("detailing"));
        assert_eq!(extracted.intent, None);
    }

    #[test]
    fn rejects_prose() {
        assert!(parse_extraction("The caller wants an oil change.").is_err());
    }

    #[test]
    fn rejects_unknown_intent() {
        assert!(parse_extraction(r#"{"intent":"complaint"}"#).is_err());
    }
}
