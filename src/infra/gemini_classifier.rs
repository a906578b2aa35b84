//! Gemini `generateContent` implementation of the extraction classifier.
//!
//! Rate limiting (HTTP 429 or a RESOURCE_EXHAUSTED status) is reported as
//! `ClassifierError::RateLimited`; the batch driver owns backoff and fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::app::ports::{ClassifierResponse, ExtractionClassifier};
use crate::error::{ClassifierError, PipelineError, Result};
use crate::pipeline::processing::extraction::ExtractionConfig;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
const MAX_OUTPUT_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    #[serde(rename = "systemInstruction")]
    system_instruction: GeminiContent<'a>,
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    error: Option<GeminiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeminiError {
    message: String,
    status: Option<String>,
}

pub struct GeminiClassifier {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    temperature: f32,
}

impl GeminiClassifier {
    pub fn new(api_key: String, config: &ExtractionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        })
    }

    /// Reads the API key from the environment (`.env` is loaded by the CLI).
    pub fn from_env(config: &ExtractionConfig) -> Result<Self> {
        let api_key = read_api_key(API_KEY_ENV)?;
        Self::new(api_key, config)
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }
}

fn read_api_key(name: &str) -> Result<String> {
    std::env::var(name).map_err(|source| PipelineError::Env {
        name: name.to_string(),
        source,
    })
}

/// Maps a failed HTTP exchange onto the classifier error taxonomy.
fn error_from_status(status: u16, body: &str) -> ClassifierError {
    let message = format!("HTTP {}: {}", status, body);
    if status == 429 || body.to_ascii_uppercase().contains("RESOURCE_EXHAUSTED") {
        ClassifierError::RateLimited(message)
    } else {
        ClassifierError::Api(message)
    }
}

/// Extracts the reply text and token usage from a successful response body.
fn parse_reply(body: &str) -> std::result::Result<ClassifierResponse, ClassifierError> {
    let response: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| ClassifierError::Api(format!("unreadable response envelope: {}", e)))?;

    if let Some(error) = response.error {
        return Err(match error.status.as_deref() {
            Some("RESOURCE_EXHAUSTED") => ClassifierError::RateLimited(error.message),
            _ => ClassifierError::Api(error.message),
        });
    }

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .map(|c| {
            c.content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(ClassifierError::Api("response has no candidate text".to_string()));
    }

    let usage = response.usage_metadata.unwrap_or_default();
    Ok(ClassifierResponse {
        text,
        prompt_tokens: usage.prompt_token_count,
        output_tokens: usage.candidates_token_count,
    })
}

#[async_trait]
impl ExtractionClassifier for GeminiClassifier {
    async fn classify(
        &self,
        model: &str,
        system_instruction: &str,
        prompt: &str,
    ) -> std::result::Result<ClassifierResponse, ClassifierError> {
        let request = GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: system_instruction,
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        debug!("POST generateContent model={} prompt_chars={}", model, prompt.chars().count());
        let response = self
            .client
            .post(self.endpoint(model))
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifierError::Api(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ClassifierError::Api(format!("failed to read response body: {}", e)))?;

        if !(200..300).contains(&status) {
            return Err(error_from_status(status, &body));
        }
        parse_reply(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_detection() {
        assert!(matches!(
            error_from_status(429, "slow down"),
            ClassifierError::RateLimited(_)
        ));
        assert!(matches!(
            error_from_status(400, r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#),
            ClassifierError::RateLimited(_)
        ));
        assert!(matches!(
            error_from_status(500, "internal"),
            ClassifierError::Api(_)
        ));
    }

    #[test]
    fn test_missing_api_key_is_env_error() {
        let err = read_api_key("REVIEW_MINER_TEST_KEY_NEVER_SET").unwrap_err();
        match err {
            PipelineError::Env { name, source } => {
                assert_eq!(name, "REVIEW_MINER_TEST_KEY_NEVER_SET");
                assert_eq!(source, std::env::VarError::NotPresent);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_reply_with_usage() {
        let body = r#"{
            "candidates": [{"content": {"parts": [{"text": "{\"reviews\": "}, {"text": "[]}"}]}}],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 8}
        }"#;
        let reply = parse_reply(body).unwrap();
        assert_eq!(reply.text, r#"{"reviews": []}"#);
        assert_eq!(reply.prompt_tokens, Some(120));
        assert_eq!(reply.output_tokens, Some(8));
    }

    #[test]
    fn test_parse_reply_errors() {
        assert!(matches!(
            parse_reply(r#"{"candidates": []}"#),
            Err(ClassifierError::Api(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"error": {"message": "quota", "status": "RESOURCE_EXHAUSTED"}}"#),
            Err(ClassifierError::RateLimited(_))
        ));
    }

    #[test]
    fn test_request_shape() {
        let request = GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart { text: "sys" }],
            },
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiPart { text: "prompt" }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.1,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(value["systemInstruction"].get("role").is_none());
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[test]
    fn test_endpoint() {
        let classifier = GeminiClassifier::new("k".to_string(), &ExtractionConfig::default()).unwrap();
        assert_eq!(
            classifier.endpoint("gemini-2.0-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent?key=k"
        );
    }
}
