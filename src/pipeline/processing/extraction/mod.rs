//! LLM aspect/polarity extraction: prompt contract, response parsing and
//! normalization of results into extraction items.

pub mod batch;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::domain::{Aspect, Polarity, QueueBucket};
use crate::pipeline::processing::queue::QueueItem;

/// Longest error message kept on a result row
pub const MAX_ERROR_MESSAGE_CHARS: usize = 200;

/// Fixed instruction describing the output contract to the classifier
pub const SYSTEM_INSTRUCTION: &str = r#"You analyze Korean sunscreen and skincare reviews.
For every review block marked "=== REVIEW_ID: <id> ===", extract each product aspect the reviewer talks about
and whether their expectation for it was met.

Return ONLY JSON with this exact shape:
{"reviews": [{"review_id": "<id>", "items": [{"aspect": "<ASPECT>", "expectation": "<what the reviewer expected>",
"experience": "<what actually happened>", "polarity": "met|unmet|mixed|unknown", "context": "<situation, or null>",
"evidence": "<short quote from the review>", "confidence": 0.0}], "notes": "<optional>"}]}

ASPECT must be one of: WHITECAST, TONEUP, OILINESS, STICKINESS, PILLING, ABSORPTION, DRYNESS, MOISTURE,
FLAKING, EYE_STING, IRRITATION, TROUBLE, SCENT, WATERPROOF, LONGEVITY, WHITE_RESIDUE, TEXTURE_HEAVY,
TEXTURE_LIGHT, STAINING, OTHER.

Rules:
- Include every requested review_id exactly once, even when it has no items.
- "mixed" means the expectation was met in one situation and not in another.
- Evidence must be copied from the review text. Confidence is between 0 and 1.
- The bracketed line at the top of each review holds rule-based hints; use them only as context."#;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Primary model first, then fallbacks in order
    pub models: Vec<String>,
    pub batch_size: usize,
    /// Requests per minute; sets the fixed delay between batches
    pub requests_per_minute: u32,
    /// Calls per model before moving to the next one
    pub max_retries: u32,
    pub initial_backoff_secs: f64,
    pub max_backoff_secs: f64,
    /// Checkpoint every N batches
    pub save_every: usize,
    /// Per HTTP call
    pub timeout_secs: u64,
    pub api_base_url: String,
    pub temperature: f32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            models: vec!["gemini-2.0-flash".to_string(), "gemini-1.5-flash".to_string()],
            batch_size: 10,
            requests_per_minute: 10,
            max_retries: 5,
            initial_backoff_secs: 10.0,
            max_backoff_secs: 120.0,
            save_every: 50,
            timeout_secs: 120,
            api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: 0.1,
        }
    }
}

/// Typed per-review failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionErrorType {
    /// The whole response did not parse as the expected structure
    JsonParse,
    /// The response parsed but did not mention this review
    MissingInResponse,
    ApiError,
    RateLimitError,
}

impl ExtractionErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionErrorType::JsonParse => "JSON_PARSE",
            ExtractionErrorType::MissingInResponse => "MISSING_IN_RESPONSE",
            ExtractionErrorType::ApiError => "API_ERROR",
            ExtractionErrorType::RateLimitError => "RATE_LIMIT_ERROR",
        }
    }
}

/// Outcome of extraction for one queued review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub review_id: String,
    pub goods_no: Option<String>,
    pub bucket: QueueBucket,
    /// Model that answered, or the last model tried
    pub model_name: Option<String>,
    /// The review's entry from the response, re-serialized
    pub extraction_json: Option<String>,
    pub parsed_ok: bool,
    pub error_type: Option<ExtractionErrorType>,
    pub error_message: Option<String>,
    /// Token usage of the whole batch call
    pub prompt_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    /// Seconds spent in the batch call
    pub response_time: f64,
    pub created_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn failed(
        item: &QueueItem,
        model: Option<&str>,
        error_type: ExtractionErrorType,
        message: &str,
        response_time: f64,
    ) -> Self {
        Self {
            review_id: item.review_id.clone(),
            goods_no: item.goods_no.clone(),
            bucket: item.bucket,
            model_name: model.map(str::to_string),
            extraction_json: None,
            parsed_ok: false,
            error_type: Some(error_type),
            error_message: Some(message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()),
            prompt_tokens: None,
            output_tokens: None,
            response_time,
            created_at: Utc::now(),
        }
    }
}

/// One (review, aspect, polarity) finding, ready to be joined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionItem {
    pub review_id: String,
    pub goods_no: Option<String>,
    pub bucket: QueueBucket,
    pub aspect: Aspect,
    /// Label as returned, kept when it fell outside the vocabulary
    pub aspect_raw: String,
    pub polarity: Polarity,
    pub expectation: Option<String>,
    pub experience: Option<String>,
    pub context: Option<String>,
    pub evidence: Option<String>,
    pub confidence: Option<f64>,
    pub model_name: Option<String>,
}

/// Response envelope returned by the classifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResponse {
    pub reviews: Vec<ReviewExtraction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewExtraction {
    #[serde(deserialize_with = "string_or_number")]
    pub review_id: String,
    #[serde(default)]
    pub items: Vec<RawExtractionItem>,
    #[serde(default)]
    pub notes: Option<serde_json::Value>,
}

/// Item as the classifier wrote it; fields are loosely typed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawExtractionItem {
    pub aspect: Option<String>,
    pub expectation: Option<String>,
    pub experience: Option<String>,
    pub polarity: Option<String>,
    pub context: Option<String>,
    pub evidence: Option<String>,
    pub confidence: Option<serde_json::Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "review_id must be a string, got {}",
            other
        ))),
    }
}

/// Batch prompt: one marked block per review.
pub fn build_prompt(items: &[QueueItem]) -> String {
    items
        .iter()
        .map(|item| format!("=== REVIEW_ID: {} ===\n{}\n", item.review_id, item.input_text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses a classifier reply, tolerating markdown code fences around the JSON.
pub fn parse_response(text: &str) -> Result<ExtractionResponse, serde_json::Error> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.trim_start();
        if let Some(inner) = body.strip_suffix("```") {
            body = inner;
        }
        body = body.trim();
    }
    serde_json::from_str(body)
}

/// Result rows for one batch whose call returned `text`.
pub fn results_from_response(
    batch: &[QueueItem],
    model: &str,
    text: &str,
    prompt_tokens: Option<u64>,
    output_tokens: Option<u64>,
    response_time: f64,
) -> Vec<ExtractionResult> {
    let parsed = match parse_response(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Unparseable response from {}: {}", model, e);
            return batch
                .iter()
                .map(|item| {
                    ExtractionResult::failed(
                        item,
                        Some(model),
                        ExtractionErrorType::JsonParse,
                        &e.to_string(),
                        response_time,
                    )
                })
                .collect();
        }
    };

    let mut by_id: HashMap<&str, &ReviewExtraction> = HashMap::new();
    for entry in &parsed.reviews {
        by_id.entry(entry.review_id.as_str()).or_insert(entry);
    }

    batch
        .iter()
        .map(|item| match by_id.get(item.review_id.as_str()) {
            Some(entry) => ExtractionResult {
                review_id: item.review_id.clone(),
                goods_no: item.goods_no.clone(),
                bucket: item.bucket,
                model_name: Some(model.to_string()),
                extraction_json: serde_json::to_string(entry).ok(),
                parsed_ok: true,
                error_type: None,
                error_message: None,
                prompt_tokens,
                output_tokens,
                response_time,
                created_at: Utc::now(),
            },
            None => ExtractionResult::failed(
                item,
                Some(model),
                ExtractionErrorType::MissingInResponse,
                "review_id not present in response",
                response_time,
            ),
        })
        .collect()
}

fn confidence_value(raw: &Option<serde_json::Value>) -> Option<f64> {
    match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Flattens successful results into extraction items. Results that fail to
/// re-parse are skipped with a warning.
pub fn normalize_items(results: &[ExtractionResult]) -> Vec<ExtractionItem> {
    let mut items = Vec::new();
    for result in results.iter().filter(|r| r.parsed_ok) {
        let Some(json) = result.extraction_json.as_deref() else {
            continue;
        };
        let entry: ReviewExtraction = match serde_json::from_str(json) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping stored extraction for {}: {}", result.review_id, e);
                continue;
            }
        };
        for raw in entry.items {
            let aspect_raw = raw.aspect.clone().unwrap_or_default();
            items.push(ExtractionItem {
                review_id: result.review_id.clone(),
                goods_no: result.goods_no.clone(),
                bucket: result.bucket,
                aspect: Aspect::parse_lenient(&aspect_raw),
                aspect_raw,
                polarity: Polarity::parse_lenient(raw.polarity.as_deref().unwrap_or("")),
                expectation: raw.expectation,
                experience: raw.experience,
                context: raw.context,
                evidence: raw.evidence,
                confidence: confidence_value(&raw.confidence),
                model_name: result.model_name.clone(),
            });
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn create_queue_item(id: &str) -> QueueItem {
        QueueItem {
            queue_id: Uuid::new_v4(),
            review_id: id.to_string(),
            goods_no: Some("A1".to_string()),
            bucket: QueueBucket::LowRating,
            priority_score: 1.0,
            input_text: format!("[rating=1]\n\n{} text", id),
            meta_json: "{}".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_prompt_blocks() {
        let prompt = build_prompt(&[create_queue_item("r1"), create_queue_item("r2")]);
        assert!(prompt.starts_with("=== REVIEW_ID: r1 ===\n[rating=1]\n\nr1 text\n"));
        assert!(prompt.contains("=== REVIEW_ID: r2 ==="));
    }

    #[test]
    fn test_parse_response_strips_fences() {
        let fenced = "```json\n{\"reviews\": [{\"review_id\": 7, \"items\": []}]}\n```";
        let parsed = parse_response(fenced).unwrap();
        assert_eq!(parsed.reviews[0].review_id, "7");
        assert!(parse_response("not json").is_err());
    }

    #[test]
    fn test_missing_review_is_typed_failure() {
        let batch = vec![create_queue_item("r1"), create_queue_item("r2")];
        let text = r#"{"reviews": [{"review_id": "r1", "items": [{"aspect": "PILLING", "polarity": "unmet"}]}]}"#;
        let results = results_from_response(&batch, "m", text, Some(10), Some(5), 0.5);

        assert!(results[0].parsed_ok);
        assert_eq!(results[0].prompt_tokens, Some(10));
        assert!(!results[1].parsed_ok);
        assert_eq!(
            results[1].error_type,
            Some(ExtractionErrorType::MissingInResponse)
        );
    }

    #[test]
    fn test_unparseable_response_fails_whole_batch() {
        let batch = vec![create_queue_item("r1"), create_queue_item("r2")];
        let results = results_from_response(&batch, "m", "{\"oops\": ", None, None, 0.1);
        assert!(results
            .iter()
            .all(|r| r.error_type == Some(ExtractionErrorType::JsonParse)));
    }

    #[test]
    fn test_normalize_items_maps_vocabulary() {
        let batch = vec![create_queue_item("r1")];
        let text = r#"{"reviews": [{"review_id": "r1", "items": [
            {"aspect": "pilling", "polarity": "MIXED", "evidence": "밀려요", "confidence": "0.8"},
            {"aspect": "PRICE", "polarity": "sort of"}
        ]}]}"#;
        let results = results_from_response(&batch, "m", text, None, None, 0.1);
        let items = normalize_items(&results);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].aspect, Aspect::Pilling);
        assert_eq!(items[0].polarity, Polarity::Mixed);
        assert_eq!(items[0].confidence, Some(0.8));
        assert_eq!(items[1].aspect, Aspect::Other);
        assert_eq!(items[1].aspect_raw, "PRICE");
        assert_eq!(items[1].polarity, Polarity::Unknown);
    }

    #[test]
    fn test_error_message_is_bounded() {
        let item = create_queue_item("r1");
        let long = "x".repeat(500);
        let result =
            ExtractionResult::failed(&item, None, ExtractionErrorType::ApiError, &long, 0.0);
        assert_eq!(
            result.error_message.map(|m| m.chars().count()),
            Some(MAX_ERROR_MESSAGE_CHARS)
        );
    }
}
