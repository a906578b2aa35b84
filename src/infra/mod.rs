pub mod gemini_classifier;
pub mod ndjson_store;
