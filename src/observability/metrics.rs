//! Metrics for the review mining pipeline
//!
//! Every stage records through the functions below using the standard
//! Prometheus naming conventions. Without an installed recorder the calls
//! are no-ops, so batch runs pay nothing unless `metrics.listen_addr` is set.

use std::fmt;
use std::net::SocketAddr;
use tracing::info;

use crate::error::{PipelineError, Result};

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Normalize metrics
    NormalizeRecordsProcessed,
    NormalizeDerivedIds,
    NormalizeInvalidRatings,
    NormalizeNoiseFlagged,

    // Dedup metrics
    DedupRowsIn,
    DedupRowsOut,
    DedupConflicts,

    // Tagging metrics
    TaggingReviewsTagged,
    TaggingGoldenNuggets,

    // Queue metrics
    QueueItemsSelected,

    // Extraction metrics
    ExtractionBatchesSucceeded,
    ExtractionBatchesFailed,
    ExtractionRateLimitHits,
    ExtractionCallDuration,
    ExtractionPromptTokens,
    ExtractionOutputTokens,
    ExtractionReviewFailures,

    // Pivot metrics
    PivotItemsJoined,
    PivotJoinSuccessRate,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    /// Get the metric name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::NormalizeRecordsProcessed => "review_miner_normalize_records_processed_total",
            MetricName::NormalizeDerivedIds => "review_miner_normalize_derived_ids_total",
            MetricName::NormalizeInvalidRatings => "review_miner_normalize_invalid_ratings_total",
            MetricName::NormalizeNoiseFlagged => "review_miner_normalize_noise_flagged_total",

            MetricName::DedupRowsIn => "review_miner_dedup_rows_in_total",
            MetricName::DedupRowsOut => "review_miner_dedup_rows_out_total",
            MetricName::DedupConflicts => "review_miner_dedup_conflicts_total",

            MetricName::TaggingReviewsTagged => "review_miner_tagging_reviews_tagged_total",
            MetricName::TaggingGoldenNuggets => "review_miner_tagging_golden_nuggets_total",

            MetricName::QueueItemsSelected => "review_miner_queue_items_selected_total",

            MetricName::ExtractionBatchesSucceeded => "review_miner_extraction_batches_succeeded_total",
            MetricName::ExtractionBatchesFailed => "review_miner_extraction_batches_failed_total",
            MetricName::ExtractionRateLimitHits => "review_miner_extraction_rate_limit_hits_total",
            MetricName::ExtractionCallDuration => "review_miner_extraction_call_duration_seconds",
            MetricName::ExtractionPromptTokens => "review_miner_extraction_prompt_tokens_total",
            MetricName::ExtractionOutputTokens => "review_miner_extraction_output_tokens_total",
            MetricName::ExtractionReviewFailures => "review_miner_extraction_review_failures_total",

            MetricName::PivotItemsJoined => "review_miner_pivot_items_joined_total",
            MetricName::PivotJoinSuccessRate => "review_miner_pivot_join_success_rate",
        }
    }
}

/// Installs the Prometheus recorder with an HTTP scrape endpoint on `listen_addr`.
pub fn init(listen_addr: &str) -> Result<()> {
    let addr: SocketAddr = listen_addr
        .parse()
        .map_err(|e| PipelineError::Config(format!("invalid metrics.listen_addr {}: {}", listen_addr, e)))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| PipelineError::Config(format!("failed to install Prometheus recorder: {}", e)))?;

    info!("Metrics endpoint listening on {}", addr);
    Ok(())
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    pub fn records_processed(count: usize) {
        ::metrics::counter!(MetricName::NormalizeRecordsProcessed.as_str()).increment(count as u64);
    }

    pub fn derived_ids(count: usize) {
        ::metrics::counter!(MetricName::NormalizeDerivedIds.as_str()).increment(count as u64);
    }

    pub fn invalid_ratings(count: usize) {
        ::metrics::counter!(MetricName::NormalizeInvalidRatings.as_str()).increment(count as u64);
    }

    /// Record rows flagged as trial or low-information
    pub fn noise_flagged(kind: &str, count: usize) {
        ::metrics::counter!(MetricName::NormalizeNoiseFlagged.as_str(), "kind" => kind.to_string())
            .increment(count as u64);
    }
}

// ============================================================================
// Dedup Metrics
// ============================================================================

pub mod dedup {
    use super::MetricName;

    /// Record row counts before and after merging
    pub fn rows_merged(before: usize, after: usize) {
        ::metrics::counter!(MetricName::DedupRowsIn.as_str()).increment(before as u64);
        ::metrics::counter!(MetricName::DedupRowsOut.as_str()).increment(after as u64);
    }

    pub fn conflicts_detected(count: usize) {
        ::metrics::counter!(MetricName::DedupConflicts.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Tagging Metrics
// ============================================================================

pub mod tagging {
    use super::MetricName;

    pub fn reviews_tagged(count: usize) {
        ::metrics::counter!(MetricName::TaggingReviewsTagged.as_str()).increment(count as u64);
    }

    pub fn golden_nuggets(count: usize) {
        ::metrics::counter!(MetricName::TaggingGoldenNuggets.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Queue Metrics
// ============================================================================

pub mod queue {
    use super::MetricName;

    /// Record how many reviews a sampling bucket took
    pub fn bucket_filled(bucket: &str, count: usize) {
        ::metrics::counter!(MetricName::QueueItemsSelected.as_str(), "bucket" => bucket.to_string())
            .increment(count as u64);
    }
}

// ============================================================================
// Extraction Metrics
// ============================================================================

pub mod extraction {
    use super::MetricName;

    pub fn batch_succeeded(model: &str) {
        ::metrics::counter!(MetricName::ExtractionBatchesSucceeded.as_str(), "model" => model.to_string())
            .increment(1);
    }

    pub fn batch_failed(error_type: &str) {
        ::metrics::counter!(MetricName::ExtractionBatchesFailed.as_str(), "error_type" => error_type.to_string())
            .increment(1);
    }

    pub fn rate_limit_hits(count: usize) {
        ::metrics::counter!(MetricName::ExtractionRateLimitHits.as_str()).increment(count as u64);
    }

    /// Record wall time of one batch including retries
    pub fn call_duration(secs: f64) {
        ::metrics::histogram!(MetricName::ExtractionCallDuration.as_str()).record(secs);
    }

    pub fn tokens(prompt: u64, output: u64) {
        ::metrics::counter!(MetricName::ExtractionPromptTokens.as_str()).increment(prompt);
        ::metrics::counter!(MetricName::ExtractionOutputTokens.as_str()).increment(output);
    }

    pub fn review_failed(error_type: &str) {
        ::metrics::counter!(MetricName::ExtractionReviewFailures.as_str(), "error_type" => error_type.to_string())
            .increment(1);
    }
}

// ============================================================================
// Pivot Metrics
// ============================================================================

pub mod pivot {
    use super::MetricName;

    pub fn items_joined(count: usize, success_rate: f64) {
        ::metrics::counter!(MetricName::PivotItemsJoined.as_str()).increment(count as u64);
        ::metrics::gauge!(MetricName::PivotJoinSuccessRate.as_str()).set(success_rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            MetricName::NormalizeRecordsProcessed,
            MetricName::DedupConflicts,
            MetricName::QueueItemsSelected,
            MetricName::ExtractionCallDuration,
            MetricName::PivotJoinSuccessRate,
        ] {
            assert!(name.as_str().starts_with("review_miner_"));
            assert_eq!(name.to_string(), name.as_str());
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        dedup::rows_merged(10, 7);
        queue::bucket_filled("LOW_RATING", 3);
        extraction::call_duration(0.5);
        pivot::items_joined(4, 0.75);
    }

    #[test]
    fn test_init_rejects_bad_address() {
        assert!(init("not-an-address").is_err());
    }
}
