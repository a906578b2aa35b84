use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::infra::ndjson_store::{read_table, read_table_or_empty, save_partial, write_summary, write_table};
use crate::observability::metrics;
use crate::pipeline::processing::extraction::batch::{pending_items, BatchExtractor, BatchOutcome};
use crate::pipeline::processing::extraction::{normalize_items, ExtractionErrorType, ExtractionResult};
use crate::pipeline::processing::queue::QueueItem;
use crate::pipeline::processing::stats::mean;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Ignore results already on disk and reprocess the whole queue
    pub force: bool,
    /// Process at most this many pending reviews
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractSummary {
    pub queue_total: usize,
    pub skipped_existing: usize,
    pub processed_reviews: usize,
    pub batches: usize,
    pub success_batches: usize,
    pub success_reviews: usize,
    pub json_parse_errors: usize,
    pub missing_in_response: usize,
    pub api_errors: usize,
    pub rate_limit_errors: usize,
    pub rate_limit_hits: usize,
    /// Parsed reviews for which the classifier returned no items
    pub empty_item_reviews: usize,
    pub total_items: usize,
    pub model_calls: BTreeMap<String, usize>,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    pub mean_response_time: f64,
    pub cancelled: bool,
}

impl ExtractSummary {
    fn record_batch(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        self.processed_reviews += outcome.results.len();
        self.rate_limit_hits += outcome.rate_limit_hits;
        self.prompt_tokens += outcome.prompt_tokens;
        self.output_tokens += outcome.output_tokens;
        if outcome.succeeded {
            self.success_batches += 1;
        }
        for (model, calls) in &outcome.model_calls {
            *self.model_calls.entry(model.clone()).or_insert(0) += calls;
        }
        for result in &outcome.results {
            match result.error_type {
                None => self.success_reviews += 1,
                Some(ExtractionErrorType::JsonParse) => self.json_parse_errors += 1,
                Some(ExtractionErrorType::MissingInResponse) => self.missing_in_response += 1,
                Some(ExtractionErrorType::ApiError) => self.api_errors += 1,
                Some(ExtractionErrorType::RateLimitError) => self.rate_limit_errors += 1,
            }
        }
    }
}

/// Use case driving batched LLM extraction over the queue with
/// checkpoint/resume and cooperative cancellation between batches
pub struct ExtractUseCase {
    extractor: BatchExtractor,
    cancel: Arc<AtomicBool>,
}

impl ExtractUseCase {
    pub fn new(extractor: BatchExtractor, cancel: Arc<AtomicBool>) -> Self {
        Self { extractor, cancel }
    }

    /// Process the queue at `queue_path`, appending to the results at
    /// `results_path`, then rewrite the normalized items at `items_path`.
    pub async fn run(
        &self,
        queue_path: &Path,
        results_path: &Path,
        items_path: &Path,
        options: ExtractOptions,
    ) -> Result<ExtractSummary> {
        let queue: Vec<QueueItem> = read_table(queue_path)
            .with_context(|| format!("reading extraction queue from {}", queue_path.display()))?;

        let mut results: Vec<ExtractionResult> = if options.force {
            Vec::new()
        } else {
            read_table_or_empty(results_path)?
        };
        let done_ids: HashSet<String> = results.iter().map(|r| r.review_id.clone()).collect();

        let mut pending = pending_items(&queue, &done_ids);
        if let Some(limit) = options.limit {
            pending.truncate(limit);
        }

        let mut summary = ExtractSummary {
            queue_total: queue.len(),
            skipped_existing: queue.iter().filter(|q| done_ids.contains(&q.review_id)).count(),
            ..ExtractSummary::default()
        };
        info!(
            "Extraction: {} queued, {} already done, {} to process",
            summary.queue_total,
            summary.skipped_existing,
            pending.len()
        );

        let config = self.extractor.config();
        let batch_size = config.batch_size.max(1);
        let save_every = config.save_every.max(1);
        let delay = self.extractor.inter_batch_delay();
        let batches: Vec<Vec<QueueItem>> = pending
            .chunks(batch_size)
            .map(|chunk| chunk.iter().map(|item| (*item).clone()).collect())
            .collect();
        let mut response_times = Vec::with_capacity(batches.len());

        for (idx, batch) in batches.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Cancelled after {} of {} batches", idx, batches.len());
                summary.cancelled = true;
                break;
            }

            let outcome = self.extractor.process_batch(batch).await;
            self.record_metrics(&outcome);
            summary.record_batch(&outcome);
            response_times.push(outcome.response_time);
            results.extend(outcome.results);

            info!(
                "Batch {}/{}: {} reviews, {} ok so far",
                idx + 1,
                batches.len(),
                batch.len(),
                summary.success_reviews
            );

            if (idx + 1) % save_every == 0 {
                checkpoint(results_path, &results)?;
            }
            if idx + 1 < batches.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        checkpoint(results_path, &results)?;

        let items = normalize_items(&results);
        let with_items: HashSet<&str> = items.iter().map(|i| i.review_id.as_str()).collect();
        summary.empty_item_reviews = results
            .iter()
            .filter(|r| r.parsed_ok && !with_items.contains(r.review_id.as_str()))
            .count();
        summary.total_items = items.len();
        summary.mean_response_time = mean(&response_times);

        if let Err(e) = write_table(items_path, &items) {
            save_partial(items_path, &items, &e);
            return Err(e.into());
        }
        write_summary(results_path, &summary)?;

        info!(
            "Extraction done: {} reviews in {} batches ({} ok, {} parse, {} missing, {} api, {} rate limit), {} items",
            summary.processed_reviews,
            summary.batches,
            summary.success_reviews,
            summary.json_parse_errors,
            summary.missing_in_response,
            summary.api_errors,
            summary.rate_limit_errors,
            summary.total_items
        );
        Ok(summary)
    }

    fn record_metrics(&self, outcome: &BatchOutcome) {
        metrics::extraction::call_duration(outcome.response_time);
        metrics::extraction::rate_limit_hits(outcome.rate_limit_hits);
        metrics::extraction::tokens(outcome.prompt_tokens, outcome.output_tokens);
        if outcome.succeeded {
            let model = outcome
                .results
                .first()
                .and_then(|r| r.model_name.as_deref())
                .unwrap_or("unknown");
            metrics::extraction::batch_succeeded(model);
        } else if let Some(error_type) = outcome.results.first().and_then(|r| r.error_type) {
            metrics::extraction::batch_failed(error_type.as_str());
        }
        for error_type in outcome.results.iter().filter_map(|r| r.error_type) {
            metrics::extraction::review_failed(error_type.as_str());
        }
    }
}

/// Saves accumulated results; on failure leaves a partial copy behind.
fn checkpoint(results_path: &Path, results: &[ExtractionResult]) -> std::result::Result<(), PipelineError> {
    write_table(results_path, results).map_err(|e| {
        save_partial(results_path, results, &e);
        e
    })
}
