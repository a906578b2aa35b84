use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::infra::ndjson_store::{persist_stage, read_table};
use crate::pipeline::processing::queue::{QueueSampler, QueueSummary};
use crate::pipeline::processing::tagging::TaggedReview;

/// Use case for building the bounded LLM extraction queue from tagged reviews
pub struct QueueUseCase {
    sampler: QueueSampler,
}

impl QueueUseCase {
    pub fn new(sampler: QueueSampler) -> Self {
        Self { sampler }
    }

    pub fn run(&self, input: &Path, output: &Path) -> Result<QueueSummary> {
        let reviews: Vec<TaggedReview> = read_table(input)
            .with_context(|| format!("reading tagged reviews from {}", input.display()))?;

        let (queue, summary) = self.sampler.sample(&reviews);
        persist_stage(output, &queue, &summary)?;

        info!(
            "Queued {} of {} reviews {:?}",
            summary.total,
            reviews.len(),
            summary.bucket_counts
        );
        Ok(summary)
    }
}
