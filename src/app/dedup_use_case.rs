use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::infra::ndjson_store::{persist_stage, read_table};
use crate::pipeline::processing::dedup::{DedupSummary, Deduplicator};
use crate::pipeline::processing::normalize::NormalizedReview;

/// Use case for collapsing duplicate review rows into one canonical row per id
pub struct DedupUseCase {
    deduplicator: Deduplicator,
}

impl DedupUseCase {
    pub fn new(deduplicator: Deduplicator) -> Self {
        Self { deduplicator }
    }

    pub fn run(&self, input: &Path, output: &Path) -> Result<DedupSummary> {
        let rows: Vec<NormalizedReview> = read_table(input)
            .with_context(|| format!("reading normalized reviews from {}", input.display()))?;

        let (merged, summary) = self.deduplicator.dedup(rows);
        persist_stage(output, &merged, &summary)?;

        info!(
            "Dedup: {} -> {} rows, {} duplicate groups, {} conflicts",
            summary.rows_before, summary.rows_after, summary.duplicate_groups, summary.conflict_count
        );
        Ok(summary)
    }
}
