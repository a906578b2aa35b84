use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::PipelineError;
use crate::infra::ndjson_store::{read_table, save_partial, write_summary, write_table};
use crate::observability::metrics;
use crate::pipeline::processing::extraction::ExtractionItem;
use crate::pipeline::processing::pivot::{build_tables, PivotSummary, PivotTables};
use crate::pipeline::processing::tagging::TaggedReview;

pub const MASTER_TABLE: &str = "llm_master.ndjson";
pub const PIVOT_ASPECT_TABLE: &str = "pivot_aspect.ndjson";
pub const PIVOT_BUCKET_TABLE: &str = "pivot_bucket_aspect.ndjson";
pub const PIVOT_CONTEXT_TABLE: &str = "pivot_context_aspect.ndjson";
pub const PIVOT_SEASON_TABLE: &str = "pivot_season_aspect.ndjson";
pub const REPEATABILITY_TABLE: &str = "repeatability.ndjson";
pub const HIGHLIGHTS_TABLE: &str = "golden_nugget_highlights.ndjson";

/// Use case joining extraction items onto tagged reviews and writing every
/// aggregate table into one analysis directory
pub struct AnalyzeUseCase {
    output_dir: PathBuf,
}

impl AnalyzeUseCase {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn run(&self, items_path: &Path, tagged_path: &Path) -> Result<PivotSummary> {
        let items: Vec<ExtractionItem> = read_table(items_path)
            .with_context(|| format!("reading extraction items from {}", items_path.display()))?;
        let tagged: Vec<TaggedReview> = read_table(tagged_path)
            .with_context(|| format!("reading tagged reviews from {}", tagged_path.display()))?;

        let (tables, summary) = build_tables(&items, &tagged);
        metrics::pivot::items_joined(summary.item_rows, summary.join_success_rate);

        let master_path = self.output_dir.join(MASTER_TABLE);
        if let Err(e) = self.write_tables(&tables, &summary) {
            save_partial(&master_path, &tables.master, &e);
            return Err(e.into());
        }

        info!(
            "Analysis written to {}: {} aspects, {} context rows, {} highlights",
            self.output_dir.display(),
            tables.by_aspect.len(),
            tables.by_context.len(),
            tables.golden_nugget_highlights.len()
        );
        Ok(summary)
    }

    fn write_tables(&self, tables: &PivotTables, summary: &PivotSummary) -> Result<(), PipelineError> {
        let dir = &self.output_dir;
        let master_path = dir.join(MASTER_TABLE);
        write_table(&master_path, &tables.master)?;
        write_table(&dir.join(PIVOT_ASPECT_TABLE), &tables.by_aspect)?;
        write_table(&dir.join(PIVOT_BUCKET_TABLE), &tables.by_bucket)?;
        write_table(&dir.join(PIVOT_CONTEXT_TABLE), &tables.by_context)?;
        write_table(&dir.join(PIVOT_SEASON_TABLE), &tables.by_season)?;
        write_table(&dir.join(REPEATABILITY_TABLE), &tables.repeatability)?;
        write_table(&dir.join(HIGHLIGHTS_TABLE), &tables.golden_nugget_highlights)?;
        write_summary(&master_path, summary)?;
        Ok(())
    }
}
