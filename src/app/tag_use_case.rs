use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::infra::ndjson_store::{persist_stage, read_table};
use crate::pipeline::processing::dedup::DedupedReview;
use crate::pipeline::processing::tagging::{LexicalTagger, TagSummary};

/// Use case for applying the lexicon to deduplicated reviews
pub struct TagUseCase {
    tagger: LexicalTagger,
}

impl TagUseCase {
    pub fn new(tagger: LexicalTagger) -> Self {
        Self { tagger }
    }

    pub fn run(&self, input: &Path, output: &Path) -> Result<TagSummary> {
        let rows: Vec<DedupedReview> = read_table(input)
            .with_context(|| format!("reading deduplicated reviews from {}", input.display()))?;

        let (tagged, summary) = self.tagger.tag_all(rows);
        persist_stage(output, &tagged, &summary)?;

        info!(
            "Tagged {} reviews: attribute coverage {:.1}%, conditional {:.1}%, {} golden nuggets",
            summary.total_reviews,
            summary.attribute_coverage * 100.0,
            summary.conditional_rate * 100.0,
            summary.golden_nugget_count
        );
        Ok(summary)
    }
}
