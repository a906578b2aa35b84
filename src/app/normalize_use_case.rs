use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::infra::ndjson_store::{persist_stage, read_table};
use crate::observability::metrics;
use crate::pipeline::processing::normalize::{
    NormalizeSummary, NormalizedReview, RawReview, ReviewNormalizer,
};

/// Use case for turning raw scraped review rows into typed normalized rows
pub struct NormalizeUseCase {
    normalizer: ReviewNormalizer,
}

impl NormalizeUseCase {
    pub fn new(normalizer: ReviewNormalizer) -> Self {
        Self { normalizer }
    }

    /// Normalize in-memory rows and emit metrics
    pub fn normalize_batch(&self, raws: &[RawReview]) -> (Vec<NormalizedReview>, NormalizeSummary) {
        let (rows, summary) = self.normalizer.normalize_batch(raws);

        metrics::normalize::records_processed(summary.total_rows);
        metrics::normalize::derived_ids(summary.derived_review_ids);
        metrics::normalize::invalid_ratings(summary.rating_coerced);
        metrics::normalize::noise_flagged("trial", summary.trial_count);
        metrics::normalize::noise_flagged("low_info", summary.low_info_count);

        (rows, summary)
    }

    /// Read `input`, normalize, write `output` and its summary
    pub fn run(&self, input: &Path, output: &Path) -> Result<NormalizeSummary> {
        let raws: Vec<RawReview> = read_table(input)
            .with_context(|| format!("reading raw reviews from {}", input.display()))?;
        info!("Normalizing {} raw reviews from {}", raws.len(), input.display());

        let (rows, summary) = self.normalize_batch(&raws);
        persist_stage(output, &rows, &summary)?;

        info!(
            "Normalized {} rows: {} goods, {} derived ids, {} ratings nulled, date parse rate {:.1}%",
            summary.total_rows,
            summary.unique_goods,
            summary.derived_review_ids,
            summary.rating_coerced,
            summary.date_parse_rate * 100.0
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::infra::ndjson_store::summary_path;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_use_case_writes_table_and_summary() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("raw.ndjson");
        let output = dir.path().join("out/normalized.ndjson");
        fs::write(
            &input,
            concat!(
                r#"{"review_id":"r1","goods_no":"A1","rating":"5","review_date":"2024.07.03","review_text":"촉촉하고 좋아요 &amp; 재구매"}"#,
                "\n",
                r#"{"goods_no":"A1","rating":9,"review_text":"배송 빨라요"}"#,
                "\n"
            ),
        )
        .unwrap();

        let use_case = NormalizeUseCase::new(ReviewNormalizer::default());
        let summary = use_case.run(&input, &output).unwrap();

        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.derived_review_ids, 1);
        assert_eq!(summary.rating_coerced, 1);

        let rows: Vec<NormalizedReview> = read_table(&output).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].review_text_clean, "촉촉하고 좋아요 & 재구매");
        assert_eq!(rows[1].rating, None);
        assert!(rows[1].is_low_info);
        assert!(summary_path(&output).exists());
    }

    #[test]
    fn test_missing_input_is_typed_error() {
        let dir = TempDir::new().unwrap();
        let use_case = NormalizeUseCase::new(ReviewNormalizer::default());
        let err = use_case
            .run(&dir.path().join("absent.ndjson"), &dir.path().join("out.ndjson"))
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingFile(_))
        ));
    }
}
