use anyhow::Result;
use tracing::info;

use crate::app::dedup_use_case::DedupUseCase;
use crate::app::normalize_use_case::NormalizeUseCase;
use crate::app::queue_use_case::QueueUseCase;
use crate::app::tag_use_case::TagUseCase;
use crate::config::PathsConfig;
use crate::pipeline::processing::dedup::{DedupSummary, Deduplicator};
use crate::pipeline::processing::normalize::noise::{NoiseConfig, NoiseFilter};
use crate::pipeline::processing::normalize::{NormalizeSummary, ReviewNormalizer};
use crate::pipeline::processing::queue::{QueueConfig, QueueSampler, QueueSummary};
use crate::pipeline::processing::tagging::lexicon::Lexicon;
use crate::pipeline::processing::tagging::{LexicalTagger, TagSummary};

/// Headline summaries of one rule-stage run
#[derive(Debug, Clone)]
pub struct RuleStagesReport {
    pub normalize: NormalizeSummary,
    pub dedup: DedupSummary,
    pub tag: TagSummary,
    pub queue: QueueSummary,
}

/// Use case chaining normalize, dedup, tag and queue through their files
pub struct RuleStagesUseCase {
    paths: PathsConfig,
    normalize: NormalizeUseCase,
    dedup: DedupUseCase,
    tag: TagUseCase,
    queue: QueueUseCase,
}

impl RuleStagesUseCase {
    pub fn new(paths: PathsConfig, noise: NoiseConfig, lexicon: Lexicon, queue: QueueConfig) -> Self {
        Self {
            paths,
            normalize: NormalizeUseCase::new(ReviewNormalizer::new(NoiseFilter::with_config(noise))),
            dedup: DedupUseCase::new(Deduplicator::new()),
            tag: TagUseCase::new(LexicalTagger::new(lexicon)),
            queue: QueueUseCase::new(QueueSampler::new(queue)),
        }
    }

    pub fn run(&self) -> Result<RuleStagesReport> {
        let p = &self.paths;
        info!("Stage 1/4: normalize");
        let normalize = self.normalize.run(&p.raw_reviews, &p.normalized)?;
        info!("Stage 2/4: dedup");
        let dedup = self.dedup.run(&p.normalized, &p.deduped)?;
        info!("Stage 3/4: tag");
        let tag = self.tag.run(&p.deduped, &p.tagged)?;
        info!("Stage 4/4: queue");
        let queue = self.queue.run(&p.tagged, &p.queue)?;

        Ok(RuleStagesReport {
            normalize,
            dedup,
            tag,
            queue,
        })
    }
}
