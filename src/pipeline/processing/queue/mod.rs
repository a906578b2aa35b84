//! Stratified, bounded sampling of tagged reviews for LLM extraction.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::SORT_HELPFUL;
use crate::domain::{QueueBucket, RatingBucket};
use crate::observability::metrics;
use crate::pipeline::processing::stats::{mean, percentile, round_to};
use crate::pipeline::processing::tagging::TaggedReview;

const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_golden: usize,
    pub max_low: usize,
    pub max_helpful: usize,
    pub max_random: usize,
    /// Character budget of the LLM input text
    pub max_chars: usize,
    /// Minimum cleaned length for the helpful bucket
    pub helpful_min_chars: usize,
    /// Seed of the random control sample
    pub seed: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_golden: 1500,
            max_low: 1500,
            max_helpful: 1000,
            max_random: 300,
            max_chars: 1200,
            helpful_min_chars: 120,
            seed: 42,
        }
    }
}

impl QueueConfig {
    pub fn cap(&self, bucket: QueueBucket) -> usize {
        match bucket {
            QueueBucket::GoldenNugget => self.max_golden,
            QueueBucket::LowRating => self.max_low,
            QueueBucket::HelpfulLong => self.max_helpful,
            QueueBucket::RandomControl => self.max_random,
        }
    }
}

/// One review scheduled for LLM extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub queue_id: Uuid,
    pub review_id: String,
    pub goods_no: Option<String>,
    pub bucket: QueueBucket,
    pub priority_score: f64,
    /// Hint line plus cleaned body, within the character budget
    pub input_text: String,
    /// Rule-side metadata as a JSON object string
    pub meta_json: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSummary {
    pub total: usize,
    pub candidates: BTreeMap<String, usize>,
    pub bucket_counts: BTreeMap<String, usize>,
    /// Always zero; recorded so the audit shows the check ran
    pub duplicate_review_ids: usize,
    pub input_len_mean: f64,
    pub input_len_median: f64,
    pub input_len_p90: f64,
}

/// Information-density priority used to rank buckets 1-3.
pub fn priority_score(review: &TaggedReview, bucket: QueueBucket) -> f64 {
    let base = &review.review.review;
    let mut score = (base.text_len_chars as f64).ln_1p() + 0.2 * (base.helpful_count as f64).ln_1p();
    score += bucket.priority_bonus();
    if review.has_conditional {
        score += 0.5;
    }
    if review.toneup_whitecast_conflict {
        score += 0.3;
    }
    round_to(score, 4)
}

/// Bracketed hint line, or `None` when the review has no hints at all.
pub fn hint_line(review: &TaggedReview) -> Option<String> {
    let base = &review.review.review;
    let mut hints = Vec::new();
    if let Some(rating) = base.rating {
        hints.push(format!("rating={}", rating));
    }
    if let Some(season) = base.season {
        hints.push(format!("season={}", season));
    }
    for (label, value) in [
        ("attr", &review.attribute_tags_str),
        ("ctx", &review.context_tags_str),
        ("skin", &review.skin_tags_str),
        ("cond", &review.conditional_markers_str),
    ] {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            hints.push(format!("{}={}", label, value));
        }
    }
    if hints.is_empty() {
        None
    } else {
        Some(format!("[{}]", hints.join(" | ")))
    }
}

/// Hint line, a blank line, then the cleaned body. Over budget, only the
/// body tail is cut and an ellipsis appended; the hint line is kept whole.
pub fn build_input_text(review: &TaggedReview, max_chars: usize) -> String {
    let body = review.review.review.review_text_clean.as_str();
    let header = hint_line(review).map(|h| format!("{}\n\n", h)).unwrap_or_default();

    let header_chars = header.chars().count();
    let body_chars = body.chars().count();
    if header_chars + body_chars <= max_chars {
        return format!("{}{}", header, body);
    }

    let keep = max_chars
        .saturating_sub(header_chars)
        .saturating_sub(ELLIPSIS.len());
    let truncated: String = body.chars().take(keep).collect();
    format!("{}{}{}", header, truncated, ELLIPSIS)
}

fn meta_json(review: &TaggedReview) -> String {
    let deduped = &review.review;
    let base = &deduped.review;
    json!({
        "rating": base.rating,
        "rating_bucket": base.rating_bucket,
        "season": base.season,
        "review_month": base.review_month,
        "attribute_tags_str": review.attribute_tags_str,
        "context_tags_str": review.context_tags_str,
        "skin_tags_str": review.skin_tags_str,
        "has_conditional": review.has_conditional,
        "conditional_markers_str": review.conditional_markers_str,
        "golden_nugget": review.golden_nugget,
        "toneup_whitecast_conflict": review.toneup_whitecast_conflict,
        "primary_sort": deduped.primary_sort,
        "helpful_count": base.helpful_count,
        "text_len_chars": base.text_len_chars,
        "is_trial": base.is_trial,
    })
    .to_string()
}

/// Builds the LLM queue. Buckets are filled in order and a review taken by an
/// earlier bucket is never reconsidered.
#[derive(Debug, Clone, Default)]
pub struct QueueSampler {
    config: QueueConfig,
}

impl QueueSampler {
    pub fn new(config: QueueConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn eligible(&self, bucket: QueueBucket, review: &TaggedReview) -> bool {
        let base = &review.review.review;
        match bucket {
            QueueBucket::GoldenNugget => review.golden_nugget,
            QueueBucket::LowRating => {
                base.rating_bucket == Some(RatingBucket::Low) && !base.is_low_info
            }
            QueueBucket::HelpfulLong => {
                review.review.primary_sort.as_deref() == Some(SORT_HELPFUL)
                    && base.text_len_chars >= self.config.helpful_min_chars
                    && !base.is_low_info
            }
            QueueBucket::RandomControl => !base.is_low_info,
        }
    }

    /// Selected row indices for one bucket, in queue order.
    fn select(
        &self,
        bucket: QueueBucket,
        reviews: &[TaggedReview],
        used: &HashSet<&str>,
        rng: &mut StdRng,
    ) -> (Vec<(usize, f64)>, usize) {
        let candidates: Vec<(usize, f64)> = reviews
            .iter()
            .enumerate()
            .filter(|(_, r)| !used.contains(r.review_id()) && self.eligible(bucket, r))
            .map(|(idx, r)| (idx, priority_score(r, bucket)))
            .collect();
        let candidate_count = candidates.len();
        let cap = self.config.cap(bucket);

        let selected = if bucket == QueueBucket::RandomControl {
            let amount = cap.min(candidates.len());
            let mut picks = rand::seq::index::sample(rng, candidates.len(), amount).into_vec();
            picks.sort_unstable();
            picks.into_iter().map(|i| candidates[i]).collect()
        } else {
            let mut ranked = candidates;
            // stable: equal scores keep input order
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            ranked.truncate(cap);
            ranked
        };
        (selected, candidate_count)
    }

    pub fn sample(&self, reviews: &[TaggedReview]) -> (Vec<QueueItem>, QueueSummary) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut used: HashSet<&str> = HashSet::new();
        let mut summary = QueueSummary::default();
        let mut items = Vec::new();
        let created_at = Utc::now();

        for bucket in [
            QueueBucket::GoldenNugget,
            QueueBucket::LowRating,
            QueueBucket::HelpfulLong,
            QueueBucket::RandomControl,
        ] {
            let (selected, candidate_count) = self.select(bucket, reviews, &used, &mut rng);
            summary
                .candidates
                .insert(bucket.as_str().to_string(), candidate_count);
            summary
                .bucket_counts
                .insert(bucket.as_str().to_string(), selected.len());
            debug!(
                "Bucket {}: {} of {} candidates selected",
                bucket,
                selected.len(),
                candidate_count
            );

            for (idx, score) in selected {
                let review = &reviews[idx];
                used.insert(review.review_id());
                items.push(QueueItem {
                    queue_id: Uuid::new_v4(),
                    review_id: review.review_id().to_string(),
                    goods_no: review.review.review.goods_no.clone(),
                    bucket,
                    priority_score: score,
                    input_text: build_input_text(review, self.config.max_chars),
                    meta_json: meta_json(review),
                    created_at,
                });
            }
            metrics::queue::bucket_filled(bucket.as_str(), summary.bucket_counts[bucket.as_str()]);
        }

        let mut lengths: Vec<f64> = items
            .iter()
            .map(|i| i.input_text.chars().count() as f64)
            .collect();
        lengths.sort_by(|a, b| a.total_cmp(b));
        let distinct: HashSet<&str> = items.iter().map(|i| i.review_id.as_str()).collect();

        summary.total = items.len();
        summary.duplicate_review_ids = items.len() - distinct.len();
        summary.input_len_mean = mean(&lengths);
        summary.input_len_median = percentile(&lengths, 0.5);
        summary.input_len_p90 = percentile(&lengths, 0.9);

        info!(
            "Queued {} reviews for extraction {:?}",
            summary.total, summary.bucket_counts
        );
        (items, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::dedup::DedupedReview;
    use crate::pipeline::processing::normalize::NormalizedReview;

    fn create_tagged(id: &str, rating: u8, len: usize) -> TaggedReview {
        let text = "가".repeat(len);
        let mut review = NormalizedReview {
            review_id: id.to_string(),
            goods_no: Some("A1".to_string()),
            rating: Some(rating),
            review_date: Some("2024-07-01".to_string()),
            review_text: Some(text.clone()),
            review_text_clean: text,
            ..NormalizedReview::default()
        };
        review.refresh_derived_fields();
        review.refresh_text_fields();
        TaggedReview {
            review: DedupedReview {
                review,
                primary_sort: Some("newest".to_string()),
                dup_count: 1,
                ..DedupedReview::default()
            },
            ..TaggedReview::default()
        }
    }

    fn small_config() -> QueueConfig {
        QueueConfig {
            max_golden: 2,
            max_low: 2,
            max_helpful: 2,
            max_random: 2,
            ..QueueConfig::default()
        }
    }

    #[test]
    fn test_priority_score_formula() {
        let mut review = create_tagged("r1", 5, 100);
        review.review.review.helpful_count = 10;
        let base = (100f64).ln_1p() + 0.2 * (10f64).ln_1p();

        assert_eq!(
            priority_score(&review, QueueBucket::HelpfulLong),
            round_to(base, 4)
        );
        review.has_conditional = true;
        review.toneup_whitecast_conflict = true;
        assert_eq!(
            priority_score(&review, QueueBucket::GoldenNugget),
            round_to(base + 2.0 + 0.5 + 0.3, 4)
        );
    }

    #[test]
    fn test_input_text_truncates_body_only() {
        let mut review = create_tagged("r1", 4, 50);
        review.attribute_tags_str = Some("PILLING|DRYNESS".to_string());
        let header = "[rating=4 | season=summer | attr=PILLING|DRYNESS]";

        let full = build_input_text(&review, 1200);
        assert_eq!(full, format!("{}\n\n{}", header, "가".repeat(50)));

        let cut = build_input_text(&review, 70);
        assert!(cut.starts_with(header));
        assert!(cut.ends_with(ELLIPSIS));
        assert_eq!(cut.chars().count(), 70);

        let tiny = build_input_text(&review, 20);
        assert_eq!(tiny, format!("{}\n\n{}", header, ELLIPSIS));
    }

    #[test]
    fn test_buckets_are_exclusive_and_capped() {
        let mut reviews = Vec::new();
        for i in 0..5 {
            let mut golden = create_tagged(&format!("g{}", i), 5, 150 + i);
            golden.golden_nugget = true;
            reviews.push(golden);
        }
        for i in 0..4 {
            reviews.push(create_tagged(&format!("l{}", i), 1, 40 + i));
        }
        for i in 0..3 {
            let mut helpful = create_tagged(&format!("h{}", i), 4, 200);
            helpful.review.primary_sort = Some(SORT_HELPFUL.to_string());
            reviews.push(helpful);
        }
        let mut noise = create_tagged("n0", 1, 5);
        noise.review.review.is_low_info = true;
        reviews.push(noise);

        let sampler = QueueSampler::new(small_config());
        let (items, summary) = sampler.sample(&reviews);

        let ids: HashSet<_> = items.iter().map(|i| i.review_id.as_str()).collect();
        assert_eq!(ids.len(), items.len());
        assert_eq!(summary.duplicate_review_ids, 0);
        for bucket in [
            QueueBucket::GoldenNugget,
            QueueBucket::LowRating,
            QueueBucket::HelpfulLong,
            QueueBucket::RandomControl,
        ] {
            let count = items.iter().filter(|i| i.bucket == bucket).count();
            assert!(count <= sampler.config().cap(bucket));
            assert_eq!(count, 2);
        }
        assert!(!ids.contains("n0"));

        // longest golden reviews rank first
        let golden: Vec<_> = items
            .iter()
            .filter(|i| i.bucket == QueueBucket::GoldenNugget)
            .map(|i| i.review_id.as_str())
            .collect();
        assert_eq!(golden, vec!["g4", "g3"]);
    }

    #[test]
    fn test_random_control_is_seeded() {
        let reviews: Vec<_> = (0..20)
            .map(|i| create_tagged(&format!("r{:02}", i), 3, 30))
            .collect();
        let sampler = QueueSampler::new(small_config());
        let (first, _) = sampler.sample(&reviews);
        let (second, _) = sampler.sample(&reviews);

        let pick = |items: &[QueueItem]| -> Vec<String> {
            items.iter().map(|i| i.review_id.clone()).collect()
        };
        assert_eq!(first.len(), 2);
        assert_eq!(pick(&first), pick(&second));
        assert!(first.iter().all(|i| i.bucket == QueueBucket::RandomControl));
    }

    #[test]
    fn test_small_candidate_pool_is_not_an_error() {
        let sampler = QueueSampler::new(QueueConfig::default());
        let (items, summary) = sampler.sample(&[create_tagged("only", 1, 30)]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].bucket, QueueBucket::LowRating);
        assert_eq!(summary.bucket_counts["RANDOM_CONTROL"], 0);
    }
}
