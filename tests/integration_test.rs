use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::tempdir;

use review_miner::app::analyze_use_case::{AnalyzeUseCase, MASTER_TABLE, PIVOT_ASPECT_TABLE};
use review_miner::app::extract_use_case::{ExtractOptions, ExtractUseCase};
use review_miner::app::ports::{ClassifierResponse, ExtractionClassifier};
use review_miner::app::run_use_case::RuleStagesUseCase;
use review_miner::config::PathsConfig;
use review_miner::domain::{Aspect, QueueBucket, RatingBucket, TagPolarity};
use review_miner::error::ClassifierError;
use review_miner::infra::ndjson_store::read_table;
use review_miner::pipeline::processing::dedup::Deduplicator;
use review_miner::pipeline::processing::extraction::batch::BatchExtractor;
use review_miner::pipeline::processing::extraction::ExtractionConfig;
use review_miner::pipeline::processing::normalize::noise::NoiseConfig;
use review_miner::pipeline::processing::normalize::{RawReview, ReviewNormalizer};
use review_miner::pipeline::processing::pivot::{AspectPivotRow, JoinedRow};
use review_miner::pipeline::processing::queue::{QueueConfig, QueueItem, QueueSampler};
use review_miner::pipeline::processing::tagging::lexicon::Lexicon;
use review_miner::pipeline::processing::tagging::{LexicalTagger, TaggedReview};

const GOLDEN_TEXT: &str = "이 썬크림은 발림성이 정말 좋아요. 백탁도 거의 없고 촉촉해서 매일 아침 쓰고 있어요. 근데 여름에 땀을 많이 흘리면 오후에는 조금씩 밀려요. 그래도 전체적으로 만족스럽고 재구매 의사 있습니다. 피부 자극도 전혀 없었어요.";
const HELPFUL_TEXT: &str = "지성 피부라서 유분감이 걱정이었는데 생각보다 가볍게 발리고 흡수도 빨라요. 메이크업 전에 바르면 살짝 겉돌 때가 있어서 충분히 흡수시킨 뒤에 다음 단계를 올려야 해요. 향은 거의 없는 편이고 눈시림도 없어서 데일리로 쓰기 좋습니다.";
const LOW_TEXT: &str = "바르고 나서 눈이 너무 따가워서 눈물이 났어요. 민감한 피부에는 맞지 않는 것 같아요.";
const CONTROL_TEXT: &str = "무난하게 쓰기 좋은 선크림이에요. 특별히 좋지도 나쁘지도 않아요.";

fn raw(value: serde_json::Value) -> RawReview {
    serde_json::from_value(value).unwrap()
}

fn tag_in_memory(raws: &[RawReview]) -> Vec<TaggedReview> {
    let (normalized, _) = ReviewNormalizer::default().normalize_batch(raws);
    let (deduped, _) = Deduplicator::new().dedup(normalized);
    let (tagged, _) = LexicalTagger::new(Lexicon::bundled().unwrap()).tag_all(deduped);
    tagged
}

#[test]
fn test_three_review_scenario() {
    let raws = vec![
        raw(json!({"review_id": "1", "goods_no": "A1", "rating": 1, "review_text": "따가워요"})),
        raw(json!({"review_id": "2", "goods_no": "A1", "rating": 5, "review_text": "좋아요 근데 시간 지나면 밀려요"})),
        raw(json!({"review_id": "3", "goods_no": "A1", "rating": 5, "review_text": "배송 빨라요"})),
    ];
    let tagged = tag_in_memory(&raws);
    assert_eq!(tagged.len(), 3);

    let first = &tagged[0];
    assert_eq!(first.review_id(), "1");
    assert!(first.attribute_tags.iter().any(|t| t == "IRRITATION"));
    assert_eq!(first.review.review.rating_bucket, Some(RatingBucket::Low));

    let second = &tagged[1];
    assert!(second.attribute_tags.iter().any(|t| t == "PILLING"));
    assert!(second.has_conditional);
    assert!(!second.golden_nugget);

    let third = &tagged[2];
    assert!(third.attribute_tags.is_empty());
    assert!(third.context_tags.is_empty());
    assert!(third.review.review.is_low_info);
}

#[test]
fn test_negation_window_scenario() {
    let raws = vec![
        raw(json!({"review_id": "n1", "rating": 4, "review_text": "백탁 없어요"})),
        raw(json!({"review_id": "n2", "rating": 4, "review_text": "백탁 심해요"})),
    ];
    let tagged = tag_in_memory(&raws);

    assert_eq!(
        tagged[0].attribute_polarity.get("WHITECAST"),
        Some(&TagPolarity::Negated)
    );
    assert_eq!(
        tagged[1].attribute_polarity.get("WHITECAST"),
        Some(&TagPolarity::Affirmed)
    );
}

#[test]
fn test_sampler_is_exclusive_and_capped() {
    let mut raws = Vec::new();
    for i in 0..40 {
        let (rating, text) = match i % 4 {
            0 => (5, GOLDEN_TEXT),
            1 => (1, LOW_TEXT),
            2 => (4, HELPFUL_TEXT),
            _ => (3, CONTROL_TEXT),
        };
        raws.push(raw(json!({
            "review_id": format!("r{}", i),
            "goods_no": format!("G{}", i % 5),
            "sort_source": if i % 4 == 2 { "helpful" } else { "newest" },
            "rating": rating,
            "review_text": text,
        })));
    }
    let tagged = tag_in_memory(&raws);

    let config = QueueConfig {
        max_golden: 4,
        max_low: 3,
        max_helpful: 2,
        max_random: 5,
        ..QueueConfig::default()
    };
    let (queue, summary) = QueueSampler::new(config.clone()).sample(&tagged);

    let ids: HashSet<&str> = queue.iter().map(|q| q.review_id.as_str()).collect();
    assert_eq!(ids.len(), queue.len());
    assert_eq!(summary.duplicate_review_ids, 0);
    for bucket in [
        QueueBucket::GoldenNugget,
        QueueBucket::LowRating,
        QueueBucket::HelpfulLong,
        QueueBucket::RandomControl,
    ] {
        let count = queue.iter().filter(|q| q.bucket == bucket).count();
        assert!(count <= config.cap(bucket), "{:?} over cap", bucket);
    }
    assert_eq!(queue.iter().filter(|q| q.bucket == QueueBucket::GoldenNugget).count(), 4);

    // Same seed, same sample
    let (again, _) = QueueSampler::new(config).sample(&tagged);
    let first: Vec<&str> = queue.iter().map(|q| q.review_id.as_str()).collect();
    let second: Vec<&str> = again.iter().map(|q| q.review_id.as_str()).collect();
    assert_eq!(first, second);
}

/// Answers each review in the prompt with one aspect keyed off its text.
struct KeywordClassifier;

#[async_trait]
impl ExtractionClassifier for KeywordClassifier {
    async fn classify(
        &self,
        _model: &str,
        _system_instruction: &str,
        prompt: &str,
    ) -> std::result::Result<ClassifierResponse, ClassifierError> {
        let mut reviews = Vec::new();
        for block in prompt.split("=== REVIEW_ID: ").skip(1) {
            let (id, body) = block.split_once(" ===").unwrap_or((block, ""));
            let (aspect, polarity) = if body.contains("밀려") {
                ("PILLING", "mixed")
            } else if body.contains("따가") {
                ("EYE_STING", "unmet")
            } else {
                ("ABSORPTION", "met")
            };
            reviews.push(json!({
                "review_id": id.trim(),
                "items": [{"aspect": aspect, "polarity": polarity, "evidence": aspect}]
            }));
        }
        Ok(ClassifierResponse {
            text: format!("```json\n{}\n```", json!({ "reviews": reviews })),
            prompt_tokens: Some(100),
            output_tokens: Some(20),
        })
    }
}

fn write_raw(path: &Path) -> Result<()> {
    let rows = [
        json!({"review_id": "g1", "goods_no": "A1", "sort_source": "newest", "rating": 5, "review_date": "2024.07.15", "review_text": GOLDEN_TEXT}),
        json!({"review_id": "l1", "goods_no": "A1", "sort_source": "low_rating", "rating": 2, "review_date": "2024-08-01", "review_text": LOW_TEXT}),
        json!({"review_id": "l1", "goods_no": "A2", "sort_source": "newest", "rating": "2", "review_date": "2024-08-01", "review_text": LOW_TEXT}),
        json!({"review_id": "h1", "goods_no": "A2", "sort_source": "helpful", "rating": 4, "helpful_count": 12, "review_date": "2024/01/05", "review_text": HELPFUL_TEXT}),
        json!({"review_id": "c1", "goods_no": "A3", "sort_source": "newest", "rating": 3, "review_text": CONTROL_TEXT}),
        json!({"review_id": "d1", "goods_no": "A3", "sort_source": "newest", "rating": 5, "review_text": "배송 빨라요"}),
    ];
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let body: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
    fs::write(path, body.join("\n"))?;
    Ok(())
}

#[tokio::test]
async fn test_file_pipeline_end_to_end() -> Result<()> {
    let temp_dir = tempdir()?;
    let root = temp_dir.path();
    let paths = PathsConfig {
        raw_reviews: root.join("raw/reviews.ndjson"),
        normalized: root.join("processed/reviews_normalized.ndjson"),
        deduped: root.join("processed/reviews_dedup.ndjson"),
        tagged: root.join("processed/reviews_tagged.ndjson"),
        queue: root.join("llm/llm_queue.ndjson"),
        extraction_results: root.join("llm/llm_results.ndjson"),
        extraction_items: root.join("llm/llm_items.ndjson"),
        analysis_dir: root.join("analysis"),
        lexicon: None,
        log_dir: root.join("logs").display().to_string(),
    };
    write_raw(&paths.raw_reviews)?;

    let stages = RuleStagesUseCase::new(
        paths.clone(),
        NoiseConfig::default(),
        Lexicon::bundled()?,
        QueueConfig::default(),
    );
    let report = stages.run()?;
    assert_eq!(report.normalize.total_rows, 6);
    assert_eq!(report.dedup.rows_after, 5);
    assert_eq!(report.tag.golden_nugget_count, 1);

    let queue: Vec<QueueItem> = read_table(&paths.queue)?;
    let bucket_of = |id: &str| queue.iter().find(|q| q.review_id == id).map(|q| q.bucket);
    assert_eq!(bucket_of("g1"), Some(QueueBucket::GoldenNugget));
    assert_eq!(bucket_of("l1"), Some(QueueBucket::LowRating));
    assert_eq!(bucket_of("h1"), Some(QueueBucket::HelpfulLong));
    assert_eq!(bucket_of("c1"), Some(QueueBucket::RandomControl));
    assert_eq!(bucket_of("d1"), None);

    let config = ExtractionConfig {
        batch_size: 3,
        requests_per_minute: 0,
        initial_backoff_secs: 0.0,
        ..ExtractionConfig::default()
    };
    let extract = ExtractUseCase::new(
        BatchExtractor::new(Arc::new(KeywordClassifier), config),
        Arc::new(AtomicBool::new(false)),
    );
    let summary = extract
        .run(
            &paths.queue,
            &paths.extraction_results,
            &paths.extraction_items,
            ExtractOptions::default(),
        )
        .await?;
    assert_eq!(summary.success_reviews, 4);
    assert_eq!(summary.total_items, 4);
    assert_eq!(summary.batches, 2);

    let pivot = AnalyzeUseCase::new(&paths.analysis_dir)
        .run(&paths.extraction_items, &paths.tagged)?;
    assert_eq!(pivot.item_rows, 4);
    assert_eq!(pivot.join_success_rate, 1.0);

    let master: Vec<JoinedRow> = read_table(&paths.analysis_dir.join(MASTER_TABLE))?;
    let golden = master.iter().find(|r| r.review_id == "g1").unwrap();
    assert_eq!(golden.aspect, Aspect::Pilling);
    assert_eq!(golden.golden_nugget, Some(true));
    assert!(golden.context_keys().iter().any(|c| c == "SUMMER"));

    let by_aspect: Vec<AspectPivotRow> = read_table(&paths.analysis_dir.join(PIVOT_ASPECT_TABLE))?;
    let total: usize = by_aspect.iter().map(|r| r.counts.n_items).sum();
    assert_eq!(total, 4);
    for row in &by_aspect {
        let c = &row.counts;
        assert_eq!(c.met_cnt + c.unmet_cnt + c.mixed_cnt + c.unknown_cnt, c.n_items);
    }

    Ok(())
}
