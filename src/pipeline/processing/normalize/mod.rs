//! Schema normalization: loosely typed scraper rows to typed review records.

pub mod noise;
pub mod text;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::constants::{DERIVED_ID_HEX_LEN, SHORT_REVIEW_CHARS};
use crate::domain::{RatingBucket, Season};
use crate::pipeline::processing::stats::{percentile_usize, rate};
use noise::NoiseFilter;
use text::{char_len, clean_text, word_count};

/// Accepted review date formats, tried in order
pub const DATE_FORMATS: [&str; 3] = ["%Y.%m.%d", "%Y-%m-%d", "%Y/%m/%d"];

/// A scalar the scraper may deliver as a number or as text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawScalar {
    Int(i64),
    Float(f64),
    Text(String),
}

/// A flag the scraper may deliver as a bool, a 0/1 number, or text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawFlag {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl RawFlag {
    pub fn is_set(&self) -> bool {
        match self {
            RawFlag::Bool(b) => *b,
            RawFlag::Int(i) => *i != 0,
            RawFlag::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "y" | "yes"
            ),
        }
    }
}

/// Skin profile fields arrive either as a string or a list of strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOrList {
    Text(String),
    List(Vec<String>),
}

impl TextOrList {
    fn joined(&self) -> Option<String> {
        let joined = match self {
            TextOrList::Text(s) => s.trim().to_string(),
            TextOrList::List(items) => items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
        };
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }
}

/// A review row as delivered by the scraper. Every field is optional and
/// unknown columns are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawReview {
    #[serde(alias = "reviewId")]
    pub review_id: Option<String>,
    #[serde(alias = "goodsNo")]
    pub goods_no: Option<String>,
    pub product_id: Option<String>,
    pub sort_source: Option<String>,
    pub sort_sources_all: Option<Vec<String>>,
    pub rating: Option<RawScalar>,
    pub review_date: Option<String>,
    pub review_text: Option<String>,
    pub helpful_count: Option<RawScalar>,
    pub image_count: Option<RawScalar>,
    pub has_images: Option<RawFlag>,
    pub skin_type_raw: Option<TextOrList>,
    pub skin_tone_raw: Option<TextOrList>,
    pub skin_trouble_raw: Option<TextOrList>,
    pub review_type: Option<String>,
    pub is_trial: Option<RawFlag>,
    pub is_low_info: Option<RawFlag>,
    pub source: Option<String>,
}

/// A typed review row. `review_text` is the untouched original; every other
/// content field is derived from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizedReview {
    /// Scraper id, or a hash of goods/text/date when the scraper had none
    pub review_id: String,
    /// Product listing the row was scraped from
    pub goods_no: Option<String>,
    pub product_id: Option<String>,
    /// Listing sort that surfaced this row
    pub sort_source: Option<String>,
    /// Sort sources carried over from an earlier merge
    pub sort_sources_all: Vec<String>,
    /// Star rating, `None` when missing or outside 1..=5
    pub rating: Option<u8>,
    pub rating_bucket: Option<RatingBucket>,
    /// Date string exactly as scraped
    pub review_date: Option<String>,
    pub review_date_parsed: Option<NaiveDate>,
    /// `YYYY-MM`
    pub review_month: Option<String>,
    pub review_year: Option<i32>,
    pub season: Option<Season>,
    /// Original body, never modified
    pub review_text: Option<String>,
    pub review_text_clean: String,
    /// Characters (not bytes) of the cleaned body
    pub text_len_chars: usize,
    pub text_len_words: usize,
    pub has_text: bool,
    pub helpful_count: u64,
    pub image_count: u64,
    pub has_images: bool,
    pub skin_type_raw: Option<String>,
    pub skin_tone_raw: Option<String>,
    pub skin_trouble_raw: Option<String>,
    pub review_type: Option<String>,
    pub source: Option<String>,
    /// Promotional or gifted review
    pub is_trial: bool,
    /// Too short, or delivery-only content
    pub is_low_info: bool,
}

impl NormalizedReview {
    /// Recomputes rating and date derived fields from `rating` and `review_date`.
    pub fn refresh_derived_fields(&mut self) {
        self.rating_bucket = self.rating.map(RatingBucket::from_rating);
        self.review_date_parsed = self.review_date.as_deref().and_then(parse_review_date);
        self.review_month = self
            .review_date_parsed
            .map(|d| d.format("%Y-%m").to_string());
        self.review_year = self.review_date_parsed.map(|d| d.year());
        self.season = self.review_date_parsed.map(|d| Season::from_month(d.month()));
    }

    /// Recomputes length fields from `review_text_clean`.
    pub fn refresh_text_fields(&mut self) {
        self.text_len_chars = char_len(&self.review_text_clean);
        self.text_len_words = word_count(&self.review_text_clean);
        self.has_text = !self.review_text_clean.is_empty();
    }

    /// Skin profile free text, in type/tone/trouble order
    pub fn skin_hints(&self) -> Vec<&str> {
        [&self.skin_type_raw, &self.skin_tone_raw, &self.skin_trouble_raw]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .collect()
    }
}

/// Parses a scraped date against `DATE_FORMATS`; first match wins.
pub fn parse_review_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Outcome of coercing a raw rating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingCoercion {
    Valid(u8),
    Missing,
    /// Present but not an integer in 1..=5; the field becomes null
    Invalid,
}

pub fn coerce_rating(raw: Option<&RawScalar>) -> RatingCoercion {
    let value = match raw {
        None => return RatingCoercion::Missing,
        Some(RawScalar::Int(i)) => *i as f64,
        Some(RawScalar::Float(f)) => *f,
        Some(RawScalar::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return RatingCoercion::Missing;
            }
            match trimmed.parse::<f64>() {
                Ok(v) => v,
                Err(_) => return RatingCoercion::Invalid,
            }
        }
    };

    if value.fract() == 0.0 && (1.0..=5.0).contains(&value) {
        RatingCoercion::Valid(value as u8)
    } else {
        RatingCoercion::Invalid
    }
}

/// Non-negative integer count; anything unusable becomes zero.
pub fn coerce_count(raw: Option<&RawScalar>) -> u64 {
    match raw {
        Some(RawScalar::Int(i)) if *i > 0 => *i as u64,
        Some(RawScalar::Float(f)) if f.is_finite() && *f > 0.0 => f.trunc() as u64,
        Some(RawScalar::Text(s)) => s.trim().replace(',', "").parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

/// Stable id for rows the scraper delivered without one.
pub fn derive_review_id(goods_no: &str, review_text: &str, review_date: &str) -> String {
    let digest = Sha256::digest(format!("{}_{}_{}", goods_no, review_text, review_date).as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(DERIVED_ID_HEX_LEN);
    id
}

/// Per-row anomalies noticed while normalizing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowAnomalies {
    pub rating_coerced: bool,
    pub date_unparsed: bool,
    pub derived_id: bool,
}

/// Quality summary of a normalization run. Observational only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizeSummary {
    pub total_rows: usize,
    pub unique_goods: usize,
    pub unique_review_ids: usize,
    /// Rows whose review id was already seen earlier in the input
    pub duplicate_review_ids: usize,
    pub derived_review_ids: usize,
    /// Ratings present but outside 1..=5, nulled
    pub rating_coerced: usize,
    pub missing_rating_rate: f64,
    pub missing_text_rate: f64,
    pub missing_date_rate: f64,
    /// Parsed dates over rows that had a date string
    pub date_parse_rate: f64,
    pub date_min: Option<NaiveDate>,
    pub date_max: Option<NaiveDate>,
    pub rating_distribution: BTreeMap<String, usize>,
    pub season_distribution: BTreeMap<String, usize>,
    pub monthly_counts: BTreeMap<String, usize>,
    pub text_len_p50: usize,
    pub text_len_p90: usize,
    pub text_len_p99: usize,
    pub short_review_rate: f64,
    pub has_text_rate: f64,
    pub trial_count: usize,
    pub low_info_count: usize,
}

/// Turns raw scraper rows into `NormalizedReview`s, one output per input.
#[derive(Debug, Clone, Default)]
pub struct ReviewNormalizer {
    noise: NoiseFilter,
}

impl ReviewNormalizer {
    pub fn new(noise: NoiseFilter) -> Self {
        Self { noise }
    }

    pub fn normalize_record(&self, raw: &RawReview) -> (NormalizedReview, RowAnomalies) {
        let mut anomalies = RowAnomalies::default();

        let review_text = raw.review_text.clone();
        let review_text_clean = review_text.as_deref().map(clean_text).unwrap_or_default();

        let review_id = match raw.review_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                anomalies.derived_id = true;
                derive_review_id(
                    raw.goods_no.as_deref().unwrap_or(""),
                    review_text.as_deref().unwrap_or(""),
                    raw.review_date.as_deref().unwrap_or(""),
                )
            }
        };

        let rating = match coerce_rating(raw.rating.as_ref()) {
            RatingCoercion::Valid(r) => Some(r),
            RatingCoercion::Missing => None,
            RatingCoercion::Invalid => {
                anomalies.rating_coerced = true;
                debug!("Nulling out-of-range rating {:?} for review {}", raw.rating, review_id);
                None
            }
        };

        let image_count = coerce_count(raw.image_count.as_ref());
        let flag = |f: &Option<RawFlag>| f.as_ref().is_some_and(RawFlag::is_set);

        let is_trial = flag(&raw.is_trial)
            || self.noise.is_trial(&review_text_clean, raw.review_type.as_deref());
        let is_low_info = flag(&raw.is_low_info) || self.noise.is_low_info(&review_text_clean);

        let mut record = NormalizedReview {
            review_id,
            goods_no: raw.goods_no.clone(),
            product_id: raw.product_id.clone(),
            sort_source: raw.sort_source.clone(),
            sort_sources_all: raw.sort_sources_all.clone().unwrap_or_default(),
            rating,
            review_date: raw.review_date.clone(),
            review_text,
            review_text_clean,
            helpful_count: coerce_count(raw.helpful_count.as_ref()),
            image_count,
            has_images: flag(&raw.has_images) || image_count > 0,
            skin_type_raw: raw.skin_type_raw.as_ref().and_then(TextOrList::joined),
            skin_tone_raw: raw.skin_tone_raw.as_ref().and_then(TextOrList::joined),
            skin_trouble_raw: raw.skin_trouble_raw.as_ref().and_then(TextOrList::joined),
            review_type: raw.review_type.clone(),
            source: raw.source.clone(),
            is_trial,
            is_low_info,
            ..NormalizedReview::default()
        };
        record.refresh_derived_fields();
        record.refresh_text_fields();

        anomalies.date_unparsed = record
            .review_date
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty())
            && record.review_date_parsed.is_none();

        (record, anomalies)
    }

    pub fn normalize_batch(&self, raws: &[RawReview]) -> (Vec<NormalizedReview>, NormalizeSummary) {
        let mut records = Vec::with_capacity(raws.len());
        let mut anomalies = Vec::with_capacity(raws.len());

        for raw in raws {
            let (record, row_anomalies) = self.normalize_record(raw);
            records.push(record);
            anomalies.push(row_anomalies);
        }

        let summary = summarize(&records, &anomalies);
        if summary.rating_coerced > 0 {
            warn!(
                "{} ratings outside 1..=5 were nulled",
                summary.rating_coerced
            );
        }
        info!(
            "Normalized {} rows ({} unique ids, date parse rate {:.1}%)",
            summary.total_rows,
            summary.unique_review_ids,
            summary.date_parse_rate * 100.0
        );
        (records, summary)
    }
}

fn summarize(records: &[NormalizedReview], anomalies: &[RowAnomalies]) -> NormalizeSummary {
    let total = records.len();
    let mut summary = NormalizeSummary {
        total_rows: total,
        ..NormalizeSummary::default()
    };

    let mut goods = HashSet::new();
    let mut ids: HashMap<&str, usize> = HashMap::new();
    let mut with_date_string = 0usize;
    let mut parsed_dates = 0usize;
    let mut missing_rating = 0usize;
    let mut missing_text = 0usize;
    let mut lengths = Vec::with_capacity(total);

    for (record, row) in records.iter().zip(anomalies) {
        if let Some(goods_no) = &record.goods_no {
            goods.insert(goods_no.as_str());
        }
        *ids.entry(record.review_id.as_str()).or_insert(0) += 1;

        summary.rating_coerced += usize::from(row.rating_coerced);
        summary.derived_review_ids += usize::from(row.derived_id);

        match record.rating {
            Some(r) => *summary.rating_distribution.entry(r.to_string()).or_insert(0) += 1,
            None => missing_rating += 1,
        }
        if record.review_text.as_deref().map_or(true, |t| t.trim().is_empty()) {
            missing_text += 1;
        }
        if record.review_date.as_deref().is_some_and(|d| !d.trim().is_empty()) {
            with_date_string += 1;
        }
        if let Some(date) = record.review_date_parsed {
            parsed_dates += 1;
            summary.date_min = Some(summary.date_min.map_or(date, |m| m.min(date)));
            summary.date_max = Some(summary.date_max.map_or(date, |m| m.max(date)));
        }
        if let Some(month) = &record.review_month {
            *summary.monthly_counts.entry(month.clone()).or_insert(0) += 1;
        }
        if let Some(season) = record.season {
            *summary
                .season_distribution
                .entry(season.as_str().to_string())
                .or_insert(0) += 1;
        }

        lengths.push(record.text_len_chars);
        summary.trial_count += usize::from(record.is_trial);
        summary.low_info_count += usize::from(record.is_low_info);
    }

    summary.unique_goods = goods.len();
    summary.unique_review_ids = ids.len();
    summary.duplicate_review_ids = total - ids.len();
    summary.missing_rating_rate = rate(missing_rating, total);
    summary.missing_text_rate = rate(missing_text, total);
    summary.missing_date_rate = rate(total - parsed_dates, total);
    summary.date_parse_rate = rate(parsed_dates, with_date_string);

    lengths.sort_unstable();
    summary.text_len_p50 = percentile_usize(&lengths, 0.50);
    summary.text_len_p90 = percentile_usize(&lengths, 0.90);
    summary.text_len_p99 = percentile_usize(&lengths, 0.99);
    summary.short_review_rate = rate(
        lengths.iter().filter(|l| **l < SHORT_REVIEW_CHARS).count(),
        total,
    );
    summary.has_text_rate = rate(records.iter().filter(|r| r.has_text).count(), total);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_raw_review(id: Option<&str>, rating: Option<RawScalar>, text: &str) -> RawReview {
        RawReview {
            review_id: id.map(str::to_string),
            goods_no: Some("A1".to_string()),
            sort_source: Some("newest".to_string()),
            rating,
            review_date: Some("2024.07.15".to_string()),
            review_text: Some(text.to_string()),
            ..RawReview::default()
        }
    }

    #[test]
    fn test_rating_coercion() {
        assert_eq!(coerce_rating(Some(&RawScalar::Int(4))), RatingCoercion::Valid(4));
        assert_eq!(
            coerce_rating(Some(&RawScalar::Text(" 5 ".to_string()))),
            RatingCoercion::Valid(5)
        );
        assert_eq!(coerce_rating(Some(&RawScalar::Float(3.0))), RatingCoercion::Valid(3));
        assert_eq!(coerce_rating(Some(&RawScalar::Int(0))), RatingCoercion::Invalid);
        assert_eq!(coerce_rating(Some(&RawScalar::Int(6))), RatingCoercion::Invalid);
        assert_eq!(coerce_rating(Some(&RawScalar::Float(4.5))), RatingCoercion::Invalid);
        assert_eq!(
            coerce_rating(Some(&RawScalar::Text("great".to_string()))),
            RatingCoercion::Invalid
        );
        assert_eq!(coerce_rating(None), RatingCoercion::Missing);
    }

    #[test]
    fn test_date_formats_first_match_wins() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(parse_review_date("2024.03.05"), expected);
        assert_eq!(parse_review_date(" 2024-03-05 "), expected);
        assert_eq!(parse_review_date("2024/03/05"), expected);
        assert_eq!(parse_review_date("05/03/2024"), None);
        assert_eq!(parse_review_date(""), None);
    }

    #[test]
    fn test_out_of_range_rating_keeps_row() {
        let normalizer = ReviewNormalizer::default();
        let raws = vec![
            create_raw_review(Some("r1"), Some(RawScalar::Int(9)), "정말 좋아요 피부가 촉촉해져요"),
            create_raw_review(Some("r2"), Some(RawScalar::Int(4)), "정말 좋아요 피부가 촉촉해져요"),
        ];
        let (records, summary) = normalizer.normalize_batch(&raws);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].rating, None);
        assert_eq!(records[0].rating_bucket, None);
        assert_eq!(records[1].rating_bucket, Some(RatingBucket::High));
        assert_eq!(summary.rating_coerced, 1);
        assert_eq!(summary.missing_rating_rate, 0.5);
    }

    #[test]
    fn test_derived_fields() {
        let normalizer = ReviewNormalizer::default();
        let (record, anomalies) = normalizer.normalize_record(&create_raw_review(
            Some("r1"),
            Some(RawScalar::Int(2)),
            "  따가워요&amp;  ",
        ));

        assert_eq!(record.review_text.as_deref(), Some("  따가워요&amp;  "));
        assert_eq!(record.review_text_clean, "따가워요&");
        assert_eq!(record.text_len_chars, 5);
        assert_eq!(record.season, Some(Season::Summer));
        assert_eq!(record.review_month.as_deref(), Some("2024-07"));
        assert_eq!(record.review_year, Some(2024));
        assert_eq!(record.rating_bucket, Some(RatingBucket::Low));
        assert!(record.is_low_info);
        assert!(!anomalies.date_unparsed);
    }

    #[test]
    fn test_unparseable_date_is_nulled() {
        let normalizer = ReviewNormalizer::default();
        let mut raw = create_raw_review(Some("r1"), None, "text");
        raw.review_date = Some("yesterday".to_string());
        let (record, anomalies) = normalizer.normalize_record(&raw);

        assert_eq!(record.review_date.as_deref(), Some("yesterday"));
        assert_eq!(record.review_date_parsed, None);
        assert_eq!(record.season, None);
        assert!(anomalies.date_unparsed);
    }

    #[test]
    fn test_missing_id_is_derived_deterministically() {
        let normalizer = ReviewNormalizer::default();
        let raw = create_raw_review(None, Some(RawScalar::Int(5)), "same text");
        let (first, anomalies) = normalizer.normalize_record(&raw);
        let (second, _) = normalizer.normalize_record(&raw);

        assert!(anomalies.derived_id);
        assert_eq!(first.review_id.len(), DERIVED_ID_HEX_LEN);
        assert_eq!(first.review_id, second.review_id);
    }

    #[test]
    fn test_raw_flags_are_preserved() {
        let normalizer = ReviewNormalizer::default();
        let mut raw = create_raw_review(Some("r1"), Some(RawScalar::Int(5)), "피부에 바르면 촉촉하고 흡수가 빨라서 좋아요");
        raw.is_trial = Some(RawFlag::Int(1));
        raw.skin_type_raw = Some(TextOrList::List(vec!["지성".to_string(), "민감".to_string()]));
        let (record, _) = normalizer.normalize_record(&raw);

        assert!(record.is_trial);
        assert!(!record.is_low_info);
        assert_eq!(record.skin_type_raw.as_deref(), Some("지성, 민감"));
    }

    #[test]
    fn test_raw_review_deserializes_loose_types() {
        let raw: RawReview = serde_json::from_str(
            r#"{"reviewId": "x1", "rating": "4", "helpful_count": 3, "has_images": 1, "skin_tone_raw": "21호", "extra": true}"#,
        )
        .unwrap();
        assert_eq!(raw.review_id.as_deref(), Some("x1"));
        assert_eq!(raw.rating, Some(RawScalar::Text("4".to_string())));
        assert!(raw.has_images.unwrap().is_set());
    }
}
