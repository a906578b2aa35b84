//! Review identity resolution: one canonical row per `review_id`.
//!
//! The scraper sees the same review once per listing sort and sometimes under
//! several mirrored product listings. Rows sharing an id are merged with a
//! fixed per-field policy and any disagreement is kept as an audit flag.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::constants::{join_tags, sort_priority};
use crate::observability::metrics;
use crate::pipeline::processing::normalize::NormalizedReview;
use crate::pipeline::processing::stats::rate;

/// Fields merged by mode and watched for disagreement, in report order
pub const WATCHED_FIELDS: [&str; 4] = ["rating", "review_date", "review_text", "review_text_clean"];

const MAX_SAMPLES: usize = 10;

/// A review after duplicate rows were merged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupedReview {
    #[serde(flatten)]
    pub review: NormalizedReview,
    /// Every distinct product id the review was seen under, when more than one
    pub goods_no_all: Option<Vec<String>>,
    /// `sort_sources_all` joined with `|`
    pub sort_sources_str: Option<String>,
    pub sort_count: usize,
    /// Highest-priority sort source (low_rating > newest > helpful > high_rating)
    pub primary_sort: Option<String>,
    /// Number of raw rows merged into this one
    pub dup_count: usize,
    /// True when any watched field had more than one distinct value
    pub dup_conflict: bool,
    /// Watched fields that disagreed
    pub conflict_cols: Vec<String>,
}

/// Statistical mode over the present values, ties broken by first occurrence.
/// Also reports whether more than one distinct value was present.
pub fn mode_with_conflict<T, I>(values: I) -> (Option<T>, bool)
where
    T: PartialEq + Clone,
    I: IntoIterator<Item = Option<T>>,
{
    let mut tallies: Vec<(T, usize)> = Vec::new();
    for value in values.into_iter().flatten() {
        match tallies.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => tallies.push((value, 1)),
        }
    }

    let conflict = tallies.len() > 1;
    let mut best: Option<(T, usize)> = None;
    for (value, count) in tallies {
        if best.as_ref().map_or(true, |(_, best_count)| count > *best_count) {
            best = Some((value, count));
        }
    }
    (best.map(|(value, _)| value), conflict)
}

/// Merges a group of rows sharing one `review_id`. `rows` must be non-empty.
pub fn merge_group(rows: &[NormalizedReview]) -> DedupedReview {
    let first = &rows[0];
    let mut merged = first.clone();
    let mut conflict_cols = Vec::new();

    let (rating, rating_conflict) = mode_with_conflict(rows.iter().map(|r| r.rating));
    let (review_date, date_conflict) =
        mode_with_conflict(rows.iter().map(|r| r.review_date.clone()));
    let (review_text, text_conflict) =
        mode_with_conflict(rows.iter().map(|r| r.review_text.clone()));
    let (review_text_clean, clean_conflict) = mode_with_conflict(
        rows.iter()
            .map(|r| Some(r.review_text_clean.clone()).filter(|t| !t.is_empty())),
    );

    for (field, conflict) in WATCHED_FIELDS
        .iter()
        .zip([rating_conflict, date_conflict, text_conflict, clean_conflict])
    {
        if conflict {
            conflict_cols.push(field.to_string());
        }
    }

    merged.rating = rating;
    merged.review_date = review_date;
    merged.review_text = review_text;
    merged.review_text_clean = review_text_clean.unwrap_or_default();

    merged.helpful_count = rows.iter().map(|r| r.helpful_count).max().unwrap_or(0);
    merged.image_count = rows.iter().map(|r| r.image_count).max().unwrap_or(0);
    merged.has_images = rows.iter().any(|r| r.has_images);
    merged.is_trial = rows.iter().any(|r| r.is_trial);
    merged.is_low_info = rows.iter().any(|r| r.is_low_info);

    let sources: BTreeSet<String> = rows
        .iter()
        .flat_map(|r| r.sort_source.iter().chain(r.sort_sources_all.iter()))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    // Sources are sorted, so equal priorities resolve alphabetically
    let primary_sort = sources.iter().min_by_key(|s| sort_priority(s)).cloned();
    merged.sort_sources_all = sources.into_iter().collect();

    let mut goods: Vec<String> = Vec::new();
    for goods_no in rows.iter().filter_map(|r| r.goods_no.as_ref()) {
        if !goods.contains(goods_no) {
            goods.push(goods_no.clone());
        }
    }

    merged.refresh_derived_fields();
    merged.refresh_text_fields();

    DedupedReview {
        sort_sources_str: join_tags(&merged.sort_sources_all),
        sort_count: merged.sort_sources_all.len(),
        primary_sort,
        goods_no_all: if goods.len() > 1 { Some(goods) } else { None },
        dup_count: rows.len(),
        dup_conflict: !conflict_cols.is_empty(),
        conflict_cols,
        review: merged,
    }
}

/// Before/after view of one merged group, kept for the audit summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSample {
    pub review_id: String,
    pub rows_before: usize,
    pub sort_sources_before: Vec<Option<String>>,
    pub ratings_before: Vec<Option<u8>>,
    pub sort_sources_after: Option<String>,
    pub primary_sort: Option<String>,
    pub rating_after: Option<u8>,
    pub conflict_cols: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupSummary {
    pub rows_before: usize,
    pub rows_after: usize,
    /// Ids that had more than one row
    pub duplicate_groups: usize,
    pub rows_in_duplicate_groups: usize,
    pub conflict_count: usize,
    /// Conflicting groups over duplicate groups
    pub conflict_rate: f64,
    pub conflicts_by_field: BTreeMap<String, usize>,
    pub primary_sort_distribution: BTreeMap<String, usize>,
    pub samples: Vec<DedupSample>,
}

/// Collapses duplicate review rows. Never fails on bad data.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn new() -> Self {
        Self
    }

    /// Returns one row per distinct `review_id`, ordered by id.
    pub fn dedup(&self, rows: Vec<NormalizedReview>) -> (Vec<DedupedReview>, DedupSummary) {
        let rows_before = rows.len();
        let mut groups: BTreeMap<String, Vec<NormalizedReview>> = BTreeMap::new();
        for row in rows {
            groups.entry(row.review_id.clone()).or_default().push(row);
        }

        let mut summary = DedupSummary {
            rows_before,
            ..DedupSummary::default()
        };
        let mut merged_rows = Vec::with_capacity(groups.len());

        for (review_id, group) in &groups {
            let merged = merge_group(group);

            if group.len() > 1 {
                summary.duplicate_groups += 1;
                summary.rows_in_duplicate_groups += group.len();
                if summary.samples.len() < MAX_SAMPLES {
                    summary.samples.push(DedupSample {
                        review_id: review_id.clone(),
                        rows_before: group.len(),
                        sort_sources_before: group.iter().map(|r| r.sort_source.clone()).collect(),
                        ratings_before: group.iter().map(|r| r.rating).collect(),
                        sort_sources_after: merged.sort_sources_str.clone(),
                        primary_sort: merged.primary_sort.clone(),
                        rating_after: merged.review.rating,
                        conflict_cols: merged.conflict_cols.clone(),
                    });
                }
            }
            if merged.dup_conflict {
                summary.conflict_count += 1;
                debug!(
                    "Review {} has conflicting fields: {:?}",
                    review_id, merged.conflict_cols
                );
                for field in &merged.conflict_cols {
                    *summary.conflicts_by_field.entry(field.clone()).or_insert(0) += 1;
                }
            }
            if let Some(primary) = &merged.primary_sort {
                *summary
                    .primary_sort_distribution
                    .entry(primary.clone())
                    .or_insert(0) += 1;
            }
            merged_rows.push(merged);
        }

        summary.rows_after = merged_rows.len();
        summary.conflict_rate = rate(summary.conflict_count, summary.duplicate_groups);

        metrics::dedup::rows_merged(rows_before, summary.rows_after);
        metrics::dedup::conflicts_detected(summary.conflict_count);
        info!(
            "Deduplicated {} rows into {} reviews ({} duplicate groups, {} conflicts)",
            summary.rows_before, summary.rows_after, summary.duplicate_groups, summary.conflict_count
        );

        (merged_rows, summary)
    }
}
