//! Join of LLM extraction items onto rule-tagged reviews, and the aggregate
//! tables built from it. Everything is recomputed from scratch on each run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::info;

use crate::constants::{split_tags, NONE_CONTEXT_TAG};
use crate::domain::{Aspect, Polarity, PolarityGroup, QueueBucket, RatingBucket, Season};
use crate::pipeline::processing::extraction::ExtractionItem;
use crate::pipeline::processing::stats::rate;
use crate::pipeline::processing::tagging::TaggedReview;

/// One extraction item with the rule-side fields of its review.
/// Rule fields are `None` when the review was not in the tagged table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRow {
    pub review_id: String,
    pub goods_no: Option<String>,
    pub bucket: QueueBucket,
    pub aspect: Aspect,
    pub polarity: Polarity,
    pub polarity_group: PolarityGroup,
    pub expectation: Option<String>,
    pub experience: Option<String>,
    pub context: Option<String>,
    pub evidence: Option<String>,
    pub confidence: Option<f64>,
    /// True when the review was found in the tagged table
    pub matched: bool,
    pub rating: Option<u8>,
    pub rating_bucket: Option<RatingBucket>,
    pub season: Option<Season>,
    pub review_month: Option<String>,
    pub context_tags_str: Option<String>,
    pub attribute_tags_str: Option<String>,
    pub skin_tags_str: Option<String>,
    pub has_conditional: Option<bool>,
    pub golden_nugget: Option<bool>,
    pub is_trial: Option<bool>,
    pub is_low_info: Option<bool>,
    pub text_len_chars: Option<usize>,
    pub helpful_count: Option<u64>,
    pub primary_sort: Option<String>,
}

impl JoinedRow {
    /// Context tags of the row, or the sentinel when the review has none.
    pub fn context_keys(&self) -> Vec<String> {
        let tags = split_tags(self.context_tags_str.as_deref());
        if tags.is_empty() {
            vec![NONE_CONTEXT_TAG.to_string()]
        } else {
            tags
        }
    }
}

/// Left join of items onto tagged reviews by `review_id`.
pub fn join(items: &[ExtractionItem], tagged: &[TaggedReview]) -> Vec<JoinedRow> {
    let by_id: HashMap<&str, &TaggedReview> =
        tagged.iter().map(|t| (t.review_id(), t)).collect();

    items
        .iter()
        .map(|item| {
            let rule = by_id.get(item.review_id.as_str()).copied();
            let base = rule.map(|t| &t.review.review);
            JoinedRow {
                review_id: item.review_id.clone(),
                goods_no: item
                    .goods_no
                    .clone()
                    .or_else(|| base.and_then(|b| b.goods_no.clone())),
                bucket: item.bucket,
                aspect: item.aspect,
                polarity: item.polarity,
                polarity_group: item.polarity.group(),
                expectation: item.expectation.clone(),
                experience: item.experience.clone(),
                context: item.context.clone(),
                evidence: item.evidence.clone(),
                confidence: item.confidence,
                matched: rule.is_some(),
                rating: base.and_then(|b| b.rating),
                rating_bucket: base.and_then(|b| b.rating_bucket),
                season: base.and_then(|b| b.season),
                review_month: base.and_then(|b| b.review_month.clone()),
                context_tags_str: rule.and_then(|t| t.context_tags_str.clone()),
                attribute_tags_str: rule.and_then(|t| t.attribute_tags_str.clone()),
                skin_tags_str: rule.and_then(|t| t.skin_tags_str.clone()),
                has_conditional: rule.map(|t| t.has_conditional),
                golden_nugget: rule.map(|t| t.golden_nugget),
                is_trial: base.map(|b| b.is_trial),
                is_low_info: base.map(|b| b.is_low_info),
                text_len_chars: base.map(|b| b.text_len_chars),
                helpful_count: base.map(|b| b.helpful_count),
                primary_sort: rule.and_then(|t| t.review.primary_sort.clone()),
            }
        })
        .collect()
}

/// Polarity counts of one group. The four polarity counts partition
/// `n_items`, as do `unmet_like_cnt + met_like_cnt + unknown_cnt`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PolarityCounts {
    pub n_items: usize,
    pub met_cnt: usize,
    pub unmet_cnt: usize,
    pub mixed_cnt: usize,
    pub unknown_cnt: usize,
    pub unmet_like_cnt: usize,
    pub met_like_cnt: usize,
    pub unmet_like_rate: f64,
}

impl PolarityCounts {
    fn add(&mut self, polarity: Polarity) {
        self.n_items += 1;
        match polarity {
            Polarity::Met => self.met_cnt += 1,
            Polarity::Unmet => self.unmet_cnt += 1,
            Polarity::Mixed => self.mixed_cnt += 1,
            Polarity::Unknown => self.unknown_cnt += 1,
        }
        match polarity.group() {
            PolarityGroup::UnmetLike => self.unmet_like_cnt += 1,
            PolarityGroup::MetLike => self.met_like_cnt += 1,
            PolarityGroup::Unknown => {}
        }
        self.unmet_like_rate = rate(self.unmet_like_cnt, self.n_items);
    }
}

/// T1: overall by aspect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectPivotRow {
    pub aspect: Aspect,
    #[serde(flatten)]
    pub counts: PolarityCounts,
}

/// T2: by (queue bucket, aspect)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketAspectRow {
    pub bucket: QueueBucket,
    pub aspect: Aspect,
    #[serde(flatten)]
    pub counts: PolarityCounts,
}

/// T3: by (context tag, aspect), one row per review per key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAspectRow {
    pub context_tag: String,
    pub aspect: Aspect,
    #[serde(flatten)]
    pub counts: PolarityCounts,
}

/// T4: by (season, aspect), known seasons only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonAspectRow {
    pub season: Season,
    pub aspect: Aspect,
    #[serde(flatten)]
    pub counts: PolarityCounts,
}

/// T5: how many products show an aspect, and how many show it unmet-like
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatabilityRow {
    pub aspect: Aspect,
    pub goods_cnt_any: usize,
    pub reviews_any_cnt: usize,
    pub goods_cnt_unmet_like: usize,
    pub reviews_unmet_like_cnt: usize,
    pub goods_repeat_rate: f64,
}

/// Recurring (context, aspect) caveat pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextHighlight {
    pub context_tag: String,
    pub aspect: Aspect,
    pub n_reviews: usize,
    pub unmet_like_cnt: usize,
    pub unmet_like_rate: f64,
}

fn tally<K: Ord>(rows: impl IntoIterator<Item = (K, Polarity)>) -> BTreeMap<K, PolarityCounts> {
    let mut groups: BTreeMap<K, PolarityCounts> = BTreeMap::new();
    for (key, polarity) in rows {
        groups.entry(key).or_default().add(polarity);
    }
    groups
}

fn by_rate_desc(a: &PolarityCounts, b: &PolarityCounts) -> std::cmp::Ordering {
    b.unmet_like_rate.total_cmp(&a.unmet_like_rate)
}

/// T1, sorted by unmet-like rate descending; ties keep aspect order.
pub fn pivot_by_aspect(rows: &[JoinedRow]) -> Vec<AspectPivotRow> {
    let mut out: Vec<AspectPivotRow> = tally(rows.iter().map(|r| (r.aspect, r.polarity)))
        .into_iter()
        .map(|(aspect, counts)| AspectPivotRow { aspect, counts })
        .collect();
    out.sort_by(|a, b| by_rate_desc(&a.counts, &b.counts));
    out
}

/// T2, in (bucket, aspect) key order.
pub fn pivot_by_bucket(rows: &[JoinedRow]) -> Vec<BucketAspectRow> {
    tally(rows.iter().map(|r| ((r.bucket, r.aspect), r.polarity)))
        .into_iter()
        .map(|((bucket, aspect), counts)| BucketAspectRow {
            bucket,
            aspect,
            counts,
        })
        .collect()
}

/// Rows exploded by context tag and deduplicated on (review, aspect, tag).
/// The first item of a duplicate triple supplies the polarity.
pub fn explode_contexts(rows: &[JoinedRow]) -> Vec<(String, &JoinedRow)> {
    let mut seen: HashSet<(&str, Aspect, String)> = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        for tag in row.context_keys() {
            if seen.insert((row.review_id.as_str(), row.aspect, tag.clone())) {
                out.push((tag, row));
            }
        }
    }
    out
}

/// T3, sorted by unmet-like count descending. Sentinel rows are kept.
pub fn pivot_by_context(exploded: &[(String, &JoinedRow)]) -> Vec<ContextAspectRow> {
    let mut out: Vec<ContextAspectRow> = tally(
        exploded
            .iter()
            .map(|(tag, row)| ((tag.clone(), row.aspect), row.polarity)),
    )
    .into_iter()
    .map(|((context_tag, aspect), counts)| ContextAspectRow {
        context_tag,
        aspect,
        counts,
    })
    .collect();
    out.sort_by(|a, b| b.counts.unmet_like_cnt.cmp(&a.counts.unmet_like_cnt));
    out
}

/// T4, rows with a known season, one per (review, aspect, season).
pub fn pivot_by_season(rows: &[JoinedRow]) -> Vec<SeasonAspectRow> {
    let mut seen: HashSet<(&str, Aspect, Season)> = HashSet::new();
    let keyed = rows.iter().filter_map(|r| {
        let season = r.season?;
        seen.insert((r.review_id.as_str(), r.aspect, season))
            .then_some(((season, r.aspect), r.polarity))
    });
    tally(keyed)
        .into_iter()
        .map(|((season, aspect), counts)| SeasonAspectRow {
            season,
            aspect,
            counts,
        })
        .collect()
}

/// T5, sorted by unmet-like product count descending.
pub fn repeatability(rows: &[JoinedRow]) -> Vec<RepeatabilityRow> {
    #[derive(Default)]
    struct Sets<'a> {
        goods_any: BTreeSet<&'a str>,
        reviews_any: BTreeSet<&'a str>,
        goods_unmet: BTreeSet<&'a str>,
        reviews_unmet: BTreeSet<&'a str>,
    }

    let mut per_aspect: BTreeMap<Aspect, Sets> = BTreeMap::new();
    for row in rows {
        let sets = per_aspect.entry(row.aspect).or_default();
        let unmet = row.polarity_group == PolarityGroup::UnmetLike;
        sets.reviews_any.insert(&row.review_id);
        if unmet {
            sets.reviews_unmet.insert(&row.review_id);
        }
        if let Some(goods) = row.goods_no.as_deref() {
            sets.goods_any.insert(goods);
            if unmet {
                sets.goods_unmet.insert(goods);
            }
        }
    }

    let mut out: Vec<RepeatabilityRow> = per_aspect
        .into_iter()
        .map(|(aspect, sets)| RepeatabilityRow {
            aspect,
            goods_cnt_any: sets.goods_any.len(),
            reviews_any_cnt: sets.reviews_any.len(),
            goods_cnt_unmet_like: sets.goods_unmet.len(),
            reviews_unmet_like_cnt: sets.reviews_unmet.len(),
            goods_repeat_rate: rate(sets.goods_unmet.len(), sets.goods_any.len()),
        })
        .collect();
    out.sort_by(|a, b| b.goods_cnt_unmet_like.cmp(&a.goods_cnt_unmet_like));
    out
}

/// Top (context, aspect) unmet-like patterns among items sampled into the
/// golden-nugget queue bucket. The no-context sentinel is never listed.
pub fn golden_nugget_highlights(rows: &[JoinedRow], limit: usize) -> Vec<ContextHighlight> {
    let golden: Vec<JoinedRow> = rows
        .iter()
        .filter(|r| r.bucket == QueueBucket::GoldenNugget)
        .cloned()
        .collect();
    let exploded = explode_contexts(&golden);
    let mut out: Vec<ContextHighlight> = pivot_by_context(&exploded)
        .into_iter()
        .filter(|row| row.context_tag != NONE_CONTEXT_TAG)
        .map(|row| ContextHighlight {
            context_tag: row.context_tag,
            aspect: row.aspect,
            n_reviews: row.counts.n_items,
            unmet_like_cnt: row.counts.unmet_like_cnt,
            unmet_like_rate: row.counts.unmet_like_rate,
        })
        .collect();
    out.sort_by(|a, b| b.unmet_like_cnt.cmp(&a.unmet_like_cnt));
    out.truncate(limit);
    out
}

/// Every table produced by one analysis run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PivotTables {
    pub master: Vec<JoinedRow>,
    pub by_aspect: Vec<AspectPivotRow>,
    pub by_bucket: Vec<BucketAspectRow>,
    pub by_context: Vec<ContextAspectRow>,
    pub by_season: Vec<SeasonAspectRow>,
    pub repeatability: Vec<RepeatabilityRow>,
    pub golden_nugget_highlights: Vec<ContextHighlight>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PivotSummary {
    pub item_rows: usize,
    pub distinct_reviews: usize,
    pub tagged_reviews: usize,
    pub unmatched_items: usize,
    /// Joined rows that found their review, over all joined rows
    pub join_success_rate: f64,
    pub context_explode_rows: usize,
    pub context_none_rate: f64,
    pub aspects: usize,
    pub polarity_groups: BTreeMap<String, usize>,
}

const HIGHLIGHT_LIMIT: usize = 15;

/// Builds the master join and all aggregate tables.
pub fn build_tables(items: &[ExtractionItem], tagged: &[TaggedReview]) -> (PivotTables, PivotSummary) {
    let master = join(items, tagged);

    let (context_rows, context_explode_rows, none_rows) = {
        let exploded = explode_contexts(&master);
        let none_rows = exploded
            .iter()
            .filter(|(tag, _)| tag == NONE_CONTEXT_TAG)
            .count();
        (pivot_by_context(&exploded), exploded.len(), none_rows)
    };

    let matched = master.iter().filter(|r| r.matched).count();
    let mut polarity_groups = BTreeMap::new();
    for row in &master {
        *polarity_groups
            .entry(row.polarity_group.as_str().to_string())
            .or_insert(0) += 1;
    }

    let tables = PivotTables {
        by_aspect: pivot_by_aspect(&master),
        by_bucket: pivot_by_bucket(&master),
        by_context: context_rows,
        by_season: pivot_by_season(&master),
        repeatability: repeatability(&master),
        golden_nugget_highlights: golden_nugget_highlights(&master, HIGHLIGHT_LIMIT),
        master,
    };

    let summary = PivotSummary {
        item_rows: tables.master.len(),
        distinct_reviews: tables
            .master
            .iter()
            .map(|r| r.review_id.as_str())
            .collect::<HashSet<_>>()
            .len(),
        tagged_reviews: tagged.len(),
        unmatched_items: tables.master.len() - matched,
        join_success_rate: rate(matched, tables.master.len()),
        context_explode_rows,
        context_none_rate: rate(none_rows, context_explode_rows),
        aspects: tables.by_aspect.len(),
        polarity_groups,
    };

    info!(
        "Joined {} items ({:.1}% matched), {} aspects, context NONE rate {:.1}%",
        summary.item_rows,
        summary.join_success_rate * 100.0,
        summary.aspects,
        summary.context_none_rate * 100.0
    );
    (tables, summary)
}
