//! Rule-based lexical tagging of cleaned review text.

pub mod lexicon;
pub mod polarity;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::constants::{
    join_tags, GOLDEN_NUGGET_MIN_CHARS, TAG_EYE_STING, TAG_TONEUP, TAG_WHITECAST,
};
use crate::domain::{RatingBucket, TagPolarity};
use crate::observability::metrics;
use crate::pipeline::processing::dedup::DedupedReview;
use crate::pipeline::processing::stats::rate;
use lexicon::Lexicon;
use polarity::resolve_polarity;

const TOP_TAGS: usize = 10;
const TOP_COOCCURRENCE: usize = 5;

/// A deduplicated review with its rule-based tags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggedReview {
    #[serde(flatten)]
    pub review: DedupedReview,
    /// Product attribute tags in lexicon order
    pub attribute_tags: Vec<String>,
    pub attribute_tags_str: Option<String>,
    /// Usage context tags in lexicon order
    pub context_tags: Vec<String>,
    pub context_tags_str: Option<String>,
    /// Skin profile tags, matched on text plus skin profile fields
    pub skin_tags: Vec<String>,
    pub skin_tags_str: Option<String>,
    /// Number of mentions per attribute tag
    pub attribute_mentions: BTreeMap<String, usize>,
    /// Polarity per present attribute tag; `unknown` for tags outside the
    /// negation target set
    pub attribute_polarity: BTreeMap<String, TagPolarity>,
    pub has_conditional: bool,
    /// Matched conditional marker names, sorted
    pub conditional_markers: Vec<String>,
    pub conditional_markers_str: Option<String>,
    pub toneup_whitecast_conflict: bool,
    pub golden_nugget: bool,
    pub has_attribute_tag: bool,
    pub has_context_tag: bool,
    pub has_skin_tag: bool,
}

impl TaggedReview {
    pub fn review_id(&self) -> &str {
        &self.review.review.review_id
    }
}

/// High-rated review that still carries a caveat and enough text to analyze.
pub fn is_golden_nugget(
    rating_bucket: Option<RatingBucket>,
    has_conditional: bool,
    text_len_chars: usize,
    is_low_info: bool,
) -> bool {
    rating_bucket == Some(RatingBucket::High)
        && has_conditional
        && text_len_chars >= GOLDEN_NUGGET_MIN_CHARS
        && !is_low_info
}

/// Reviewer praises tone-up but qualifies it or admits a white cast.
pub fn has_toneup_whitecast_conflict(
    attribute_tags: &[String],
    has_conditional: bool,
    attribute_polarity: &BTreeMap<String, TagPolarity>,
) -> bool {
    let has = |tag: &str| attribute_tags.iter().any(|t| t == tag);
    if !(has(TAG_TONEUP) && has(TAG_WHITECAST)) {
        return false;
    }
    let whitecast = attribute_polarity
        .get(TAG_WHITECAST)
        .copied()
        .unwrap_or(TagPolarity::Unknown);
    has_conditional || matches!(whitecast, TagPolarity::Affirmed | TagPolarity::Mixed)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Coverage and distribution summary of a tagging run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagSummary {
    pub total_reviews: usize,
    pub lexicon_version: Option<String>,
    pub attribute_coverage: f64,
    pub context_coverage: f64,
    pub skin_coverage: f64,
    pub conditional_rate: f64,
    pub conditional_rate_by_bucket: BTreeMap<String, f64>,
    pub golden_nugget_count: usize,
    pub golden_nugget_rate: f64,
    pub golden_nugget_non_trial: usize,
    pub toneup_whitecast_conflicts: usize,
    pub top_attribute_tags: Vec<TagCount>,
    pub top_context_tags: Vec<TagCount>,
    pub top_skin_tags: Vec<TagCount>,
    pub top_attribute_tags_low_rating: Vec<TagCount>,
    pub top_attribute_tags_high_conditional: Vec<TagCount>,
    pub whitecast_polarity: BTreeMap<String, usize>,
    pub eye_sting_polarity: BTreeMap<String, usize>,
    /// Top attribute tags co-occurring with each skin tag
    pub skin_attribute_cooccurrence: BTreeMap<String, Vec<TagCount>>,
    /// Top attribute tags co-occurring with each context tag
    pub context_attribute_cooccurrence: BTreeMap<String, Vec<TagCount>>,
}

/// Applies a lexicon to deduplicated reviews. The input text is never altered.
#[derive(Debug, Clone)]
pub struct LexicalTagger {
    lexicon: Lexicon,
}

impl LexicalTagger {
    pub fn new(lexicon: Lexicon) -> Self {
        Self { lexicon }
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn tag_review(&self, review: DedupedReview) -> TaggedReview {
        let base = &review.review;
        let text = base.review_text_clean.as_str();

        let spans = self.lexicon.attributes.match_spans(text);
        let attribute_tags: Vec<String> = spans.iter().map(|(tag, _)| tag.clone()).collect();
        let mut attribute_mentions = BTreeMap::new();
        let mut attribute_polarity = BTreeMap::new();
        for (tag, tag_spans) in &spans {
            attribute_mentions.insert(tag.clone(), tag_spans.len());
            let polarity = match &self.lexicon.negation {
                Some(negation) if self.lexicon.is_negation_target(tag) => {
                    resolve_polarity(text, tag_spans, self.lexicon.negation_window, negation)
                }
                _ => TagPolarity::Unknown,
            };
            attribute_polarity.insert(tag.clone(), polarity);
        }

        let context_tags = self.lexicon.contexts.matching_tags(text);

        let hints = base.skin_hints();
        let skin_tags = if hints.is_empty() {
            self.lexicon.skins.matching_tags(text)
        } else {
            let skin_text = format!("{} {}", text, hints.join(" "));
            self.lexicon.skins.matching_tags(&skin_text)
        };

        let mut conditional_markers = self.lexicon.conditional_markers.matching_tags(text);
        conditional_markers.sort();
        let has_conditional = !conditional_markers.is_empty();

        let toneup_whitecast_conflict =
            has_toneup_whitecast_conflict(&attribute_tags, has_conditional, &attribute_polarity);
        let golden_nugget = is_golden_nugget(
            base.rating_bucket,
            has_conditional,
            base.text_len_chars,
            base.is_low_info,
        );

        TaggedReview {
            attribute_tags_str: join_tags(&attribute_tags),
            context_tags_str: join_tags(&context_tags),
            skin_tags_str: join_tags(&skin_tags),
            conditional_markers_str: join_tags(&conditional_markers),
            has_attribute_tag: !attribute_tags.is_empty(),
            has_context_tag: !context_tags.is_empty(),
            has_skin_tag: !skin_tags.is_empty(),
            attribute_tags,
            context_tags,
            skin_tags,
            attribute_mentions,
            attribute_polarity,
            has_conditional,
            conditional_markers,
            toneup_whitecast_conflict,
            golden_nugget,
            review,
        }
    }

    pub fn tag_all(&self, reviews: Vec<DedupedReview>) -> (Vec<TaggedReview>, TagSummary) {
        let tagged: Vec<TaggedReview> = reviews.into_iter().map(|r| self.tag_review(r)).collect();
        let summary = summarize(&tagged, self.lexicon.version.clone());

        metrics::tagging::reviews_tagged(summary.total_reviews);
        metrics::tagging::golden_nuggets(summary.golden_nugget_count);
        info!(
            "Tagged {} reviews: attribute coverage {:.1}%, conditional {:.1}%, {} golden nuggets",
            summary.total_reviews,
            summary.attribute_coverage * 100.0,
            summary.conditional_rate * 100.0,
            summary.golden_nugget_count
        );
        (tagged, summary)
    }
}

fn top_counts(counts: &BTreeMap<String, usize>, limit: usize) -> Vec<TagCount> {
    let mut items: Vec<TagCount> = counts
        .iter()
        .map(|(tag, count)| TagCount {
            tag: tag.clone(),
            count: *count,
        })
        .collect();
    items.sort_by(|a, b| b.count.cmp(&a.count));
    items.truncate(limit);
    items
}

fn bump<'a>(counts: &mut BTreeMap<String, usize>, tags: impl IntoIterator<Item = &'a String>) {
    for tag in tags {
        *counts.entry(tag.clone()).or_insert(0) += 1;
    }
}

fn summarize(tagged: &[TaggedReview], lexicon_version: Option<String>) -> TagSummary {
    let total = tagged.len();
    let mut attribute_counts = BTreeMap::new();
    let mut context_counts = BTreeMap::new();
    let mut skin_counts = BTreeMap::new();
    let mut low_rating_counts = BTreeMap::new();
    let mut high_conditional_counts = BTreeMap::new();
    let mut whitecast_polarity = BTreeMap::new();
    let mut eye_sting_polarity = BTreeMap::new();
    let mut bucket_totals: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    let mut skin_pairs: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    let mut context_pairs: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();

    let mut summary = TagSummary {
        total_reviews: total,
        lexicon_version,
        ..TagSummary::default()
    };

    for row in tagged {
        let bucket = row.review.review.rating_bucket;
        bump(&mut attribute_counts, &row.attribute_tags);
        bump(&mut context_counts, &row.context_tags);
        bump(&mut skin_counts, &row.skin_tags);

        if bucket == Some(RatingBucket::Low) {
            bump(&mut low_rating_counts, &row.attribute_tags);
        }
        if bucket == Some(RatingBucket::High) && row.has_conditional {
            bump(&mut high_conditional_counts, &row.attribute_tags);
        }
        if let Some(bucket) = bucket {
            let entry = bucket_totals.entry(bucket.as_str().to_string()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += usize::from(row.has_conditional);
        }
        for (tag, target) in [
            (TAG_WHITECAST, &mut whitecast_polarity),
            (TAG_EYE_STING, &mut eye_sting_polarity),
        ] {
            if let Some(polarity) = row.attribute_polarity.get(tag) {
                *target.entry(polarity.as_str().to_string()).or_insert(0) += 1;
            }
        }
        for skin in &row.skin_tags {
            bump(skin_pairs.entry(skin.clone()).or_default(), &row.attribute_tags);
        }
        for context in &row.context_tags {
            bump(context_pairs.entry(context.clone()).or_default(), &row.attribute_tags);
        }

        summary.golden_nugget_count += usize::from(row.golden_nugget);
        summary.golden_nugget_non_trial +=
            usize::from(row.golden_nugget && !row.review.review.is_trial);
        summary.toneup_whitecast_conflicts += usize::from(row.toneup_whitecast_conflict);
    }

    let count_where = |pred: fn(&TaggedReview) -> bool| tagged.iter().filter(|r| pred(r)).count();
    summary.attribute_coverage = rate(count_where(|r| r.has_attribute_tag), total);
    summary.context_coverage = rate(count_where(|r| r.has_context_tag), total);
    summary.skin_coverage = rate(count_where(|r| r.has_skin_tag), total);
    summary.conditional_rate = rate(count_where(|r| r.has_conditional), total);
    summary.golden_nugget_rate = rate(summary.golden_nugget_count, total);
    summary.conditional_rate_by_bucket = bucket_totals
        .into_iter()
        .map(|(bucket, (n, conditional))| (bucket, rate(conditional, n)))
        .collect();

    summary.top_attribute_tags = top_counts(&attribute_counts, TOP_TAGS);
    summary.top_context_tags = top_counts(&context_counts, TOP_TAGS);
    summary.top_skin_tags = top_counts(&skin_counts, TOP_TAGS);
    summary.top_attribute_tags_low_rating = top_counts(&low_rating_counts, TOP_TAGS);
    summary.top_attribute_tags_high_conditional = top_counts(&high_conditional_counts, TOP_TAGS);
    summary.whitecast_polarity = whitecast_polarity;
    summary.eye_sting_polarity = eye_sting_polarity;
    summary.skin_attribute_cooccurrence = skin_pairs
        .iter()
        .map(|(skin, counts)| (skin.clone(), top_counts(counts, TOP_COOCCURRENCE)))
        .collect();
    summary.context_attribute_cooccurrence = context_pairs
        .iter()
        .map(|(context, counts)| (context.clone(), top_counts(counts, TOP_COOCCURRENCE)))
        .collect();
    summary
}
