/// Listing sort names as reported by the scraper.
/// These constants define the provenance values a review row can carry.
pub const SORT_LOW_RATING: &str = "low_rating";
pub const SORT_NEWEST: &str = "newest";
pub const SORT_HELPFUL: &str = "helpful";
pub const SORT_HIGH_RATING: &str = "high_rating";

/// Priority assigned to a sort source the pipeline does not know about
pub const UNKNOWN_SORT_PRIORITY: u32 = 999;

/// Lower value wins when choosing a review's primary sort
pub fn sort_priority(source: &str) -> u32 {
    match source {
        SORT_LOW_RATING => 1,
        SORT_NEWEST => 2,
        SORT_HELPFUL => 3,
        SORT_HIGH_RATING => 4,
        _ => UNKNOWN_SORT_PRIORITY,
    }
}

/// Separator used by every `*_str` tag column
pub const TAG_SEPARATOR: &str = "|";

/// Context tag assigned to reviews without any rule-based context tag
pub const NONE_CONTEXT_TAG: &str = "NONE_RULE";

/// Attribute tags with special meaning in the tagger
pub const TAG_TONEUP: &str = "TONEUP";
pub const TAG_WHITECAST: &str = "WHITECAST";
pub const TAG_EYE_STING: &str = "EYE_STING";

/// Minimum cleaned length for a golden nugget
pub const GOLDEN_NUGGET_MIN_CHARS: usize = 100;

/// Reviews shorter than this are counted as "short" in quality summaries
pub const SHORT_REVIEW_CHARS: usize = 15;

/// Length of a derived review id in hex characters
pub const DERIVED_ID_HEX_LEN: usize = 16;

/// Joins tags with the standard separator, `None` when empty
pub fn join_tags(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        Some(tags.join(TAG_SEPARATOR))
    }
}

/// Splits a `*_str` tag column back into tags, skipping empty pieces
pub fn split_tags(joined: Option<&str>) -> Vec<String> {
    joined
        .map(|s| {
            s.split(TAG_SEPARATOR)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_priority_order() {
        assert!(sort_priority(SORT_LOW_RATING) < sort_priority(SORT_NEWEST));
        assert!(sort_priority(SORT_NEWEST) < sort_priority(SORT_HELPFUL));
        assert!(sort_priority(SORT_HELPFUL) < sort_priority(SORT_HIGH_RATING));
        assert_eq!(sort_priority("trending"), UNKNOWN_SORT_PRIORITY);
    }

    #[test]
    fn test_tag_string_helpers() {
        let tags = vec!["A".to_string(), "B".to_string()];
        assert_eq!(join_tags(&tags).as_deref(), Some("A|B"));
        assert_eq!(join_tags(&[]), None);
        assert_eq!(split_tags(Some("A||B")), tags);
        assert!(split_tags(None).is_empty());
    }
}
