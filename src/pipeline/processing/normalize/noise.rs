use serde::Deserialize;

use super::text::content_char_count;

/// Keyword lists and thresholds for promotional and low-information reviews
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Reviews with fewer non-whitespace characters are low-information
    pub min_content_chars: usize,
    /// Review types that always mark a review as trial/gifted
    pub trial_review_types: Vec<String>,
    /// Phrases that mark a review as trial/gifted when found in the text
    pub trial_keywords: Vec<String>,
    /// Delivery and service phrases; alone they carry no product signal
    pub delivery_keywords: Vec<String>,
    /// Product experience phrases that rescue a delivery-heavy review
    pub product_keywords: Vec<String>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            min_content_chars: 15,
            trial_review_types: owned(&["GIFT"]),
            trial_keywords: owned(&[
                "체험단", "증정", "제공받", "협찬", "이벤트", "무료", "선물", "샘플",
            ]),
            delivery_keywords: owned(&["배송", "포장", "사은품", "빠름", "빨라", "도착", "친절"]),
            product_keywords: owned(&[
                "피부", "바르", "사용", "효과", "좋아", "마음", "추천", "촉촉", "건조", "자극",
                "향", "발림", "흡수", "커버", "톤업", "백탁", "끈적", "가벼", "무거", "썬크림",
                "자외선",
            ]),
        }
    }
}

/// Flags promotional (trial) and low-information reviews
#[derive(Debug, Clone, Default)]
pub struct NoiseFilter {
    config: NoiseConfig,
}

impl NoiseFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: NoiseConfig) -> Self {
        Self { config }
    }

    pub fn is_trial(&self, text: &str, review_type: Option<&str>) -> bool {
        let typed_trial = review_type.is_some_and(|t| {
            self.config
                .trial_review_types
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(t.trim()))
        });
        typed_trial || contains_any(text, &self.config.trial_keywords)
    }

    pub fn is_low_info(&self, text: &str) -> bool {
        if content_char_count(text) < self.config.min_content_chars {
            return true;
        }
        contains_any(text, &self.config.delivery_keywords)
            && !contains_any(text, &self.config.product_keywords)
    }
}

fn contains_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| !k.is_empty() && text.contains(k.as_str()))
}
