//! Value types shared by several pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse rating band derived from a 1..=5 star rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingBucket {
    Low,
    Mid,
    High,
}

impl RatingBucket {
    pub fn from_rating(rating: u8) -> Self {
        match rating {
            0..=2 => RatingBucket::Low,
            3 => RatingBucket::Mid,
            _ => RatingBucket::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RatingBucket::Low => "low",
            RatingBucket::Mid => "mid",
            RatingBucket::High => "high",
        }
    }
}

impl fmt::Display for RatingBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meteorological season of the review date (northern hemisphere)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Fall,
            _ => Season::Winter,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
            Season::Winter => "winter",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule-based polarity of an attribute tag, resolved from negation windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagPolarity {
    Affirmed,
    Negated,
    Mixed,
    /// Tag present but not eligible for negation analysis
    Unknown,
}

impl TagPolarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagPolarity::Affirmed => "affirmed",
            TagPolarity::Negated => "negated",
            TagPolarity::Mixed => "mixed",
            TagPolarity::Unknown => "unknown",
        }
    }
}

/// Aspect vocabulary shared with the LLM classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aspect {
    Whitecast,
    Toneup,
    Oiliness,
    Stickiness,
    Pilling,
    Absorption,
    Dryness,
    Moisture,
    Flaking,
    EyeSting,
    Irritation,
    Trouble,
    Scent,
    Waterproof,
    Longevity,
    WhiteResidue,
    TextureHeavy,
    TextureLight,
    Staining,
    Other,
}

impl Aspect {
    pub const ALL: [Aspect; 20] = [
        Aspect::Whitecast,
        Aspect::Toneup,
        Aspect::Oiliness,
        Aspect::Stickiness,
        Aspect::Pilling,
        Aspect::Absorption,
        Aspect::Dryness,
        Aspect::Moisture,
        Aspect::Flaking,
        Aspect::EyeSting,
        Aspect::Irritation,
        Aspect::Trouble,
        Aspect::Scent,
        Aspect::Waterproof,
        Aspect::Longevity,
        Aspect::WhiteResidue,
        Aspect::TextureHeavy,
        Aspect::TextureLight,
        Aspect::Staining,
        Aspect::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aspect::Whitecast => "WHITECAST",
            Aspect::Toneup => "TONEUP",
            Aspect::Oiliness => "OILINESS",
            Aspect::Stickiness => "STICKINESS",
            Aspect::Pilling => "PILLING",
            Aspect::Absorption => "ABSORPTION",
            Aspect::Dryness => "DRYNESS",
            Aspect::Moisture => "MOISTURE",
            Aspect::Flaking => "FLAKING",
            Aspect::EyeSting => "EYE_STING",
            Aspect::Irritation => "IRRITATION",
            Aspect::Trouble => "TROUBLE",
            Aspect::Scent => "SCENT",
            Aspect::Waterproof => "WATERPROOF",
            Aspect::Longevity => "LONGEVITY",
            Aspect::WhiteResidue => "WHITE_RESIDUE",
            Aspect::TextureHeavy => "TEXTURE_HEAVY",
            Aspect::TextureLight => "TEXTURE_LIGHT",
            Aspect::Staining => "STAINING",
            Aspect::Other => "OTHER",
        }
    }

    /// Lenient parse of a classifier label; anything outside the vocabulary is `Other`.
    pub fn parse_lenient(label: &str) -> Self {
        let normalized = label.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Aspect::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == normalized)
            .unwrap_or(Aspect::Other)
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the reviewer's expectation for an aspect was met
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Met,
    Unmet,
    Mixed,
    Unknown,
}

impl Polarity {
    pub fn parse_lenient(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "met" => Polarity::Met,
            "unmet" => Polarity::Unmet,
            "mixed" => Polarity::Mixed,
            _ => Polarity::Unknown,
        }
    }

    pub fn group(&self) -> PolarityGroup {
        match self {
            Polarity::Unmet | Polarity::Mixed => PolarityGroup::UnmetLike,
            Polarity::Met => PolarityGroup::MetLike,
            Polarity::Unknown => PolarityGroup::Unknown,
        }
    }
}

/// Binary collapse of `Polarity` used by every aggregate table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolarityGroup {
    UnmetLike,
    MetLike,
    Unknown,
}

impl PolarityGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolarityGroup::UnmetLike => "unmet_like",
            PolarityGroup::MetLike => "met_like",
            PolarityGroup::Unknown => "unknown",
        }
    }
}

/// Sampling stratum of a queued review, in selection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueBucket {
    GoldenNugget,
    LowRating,
    HelpfulLong,
    RandomControl,
}

impl QueueBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueBucket::GoldenNugget => "GOLDEN_NUGGET",
            QueueBucket::LowRating => "LOW_RATING",
            QueueBucket::HelpfulLong => "HELPFUL_LONG",
            QueueBucket::RandomControl => "RANDOM_CONTROL",
        }
    }

    /// Additive priority bonus for the bucket
    pub fn priority_bonus(&self) -> f64 {
        match self {
            QueueBucket::GoldenNugget => 2.0,
            QueueBucket::LowRating => 1.5,
            QueueBucket::HelpfulLong | QueueBucket::RandomControl => 0.0,
        }
    }
}

impl fmt::Display for QueueBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bucket_boundaries() {
        assert_eq!(RatingBucket::from_rating(1), RatingBucket::Low);
        assert_eq!(RatingBucket::from_rating(2), RatingBucket::Low);
        assert_eq!(RatingBucket::from_rating(3), RatingBucket::Mid);
        assert_eq!(RatingBucket::from_rating(4), RatingBucket::High);
        assert_eq!(RatingBucket::from_rating(5), RatingBucket::High);
    }

    #[test]
    fn test_season_from_month() {
        assert_eq!(Season::from_month(3), Season::Spring);
        assert_eq!(Season::from_month(8), Season::Summer);
        assert_eq!(Season::from_month(11), Season::Fall);
        assert_eq!(Season::from_month(12), Season::Winter);
        assert_eq!(Season::from_month(2), Season::Winter);
    }

    #[test]
    fn test_aspect_lenient_parse() {
        assert_eq!(Aspect::parse_lenient("eye_sting"), Aspect::EyeSting);
        assert_eq!(Aspect::parse_lenient(" WHITE RESIDUE "), Aspect::WhiteResidue);
        assert_eq!(Aspect::parse_lenient("SPF"), Aspect::Other);
    }

    #[test]
    fn test_polarity_grouping() {
        assert_eq!(Polarity::parse_lenient("Unmet").group(), PolarityGroup::UnmetLike);
        assert_eq!(Polarity::Mixed.group(), PolarityGroup::UnmetLike);
        assert_eq!(Polarity::Met.group(), PolarityGroup::MetLike);
        assert_eq!(Polarity::parse_lenient("n/a"), Polarity::Unknown);
        assert_eq!(Polarity::Unknown.group(), PolarityGroup::Unknown);
    }

    #[test]
    fn test_serde_labels() {
        assert_eq!(
            serde_json::to_string(&QueueBucket::GoldenNugget).unwrap(),
            "\"GOLDEN_NUGGET\""
        );
        assert_eq!(serde_json::to_string(&Aspect::EyeSting).unwrap(), "\"EYE_STING\"");
        assert_eq!(
            serde_json::to_string(&PolarityGroup::UnmetLike).unwrap(),
            "\"unmet_like\""
        );
    }
}
