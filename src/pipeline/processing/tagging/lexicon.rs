//! Tag lexicon: precompiled, read-only pattern tables.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

/// Lexicon shipped with the crate, used when no lexicon path is configured
pub const BUNDLED_LEXICON: &str = include_str!("../../../../config/tag_lexicon.toml");

pub const DEFAULT_NEGATION_WINDOW: usize = 12;

/// On-disk shape of a lexicon file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LexiconFile {
    pub meta: LexiconMeta,
    pub negations: Vec<String>,
    pub attributes: Vec<TagPattern>,
    pub contexts: Vec<TagPattern>,
    pub skins: Vec<TagPattern>,
    pub conditional_markers: Vec<TagPattern>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LexiconMeta {
    pub version: Option<String>,
    pub negation_window_chars: usize,
    pub negation_target_tags: Vec<String>,
}

impl Default for LexiconMeta {
    fn default() -> Self {
        Self {
            version: None,
            negation_window_chars: DEFAULT_NEGATION_WINDOW,
            negation_target_tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagPattern {
    #[serde(alias = "name")]
    pub tag: String,
    pub pattern: String,
}

#[derive(Debug, Clone)]
pub struct CompiledTag {
    pub tag: String,
    pub regex: Regex,
}

/// Patterns of one tag category, in declaration order
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    entries: Vec<CompiledTag>,
}

impl PatternTable {
    pub fn compile(patterns: &[TagPattern]) -> Result<Self> {
        let mut entries = Vec::with_capacity(patterns.len());
        for entry in patterns {
            let tag = entry.tag.trim();
            if tag.is_empty() {
                return Err(PipelineError::Config(format!(
                    "lexicon entry with pattern '{}' has an empty tag name",
                    entry.pattern
                )));
            }
            entries.push(CompiledTag {
                tag: tag.to_string(),
                regex: compile_pattern(tag, &entry.pattern)?,
            });
        }
        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledTag> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_tag(&self, tag: &str) -> bool {
        self.entries.iter().any(|e| e.tag == tag)
    }

    /// Tags whose pattern matches `text`, deduplicated, in declaration order.
    pub fn matching_tags(&self, text: &str) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !tags.contains(&entry.tag) && entry.regex.is_match(text) {
                tags.push(entry.tag.clone());
            }
        }
        tags
    }

    /// Every match span (byte offsets) per tag, in declaration order.
    /// Tags without a match are omitted.
    pub fn match_spans(&self, text: &str) -> Vec<(String, Vec<(usize, usize)>)> {
        let mut out: Vec<(String, Vec<(usize, usize)>)> = Vec::new();
        for entry in &self.entries {
            let spans: Vec<(usize, usize)> = entry
                .regex
                .find_iter(text)
                .map(|m| (m.start(), m.end()))
                .collect();
            if spans.is_empty() {
                continue;
            }
            match out.iter_mut().find(|(tag, _)| *tag == entry.tag) {
                Some((_, existing)) => existing.extend(spans),
                None => out.push((entry.tag.clone(), spans)),
            }
        }
        out
    }
}

/// Immutable tagging vocabulary. Built once per run and passed explicitly.
#[derive(Debug, Clone)]
pub struct Lexicon {
    pub version: Option<String>,
    pub attributes: PatternTable,
    pub contexts: PatternTable,
    pub skins: PatternTable,
    pub conditional_markers: PatternTable,
    /// Alternation of every negation cue; `None` when the lexicon has none
    pub negation: Option<Regex>,
    pub negation_window: usize,
    negation_targets: HashSet<String>,
}

impl Lexicon {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: LexiconFile = toml::from_str(content)?;
        Self::compile(file)
    }

    /// Loads a lexicon file. A missing file or a bad pattern is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingFile(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        let lexicon = Self::from_toml_str(&content)?;
        info!(
            "Loaded lexicon {} (version {})",
            path.display(),
            lexicon.version.as_deref().unwrap_or("unversioned")
        );
        Ok(lexicon)
    }

    pub fn bundled() -> Result<Self> {
        Self::from_toml_str(BUNDLED_LEXICON)
    }

    /// Loads `path` when given, otherwise the bundled lexicon.
    pub fn load_or_bundled(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Self::bundled(),
        }
    }

    pub fn compile(file: LexiconFile) -> Result<Self> {
        let attributes = PatternTable::compile(&file.attributes)?;
        let contexts = PatternTable::compile(&file.contexts)?;
        let skins = PatternTable::compile(&file.skins)?;
        let conditional_markers = PatternTable::compile(&file.conditional_markers)?;

        let cues: Vec<String> = file
            .negations
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .map(|n| format!("(?:{})", n))
            .collect();
        let negation = if cues.is_empty() {
            None
        } else {
            Some(compile_pattern("negations", &cues.join("|"))?)
        };

        let negation_targets: HashSet<String> =
            file.meta.negation_target_tags.iter().cloned().collect();
        for target in &negation_targets {
            if !attributes.contains_tag(target) {
                warn!("Negation target '{}' is not a declared attribute tag", target);
            }
        }

        Ok(Self {
            version: file.meta.version,
            attributes,
            contexts,
            skins,
            conditional_markers,
            negation,
            negation_window: file.meta.negation_window_chars,
            negation_targets,
        })
    }

    pub fn is_negation_target(&self, tag: &str) -> bool {
        self.negation_targets.contains(tag)
    }
}

fn compile_pattern(tag: &str, pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| PipelineError::Lexicon {
            tag: tag.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_lexicon_compiles() {
        let lexicon = Lexicon::bundled().unwrap();
        assert_eq!(lexicon.negation_window, 12);
        assert!(lexicon.negation.is_some());
        assert!(lexicon.is_negation_target("WHITECAST"));
        assert!(!lexicon.is_negation_target("TONEUP"));
        assert_eq!(lexicon.attributes.len(), 19);
        assert!(lexicon.attributes.contains_tag("PILLING"));
        assert!(!lexicon.conditional_markers.is_empty());
    }

    #[test]
    fn test_bad_pattern_names_the_tag() {
        let err = Lexicon::from_toml_str(
            r#"
            [[attributes]]
            tag = "BROKEN"
            pattern = "(unclosed"
            "#,
        )
        .unwrap_err();
        match err {
            PipelineError::Lexicon { tag, .. } => assert_eq!(tag, "BROKEN"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_matching_is_case_insensitive_and_ordered() {
        let lexicon = Lexicon::from_toml_str(
            r#"
            [[attributes]]
            tag = "B_TAG"
            pattern = "beta"

            [[attributes]]
            tag = "A_TAG"
            pattern = "alpha"
            "#,
        )
        .unwrap();
        let tags = lexicon.attributes.matching_tags("ALPHA then Beta then alpha");
        assert_eq!(tags, vec!["B_TAG".to_string(), "A_TAG".to_string()]);
        assert!(lexicon.negation.is_none());
    }

    #[test]
    fn test_match_spans_merge_repeated_tags() {
        let lexicon = Lexicon::from_toml_str(
            r#"
            [[attributes]]
            tag = "X"
            pattern = "ab"

            [[attributes]]
            tag = "X"
            pattern = "cd"
            "#,
        )
        .unwrap();
        let spans = lexicon.attributes.match_spans("ab cd ab");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].1, vec![(0, 2), (6, 8), (3, 5)]);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = Lexicon::load(Path::new("/nonexistent/lexicon.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingFile(_)));
    }
}
