//! Core types shared by the indexer, the match cascade and the merge engine.

use std::{collections::BTreeMap, fmt::Display, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{error::Error, traits::Parser};

impl Parser for Vec<Correction> {
    /// Parse from any reader.
    fn from_reader<R: std::io::BufRead>(reader: R) -> Result<Self, Error> {
        serde_json::from_reader(reader).map_err(Error::Parse)
    }

    /// Write to any writer (file, memory, etc.).
    fn to_writer<W: std::io::Write>(&self, mut writer: W) -> Result<(), Error> {
        serde_json::to_writer_pretty(&mut writer, self).map_err(Error::Parse)
    }
}

/// Handle of an [`Entry`] inside the arena owned by [`crate::index::Indexes`].
///
/// Every index level stores handles, never copies of the entry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub usize);

impl EntryId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One localized unit as produced by a corpus reader, before indexing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct RawEntry {
    pub string_id: String,
    pub str_origin: String,
    pub str_value: String,
}

impl RawEntry {
    pub fn new(
        string_id: impl Into<String>,
        str_origin: impl Into<String>,
        str_value: impl Into<String>,
    ) -> Self {
        Self {
            string_id: string_id.into(),
            str_origin: str_origin.into(),
            str_value: str_value.into(),
        }
    }
}

/// Immutable snapshot of one localized unit at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub string_id: String,
    pub str_origin: String,
    pub str_value: String,
    pub source_file: PathBuf,
    pub file_relpath: String,
    pub position_in_file: u32,
    /// Normalized origin of the previous entry in the same file.
    pub adjacent_before: String,
    /// Normalized origin of the next entry in the same file.
    pub adjacent_after: String,
    /// First 8 hex characters of the digest of `"{before}|{after}"`.
    pub adjacency_hash: String,
}

impl Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Entry {{ string_id: {}, file: {}, position: {} }}",
            self.string_id, self.file_relpath, self.position_in_file
        )
    }
}

/// Positional context carried by corrections that come from a structured source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct SourceContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_relpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub adjacency_hash: Option<String>,
}

/// A human-supplied correction, as produced by an external Excel/XML parser.
///
/// Field names are already canonical; case folding of source attributes
/// happens at the parser boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Correction {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub string_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub str_origin: Option<String>,

    pub corrected_text: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_event_name: Option<String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub raw_attributes: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<SourceContext>,
}

impl Correction {
    pub fn new(corrected_text: impl Into<String>) -> Self {
        Self {
            corrected_text: corrected_text.into(),
            ..Self::default()
        }
    }

    pub fn with_string_id(mut self, string_id: impl Into<String>) -> Self {
        self.string_id = Some(string_id.into());
        self
    }

    pub fn with_str_origin(mut self, str_origin: impl Into<String>) -> Self {
        self.str_origin = Some(str_origin.into());
        self
    }

    pub fn with_context(mut self, context: SourceContext) -> Self {
        self.context = Some(context);
        self
    }

    /// StringID if present and not blank.
    pub fn string_id(&self) -> Option<&str> {
        self.string_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// StrOrigin if present and not blank.
    pub fn str_origin(&self) -> Option<&str> {
        self.str_origin.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn has_key(&self) -> bool {
        self.string_id().is_some() || self.str_origin().is_some()
    }
}

/// Match tiers, in the order the cascade tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Strict,
    StringIdOnly,
    StrOriginOnly,
    Fuzzy,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Strict => "strict",
            Tier::StringIdOnly => "string_id_only",
            Tier::StrOriginOnly => "str_origin_only",
            Tier::Fuzzy => "fuzzy",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of resolving one correction against the indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    /// One or more structurally identical entries; all of them receive the write.
    Matched { entries: Vec<EntryId>, tier: Tier },
    /// StrOrigin-only hits spanning several StringIDs.
    Ambiguous(Vec<EntryId>),
    Unresolved,
}

impl MatchResult {
    pub fn matched(entries: Vec<EntryId>, tier: Tier) -> Self {
        if entries.is_empty() {
            MatchResult::Unresolved
        } else {
            MatchResult::Matched { entries, tier }
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, MatchResult::Unresolved)
    }

    /// The tier that produced the result. Ambiguous hits only come from the
    /// StrOrigin-only tier.
    pub fn tier(&self) -> Option<Tier> {
        match self {
            MatchResult::Matched { tier, .. } => Some(*tier),
            MatchResult::Ambiguous(_) => Some(Tier::StrOriginOnly),
            MatchResult::Unresolved => None,
        }
    }

    pub fn entries(&self) -> &[EntryId] {
        match self {
            MatchResult::Matched { entries, .. } | MatchResult::Ambiguous(entries) => entries,
            MatchResult::Unresolved => &[],
        }
    }
}

/// Outcome recorded for a correction, and for every entry it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Updated,
    Unchanged,
    SkippedTranslated,
    /// The target has no source text; the golden rule refuses the write.
    SkippedEmptyOrigin,
    NotFound,
    /// The StringID exists in the target but the origin text differs.
    StrOriginMismatch,
    /// The correction carries neither a StringID nor a StrOrigin.
    NoKeyPresent,
    /// The corrected text is blank; nothing is written.
    EmptyCorrection,
}

impl ApplyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Unchanged => "unchanged",
            ApplyOutcome::SkippedTranslated => "skipped_translated",
            ApplyOutcome::SkippedEmptyOrigin => "skipped_empty_origin",
            ApplyOutcome::NotFound => "not_found",
            ApplyOutcome::StrOriginMismatch => "str_origin_mismatch",
            ApplyOutcome::NoKeyPresent => "no_key_present",
            ApplyOutcome::EmptyCorrection => "empty_correction",
        }
    }

    /// Whether the correction reached at least one entry.
    pub fn is_matched(self) -> bool {
        matches!(
            self,
            ApplyOutcome::Updated
                | ApplyOutcome::Unchanged
                | ApplyOutcome::SkippedTranslated
                | ApplyOutcome::SkippedEmptyOrigin
        )
    }

    // Used when several entry outcomes collapse into the correction outcome.
    pub(crate) fn rank(self) -> u8 {
        match self {
            ApplyOutcome::Updated => 0,
            ApplyOutcome::Unchanged => 1,
            ApplyOutcome::SkippedTranslated => 2,
            ApplyOutcome::SkippedEmptyOrigin => 3,
            ApplyOutcome::StrOriginMismatch => 4,
            ApplyOutcome::NotFound => 5,
            ApplyOutcome::NoKeyPresent => 6,
            ApplyOutcome::EmptyCorrection => 7,
        }
    }
}

impl Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correction_blank_keys_are_absent() {
        let correction = Correction::new("Bonjour")
            .with_string_id("   ")
            .with_str_origin("");
        assert_eq!(correction.string_id(), None);
        assert_eq!(correction.str_origin(), None);
        assert!(!correction.has_key());
    }

    #[test]
    fn test_correction_string_id_is_trimmed() {
        let correction = Correction::new("x").with_string_id(" A1 ");
        assert_eq!(correction.string_id(), Some("A1"));
        assert!(correction.has_key());
    }

    #[test]
    fn test_match_result_empty_entries_is_unresolved() {
        assert_eq!(
            MatchResult::matched(Vec::new(), Tier::Strict),
            MatchResult::Unresolved
        );
        let result = MatchResult::matched(vec![EntryId(3)], Tier::Fuzzy);
        assert_eq!(result.tier(), Some(Tier::Fuzzy));
        assert_eq!(result.entries(), &[EntryId(3)]);
    }

    #[test]
    fn test_ambiguous_reports_origin_tier() {
        let result = MatchResult::Ambiguous(vec![EntryId(0), EntryId(1)]);
        assert_eq!(result.tier(), Some(Tier::StrOriginOnly));
        assert!(result.is_resolved());
    }

    #[test]
    fn test_tier_order_follows_cascade() {
        assert!(Tier::Strict < Tier::StringIdOnly);
        assert!(Tier::StringIdOnly < Tier::StrOriginOnly);
        assert!(Tier::StrOriginOnly < Tier::Fuzzy);
    }

    #[test]
    fn test_outcome_serialization() {
        let encoded = serde_json::to_string(&ApplyOutcome::StrOriginMismatch).unwrap();
        assert_eq!(encoded, "\"str_origin_mismatch\"");
        assert_eq!(ApplyOutcome::SkippedTranslated.to_string(), "skipped_translated");
    }

    #[test]
    fn test_corrections_parser_trait() {
        let json = r#"[{"string_id":"A1","str_origin":"Hello","corrected_text":"Bonjour"}]"#;
        let corrections = Vec::<Correction>::from_str(json).unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].string_id(), Some("A1"));
        assert!(corrections[0].raw_attributes.is_empty());

        let mut out = Vec::new();
        corrections.to_writer(&mut out).unwrap();
        let reparsed = Vec::<Correction>::from_bytes(&out).unwrap();
        assert_eq!(reparsed, corrections);
    }
}
