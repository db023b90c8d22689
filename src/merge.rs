//! Merge/apply engine: guarded writes of resolved corrections into a
//! [`TargetStore`].
//!
//! Invariants held after every call:
//!
//! - Golden rule: an entry whose normalized origin is empty is never written,
//!   and [`TargetStore::enforce_golden_rule`] clears any value it carries.
//! - Untranslated guard: in [`ApplyMode::OnlyUntranslated`], an entry whose
//!   scan-time value is non-empty and free of source-script characters is
//!   left alone.
//! - Idempotence: corrected text is line-break canonicalized before the
//!   comparison, so re-applying a correction yields `Unchanged`.
//! - Conflicts: the last processed correction wins and the overwrite is counted.

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    cascade::classify_unresolved,
    error::Error,
    index::Indexes,
    script::SourceScript,
    types::{ApplyOutcome, Correction, EntryId, MatchResult, Tier},
};

lazy_static! {
    static ref LINE_BREAK_REGEX: Regex = Regex::new(r"(?i)\r\n|\r|\n|<br\s*/?>").unwrap();
    static ref ESCAPED_LINE_BREAK_REGEX: Regex =
        Regex::new(r"(?i)\r\n|\r|\n|\\n|<br\s*/?>").unwrap();
}

/// Whether existing translations may be overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Only write entries that are empty or still hold source-script text.
    #[default]
    OnlyUntranslated,
    Overwrite,
}

/// Line-break representation of the target corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineBreakStyle {
    /// `<br/>`, as stored in XML string tables.
    #[default]
    BrTag,
    Newline,
}

impl LineBreakStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            LineBreakStyle::BrTag => "<br/>",
            LineBreakStyle::Newline => "\n",
        }
    }
}

/// Rewrites every line-break variant (`\r\n`, `\r`, `\n`, `<br>`, `<br />`,
/// any case) to `style`. A backslash followed by `n` is left alone.
pub fn canonicalize_line_breaks(text: &str, style: LineBreakStyle) -> String {
    LINE_BREAK_REGEX
        .replace_all(text, style.as_str())
        .into_owned()
}

/// Like [`canonicalize_line_breaks`], but also treats a literal `\n` escape
/// as a line break, for correction sources that store breaks escaped.
pub fn canonicalize_escaped_line_breaks(text: &str, style: LineBreakStyle) -> String {
    ESCAPED_LINE_BREAK_REGEX
        .replace_all(text, style.as_str())
        .into_owned()
}

/// A pending write for one entry, handed to [`WriteBack`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryUpdate {
    pub entry: EntryId,
    pub string_id: String,
    pub str_origin: String,
    pub position_in_file: u32,
    pub new_value: String,
}

/// Persists the mutated entries of one source file in its native format.
pub trait WriteBack {
    fn write_back(&mut self, source_file: &Path, updates: &[EntryUpdate]) -> Result<(), Error>;
}

/// Current `str_value` of every entry of a corpus snapshot.
#[derive(Debug, Clone)]
pub struct TargetStore {
    values: Vec<String>,
    original: Vec<String>,
    origin_empty: Vec<bool>,
}

impl TargetStore {
    pub fn from_indexes(indexes: &Indexes) -> Self {
        let original: Vec<String> = indexes
            .entries()
            .iter()
            .map(|e| e.str_value.clone())
            .collect();
        Self {
            values: original.clone(),
            original,
            origin_empty: indexes.ids().map(|id| !indexes.is_indexed(id)).collect(),
        }
    }

    pub fn value(&self, id: EntryId) -> &str {
        &self.values[id.index()]
    }

    /// Value at scan time, before any write of this pass.
    pub fn original_value(&self, id: EntryId) -> &str {
        &self.original[id.index()]
    }

    pub fn is_changed(&self, id: EntryId) -> bool {
        self.values[id.index()] != self.original[id.index()]
    }

    pub fn changed(&self) -> impl Iterator<Item = EntryId> + '_ {
        (0..self.values.len())
            .map(EntryId)
            .filter(|id| self.is_changed(*id))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Clears the value of every entry without source text. Returns how many
    /// values were cleared.
    pub fn enforce_golden_rule(&mut self) -> usize {
        let mut cleared = 0;
        for (value, empty) in self.values.iter_mut().zip(&self.origin_empty) {
            if *empty && !value.is_empty() {
                value.clear();
                cleared += 1;
            }
        }
        if cleared > 0 {
            tracing::info!(cleared, "golden rule cleared values of entries without origin");
        }
        cleared
    }

    /// Changed entries grouped by source file, in document order.
    pub fn updates_by_file(&self, indexes: &Indexes) -> BTreeMap<PathBuf, Vec<EntryUpdate>> {
        let mut by_file: BTreeMap<PathBuf, Vec<EntryUpdate>> = BTreeMap::new();
        for id in self.changed() {
            let entry = indexes.entry(id);
            by_file
                .entry(entry.source_file.clone())
                .or_default()
                .push(EntryUpdate {
                    entry: id,
                    string_id: entry.string_id.clone(),
                    str_origin: entry.str_origin.clone(),
                    position_in_file: entry.position_in_file,
                    new_value: self.value(id).to_string(),
                });
        }
        for updates in by_file.values_mut() {
            updates.sort_by_key(|u| u.position_in_file);
        }
        by_file
    }

    /// Hands every changed file to `writer`. Returns the number of files written.
    pub fn flush(&self, indexes: &Indexes, writer: &mut dyn WriteBack) -> Result<usize, Error> {
        let by_file = self.updates_by_file(indexes);
        for (path, updates) in &by_file {
            writer
                .write_back(path, updates)
                .map_err(|e| Error::write_back(path.clone(), e))?;
            tracing::info!(file = ?path, entries = updates.len(), "target file written");
        }
        Ok(by_file.len())
    }

    fn set(&mut self, id: EntryId, value: String) {
        self.values[id.index()] = value;
    }
}

/// Outcome for one entry touched by a correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryOutcome {
    pub entry: EntryId,
    pub outcome: ApplyOutcome,
}

/// Result of applying one correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub outcome: ApplyOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<EntryOutcome>,
    /// This correction overwrote text written earlier in the pass.
    pub conflict: bool,
}

impl ApplyReport {
    fn terminal(outcome: ApplyOutcome) -> Self {
        Self {
            outcome,
            tier: None,
            entries: Vec::new(),
            conflict: false,
        }
    }
}

/// Applies resolved corrections to a [`TargetStore`].
pub struct MergeEngine<'a> {
    indexes: &'a Indexes,
    store: TargetStore,
    script: &'a dyn SourceScript,
    line_breaks: LineBreakStyle,
    escaped_newlines: bool,
    allow_origin_only_overwrite: bool,
    written: HashSet<EntryId>,
    conflicts: usize,
}

impl<'a> MergeEngine<'a> {
    pub fn new(indexes: &'a Indexes, script: &'a dyn SourceScript) -> Self {
        Self {
            indexes,
            store: TargetStore::from_indexes(indexes),
            script,
            line_breaks: LineBreakStyle::default(),
            escaped_newlines: false,
            allow_origin_only_overwrite: false,
            written: HashSet::new(),
            conflicts: 0,
        }
    }

    pub fn with_line_breaks(mut self, style: LineBreakStyle) -> Self {
        self.line_breaks = style;
        self
    }

    /// Treats a literal `\n` in corrected text as a line break.
    pub fn with_escaped_newlines(mut self, enabled: bool) -> Self {
        self.escaped_newlines = enabled;
        self
    }

    /// Lets StrOrigin-only and ambiguous matches overwrite translations when
    /// the mode is [`ApplyMode::Overwrite`].
    pub fn with_origin_only_overwrite(mut self, allow: bool) -> Self {
        self.allow_origin_only_overwrite = allow;
        self
    }

    pub fn store(&self) -> &TargetStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TargetStore {
        &mut self.store
    }

    pub fn into_store(self) -> TargetStore {
        self.store
    }

    /// Number of corrections that overwrote a value written earlier in the pass.
    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    /// Applies one correction according to its match result.
    pub fn apply(
        &mut self,
        result: &MatchResult,
        correction: &Correction,
        mode: ApplyMode,
    ) -> ApplyReport {
        if !correction.has_key() {
            return ApplyReport::terminal(ApplyOutcome::NoKeyPresent);
        }
        if correction.corrected_text.trim().is_empty() {
            return ApplyReport::terminal(ApplyOutcome::EmptyCorrection);
        }

        let (entries, tier) = match result {
            MatchResult::Matched { entries, tier } => (entries.as_slice(), *tier),
            MatchResult::Ambiguous(entries) => (entries.as_slice(), Tier::StrOriginOnly),
            MatchResult::Unresolved => {
                return ApplyReport::terminal(classify_unresolved(self.indexes, correction));
            }
        };

        let mode = if tier == Tier::StrOriginOnly && !self.allow_origin_only_overwrite {
            ApplyMode::OnlyUntranslated
        } else {
            mode
        };
        self.apply_to_entries(entries, correction, mode, Some(tier))
    }

    /// Applies `correction` to every entry of `entries` under `mode`.
    pub fn apply_to_entries(
        &mut self,
        entries: &[EntryId],
        correction: &Correction,
        mode: ApplyMode,
        tier: Option<Tier>,
    ) -> ApplyReport {
        let text = if self.escaped_newlines {
            canonicalize_escaped_line_breaks(&correction.corrected_text, self.line_breaks)
        } else {
            canonicalize_line_breaks(&correction.corrected_text, self.line_breaks)
        };
        let mut conflict = false;
        let mut outcomes = Vec::with_capacity(entries.len());

        for &id in entries {
            let outcome = self.apply_entry(id, &text, mode, &mut conflict);
            outcomes.push(EntryOutcome { entry: id, outcome });
        }

        if conflict {
            self.conflicts += 1;
            tracing::debug!(
                string_id = correction.string_id(),
                "correction overwrote a value written earlier in the pass"
            );
        }

        let outcome = outcomes
            .iter()
            .map(|o| o.outcome)
            .min_by_key(|o| o.rank())
            .unwrap_or(ApplyOutcome::NotFound);
        ApplyReport {
            outcome,
            tier,
            entries: outcomes,
            conflict,
        }
    }

    fn apply_entry(
        &mut self,
        id: EntryId,
        text: &str,
        mode: ApplyMode,
        conflict: &mut bool,
    ) -> ApplyOutcome {
        if self.indexes.get(id).is_none() {
            return ApplyOutcome::NotFound;
        }
        if !self.indexes.is_indexed(id) {
            return ApplyOutcome::SkippedEmptyOrigin;
        }

        let current = self.store.value(id);
        if current == text {
            return ApplyOutcome::Unchanged;
        }
        if mode == ApplyMode::OnlyUntranslated && self.is_translated(self.store.original_value(id)) {
            return ApplyOutcome::SkippedTranslated;
        }

        if self.written.contains(&id) {
            *conflict = true;
        }
        self.store.set(id, text.to_string());
        self.written.insert(id);
        ApplyOutcome::Updated
    }

    fn is_translated(&self, value: &str) -> bool {
        !value.trim().is_empty() && !self.script.contains_source_script(value)
    }
}
