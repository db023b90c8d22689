//! Batch driver: index a corpus, resolve every correction and apply it.
//!
//! Corrections go through the structural tiers in input order. Those left
//! unresolved are handed to the fuzzy tier as one batch (grouped by
//! StringID). Writes happen only once every correction is resolved, in input
//! order, so the last correction for an entry wins whatever its tier. Every
//! input correction ends up with exactly one [`OutcomeRecord`]; only a
//! cancelled pass leaves records pending.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use serde::Serialize;

use crate::{
    cascade::MatchCascade,
    category::{CategoryClassifier, FolderClassifier},
    error::Error,
    fuzzy::{Embedder, FuzzyResolver, NeighborSearch},
    index::{CorpusReader, IndexWarning, Indexes, build_indexes},
    merge::{ApplyReport, EntryOutcome, MergeEngine, TargetStore, WriteBack},
    options::PassOptions,
    progress::{CancellationToken, ProgressEvent},
    script::{Hangul, SourceScript},
    types::{ApplyOutcome, Correction, MatchResult, Tier},
};

lazy_static! {
    static ref DEFAULT_CLASSIFIER: FolderClassifier = FolderClassifier::default();
}

static DEFAULT_SCRIPT: Hangul = Hangul;

/// External capabilities used by one pass.
///
/// The default uses the folder classifier, Hangul detection, no embedder and
/// exhaustive neighbour search.
pub struct Capabilities<'a> {
    pub classifier: &'a dyn CategoryClassifier,
    pub script: &'a dyn SourceScript,
    pub embedder: Option<&'a dyn Embedder>,
    pub search: Option<&'a dyn NeighborSearch>,
    pub cancel: CancellationToken,
}

impl Default for Capabilities<'_> {
    fn default() -> Self {
        Self {
            classifier: &*DEFAULT_CLASSIFIER,
            script: &DEFAULT_SCRIPT,
            embedder: None,
            search: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl<'a> Capabilities<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classifier(mut self, classifier: &'a dyn CategoryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_script(mut self, script: &'a dyn SourceScript) -> Self {
        self.script = script;
        self
    }

    pub fn with_embedder(mut self, embedder: &'a dyn Embedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_search(mut self, search: &'a dyn NeighborSearch) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of one input correction, at the same position as the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_id: Option<String>,
    /// `None` while the correction has not been processed.
    pub outcome: Option<ApplyOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<EntryOutcome>,
    pub conflict: bool,
}

impl OutcomeRecord {
    fn pending(index: usize, correction: &Correction) -> Self {
        Self {
            index,
            string_id: correction.string_id().map(str::to_string),
            outcome: None,
            tier: None,
            entries: Vec::new(),
            conflict: false,
        }
    }

    fn record(&mut self, report: ApplyReport) {
        self.outcome = Some(report.outcome);
        self.tier = report.tier;
        self.entries = report.entries;
        self.conflict = report.conflict;
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.is_none()
    }
}

/// Aggregate counts of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub total: usize,
    /// Corrections that reached at least one entry.
    pub matched: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_translated: usize,
    pub skipped_empty_origin: usize,
    pub not_found: usize,
    pub str_origin_mismatch: usize,
    pub no_key: usize,
    pub empty_text: usize,
    pub conflicts: usize,
    pub golden_rule_cleared: usize,
    pub pending: usize,
    pub by_tier: BTreeMap<Tier, usize>,
    pub fuzzy_degraded: bool,
}

impl PassSummary {
    fn from_records(records: &[OutcomeRecord]) -> Self {
        let mut summary = PassSummary {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            let Some(outcome) = record.outcome else {
                summary.pending += 1;
                continue;
            };
            if outcome.is_matched() {
                summary.matched += 1;
                if let Some(tier) = record.tier {
                    *summary.by_tier.entry(tier).or_default() += 1;
                }
            }
            match outcome {
                ApplyOutcome::Updated => summary.updated += 1,
                ApplyOutcome::Unchanged => summary.unchanged += 1,
                ApplyOutcome::SkippedTranslated => summary.skipped_translated += 1,
                ApplyOutcome::SkippedEmptyOrigin => summary.skipped_empty_origin += 1,
                ApplyOutcome::NotFound => summary.not_found += 1,
                ApplyOutcome::StrOriginMismatch => summary.str_origin_mismatch += 1,
                ApplyOutcome::NoKeyPresent => summary.no_key += 1,
                ApplyOutcome::EmptyCorrection => summary.empty_text += 1,
            }
        }
        summary
    }
}

/// Everything a caller needs to render a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub summary: PassSummary,
    pub records: Vec<OutcomeRecord>,
    pub files_indexed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<IndexWarning>,
    pub cancelled: bool,
}

impl PassReport {
    /// One outcome per input correction, `None` where the pass was cancelled.
    pub fn outcomes(&self) -> Vec<Option<ApplyOutcome>> {
        self.records.iter().map(|r| r.outcome).collect()
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of [`run_pass_with_indexes`]. The store holds the merged values;
/// nothing is persisted until it is flushed.
#[derive(Debug, Clone)]
pub struct PassResult {
    pub store: TargetStore,
    pub report: PassReport,
}

/// Result of [`run_pass`], owning the indexes built for it.
#[derive(Debug)]
pub struct Pass {
    pub indexes: Indexes,
    pub store: TargetStore,
    pub report: PassReport,
}

impl Pass {
    /// Current value of every changed entry is written through `writer`.
    /// Returns the number of files written.
    pub fn flush(&self, writer: &mut dyn WriteBack) -> Result<usize, Error> {
        self.store.flush(&self.indexes, writer)
    }

    pub fn outcomes(&self) -> Vec<Option<ApplyOutcome>> {
        self.report.outcomes()
    }
}

/// Indexes `reader` and applies `corrections` against it.
///
/// Cancellation while indexing returns [`Error::Cancelled`]; cancellation
/// afterwards returns a report with `cancelled` set.
pub fn run_pass(
    reader: &dyn CorpusReader,
    corrections: &[Correction],
    options: &PassOptions,
    caps: &Capabilities<'_>,
    progress: &mut dyn FnMut(ProgressEvent),
) -> Result<Pass, Error> {
    options.validate()?;
    let indexes = build_indexes(reader, caps.classifier, &caps.cancel, &mut *progress)?;
    let PassResult { store, report } =
        run_pass_with_indexes(&indexes, corrections, options, caps, progress)?;
    Ok(Pass {
        indexes,
        store,
        report,
    })
}

/// Applies `corrections` against indexes the caller already built, so one
/// corpus snapshot can serve several passes.
pub fn run_pass_with_indexes(
    indexes: &Indexes,
    corrections: &[Correction],
    options: &PassOptions,
    caps: &Capabilities<'_>,
    progress: &mut dyn FnMut(ProgressEvent),
) -> Result<PassResult, Error> {
    options.validate()?;
    let total = corrections.len();
    tracing::info!(
        corrections = total,
        entries = indexes.len(),
        mode = ?options.mode,
        fuzzy = options.fuzzy.is_some(),
        "resolution pass started"
    );

    let cascade = MatchCascade::new(indexes, &options.script_scope);
    let mut engine = MergeEngine::new(indexes, caps.script)
        .with_line_breaks(options.line_breaks)
        .with_escaped_newlines(options.escaped_newlines)
        .with_origin_only_overwrite(options.allow_origin_only_overwrite);
    let mut records: Vec<OutcomeRecord> = corrections
        .iter()
        .enumerate()
        .map(|(i, c)| OutcomeRecord::pending(i, c))
        .collect();
    // Resolution runs to completion before any write, so results land in
    // input order whichever tier produced them.
    let mut resolved: Vec<Option<MatchResult>> = vec![None; total];
    let mut deferred: Vec<usize> = Vec::new();
    let mut cancelled = false;

    for (i, correction) in corrections.iter().enumerate() {
        if caps.cancel.is_cancelled() {
            tracing::info!(corrections_done = i, total, "resolution cancelled");
            cancelled = true;
            break;
        }

        let eligible = correction.has_key() && !correction.corrected_text.trim().is_empty();
        let result = if eligible {
            cascade.resolve_structural(correction)
        } else {
            MatchResult::Unresolved
        };

        if eligible
            && !result.is_resolved()
            && options.fuzzy.is_some()
            && correction.str_origin().is_some()
        {
            deferred.push(i);
        } else {
            resolved[i] = Some(result);
        }
        progress(ProgressEvent::Resolving { done: i + 1, total });
    }

    let mut fuzzy_degraded = false;
    if !cancelled
        && !deferred.is_empty()
        && let Some(fuzzy_options) = &options.fuzzy
    {
        let mut resolver = FuzzyResolver::new(indexes, caps.embedder, fuzzy_options.clone());
        if let Some(search) = caps.search {
            resolver = resolver.with_search(search);
        }
        let batch: Vec<&Correction> = deferred.iter().map(|i| &corrections[*i]).collect();
        let results = resolver.resolve_batch(&batch, &caps.cancel, &mut *progress);

        // Groups skipped by cancellation come back as `None` and stay pending.
        for (&i, result) in deferred.iter().zip(results) {
            resolved[i] = result;
        }
        cancelled = caps.cancel.is_cancelled();
        fuzzy_degraded = resolver.is_degraded();
    }

    for (i, result) in resolved.iter().enumerate() {
        if let Some(result) = result {
            records[i].record(engine.apply(result, &corrections[i], options.mode));
        }
    }

    let golden_rule_cleared = if options.enforce_golden_rule {
        engine.store_mut().enforce_golden_rule()
    } else {
        0
    };

    let mut summary = PassSummary::from_records(&records);
    summary.conflicts = engine.conflicts();
    summary.golden_rule_cleared = golden_rule_cleared;
    summary.fuzzy_degraded = fuzzy_degraded;

    tracing::info!(
        total = summary.total,
        matched = summary.matched,
        updated = summary.updated,
        skipped_translated = summary.skipped_translated,
        not_found = summary.not_found,
        str_origin_mismatch = summary.str_origin_mismatch,
        conflicts = summary.conflicts,
        pending = summary.pending,
        cancelled,
        "resolution pass finished"
    );

    Ok(PassResult {
        store: engine.into_store(),
        report: PassReport {
            summary,
            records,
            files_indexed: indexes.files_indexed(),
            warnings: indexes.warnings().to_vec(),
            cancelled,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fuzzy::FuzzyOptions,
        index::InMemoryCorpus,
        merge::ApplyMode,
        progress::no_progress,
        types::{EntryId, RawEntry},
    };

    fn corpus() -> InMemoryCorpus {
        InMemoryCorpus::new()
            .with_file(
                "ui/menu.xml",
                vec![
                    RawEntry::new("A1", "Hello", ""),
                    RawEntry::new("S1", "Save", "Sauvegarder"),
                    RawEntry::new("S2", "Save", ""),
                    RawEntry::new("E1", "", "stale"),
                ],
            )
            .with_broken_file("ui/broken.xml", "unexpected end of file")
    }

    /// Scores 1.0 for texts with the same first letter, 0.0 otherwise.
    struct InitialEmbedder;

    impl Embedder for InitialEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; 26];
                    if let Some(c) = t.to_lowercase().chars().next()
                        && c.is_ascii_lowercase()
                    {
                        v[(c as u8 - b'a') as usize] = 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    #[test]
    fn test_outcomes_follow_input_order() {
        let corrections = vec![
            Correction::new("Bonjour").with_string_id("A1").with_str_origin("Hello"),
            Correction::new("X").with_string_id("A1").with_str_origin("Hullo"),
            Correction::new("Y").with_string_id("ZZ"),
            Correction::new("Z"),
            Correction::new(" ").with_string_id("A1"),
            Correction::new("Enregistrer").with_str_origin("Save"),
        ];
        let pass = run_pass(
            &corpus(),
            &corrections,
            &PassOptions::default(),
            &Capabilities::default(),
            &mut no_progress,
        )
        .unwrap();

        assert_eq!(
            pass.outcomes(),
            vec![
                Some(ApplyOutcome::Updated),
                Some(ApplyOutcome::StrOriginMismatch),
                Some(ApplyOutcome::NotFound),
                Some(ApplyOutcome::NoKeyPresent),
                Some(ApplyOutcome::EmptyCorrection),
                Some(ApplyOutcome::Updated),
            ]
        );
        let summary = &pass.report.summary;
        assert_eq!(summary.total, 6);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.no_key, 1);
        assert_eq!(summary.empty_text, 1);
        assert_eq!(summary.golden_rule_cleared, 1);
        assert_eq!(summary.by_tier.get(&Tier::Strict), Some(&1));
        assert_eq!(summary.by_tier.get(&Tier::StrOriginOnly), Some(&1));
        assert_eq!(pass.report.files_indexed, 1);
        assert_eq!(pass.report.warnings.len(), 1);
        assert_eq!(pass.store.value(EntryId(3)), "");
        assert_eq!(pass.store.value(EntryId(1)), "Sauvegarder");
    }

    #[test]
    fn test_progress_reports_every_stage() {
        let mut events = Vec::new();
        let corrections = vec![Correction::new("Bonjour").with_string_id("A1")];
        run_pass(
            &corpus(),
            &corrections,
            &PassOptions::default(),
            &Capabilities::default(),
            &mut |e| events.push(e),
        )
        .unwrap();
        assert_eq!(
            events,
            vec![
                ProgressEvent::Indexing { done: 1, total: 2 },
                ProgressEvent::Indexing { done: 2, total: 2 },
                ProgressEvent::Resolving { done: 1, total: 1 },
            ]
        );
    }

    #[test]
    fn test_fuzzy_results_apply_in_input_order() {
        let embedder = InitialEmbedder;
        let caps = Capabilities::new().with_embedder(&embedder);
        let options = PassOptions::new().with_fuzzy(FuzzyOptions::new(0.9));
        let corrections = vec![
            Correction::new("Salut").with_string_id("A1").with_str_origin("Hi there"),
            Correction::new("Bonjour").with_string_id("A1").with_str_origin("Hello"),
        ];
        let pass = run_pass(&corpus(), &corrections, &options, &caps, &mut no_progress).unwrap();

        // The later strict correction wins over the earlier fuzzy one.
        assert_eq!(pass.report.records[0].tier, Some(Tier::Fuzzy));
        assert_eq!(pass.report.records[1].tier, Some(Tier::Strict));
        assert!(!pass.report.records[0].conflict);
        assert!(pass.report.records[1].conflict);
        assert_eq!(pass.store.value(EntryId(0)), "Bonjour");
        assert_eq!(pass.report.summary.conflicts, 1);
    }

    #[test]
    fn test_cancelled_fuzzy_keeps_outcomes_of_scored_groups() {
        let corpus = InMemoryCorpus::new().with_file(
            "ui/menu.xml",
            vec![
                RawEntry::new("A1", "Hello", ""),
                RawEntry::new("B1", "Goodbye", ""),
            ],
        );
        let indexes = Indexes::from_reader(&corpus).unwrap();
        let embedder = InitialEmbedder;
        let cancel = CancellationToken::new();
        let caps = Capabilities::new()
            .with_embedder(&embedder)
            .with_cancellation(cancel.clone());
        let options = PassOptions::new().with_fuzzy(FuzzyOptions::new(0.9));
        let corrections = vec![
            Correction::new("Salut").with_string_id("A1").with_str_origin("Hi there"),
            Correction::new("Adieu").with_string_id("B1").with_str_origin("Farewell"),
            Correction::new("Rien").with_string_id("ZZ").with_str_origin("Nothing"),
        ];
        let mut progress = |event: ProgressEvent| {
            if let ProgressEvent::Fuzzy { done: 2, .. } = event {
                cancel.cancel();
            }
        };
        let result =
            run_pass_with_indexes(&indexes, &corrections, &options, &caps, &mut progress).unwrap();

        assert!(result.report.cancelled);
        assert_eq!(
            result.report.outcomes(),
            vec![
                Some(ApplyOutcome::Updated),
                Some(ApplyOutcome::StrOriginMismatch),
                None,
            ]
        );
        assert_eq!(result.report.summary.pending, 1);
        assert_eq!(result.store.value(EntryId(0)), "Salut");
    }

    #[test]
    fn test_missing_embedder_degrades_to_structural_outcomes() {
        let options = PassOptions::new().with_fuzzy(FuzzyOptions::new(0.5));
        let corrections = vec![
            Correction::new("Salut").with_string_id("A1").with_str_origin("Hi there"),
            Correction::new("Bonjour").with_string_id("A1").with_str_origin("Hello"),
        ];
        let pass = run_pass(
            &corpus(),
            &corrections,
            &options,
            &Capabilities::default(),
            &mut no_progress,
        )
        .unwrap();
        assert_eq!(
            pass.outcomes(),
            vec![
                Some(ApplyOutcome::StrOriginMismatch),
                Some(ApplyOutcome::Updated)
            ]
        );
        assert!(pass.report.summary.fuzzy_degraded);
    }

    #[test]
    fn test_cancelled_before_indexing_is_an_error() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let caps = Capabilities::new().with_cancellation(cancel);
        let err = run_pass(&corpus(), &[], &PassOptions::default(), &caps, &mut no_progress)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_cancelled_while_resolving_leaves_pending_records() {
        let indexes = Indexes::from_reader(&corpus()).unwrap();
        let cancel = CancellationToken::new();
        let caps = Capabilities::new().with_cancellation(cancel.clone());
        let corrections = vec![
            Correction::new("Bonjour").with_string_id("A1").with_str_origin("Hello"),
            Correction::new("Enregistrer").with_string_id("S2").with_str_origin("Save"),
        ];
        let mut progress = |event: ProgressEvent| {
            if let ProgressEvent::Resolving { done: 1, .. } = event {
                cancel.cancel();
            }
        };
        let result = run_pass_with_indexes(
            &indexes,
            &corrections,
            &PassOptions::default(),
            &caps,
            &mut progress,
        )
        .unwrap();

        assert!(result.report.cancelled);
        assert_eq!(
            result.report.outcomes(),
            vec![Some(ApplyOutcome::Updated), None]
        );
        assert_eq!(result.report.summary.pending, 1);
        assert_eq!(result.store.value(EntryId(0)), "Bonjour");
        assert_eq!(result.store.value(EntryId(2)), "");
    }

    #[test]
    fn test_invalid_options_are_fatal() {
        let options = PassOptions::new().with_fuzzy(FuzzyOptions::new(-1.0));
        let err = run_pass(
            &corpus(),
            &[],
            &options,
            &Capabilities::default(),
            &mut no_progress,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }

    #[test]
    fn test_overwrite_mode_and_report_json() {
        let options = PassOptions::new().with_mode(ApplyMode::Overwrite);
        let corrections = vec![
            Correction::new("Enregistrer")
                .with_string_id("S1")
                .with_str_origin("Save"),
        ];
        let pass = run_pass(
            &corpus(),
            &corrections,
            &options,
            &Capabilities::default(),
            &mut no_progress,
        )
        .unwrap();
        assert_eq!(pass.store.value(EntryId(1)), "Enregistrer");

        let json = pass.report.to_json().unwrap();
        assert!(json.contains("\"outcome\": \"updated\""));
        assert!(json.contains("\"strict\": 1"));
    }
}
