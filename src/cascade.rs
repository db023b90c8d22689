//! Match cascade: resolves one correction to a set of target entries.
//!
//! Tiers are tried in a fixed order and the first tier with a non-empty hit
//! set wins:
//!
//! 1. [`Tier::Strict`]: StringID (case-insensitive) plus normalized origin.
//! 2. [`Tier::StringIdOnly`]: StringID alone, restricted to script categories.
//! 3. [`Tier::StrOriginOnly`]: normalized origin, narrowed by positional
//!    context when the correction carries one.
//! 4. [`Tier::Fuzzy`]: pool-scoped embedding search, when a resolver is attached.
//!
//! The cascade never fails; lookups that find nothing fall through to the
//! next tier and an exhausted cascade yields [`MatchResult::Unresolved`].

use std::collections::HashSet;

use crate::{
    category::ScriptScope,
    fuzzy::FuzzyResolver,
    index::Indexes,
    normalize::{normalize, normalize_no_space},
    types::{ApplyOutcome, Correction, EntryId, MatchResult, Tier},
};

pub struct MatchCascade<'a> {
    indexes: &'a Indexes,
    scope: &'a ScriptScope,
    fuzzy: Option<&'a FuzzyResolver<'a>>,
}

impl<'a> MatchCascade<'a> {
    pub fn new(indexes: &'a Indexes, scope: &'a ScriptScope) -> Self {
        Self {
            indexes,
            scope,
            fuzzy: None,
        }
    }

    /// Enables the fuzzy tier for [`MatchCascade::resolve`].
    pub fn with_fuzzy(mut self, fuzzy: &'a FuzzyResolver<'a>) -> Self {
        self.fuzzy = Some(fuzzy);
        self
    }

    pub fn indexes(&self) -> &'a Indexes {
        self.indexes
    }

    /// Runs every tier, including fuzzy when a resolver is attached.
    pub fn resolve(&self, correction: &Correction) -> MatchResult {
        let result = self.resolve_structural(correction);
        if result.is_resolved() {
            return result;
        }
        match self.fuzzy {
            Some(fuzzy) if correction.str_origin().is_some() => fuzzy.resolve_one(correction),
            _ => MatchResult::Unresolved,
        }
    }

    /// Runs the strict, StringID-only and StrOrigin-only tiers.
    pub fn resolve_structural(&self, correction: &Correction) -> MatchResult {
        if let Some(result) = self.strict(correction) {
            return result;
        }
        if let Some(result) = self.string_id_only(correction) {
            return result;
        }
        if let Some(result) = self.str_origin_only(correction) {
            return result;
        }
        tracing::debug!(
            string_id = correction.string_id(),
            "no structural tier matched"
        );
        MatchResult::Unresolved
    }

    /// Splits an unresolved correction into a deleted or unknown key
    /// ([`ApplyOutcome::NotFound`]) versus a StringID whose source text
    /// drifted ([`ApplyOutcome::StrOriginMismatch`]).
    pub fn classify_unresolved(&self, correction: &Correction) -> ApplyOutcome {
        classify_unresolved(self.indexes, correction)
    }

    fn strict(&self, correction: &Correction) -> Option<MatchResult> {
        let sid = correction.string_id()?;
        let origin = correction.str_origin()?;

        let key = normalize(origin);
        let mut hits = self.indexes.strict(sid, &key);
        if hits.is_empty() {
            hits = self.indexes.strict_no_space(sid, &normalize_no_space(origin));
        }
        if hits.is_empty() {
            return None;
        }
        tracing::debug!(string_id = sid, hits = hits.len(), "strict match");
        Some(MatchResult::matched(hits.to_vec(), Tier::Strict))
    }

    fn string_id_only(&self, correction: &Correction) -> Option<MatchResult> {
        let sid = correction.string_id()?;
        let hits: Vec<EntryId> = self
            .indexes
            .by_string_id(sid)
            .iter()
            .copied()
            .filter(|id| {
                self.scope.allows(
                    self.indexes.category(*id),
                    &self.indexes.entry(*id).file_relpath,
                )
            })
            .collect();
        if hits.is_empty() {
            return None;
        }
        tracing::debug!(string_id = sid, hits = hits.len(), "string id match in script scope");
        Some(MatchResult::matched(hits, Tier::StringIdOnly))
    }

    fn str_origin_only(&self, correction: &Correction) -> Option<MatchResult> {
        let origin = correction.str_origin()?;
        let key = normalize(origin);

        let hits = self.context_hits(correction, &key).unwrap_or_else(|| {
            let exact = self.indexes.l3(&key);
            if exact.is_empty() {
                self.indexes.l3_no_space(&normalize_no_space(origin))
            } else {
                exact
            }
        });
        if hits.is_empty() {
            return None;
        }

        let distinct_ids: HashSet<String> = hits
            .iter()
            .map(|id| self.indexes.entry(*id).string_id.trim().to_lowercase())
            .collect();
        tracing::debug!(
            hits = hits.len(),
            string_ids = distinct_ids.len(),
            "origin-only match"
        );
        if distinct_ids.len() > 1 {
            Some(MatchResult::Ambiguous(hits.to_vec()))
        } else {
            Some(MatchResult::matched(hits.to_vec(), Tier::StrOriginOnly))
        }
    }

    // Walks L1, L2A, L2B with whatever context the correction carries.
    fn context_hits(&self, correction: &Correction, key: &str) -> Option<&'a [EntryId]> {
        let context = correction.context.as_ref()?;
        let relpath = context.file_relpath.as_deref().filter(|s| !s.is_empty());
        let hash = context.adjacency_hash.as_deref().filter(|s| !s.is_empty());

        if let (Some(relpath), Some(hash)) = (relpath, hash) {
            let hits = self.indexes.l1(key, relpath, hash);
            if !hits.is_empty() {
                return Some(hits);
            }
        }
        if let Some(relpath) = relpath {
            let hits = self.indexes.l2a(key, relpath);
            if !hits.is_empty() {
                return Some(hits);
            }
        }
        if let Some(hash) = hash {
            let hits = self.indexes.l2b(key, hash);
            if !hits.is_empty() {
                return Some(hits);
            }
        }
        None
    }
}

/// Outcome of a correction that no tier could resolve.
pub fn classify_unresolved(indexes: &Indexes, correction: &Correction) -> ApplyOutcome {
    match correction.string_id() {
        Some(sid) if indexes.contains_string_id(sid) => ApplyOutcome::StrOriginMismatch,
        _ => ApplyOutcome::NotFound,
    }
}

/// Resolves one correction with the default script scope and no fuzzy tier.
pub fn resolve(correction: &Correction, indexes: &Indexes) -> MatchResult {
    let scope = ScriptScope::default();
    MatchCascade::new(indexes, &scope).resolve(correction)
}
