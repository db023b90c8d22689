//! Pool-scoped semantic matching, the last tier of the cascade.
//!
//! Unresolved corrections are grouped by StringID and each group is compared
//! only against the indexed entries sharing that StringID. Pools are encoded
//! once per group, so the number of encodes stays proportional to the corpus
//! slice actually touched rather than to `corrections × corpus`.
//!
//! The embedding model and any approximate index are external capabilities
//! ([`Embedder`], [`NeighborSearch`]). When the embedder is missing or fails,
//! the resolver degrades: every remaining query is [`MatchResult::Unresolved`]
//! and the structural tiers are unaffected.

use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    collections::BTreeMap,
    rc::Rc,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    index::Indexes,
    normalize::normalize,
    progress::{CancellationToken, ProgressEvent, no_progress},
    types::{Correction, EntryId, MatchResult, Tier},
};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_DENSE_POOL_LIMIT: usize = 100;

/// Text embedding capability. Must return one vector per input text, in order.
pub trait Embedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error>;
}

/// Nearest-neighbour capability over an ephemeral pool of unit vectors.
///
/// Returns, for each query, up to `k` `(pool index, score)` pairs sorted by
/// descending score.
pub trait NeighborSearch {
    fn nearest(
        &self,
        queries: &[Vec<f32>],
        pool: &[Vec<f32>],
        k: usize,
    ) -> Result<Vec<Vec<(usize, f32)>>, Error>;
}

/// Flat exhaustive search, used when no approximate backend is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactNeighborSearch;

static EXACT_SEARCH: ExactNeighborSearch = ExactNeighborSearch;

impl NeighborSearch for ExactNeighborSearch {
    fn nearest(
        &self,
        queries: &[Vec<f32>],
        pool: &[Vec<f32>],
        k: usize,
    ) -> Result<Vec<Vec<(usize, f32)>>, Error> {
        Ok(queries
            .iter()
            .map(|query| {
                let mut scored: Vec<(usize, f32)> = pool
                    .iter()
                    .enumerate()
                    .map(|(i, candidate)| (i, dot(query, candidate)))
                    .collect();
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
                scored.truncate(k);
                scored
            })
            .collect())
    }
}

/// Options of the fuzzy tier. The acceptance threshold has no default: no
/// single value is safe for every corpus.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FuzzyOptions {
    /// Minimum cosine similarity, within `0.0..=1.0`.
    pub threshold: f32,
    /// Maximum number of texts per embedding call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pools smaller than this are scored with a dense matrix; larger pools
    /// go through [`NeighborSearch`].
    #[serde(default = "default_dense_pool_limit")]
    pub dense_pool_limit: usize,
    /// Compare corrections without a StringID against the whole corpus.
    #[serde(default)]
    pub corpus_wide_fallback: bool,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_dense_pool_limit() -> usize {
    DEFAULT_DENSE_POOL_LIMIT
}

impl FuzzyOptions {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            batch_size: DEFAULT_BATCH_SIZE,
            dense_pool_limit: DEFAULT_DENSE_POOL_LIMIT,
            corpus_wide_fallback: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_dense_pool_limit(mut self, dense_pool_limit: usize) -> Self {
        self.dense_pool_limit = dense_pool_limit;
        self
    }

    pub fn with_corpus_wide_fallback(mut self, enabled: bool) -> Self {
        self.corpus_wide_fallback = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::invalid_options(format!(
                "fuzzy threshold must be within 0..=1, got {}",
                self.threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::invalid_options("fuzzy batch_size must be at least 1"));
        }
        Ok(())
    }
}

type PoolKey = Option<String>;

/// Resolver for the fuzzy tier, owned by one pass.
pub struct FuzzyResolver<'a> {
    indexes: &'a Indexes,
    embedder: Option<&'a dyn Embedder>,
    search: &'a dyn NeighborSearch,
    options: FuzzyOptions,
    degraded: Cell<bool>,
    corpus_pool: RefCell<Option<Rc<Vec<Vec<f32>>>>>,
}

impl<'a> FuzzyResolver<'a> {
    pub fn new(
        indexes: &'a Indexes,
        embedder: Option<&'a dyn Embedder>,
        options: FuzzyOptions,
    ) -> Self {
        Self {
            indexes,
            embedder,
            search: &EXACT_SEARCH,
            options,
            degraded: Cell::new(false),
            corpus_pool: RefCell::new(None),
        }
    }

    /// Uses `search` for pools of at least `dense_pool_limit` entries.
    pub fn with_search(mut self, search: &'a dyn NeighborSearch) -> Self {
        self.search = search;
        self
    }

    pub fn options(&self) -> &FuzzyOptions {
        &self.options
    }

    /// Whether a capability failure disabled the resolver.
    pub fn is_degraded(&self) -> bool {
        self.degraded.get()
    }

    pub fn resolve_one(&self, correction: &Correction) -> MatchResult {
        self.resolve_batch(&[correction], &CancellationToken::new(), &mut no_progress)
            .pop()
            .flatten()
            .unwrap_or(MatchResult::Unresolved)
    }

    /// Resolves every correction of the batch, returning one result per input
    /// in input order. Corrections without a StrOrigin come back unresolved.
    ///
    /// `None` marks a correction whose pool group was never scored because
    /// `cancel` fired first. A degraded resolver still reports `Unresolved`.
    pub fn resolve_batch(
        &self,
        corrections: &[&Correction],
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Vec<Option<MatchResult>> {
        let mut results: Vec<Option<MatchResult>> = vec![None; corrections.len()];

        let mut groups: BTreeMap<PoolKey, Vec<usize>> = BTreeMap::new();
        for (i, correction) in corrections.iter().enumerate() {
            if correction.str_origin().is_none() {
                results[i] = Some(MatchResult::Unresolved);
                continue;
            }
            let key = correction.string_id().map(|sid| sid.to_lowercase());
            groups.entry(key).or_default().push(i);
        }

        let total = groups.len();
        for (done, (key, members)) in groups.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(groups_done = done, total, "fuzzy resolution cancelled");
                break;
            }
            let matches = if self.degraded.get() {
                Vec::new()
            } else {
                match self.resolve_group(key.as_deref(), &members, corrections) {
                    Ok(matches) => matches,
                    Err(e) => {
                        tracing::warn!("Fuzzy matching disabled for the rest of the pass: {}", e);
                        self.degraded.set(true);
                        Vec::new()
                    }
                }
            };
            let mut matches = matches.into_iter();
            for member in &members {
                results[*member] = Some(matches.next().unwrap_or(MatchResult::Unresolved));
            }
            progress(ProgressEvent::Fuzzy {
                done: done + 1,
                total,
            });
        }
        results
    }

    fn resolve_group(
        &self,
        string_id: Option<&str>,
        members: &[usize],
        corrections: &[&Correction],
    ) -> Result<Vec<MatchResult>, Error> {
        let unresolved = || vec![MatchResult::Unresolved; members.len()];

        let pool: Vec<EntryId> = match string_id {
            Some(sid) => self.indexes.by_string_id(sid).to_vec(),
            None if self.options.corpus_wide_fallback => self
                .indexes
                .ids()
                .filter(|id| self.indexes.is_indexed(*id))
                .collect(),
            None => return Ok(unresolved()),
        };
        if pool.is_empty() {
            return Ok(unresolved());
        }

        let pool_vectors = match string_id {
            Some(_) => Rc::new(self.embed_pool(&pool)?),
            None => self.corpus_pool_vectors(&pool)?,
        };
        let query_texts: Vec<String> = members
            .iter()
            .map(|i| normalize(corrections[*i].str_origin().unwrap_or_default()))
            .collect();
        let query_vectors = self.embed_normalized(&query_texts)?;

        let best = if pool.len() < self.options.dense_pool_limit {
            dense_best(&query_vectors, &pool_vectors)
        } else {
            self.search
                .nearest(&query_vectors, &pool_vectors, 1)?
                .into_iter()
                .map(|hits| hits.into_iter().next())
                .collect()
        };

        let threshold = self.options.threshold;
        Ok(best
            .into_iter()
            .map(|hit| match hit {
                Some((index, score)) if score >= threshold && index < pool.len() => {
                    tracing::debug!(
                        string_id,
                        score,
                        entry = %pool[index],
                        "fuzzy match accepted"
                    );
                    MatchResult::matched(vec![pool[index]], Tier::Fuzzy)
                }
                _ => MatchResult::Unresolved,
            })
            .collect())
    }

    fn embed_pool(&self, pool: &[EntryId]) -> Result<Vec<Vec<f32>>, Error> {
        let texts: Vec<String> = pool
            .iter()
            .map(|id| self.indexes.normalized_origin(*id).to_string())
            .collect();
        self.embed_normalized(&texts)
    }

    // The corpus-wide pool is encoded once per resolver and reused.
    fn corpus_pool_vectors(&self, pool: &[EntryId]) -> Result<Rc<Vec<Vec<f32>>>, Error> {
        if let Some(vectors) = self.corpus_pool.borrow().as_ref() {
            return Ok(Rc::clone(vectors));
        }
        tracing::info!(entries = pool.len(), "encoding corpus-wide fuzzy pool");
        let vectors = Rc::new(self.embed_pool(pool)?);
        *self.corpus_pool.borrow_mut() = Some(Rc::clone(&vectors));
        Ok(vectors)
    }

    fn embed_normalized(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        let embedder = self
            .embedder
            .ok_or_else(|| Error::capability("no embedder configured"))?;

        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.options.batch_size.max(1)) {
            let vectors = embedder.embed(chunk)?;
            if vectors.len() != chunk.len() {
                return Err(Error::capability(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                )));
            }
            out.extend(vectors.iter().map(|v| unit_normalize(v)));
        }
        Ok(out)
    }
}

/// Normalize a vector to unit length; zero vectors are returned unchanged.
pub fn unit_normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|x| x / norm).collect()
    } else {
        vector.to_vec()
    }
}

// Cosine similarity of unit vectors; mismatched dimensions score 0.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn dense_best(queries: &[Vec<f32>], pool: &[Vec<f32>]) -> Vec<Option<(usize, f32)>> {
    queries
        .iter()
        .map(|query| {
            let mut best: Option<(usize, f32)> = None;
            for (i, candidate) in pool.iter().enumerate() {
                let score = dot(query, candidate);
                if best.is_none_or(|(_, top)| score > top) {
                    best = Some((i, score));
                }
            }
            best
        })
        .collect()
}
