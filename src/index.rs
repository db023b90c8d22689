//! Contextual indexer: one pass over a corpus producing the entry arena and
//! every lookup level the match cascade consults.
//!
//! Levels, from most to least specific:
//!
//! - L1: `(origin, file_relpath, adjacency_hash)`
//! - L2A: `(origin, file_relpath)`
//! - L2B: `(origin, adjacency_hash)`
//! - L3: `origin`
//!
//! plus the strict `(string_id, origin)` table, its whitespace-free twin, the
//! StringID table and a whitespace-free L3. Levels hold [`EntryId`] handles
//! into a single arena, so an entry is stored once however many levels
//! reference it. Entries with an empty normalized origin stay in the arena
//! but are never indexed.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    category::{CategoryClassifier, FolderClassifier},
    error::Error,
    normalize::{normalize, normalize_no_space},
    progress::{CancellationToken, ProgressEvent, no_progress},
    types::{Entry, EntryId, RawEntry},
};

/// One file of a corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusFile {
    pub path: PathBuf,
    /// Path relative to the corpus root, with `/` separators.
    pub relpath: String,
}

impl CorpusFile {
    pub fn new(path: impl Into<PathBuf>, relpath: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            relpath: relpath.into(),
        }
    }
}

/// Source of corpus entries. Parsing and sanitizing the native format is the
/// reader's job; entries must be returned in document order.
pub trait CorpusReader {
    /// Lists the files of the corpus. Failing here aborts the pass.
    fn files(&self) -> Result<Vec<CorpusFile>, Error>;

    /// Reads one file. Failing here only skips that file.
    fn read_entries(&self, file: &CorpusFile) -> Result<Vec<RawEntry>, Error>;
}

/// Corpus held in memory, mostly for tests and for callers that already
/// parsed their files.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    files: Vec<(CorpusFile, Result<Vec<RawEntry>, String>)>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, relpath: &str, entries: Vec<RawEntry>) -> Self {
        self.files
            .push((CorpusFile::new(relpath, relpath), Ok(entries)));
        self
    }

    /// Adds a file whose parsing fails with `message`.
    pub fn with_broken_file(mut self, relpath: &str, message: &str) -> Self {
        self.files
            .push((CorpusFile::new(relpath, relpath), Err(message.to_string())));
        self
    }
}

impl CorpusReader for InMemoryCorpus {
    fn files(&self) -> Result<Vec<CorpusFile>, Error> {
        Ok(self.files.iter().map(|(file, _)| file.clone()).collect())
    }

    fn read_entries(&self, file: &CorpusFile) -> Result<Vec<RawEntry>, Error> {
        let (_, entries) = self
            .files
            .iter()
            .find(|(f, _)| f == file)
            .ok_or_else(|| Error::InvalidCorpus(format!("unknown file `{}`", file.relpath)))?;
        entries.clone().map_err(Error::InvalidCorpus)
    }
}

/// A file skipped during indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexWarning {
    pub file: PathBuf,
    pub message: String,
}

/// First 8 hex characters of the SHA-256 digest of `"{before}|{after}"`.
///
/// Used to disambiguate identical origins by their neighbours, not for security.
pub fn adjacency_hash(before: &str, after: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(before.as_bytes());
    hasher.update(b"|");
    hasher.update(after.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

fn string_id_key(string_id: &str) -> String {
    string_id.trim().to_lowercase()
}

/// Every lookup level for one corpus snapshot.
#[derive(Debug, Default)]
pub struct Indexes {
    entries: Vec<Entry>,
    categories: Vec<String>,
    origins: Vec<String>,
    l1: HashMap<(String, String, String), Vec<EntryId>>,
    l2a: HashMap<(String, String), Vec<EntryId>>,
    l2b: HashMap<(String, String), Vec<EntryId>>,
    l3: HashMap<String, Vec<EntryId>>,
    l3_no_space: HashMap<String, Vec<EntryId>>,
    strict: HashMap<(String, String), Vec<EntryId>>,
    strict_no_space: HashMap<(String, String), Vec<EntryId>>,
    by_string_id: HashMap<String, Vec<EntryId>>,
    known_string_ids: HashSet<String>,
    indexed: usize,
    files_indexed: usize,
    warnings: Vec<IndexWarning>,
}

/// Scans `reader` and builds all index levels.
///
/// Files that fail to parse are skipped and recorded in
/// [`Indexes::warnings`]; only failing to list the corpus is fatal.
pub fn build_indexes(
    reader: &dyn CorpusReader,
    classifier: &dyn CategoryClassifier,
    cancel: &CancellationToken,
    progress: &mut dyn FnMut(ProgressEvent),
) -> Result<Indexes, Error> {
    let files = reader.files()?;
    let total = files.len();
    let mut indexes = Indexes::default();

    for (done, file) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(files_done = done, total, "indexing cancelled");
            return Err(Error::Cancelled);
        }
        match reader.read_entries(file) {
            Ok(raw) => indexes.add_file(file, raw, classifier),
            Err(e) => {
                tracing::warn!("Skipping unreadable corpus file {:?}: {}", file.path, e);
                indexes.warnings.push(IndexWarning {
                    file: file.path.clone(),
                    message: e.to_string(),
                });
            }
        }
        progress(ProgressEvent::Indexing {
            done: done + 1,
            total,
        });
    }

    tracing::info!(
        files = indexes.files_indexed,
        skipped = indexes.warnings.len(),
        entries = indexes.entries.len(),
        indexed = indexes.indexed,
        "corpus indexed"
    );
    Ok(indexes)
}

impl Indexes {
    /// Builds indexes with the folder classifier, no cancellation and no
    /// progress reporting.
    pub fn from_reader(reader: &dyn CorpusReader) -> Result<Self, Error> {
        build_indexes(
            reader,
            &FolderClassifier::default(),
            &CancellationToken::new(),
            &mut no_progress,
        )
    }

    fn add_file(&mut self, file: &CorpusFile, raw: Vec<RawEntry>, classifier: &dyn CategoryClassifier) {
        let origins: Vec<String> = raw.iter().map(|r| normalize(&r.str_origin)).collect();

        for (position, (raw_entry, origin)) in raw.into_iter().zip(origins.iter()).enumerate() {
            let before = position
                .checked_sub(1)
                .map(|i| origins[i].clone())
                .unwrap_or_default();
            let after = origins.get(position + 1).cloned().unwrap_or_default();
            let hash = adjacency_hash(&before, &after);

            let entry = Entry {
                string_id: raw_entry.string_id,
                str_origin: raw_entry.str_origin,
                str_value: raw_entry.str_value,
                source_file: file.path.clone(),
                file_relpath: file.relpath.clone(),
                position_in_file: position as u32,
                adjacent_before: before,
                adjacent_after: after,
                adjacency_hash: hash,
            };
            self.insert(entry, origin.clone(), classifier);
        }
        self.files_indexed += 1;
    }

    fn insert(&mut self, entry: Entry, origin: String, classifier: &dyn CategoryClassifier) {
        let id = EntryId(self.entries.len());
        let sid = string_id_key(&entry.string_id);
        if !sid.is_empty() {
            self.known_string_ids.insert(sid.clone());
        }

        if !origin.is_empty() {
            let relpath = entry.file_relpath.clone();
            let hash = entry.adjacency_hash.clone();
            let no_space = normalize_no_space(&origin);

            self.l1
                .entry((origin.clone(), relpath.clone(), hash.clone()))
                .or_default()
                .push(id);
            self.l2a
                .entry((origin.clone(), relpath))
                .or_default()
                .push(id);
            self.l2b.entry((origin.clone(), hash)).or_default().push(id);
            self.l3.entry(origin.clone()).or_default().push(id);
            self.l3_no_space
                .entry(no_space.clone())
                .or_default()
                .push(id);

            if !sid.is_empty() {
                self.strict
                    .entry((sid.clone(), origin.clone()))
                    .or_default()
                    .push(id);
                self.strict_no_space
                    .entry((sid.clone(), no_space))
                    .or_default()
                    .push(id);
                self.by_string_id.entry(sid).or_default().push(id);
            }
            self.indexed += 1;
        }

        self.categories.push(classifier.classify(&entry));
        self.origins.push(origin);
        self.entries.push(entry);
    }

    /// All entries, indexed or not, in scan order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> &Entry {
        &self.entries[id.index()]
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.index())
    }

    pub fn ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        (0..self.entries.len()).map(EntryId)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries present in the index levels.
    pub fn indexed_len(&self) -> usize {
        self.indexed
    }

    pub fn files_indexed(&self) -> usize {
        self.files_indexed
    }

    pub fn warnings(&self) -> &[IndexWarning] {
        &self.warnings
    }

    pub fn category(&self, id: EntryId) -> &str {
        &self.categories[id.index()]
    }

    /// Normalized origin of an entry; empty for entries that are not indexed.
    pub fn normalized_origin(&self, id: EntryId) -> &str {
        &self.origins[id.index()]
    }

    pub fn is_indexed(&self, id: EntryId) -> bool {
        !self.normalized_origin(id).is_empty()
    }

    /// Whether any entry, indexed or not, carries this StringID.
    pub fn contains_string_id(&self, string_id: &str) -> bool {
        self.known_string_ids.contains(&string_id_key(string_id))
    }

    pub fn strict(&self, string_id: &str, origin: &str) -> &[EntryId] {
        lookup(&self.strict, &(string_id_key(string_id), origin.to_string()))
    }

    pub fn strict_no_space(&self, string_id: &str, origin_no_space: &str) -> &[EntryId] {
        lookup(
            &self.strict_no_space,
            &(string_id_key(string_id), origin_no_space.to_string()),
        )
    }

    pub fn by_string_id(&self, string_id: &str) -> &[EntryId] {
        lookup(&self.by_string_id, &string_id_key(string_id))
    }

    pub fn l1(&self, origin: &str, file_relpath: &str, adjacency_hash: &str) -> &[EntryId] {
        lookup(
            &self.l1,
            &(
                origin.to_string(),
                file_relpath.to_string(),
                adjacency_hash.to_string(),
            ),
        )
    }

    pub fn l2a(&self, origin: &str, file_relpath: &str) -> &[EntryId] {
        lookup(&self.l2a, &(origin.to_string(), file_relpath.to_string()))
    }

    pub fn l2b(&self, origin: &str, adjacency_hash: &str) -> &[EntryId] {
        lookup(&self.l2b, &(origin.to_string(), adjacency_hash.to_string()))
    }

    pub fn l3(&self, origin: &str) -> &[EntryId] {
        lookup(&self.l3, &origin.to_string())
    }

    pub fn l3_no_space(&self, origin_no_space: &str) -> &[EntryId] {
        lookup(&self.l3_no_space, &origin_no_space.to_string())
    }
}

fn lookup<'a, K: std::hash::Hash + Eq>(map: &'a HashMap<K, Vec<EntryId>>, key: &K) -> &'a [EntryId] {
    map.get(key).map(Vec::as_slice).unwrap_or(&[])
}
