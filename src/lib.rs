#![forbid(unsafe_code)]
//! Translation resolution and merge engine for localized string tables.
//!
//! Resolves human-supplied corrections to the entries they belong to in a
//! large corpus of per-language string tables, then writes the corrected text
//! back under strict safety rules.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use locmerge::{
//!     Capabilities, PassOptions, run_pass,
//!     formats::{LocStrDirectory, LocStrWriteBack},
//!     progress::no_progress,
//!     traits::Parser,
//!     types::Correction,
//! };
//!
//! let corpus = LocStrDirectory::new("loc/fr");
//! let corrections = Vec::<Correction>::read_from("corrections.json")?;
//! let pass = run_pass(
//!     &corpus,
//!     &corrections,
//!     &PassOptions::default(),
//!     &Capabilities::default(),
//!     &mut no_progress,
//! )?;
//! println!("{}", pass.report.to_json()?);
//! pass.flush(&mut LocStrWriteBack::new())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Match cascade
//!
//! - **Strict**: StringID and normalized origin text both match
//! - **StringID only**: restricted to script categories (dialog, sequencer)
//! - **StrOrigin only**: origin text disambiguated by file and neighbours,
//!   may fan out to every entry sharing the text
//! - **Fuzzy**: embedding similarity within the pool of the same StringID,
//!   opt-in and threshold-gated
//!
//! # Safety rules
//!
//! - Entries without source text are never written (golden rule)
//! - By default existing translations are left alone
//! - Re-applying a correction is a no-op
//! - When two corrections hit the same entry, the last one wins and the
//!   conflict is counted

pub mod cascade;
pub mod category;
pub mod error;
pub mod formats;
pub mod fuzzy;
pub mod index;
pub mod merge;
pub mod normalize;
pub mod options;
pub mod pass;
pub mod progress;
pub mod script;
pub mod traits;
pub mod types;

// Re-export most used types for easy consumption
pub use crate::{
    cascade::{MatchCascade, resolve},
    error::Error,
    fuzzy::{Embedder, FuzzyOptions, FuzzyResolver, NeighborSearch},
    index::{CorpusReader, Indexes, build_indexes},
    merge::{ApplyMode, MergeEngine, TargetStore, WriteBack},
    options::PassOptions,
    pass::{Capabilities, Pass, PassReport, PassSummary, run_pass, run_pass_with_indexes},
    progress::{CancellationToken, ProgressEvent},
    types::{ApplyOutcome, Correction, Entry, EntryId, MatchResult, Tier},
};
