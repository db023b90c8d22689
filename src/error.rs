//! All error types for the locmerge crate.
//!
//! Only failures that make a whole pass meaningless are surfaced here. Problems
//! local to one file, entry or correction are recorded in the pass report
//! instead (see [`crate::index::IndexWarning`] and [`crate::types::ApplyOutcome`]).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid corpus: {0}")]
    InvalidCorpus(String),

    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("write-back failed for `{}`: {source}", path.display())]
    WriteBack {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("pass cancelled")]
    Cancelled,
}

impl Error {
    /// Creates a capability error, used by embedding and search backends.
    pub fn capability(message: impl Into<String>) -> Self {
        Error::CapabilityUnavailable(message.into())
    }

    /// Creates an options validation error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Error::InvalidOptions(message.into())
    }

    /// Wraps a failure to persist one target file.
    pub fn write_back(path: impl Into<PathBuf>, source: Error) -> Self {
        Error::WriteBack {
            path: path.into(),
            source: Box::new(source),
        }
    }
}
