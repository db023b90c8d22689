//! Category assignment and the script-category gate of the StringID-only tier.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::Entry;

pub const CATEGORY_DIALOG: &str = "Dialog";
pub const CATEGORY_SEQUENCER: &str = "Sequencer";
pub const CATEGORY_OTHER: &str = "Other";

/// Assigns a category to an entry. Called once per entry at index time.
pub trait CategoryClassifier {
    fn classify(&self, entry: &Entry) -> String;
}

impl<F> CategoryClassifier for F
where
    F: Fn(&Entry) -> String,
{
    fn classify(&self, entry: &Entry) -> String {
        self(entry)
    }
}

/// Folder-based classifier.
///
/// Each directory segment of the entry's relative path is checked against a
/// keyword table (case-insensitive substring). The first hit wins; without a
/// hit the top-level folder name is the category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderClassifier {
    keywords: Vec<(String, String)>,
}

impl Default for FolderClassifier {
    fn default() -> Self {
        Self::new()
            .with_keyword("sequencer", CATEGORY_SEQUENCER)
            .with_keyword("dialog", CATEGORY_DIALOG)
    }
}

impl FolderClassifier {
    /// A classifier without keywords; categories are top-level folder names.
    pub fn new() -> Self {
        Self {
            keywords: Vec::new(),
        }
    }

    pub fn with_keyword(mut self, keyword: &str, category: &str) -> Self {
        self.keywords
            .push((keyword.to_lowercase(), category.to_string()));
        self
    }
}

impl CategoryClassifier for FolderClassifier {
    fn classify(&self, entry: &Entry) -> String {
        let folders = directory_segments(&entry.file_relpath);
        for folder in &folders {
            let folder = folder.to_lowercase();
            if let Some((_, category)) = self
                .keywords
                .iter()
                .find(|(keyword, _)| folder.contains(keyword.as_str()))
            {
                return category.clone();
            }
        }
        folders
            .first()
            .map(|s| s.to_string())
            .unwrap_or_else(|| CATEGORY_OTHER.to_string())
    }
}

/// Categories whose entries may be matched by StringID alone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScriptScope {
    pub categories: BTreeSet<String>,
    /// Folder names (case-insensitive) that are never matched by StringID alone,
    /// even inside a script category.
    pub excluded_subfolders: Vec<String>,
}

impl Default for ScriptScope {
    fn default() -> Self {
        Self {
            categories: [CATEGORY_DIALOG, CATEGORY_SEQUENCER]
                .into_iter()
                .map(String::from)
                .collect(),
            excluded_subfolders: vec!["NarrationDialog".to_string()],
        }
    }
}

impl ScriptScope {
    pub fn allows(&self, category: &str, file_relpath: &str) -> bool {
        if !self.categories.contains(category) {
            return false;
        }
        !directory_segments(file_relpath).iter().any(|folder| {
            self.excluded_subfolders
                .iter()
                .any(|excluded| folder.eq_ignore_ascii_case(excluded))
        })
    }
}

fn directory_segments(relpath: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = relpath
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    // Last segment is the file name.
    segments.pop();
    segments
}
