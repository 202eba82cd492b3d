//! Output layout: `<root>/<District>/<Municipality>/Ward_<Ward>_<Centre>.csv`.
//!
//! Every label segment is made filesystem-safe before it becomes a path
//! component. Distinct labels can sanitise to the same path; `CollisionTracker`
//! notices when that happens within a run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::types::Leaf;

/// File name of the run summary written next to the output tree.
pub const SUMMARY_FILE: &str = "_crawl_summary.json";

/// Filesystem-safe rendition of one label segment.
///
/// Path separators become `-` and nothing else changes, so resumed runs find
/// files written by earlier crawls. Only a segment the filesystem cannot hold
/// is altered further: NUL bytes are dropped, and an empty, `.` or `..`
/// segment becomes `_`.
pub fn sanitize(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .filter(|c| *c != '\0')
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect();
    if matches!(cleaned.as_str(), "" | "." | "..") {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Per-leaf output file under `root`.
pub fn output_path(root: &Path, leaf: &Leaf) -> PathBuf {
    root.join(sanitize(leaf.district()))
        .join(sanitize(leaf.municipality()))
        .join(format!(
            "Ward_{}_{}.csv",
            sanitize(leaf.ward()),
            sanitize(leaf.centre())
        ))
}

pub fn summary_path(root: &Path) -> PathBuf {
    root.join(SUMMARY_FILE)
}

/// Raw label identity of a leaf, used to tell genuine collisions from revisits.
fn raw_key(leaf: &Leaf) -> [String; 4] {
    [
        leaf.district().to_string(),
        leaf.municipality().to_string(),
        leaf.ward().to_string(),
        leaf.centre().to_string(),
    ]
}

/// Remembers which raw labels produced each output path during one run.
#[derive(Debug, Default)]
pub struct CollisionTracker {
    seen: HashMap<PathBuf, [String; 4]>,
}

impl CollisionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `leaf` maps to `path`. Returns the raw labels of the earlier
    /// leaf when a *different* leaf already claimed the same path.
    pub fn claim(&mut self, path: &Path, leaf: &Leaf) -> Option<[String; 4]> {
        let key = raw_key(leaf);
        match self.seen.get(path) {
            Some(prev) if *prev != key => Some(prev.clone()),
            Some(_) => None,
            None => {
                self.seen.insert(path.to_path_buf(), key);
                None
            }
        }
    }
}
