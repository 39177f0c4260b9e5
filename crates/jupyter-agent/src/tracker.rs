//! Notebook snapshot tracking.
//!
//! The tracker keeps one baseline snapshot of a notebook and reports which
//! cells were added, removed or modified since then. Cells are matched by
//! their stable id. Cells without an id (or repeating an id already seen) are
//! matched by position, and those positions are reported in
//! [`DiffResult::unidentified`] so callers can tell a positional match from a
//! real one.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::notebook::Notebook;

/// Hex characters kept from the SHA-256 digest.
const HASH_LEN: usize = 16;

/// Outcome of comparing a notebook against the baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub changed: bool,
    pub summary: String,
    /// Positions in the current notebook.
    pub added: Vec<usize>,
    /// Positions in the baseline notebook.
    pub removed: Vec<usize>,
    /// Positions in the current notebook.
    pub modified: Vec<usize>,
    /// Current positions matched by position rather than id.
    pub unidentified: Vec<usize>,
    pub current_hash: String,
    pub baseline_hash: Option<String>,
}

impl DiffResult {
    fn unchanged(summary: &str, current_hash: String, baseline_hash: Option<String>) -> Self {
        Self {
            changed: false,
            summary: summary.to_string(),
            added: Vec::new(),
            removed: Vec::new(),
            modified: Vec::new(),
            unidentified: Vec::new(),
            current_hash,
            baseline_hash,
        }
    }
}

struct Snapshot {
    notebook: Notebook,
    hash: String,
}

/// Holds the baseline snapshot.
#[derive(Default)]
pub struct Tracker {
    baseline: Option<Snapshot>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the baseline with a copy of `notebook`. Returns its hash.
    pub fn snapshot(&mut self, notebook: &Notebook) -> String {
        let hash = content_hash(notebook);
        self.baseline = Some(Snapshot {
            notebook: notebook.clone(),
            hash: hash.clone(),
        });
        hash
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Hash of the baseline, if one was taken.
    pub fn baseline_hash(&self) -> Option<&str> {
        self.baseline.as_ref().map(|s| s.hash.as_str())
    }

    /// Compare `current` against the baseline.
    pub fn diff(&self, current: &Notebook) -> DiffResult {
        let current_hash = content_hash(current);

        let Some(baseline) = &self.baseline else {
            return DiffResult::unchanged(
                "No snapshot taken yet. Take a snapshot first.",
                current_hash,
                None,
            );
        };

        if current_hash == baseline.hash {
            return DiffResult::unchanged(
                "No changes detected since last snapshot.",
                current_hash,
                Some(baseline.hash.clone()),
            );
        }

        let before = index_cells(&baseline.notebook);
        let after = index_cells(current);

        let removed: Vec<usize> = before
            .order
            .iter()
            .filter(|key| !after.positions.contains_key(*key))
            .map(|key| before.positions[key])
            .collect();

        let mut added = Vec::new();
        let mut modified = Vec::new();
        for key in &after.order {
            let position = after.positions[key];
            match before.positions.get(key) {
                None => added.push(position),
                Some(&old) => {
                    if baseline.notebook.cells[old].source != current.cells[position].source {
                        modified.push(position);
                    }
                }
            }
        }

        if !after.unidentified.is_empty() {
            warn!(
                "{} cell(s) without a unique id matched by position: {:?}",
                after.unidentified.len(),
                after.unidentified
            );
        }

        DiffResult {
            changed: true,
            summary: summarize(&added, &removed, &modified),
            added,
            removed,
            modified,
            unidentified: after.unidentified,
            current_hash,
            baseline_hash: Some(baseline.hash.clone()),
        }
    }
}

/// Identity used to match a cell across snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum UnitKey {
    Id(String),
    Position(usize),
}

struct CellIndex {
    /// Keys in document order.
    order: Vec<UnitKey>,
    positions: HashMap<UnitKey, usize>,
    unidentified: Vec<usize>,
}

fn index_cells(notebook: &Notebook) -> CellIndex {
    let mut index = CellIndex {
        order: Vec::with_capacity(notebook.cells.len()),
        positions: HashMap::with_capacity(notebook.cells.len()),
        unidentified: Vec::new(),
    };

    for (position, cell) in notebook.cells.iter().enumerate() {
        let key = match cell.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) if !index.positions.contains_key(&UnitKey::Id(id.to_string())) => {
                UnitKey::Id(id.to_string())
            }
            // Missing or duplicate id.
            _ => {
                index.unidentified.push(position);
                UnitKey::Position(position)
            }
        };
        index.positions.insert(key.clone(), position);
        index.order.push(key);
    }
    index
}

fn summarize(added: &[usize], removed: &[usize], modified: &[usize]) -> String {
    let mut parts = Vec::new();
    if !added.is_empty() {
        parts.push(format!(
            "{} cell(s) added (indices: {:?})",
            added.len(),
            added
        ));
    }
    if !removed.is_empty() {
        parts.push(format!(
            "{} cell(s) removed (snapshot indices: {:?})",
            removed.len(),
            removed
        ));
    }
    if !modified.is_empty() {
        parts.push(format!(
            "{} cell(s) modified (indices: {:?})",
            modified.len(),
            modified
        ));
    }

    if parts.is_empty() {
        "Metadata changes only.".to_string()
    } else {
        parts.join("; ")
    }
}

/// Projection of a cell that participates in the hash. Fields are declared
/// in sorted order so the encoding is canonical.
#[derive(Serialize)]
struct CellFingerprint<'a> {
    id: &'a str,
    source: &'a str,
    #[serde(rename = "type")]
    kind: String,
}

/// Change-detection fingerprint over cell type, source and id.
pub fn content_hash(notebook: &Notebook) -> String {
    let projection: Vec<CellFingerprint<'_>> = notebook
        .cells
        .iter()
        .map(|cell| CellFingerprint {
            id: cell.id.as_deref().unwrap_or(""),
            source: &cell.source,
            kind: cell.cell_type().to_string(),
        })
        .collect();

    // Serializing borrowed strings into a Vec cannot fail.
    let encoded = serde_json::to_vec(&projection).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LEN);
    hash
}
