//! Notebook document model.
//!
//! Just enough of the v4 notebook format to read cells, edit sources and
//! store execution outputs. Cells are the ordered units the tracker diffs.

use jupyter_agent_protocol::OutputRecord;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use uuid::Uuid;

/// Errors from editing a notebook document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotebookError {
    /// A cell position outside the document.
    #[error("Cell index {index} out of range (notebook has {len} cells)")]
    CellOutOfRange { index: usize, len: usize },
}

/// A notebook document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "default_nbformat")]
    pub nbformat: u32,
    #[serde(default = "default_nbformat_minor")]
    pub nbformat_minor: u32,
}

fn default_nbformat() -> u32 {
    4
}

fn default_nbformat_minor() -> u32 {
    5
}

/// One ordered unit of a notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Stable identity. Absent in documents older than format 4.5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "joined_source")]
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub kind: CellKind,
}

/// Cell type and its type-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum CellKind {
    Code {
        #[serde(default)]
        outputs: Vec<OutputRecord>,
        #[serde(default)]
        execution_count: Option<i64>,
    },
    Markdown {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachments: Option<Value>,
    },
    Raw {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachments: Option<Value>,
    },
}

/// Cell type names accepted when adding cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

impl std::fmt::Display for CellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code => write!(f, "code"),
            Self::Markdown => write!(f, "markdown"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

impl Cell {
    /// A new cell with a fresh identity and no outputs.
    pub fn new(cell_type: CellType, source: impl Into<String>) -> Self {
        let kind = match cell_type {
            CellType::Code => CellKind::Code {
                outputs: Vec::new(),
                execution_count: None,
            },
            CellType::Markdown => CellKind::Markdown { attachments: None },
            CellType::Raw => CellKind::Raw { attachments: None },
        };
        Self {
            id: Some(new_cell_id()),
            source: source.into(),
            metadata: Map::new(),
            kind,
        }
    }

    pub fn cell_type(&self) -> CellType {
        match self.kind {
            CellKind::Code { .. } => CellType::Code,
            CellKind::Markdown { .. } => CellType::Markdown,
            CellKind::Raw { .. } => CellType::Raw,
        }
    }

    /// Outputs of a code cell. `None` for other cell types.
    pub fn outputs(&self) -> Option<&[OutputRecord]> {
        match &self.kind {
            CellKind::Code { outputs, .. } => Some(outputs),
            _ => None,
        }
    }
}

impl Notebook {
    /// An empty document for `kernel_name`.
    pub fn new(kernel_name: &str) -> Self {
        let metadata = json!({
            "kernelspec": {
                "display_name": kernel_name,
                "language": "python",
                "name": kernel_name,
            },
            "language_info": {
                "name": "python",
            },
        });
        Self {
            cells: Vec::new(),
            metadata: match metadata {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            nbformat: default_nbformat(),
            nbformat_minor: default_nbformat_minor(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, index: usize) -> Result<&Cell, NotebookError> {
        let len = self.cells.len();
        self.cells
            .get(index)
            .ok_or(NotebookError::CellOutOfRange { index, len })
    }

    fn cell_mut(&mut self, index: usize) -> Result<&mut Cell, NotebookError> {
        let len = self.cells.len();
        self.cells
            .get_mut(index)
            .ok_or(NotebookError::CellOutOfRange { index, len })
    }

    /// Insert `cell` at `position`, or append when the position is absent or
    /// past the end. Returns the index the cell landed at.
    pub fn insert_cell(&mut self, cell: Cell, position: Option<usize>) -> usize {
        match position {
            Some(index) if index <= self.cells.len() => {
                self.cells.insert(index, cell);
                index
            }
            _ => {
                self.cells.push(cell);
                self.cells.len() - 1
            }
        }
    }

    /// Replace a cell's source. Code cells lose their stale outputs.
    pub fn set_source(&mut self, index: usize, source: &str) -> Result<(), NotebookError> {
        let cell = self.cell_mut(index)?;
        cell.source = source.to_string();
        if let CellKind::Code {
            outputs,
            execution_count,
        } = &mut cell.kind
        {
            outputs.clear();
            *execution_count = None;
        }
        Ok(())
    }

    /// Store execution outputs on a cell. Non-code cells are left untouched.
    pub fn set_outputs(
        &mut self,
        index: usize,
        new_outputs: Vec<OutputRecord>,
        count: Option<i64>,
    ) -> Result<(), NotebookError> {
        let cell = self.cell_mut(index)?;
        if let CellKind::Code {
            outputs,
            execution_count,
        } = &mut cell.kind
        {
            *outputs = new_outputs;
            if count.is_some() {
                *execution_count = count;
            }
        }
        Ok(())
    }
}

/// First eight hex characters of a v4 UUID.
pub fn new_cell_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceText {
    One(String),
    Many(Vec<String>),
}

fn joined_source<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match SourceText::deserialize(deserializer)? {
        SourceText::One(text) => text,
        SourceText::Many(lines) => lines.concat(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Notebook {
        serde_json::from_value(json!({
            "nbformat": 4,
            "nbformat_minor": 5,
            "metadata": {},
            "cells": [
                {"id": "a", "cell_type": "markdown", "metadata": {}, "source": ["# Title\n", "text"]},
                {"id": "b", "cell_type": "code", "metadata": {}, "source": "x = 1",
                 "outputs": [{"output_type": "stream", "name": "stdout", "text": "1\n"}],
                 "execution_count": 3},
                {"cell_type": "raw", "metadata": {}, "source": "raw"},
            ],
        }))
        .unwrap()
    }

    #[test]
    fn test_parses_cells() {
        let nb = sample();
        assert_eq!(nb.len(), 3);
        assert_eq!(nb.cells[0].source, "# Title\ntext");
        assert_eq!(nb.cells[0].cell_type(), CellType::Markdown);
        assert_eq!(nb.cells[1].outputs().map(|o| o.len()), Some(1));
        assert_eq!(nb.cells[2].id, None);
        assert_eq!(nb.cells[2].cell_type(), CellType::Raw);
    }

    #[test]
    fn test_code_cell_serializes_outputs_and_count() {
        let cell = Cell::new(CellType::Code, "1 + 1");
        let value = serde_json::to_value(&cell).unwrap();
        assert_eq!(value["cell_type"], "code");
        assert_eq!(value["outputs"], json!([]));
        assert_eq!(value["execution_count"], Value::Null);
        assert_eq!(value["id"].as_str().map(str::len), Some(8));
    }

    #[test]
    fn test_markdown_cell_has_no_outputs() {
        let value = serde_json::to_value(Cell::new(CellType::Markdown, "# hi")).unwrap();
        assert_eq!(value["cell_type"], "markdown");
        assert!(value.get("outputs").is_none());
    }

    #[test]
    fn test_insert_positions() {
        let mut nb = sample();
        assert_eq!(nb.insert_cell(Cell::new(CellType::Code, "first"), Some(0)), 0);
        assert_eq!(nb.insert_cell(Cell::new(CellType::Code, "last"), None), 4);
        assert_eq!(nb.insert_cell(Cell::new(CellType::Code, "far"), Some(99)), 5);
        assert_eq!(nb.cells[0].source, "first");
    }

    #[test]
    fn test_set_source_clears_outputs() {
        let mut nb = sample();
        nb.set_source(1, "x = 2").unwrap();
        assert_eq!(nb.cells[1].source, "x = 2");
        assert_eq!(
            nb.cells[1].kind,
            CellKind::Code {
                outputs: Vec::new(),
                execution_count: None
            }
        );
    }

    #[test]
    fn test_out_of_range_edit() {
        let mut nb = sample();
        assert_eq!(
            nb.set_source(3, "nope"),
            Err(NotebookError::CellOutOfRange { index: 3, len: 3 })
        );
        assert!(nb.cell(7).is_err());
    }

    #[test]
    fn test_attachments_survive_edit() {
        let attachments = json!({"plot.png": {"image/png": "iVBORw0KGgo="}});
        let mut nb: Notebook = serde_json::from_value(json!({
            "nbformat": 4,
            "nbformat_minor": 5,
            "metadata": {},
            "cells": [
                {"id": "m", "cell_type": "markdown", "metadata": {}, "source": "![](attachment:plot.png)",
                 "attachments": attachments.clone()},
                {"id": "r", "cell_type": "raw", "metadata": {"format": "text/html"}, "source": "<b/>",
                 "attachments": attachments.clone()},
            ],
        }))
        .unwrap();

        nb.set_source(0, "![plot](attachment:plot.png)").unwrap();
        nb.set_source(1, "<i/>").unwrap();

        let value = serde_json::to_value(&nb).unwrap();
        assert_eq!(value["cells"][0]["attachments"], attachments);
        assert_eq!(value["cells"][1]["attachments"], attachments);
        assert_eq!(value["cells"][1]["cell_type"], "raw");
        assert_eq!(value["cells"][1]["source"], "<i/>");
        assert_eq!(value["cells"][1]["metadata"]["format"], "text/html");

        let fresh = serde_json::to_value(Cell::new(CellType::Raw, "plain")).unwrap();
        assert!(fresh.get("attachments").is_none());
    }

    #[test]
    fn test_new_notebook_metadata() {
        let nb = Notebook::new("py311");
        assert!(nb.is_empty());
        assert_eq!(nb.metadata["kernelspec"]["name"], "py311");
        assert_eq!(nb.nbformat, 4);
    }
}
