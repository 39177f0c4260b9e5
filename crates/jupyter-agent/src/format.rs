//! Plain-text rendering of execution outcomes, notebooks and diffs.
//!
//! Everything here is a pure function of its inputs.

use jupyter_agent_protocol::{OutputRecord, bundle_text, strip_ansi};

use crate::exec::{ExecutionOutcome, ExecutionStatus};
use crate::notebook::{CellType, Notebook};
use crate::tracker::DiffResult;

/// Characters of cell source shown in diff previews.
const PREVIEW_CHARS: usize = 200;

/// How much of a notebook [`format_notebook`] shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Every cell.
    Full,
    /// The last `n` cells.
    LastN(usize),
    /// Cell counts only.
    Summary,
}

/// Render output records as readable text, color sequences removed.
pub fn format_outputs(outputs: &[OutputRecord]) -> String {
    let parts: Vec<String> = outputs
        .iter()
        .map(|output| match output {
            OutputRecord::Stream { text, .. } => text.clone(),
            OutputRecord::DisplayData { data, .. } | OutputRecord::ExecuteResult { data, .. } => {
                if let Some(text) = bundle_text(data, "text/plain") {
                    text
                } else if data.contains_key("text/html") {
                    "[HTML output]".to_string()
                } else if data.contains_key("image/png") {
                    "[Image output (PNG)]".to_string()
                } else {
                    let kinds: Vec<&str> = data.keys().map(String::as_str).collect();
                    format!("[{}: {:?}]", output.kind_name(), kinds)
                }
            }
            OutputRecord::Error {
                ename,
                evalue,
                traceback,
            } => format!("{}: {}\n{}", ename, evalue, traceback.join("\n")),
        })
        .collect();
    strip_ansi(&parts.join("\n"))
}

/// Render an execution outcome for the agent. `cell_index` is the cell the
/// code was stored in, if any.
pub fn format_execution_result(outcome: &ExecutionOutcome, cell_index: Option<usize>) -> String {
    let cell = cell_label(cell_index);

    if outcome.status == ExecutionStatus::Ok {
        let mut message = format!("Executed successfully ({cell}).");
        let output_text = format_outputs(&outcome.outputs);
        let output_text = output_text.trim();
        if !output_text.is_empty() {
            message.push_str("\n\nOutput:\n");
            message.push_str(output_text);
        }
        return message;
    }

    let (ename, evalue, traceback) = match &outcome.error {
        Some(detail) => (
            detail.ename.as_str(),
            detail.evalue.as_str(),
            detail.traceback.as_str(),
        ),
        None => ("Error", "", ""),
    };

    let mut message = format!("Execution error in {cell}.\n\n{ename}: {evalue}\n");
    if !traceback.is_empty() {
        message.push_str("\nTraceback:\n");
        message.push_str(traceback);
    }
    let index = cell_index.map_or_else(|| "...".to_string(), |i| i.to_string());
    message.push_str(&format!(
        "\n\nUse edit_and_run_cell(cell_index={index}, new_source=...) to fix this cell."
    ));
    message
}

fn cell_label(cell_index: Option<usize>) -> String {
    match cell_index {
        Some(index) => format!("cell {index}"),
        None => "unsaved cell".to_string(),
    }
}

/// Render a notebook as text.
pub fn format_notebook(
    path: &str,
    notebook: &Notebook,
    mode: ReadMode,
    kernel_id: Option<&str>,
) -> String {
    let cells = &notebook.cells;

    if mode == ReadMode::Summary {
        let code = cells
            .iter()
            .filter(|c| c.cell_type() == CellType::Code)
            .count();
        let markdown = cells
            .iter()
            .filter(|c| c.cell_type() == CellType::Markdown)
            .count();
        let kernel = kernel_id.map_or_else(|| "none".to_string(), short_id);
        return format!(
            "Notebook: {path}\nTotal cells: {} ({code} code, {markdown} markdown)\nKernel: {kernel}",
            cells.len()
        );
    }

    let start = match mode {
        ReadMode::LastN(n) => cells.len().saturating_sub(n),
        _ => 0,
    };

    let mut parts = vec![format!("Notebook: {path} ({} cells)\n", cells.len())];
    for (index, cell) in cells.iter().enumerate().skip(start) {
        parts.push(format!("--- Cell {index} [{}] ---", cell.cell_type()));
        parts.push(cell.source.clone());
        if let Some(outputs) = cell.outputs() {
            let text = format_outputs(outputs);
            let text = text.trim();
            if !text.is_empty() {
                parts.push(format!("[Output]: {text}"));
            }
        }
        parts.push(String::new());
    }
    parts.join("\n")
}

/// Render a diff, previewing added and modified cells of `current`.
pub fn format_diff(result: &DiffResult, current: &Notebook) -> String {
    if !result.changed {
        return result.summary.clone();
    }

    let mut parts = vec![result.summary.clone()];
    for (label, positions) in [("Added", &result.added), ("Modified", &result.modified)] {
        if positions.is_empty() {
            continue;
        }
        parts.push(format!("\n{label} cells:"));
        for &index in positions {
            if let Some(cell) = current.cells.get(index) {
                let preview: String = cell.source.chars().take(PREVIEW_CHARS).collect();
                parts.push(format!("  [{index}] {}: {preview}", cell.cell_type()));
            }
        }
    }
    if !result.unidentified.is_empty() {
        parts.push(format!(
            "\nMatched by position (no unique cell id): {:?}",
            result.unidentified
        ));
    }
    parts.join("\n")
}

/// Abbreviated kernel id for display.
pub fn short_id(id: &str) -> String {
    let prefix: String = id.chars().take(8).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ErrorDetail;
    use crate::notebook::Cell;
    use serde_json::json;

    fn outcome(status: ExecutionStatus, outputs: Vec<OutputRecord>) -> ExecutionOutcome {
        ExecutionOutcome {
            status,
            outputs,
            error: None,
            execution_count: None,
        }
    }

    fn bundle(value: serde_json::Value) -> jupyter_agent_protocol::MimeBundle {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_ok_without_outputs_has_no_output_section() {
        let text = format_execution_result(&outcome(ExecutionStatus::Ok, vec![]), Some(2));
        assert_eq!(text, "Executed successfully (cell 2).");
        assert!(!text.contains("Output:"));
    }

    #[test]
    fn test_ok_lists_outputs_in_order() {
        let outputs = vec![
            OutputRecord::Stream {
                name: "stdout".to_string(),
                text: "first\n".to_string(),
            },
            OutputRecord::ExecuteResult {
                data: bundle(json!({"text/plain": "42"})),
                metadata: Default::default(),
                execution_count: Some(1),
            },
        ];
        let text = format_execution_result(&outcome(ExecutionStatus::Ok, outputs), Some(0));
        assert_eq!(
            text,
            "Executed successfully (cell 0).\n\nOutput:\nfirst\n\n42"
        );
    }

    #[test]
    fn test_unsupported_payloads_render_placeholders() {
        let outputs = vec![
            OutputRecord::DisplayData {
                data: bundle(json!({"text/html": "<b>x</b>"})),
                metadata: Default::default(),
            },
            OutputRecord::DisplayData {
                data: bundle(json!({"image/png": "iVBOR"})),
                metadata: Default::default(),
            },
            OutputRecord::DisplayData {
                data: bundle(json!({"application/json": {}})),
                metadata: Default::default(),
            },
        ];
        assert_eq!(
            format_outputs(&outputs),
            "[HTML output]\n[Image output (PNG)]\n[display_data: [\"application/json\"]]"
        );
    }

    #[test]
    fn test_error_names_remediation() {
        let mut failed = outcome(ExecutionStatus::Error, vec![]);
        failed.error = Some(ErrorDetail {
            ename: "NameError".to_string(),
            evalue: "name 'x' is not defined".to_string(),
            traceback: "Cell In[1], line 1".to_string(),
        });
        let text = format_execution_result(&failed, Some(3));
        assert!(text.starts_with("Execution error in cell 3.\n\nNameError: name 'x' is not defined\n"));
        assert!(text.contains("\nTraceback:\nCell In[1], line 1"));
        assert!(text.ends_with("Use edit_and_run_cell(cell_index=3, new_source=...) to fix this cell."));
    }

    #[test]
    fn test_timeout_renders_detail() {
        let mut late = outcome(ExecutionStatus::Timeout, vec![]);
        late.error = Some(ErrorDetail {
            ename: "TimeoutError".to_string(),
            evalue: "Execution timed out after 5s".to_string(),
            traceback: String::new(),
        });
        let text = format_execution_result(&late, None);
        assert!(text.contains("TimeoutError: Execution timed out after 5s"));
        assert!(!text.contains("Traceback:"));
        assert!(text.contains("unsaved cell"));
    }

    #[test]
    fn test_error_output_is_stripped() {
        let outputs = vec![OutputRecord::Error {
            ename: "E".to_string(),
            evalue: "v".to_string(),
            traceback: vec!["\u{1b}[31mred\u{1b}[0m".to_string()],
        }];
        assert_eq!(format_outputs(&outputs), "E: v\nred");
    }

    fn small_notebook() -> Notebook {
        let mut nb = Notebook::new("python3");
        nb.insert_cell(Cell::new(CellType::Markdown, "# Title"), None);
        nb.insert_cell(Cell::new(CellType::Code, "print(1)"), None);
        nb.set_outputs(
            1,
            vec![OutputRecord::Stream {
                name: "stdout".to_string(),
                text: "1\n".to_string(),
            }],
            Some(1),
        )
        .unwrap();
        nb
    }

    #[test]
    fn test_notebook_summary() {
        let text = format_notebook(
            "a.ipynb",
            &small_notebook(),
            ReadMode::Summary,
            Some("0123456789abcdef"),
        );
        assert_eq!(
            text,
            "Notebook: a.ipynb\nTotal cells: 2 (1 code, 1 markdown)\nKernel: 01234567..."
        );
    }

    #[test]
    fn test_notebook_last_n() {
        let text = format_notebook("a.ipynb", &small_notebook(), ReadMode::LastN(1), None);
        assert!(text.starts_with("Notebook: a.ipynb (2 cells)\n"));
        assert!(!text.contains("--- Cell 0"));
        assert!(text.contains("--- Cell 1 [code] ---\nprint(1)\n[Output]: 1"));
    }

    #[test]
    fn test_diff_previews_added_cells() {
        let nb = small_notebook();
        let result = DiffResult {
            changed: true,
            summary: "1 cell(s) added (indices: [1])".to_string(),
            added: vec![1],
            removed: vec![],
            modified: vec![],
            unidentified: vec![],
            current_hash: "c".to_string(),
            baseline_hash: Some("b".to_string()),
        };
        assert_eq!(
            format_diff(&result, &nb),
            "1 cell(s) added (indices: [1])\n\nAdded cells:\n  [1] code: print(1)"
        );
    }
}
