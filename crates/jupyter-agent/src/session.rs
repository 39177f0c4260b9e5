//! Notebook session context.
//!
//! A [`NotebookSession`] binds one notebook document to one kernel and owns
//! everything an agent needs to work with it: the REST collaborator, the
//! executor with its kernel channel, and the change tracker. There is no
//! process-wide state; callers hold the session explicitly.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::KernelConnector;
use crate::error::{Error, Result};
use crate::exec::{DEFAULT_USERNAME, ExecutionOutcome, Executor};
use crate::format::{ReadMode, format_notebook, format_outputs};
use crate::jupyter::NotebookServer;
use crate::notebook::{Cell, CellType, Notebook};
use crate::tracker::{DiffResult, Tracker};

/// Kernel started for new sessions when none is configured.
pub const DEFAULT_KERNEL_NAME: &str = "python3";

/// Execution deadline used when a call does not name one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Session defaults.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Kernel spec name used when a session has to be created.
    pub kernel_name: String,
    /// Default execution deadline.
    pub timeout: Duration,
    /// Originator name on submitted requests.
    pub username: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            kernel_name: DEFAULT_KERNEL_NAME.to_string(),
            timeout: DEFAULT_TIMEOUT,
            username: DEFAULT_USERNAME.to_string(),
        }
    }
}

/// What happened to the executed code in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum Persistence {
    /// Source and outputs were written to the document.
    Saved,
    /// The caller asked not to record the code, or no document is open.
    Skipped,
    /// Writing to the document failed. The execution itself still happened.
    Failed(String),
}

/// Result of running code through a session.
#[derive(Debug, Clone, Serialize)]
pub struct CellExecution {
    pub outcome: ExecutionOutcome,
    /// Cell holding the executed code, if it made it into the document.
    pub cell_index: Option<usize>,
    pub persistence: Persistence,
}

/// One notebook document bound to one kernel.
pub struct NotebookSession<S, C> {
    server: S,
    executor: Executor<C>,
    tracker: Tracker,
    settings: SessionSettings,
    path: Option<String>,
    kernel_id: Option<String>,
}

impl<S: NotebookServer, C: KernelConnector> NotebookSession<S, C> {
    pub fn new(server: S, connector: C, settings: SessionSettings) -> Self {
        let executor = Executor::new(connector).with_username(settings.username.clone());
        Self {
            server,
            executor,
            tracker: Tracker::new(),
            settings,
            path: None,
            kernel_id: None,
        }
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Path of the open notebook.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Kernel bound to the open notebook.
    pub fn kernel_id(&self) -> Option<&str> {
        self.kernel_id.as_deref()
    }

    // ========================================================================
    // Document lifecycle
    // ========================================================================

    /// Open an existing notebook, reusing the kernel already bound to it or
    /// starting a new one. Returns the kernel id.
    pub async fn open(&mut self, path: &str) -> Result<String> {
        // Fail early on a missing document rather than starting a kernel for it.
        self.server.get_notebook(path).await?;

        let session = match self.server.find_session(path).await? {
            Some(existing) => {
                debug!(path, session_id = %existing.id, "reusing server session");
                existing
            }
            None => {
                info!(path, kernel = %self.settings.kernel_name, "starting kernel session");
                self.server
                    .create_session(path, &self.settings.kernel_name)
                    .await?
            }
        };

        let kernel_id = session
            .kernel_id()
            .ok_or_else(|| Error::MissingKernel(path.to_string()))?
            .to_string();

        self.bind(path, &kernel_id).await;
        Ok(kernel_id)
    }

    /// Create an empty notebook, optionally headed by a `# title` markdown
    /// cell, and start a kernel for it. Returns the kernel id.
    pub async fn create_notebook(&mut self, path: &str, title: Option<&str>) -> Result<String> {
        let mut notebook = self
            .server
            .create_notebook(path, &self.settings.kernel_name)
            .await?;

        if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
            notebook.insert_cell(Cell::new(CellType::Markdown, format!("# {title}")), Some(0));
            self.server.save_notebook(path, &notebook).await?;
        }

        let session = self
            .server
            .create_session(path, &self.settings.kernel_name)
            .await?;
        let kernel_id = session
            .kernel_id()
            .ok_or_else(|| Error::MissingKernel(path.to_string()))?
            .to_string();

        info!(path, kernel_id = %kernel_id, "created notebook");
        self.bind(path, &kernel_id).await;
        Ok(kernel_id)
    }

    async fn bind(&mut self, path: &str, kernel_id: &str) {
        if self.kernel_id.as_deref() != Some(kernel_id) {
            self.executor.shutdown().await;
        }
        if self.path.as_deref() != Some(path) {
            self.tracker = Tracker::new();
        }
        self.path = Some(path.to_string());
        self.kernel_id = Some(kernel_id.to_string());
    }

    fn require_path(&self) -> Result<String> {
        self.path.clone().ok_or(Error::NoNotebook)
    }

    fn require_kernel(&self) -> Result<String> {
        self.kernel_id.clone().ok_or(Error::NoKernel)
    }

    /// Fetch the current document from the server.
    pub async fn notebook(&self) -> Result<Notebook> {
        let path = self.require_path()?;
        Ok(self.server.get_notebook(&path).await?)
    }

    // ========================================================================
    // Cell editing
    // ========================================================================

    /// Render the open notebook.
    pub async fn read(&self, mode: ReadMode) -> Result<String> {
        let path = self.require_path()?;
        let notebook = self.server.get_notebook(&path).await?;
        Ok(format_notebook(
            &path,
            &notebook,
            mode,
            self.kernel_id.as_deref(),
        ))
    }

    /// Insert a cell without running it. Returns the index it landed at.
    pub async fn add_cell(
        &mut self,
        cell_type: CellType,
        source: &str,
        position: Option<usize>,
    ) -> Result<usize> {
        let path = self.require_path()?;
        let mut notebook = self.server.get_notebook(&path).await?;
        let index = notebook.insert_cell(Cell::new(cell_type, source), position);
        self.server.save_notebook(&path, &notebook).await?;
        debug!(path = %path, index, %cell_type, "added cell");
        Ok(index)
    }

    /// Replace a cell's source without running it.
    pub async fn edit_cell(&mut self, index: usize, source: &str) -> Result<()> {
        let path = self.require_path()?;
        let mut notebook = self.server.get_notebook(&path).await?;
        notebook.set_source(index, source)?;
        self.server.save_notebook(&path, &notebook).await?;
        debug!(path = %path, index, "edited cell");
        Ok(())
    }

    /// Stored outputs of one cell, rendered as text.
    pub async fn cell_output(&self, index: usize) -> Result<String> {
        let notebook = self.notebook().await?;
        let cell = notebook.cell(index)?;
        Ok(match cell.outputs() {
            None => format!("Cell {index} is a {} cell (no outputs).", cell.cell_type()),
            Some([]) => format!("Cell {index} has no outputs."),
            Some(outputs) => format!("Cell {index} output:\n{}", format_outputs(outputs)),
        })
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run `code` on the bound kernel.
    ///
    /// With `add_to_notebook`, the code and its outputs are then written to
    /// cell `cell_index`, or to a new cell appended at the end. That write is
    /// best effort: its failure is reported in [`CellExecution::persistence`]
    /// and never turns a finished execution into an error.
    pub async fn execute_cell(
        &mut self,
        code: &str,
        timeout: Option<Duration>,
        add_to_notebook: bool,
        cell_index: Option<usize>,
    ) -> Result<CellExecution> {
        let kernel_id = self.require_kernel()?;
        let outcome = self.run(&kernel_id, code, timeout).await?;

        let Some(path) = self.path.clone().filter(|_| add_to_notebook) else {
            return Ok(CellExecution {
                outcome,
                cell_index: None,
                persistence: Persistence::Skipped,
            });
        };

        let stored = self
            .store_code_and_outputs(&path, code, cell_index, &outcome)
            .await;
        Ok(finish(outcome, &path, stored, None))
    }

    /// Replace cell `index`'s source, run it, and write the outputs back.
    ///
    /// An out-of-range index fails before anything is executed.
    pub async fn edit_and_run_cell(
        &mut self,
        index: usize,
        source: &str,
        timeout: Option<Duration>,
    ) -> Result<CellExecution> {
        let path = self.require_path()?;
        let kernel_id = self.require_kernel()?;

        let mut notebook = self.server.get_notebook(&path).await?;
        notebook.set_source(index, source)?;
        self.server.save_notebook(&path, &notebook).await?;

        let outcome = self.run(&kernel_id, source, timeout).await?;

        let stored = self.store_outputs(&path, index, &outcome).await.map(|()| index);
        // The edited source is already saved, so the cell index holds either way.
        Ok(finish(outcome, &path, stored, Some(index)))
    }

    async fn run(
        &mut self,
        kernel_id: &str,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionOutcome> {
        let deadline = timeout.unwrap_or(self.settings.timeout);
        let outcome = self.executor.execute(kernel_id, code, deadline).await?;
        info!(
            kernel_id,
            status = ?outcome.status,
            outputs = outcome.outputs.len(),
            "execution finished"
        );
        Ok(outcome)
    }

    async fn store_code_and_outputs(
        &self,
        path: &str,
        code: &str,
        cell_index: Option<usize>,
        outcome: &ExecutionOutcome,
    ) -> Result<usize> {
        let mut notebook = self.server.get_notebook(path).await?;
        let index = match cell_index {
            Some(index) => {
                notebook.set_source(index, code)?;
                index
            }
            None => notebook.insert_cell(Cell::new(CellType::Code, code), None),
        };
        write_outputs(&mut notebook, index, outcome)?;
        self.server.save_notebook(path, &notebook).await?;
        Ok(index)
    }

    async fn store_outputs(
        &self,
        path: &str,
        index: usize,
        outcome: &ExecutionOutcome,
    ) -> Result<()> {
        let mut notebook = self.server.get_notebook(path).await?;
        write_outputs(&mut notebook, index, outcome)?;
        self.server.save_notebook(path, &notebook).await?;
        Ok(())
    }

    // ========================================================================
    // Kernel control
    // ========================================================================

    /// Restart the bound kernel. Kernel state is lost; cells are kept.
    pub async fn restart_kernel(&mut self) -> Result<()> {
        let kernel_id = self.require_kernel()?;
        self.server.restart_kernel(&kernel_id).await?;
        // The restarted kernel drops its channels; reconnect on next use.
        self.executor.shutdown().await;
        info!(kernel_id = %kernel_id, "kernel restarted");
        Ok(())
    }

    /// Interrupt whatever the bound kernel is running.
    pub async fn interrupt_kernel(&mut self) -> Result<()> {
        let kernel_id = self.require_kernel()?;
        self.server.interrupt_kernel(&kernel_id).await?;
        info!(kernel_id = %kernel_id, "kernel interrupted");
        Ok(())
    }

    /// Close the kernel channel. The server session keeps running.
    pub async fn close(&mut self) {
        self.executor.shutdown().await;
    }

    // ========================================================================
    // Change tracking
    // ========================================================================

    /// Record the current document as the baseline. Returns its hash.
    pub async fn snapshot(&mut self) -> Result<String> {
        let notebook = self.notebook().await?;
        let hash = self.tracker.snapshot(&notebook);
        debug!(hash = %hash, cells = notebook.len(), "snapshot taken");
        Ok(hash)
    }

    /// Compare the current document against the baseline. The fetched
    /// document is returned alongside for rendering.
    pub async fn diff(&self) -> Result<(DiffResult, Notebook)> {
        let notebook = self.notebook().await?;
        let result = self.tracker.diff(&notebook);
        debug!(changed = result.changed, summary = %result.summary, "diffed against snapshot");
        Ok((result, notebook))
    }

    /// Make an already fetched document the baseline. Returns its hash.
    ///
    /// Pass the document `diff` returned so that edits landing after that
    /// fetch are reported by the next `diff`.
    pub fn rebaseline(&mut self, notebook: &Notebook) -> String {
        let hash = self.tracker.snapshot(notebook);
        debug!(hash = %hash, cells = notebook.len(), "re-baselined");
        hash
    }

    /// Diff against the baseline and, when something changed, re-baseline
    /// on the same fetched document.
    pub async fn poll_changes(&mut self) -> Result<Option<(DiffResult, Notebook)>> {
        let (result, notebook) = self.diff().await?;
        if !result.changed {
            return Ok(None);
        }
        self.rebaseline(&notebook);
        Ok(Some((result, notebook)))
    }
}

fn write_outputs(notebook: &mut Notebook, index: usize, outcome: &ExecutionOutcome) -> Result<()> {
    notebook.set_outputs(index, outcome.outputs.clone(), outcome.execution_count)?;
    Ok(())
}

fn finish(
    outcome: ExecutionOutcome,
    path: &str,
    stored: Result<usize>,
    known_index: Option<usize>,
) -> CellExecution {
    match stored {
        Ok(index) => CellExecution {
            outcome,
            cell_index: Some(index),
            persistence: Persistence::Saved,
        },
        Err(e) => {
            warn!(path, error = %e, "execution outputs were not saved");
            CellExecution {
                outcome,
                cell_index: known_index,
                persistence: Persistence::Failed(e.to_string()),
            }
        }
    }
}
