//! Crate-level error type.

use thiserror::Error;

use crate::channel::ChannelError;
use crate::jupyter::JupyterError;
use crate::notebook::NotebookError;

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by session operations.
///
/// Kernel-side failures in user code and execution timeouts are not errors:
/// they are reported through [`crate::exec::ExecutionOutcome`].
#[derive(Debug, Error)]
pub enum Error {
    /// The kernel channel could not be established or was lost.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A notebook server REST call failed.
    #[error(transparent)]
    Jupyter(#[from] JupyterError),

    /// The notebook document rejected an edit (e.g. cell index out of range).
    #[error(transparent)]
    Notebook(#[from] NotebookError),

    /// No notebook is open in this session.
    #[error("No notebook open. Open or create a notebook first.")]
    NoNotebook,

    /// No kernel is bound to this session.
    #[error("No kernel available. Open or create a notebook first.")]
    NoKernel,

    /// The server returned a session without a kernel.
    #[error("session for {0} has no kernel")]
    MissingKernel(String),
}
