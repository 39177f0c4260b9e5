//! Drive a running Jupyter kernel on behalf of an agent.
//!
//! The crate submits code over the kernel's websocket channel, correlates the
//! asynchronous replies into one [`ExecutionOutcome`] per submission, keeps the
//! notebook document in step with what was run, and detects edits made to the
//! document by other collaborators between agent turns.

pub mod channel;
pub mod config;
pub mod error;
pub mod exec;
pub mod format;
pub mod jupyter;
pub mod notebook;
pub mod session;
pub mod tracker;

pub use channel::{ChannelError, ChannelManager, KernelChannel, KernelConnector, WebSocketConnector};
pub use error::{Error, Result};
pub use exec::{ErrorDetail, ExecutionOutcome, ExecutionStatus, Executor};
pub use format::ReadMode;
pub use jupyter::{JupyterClient, JupyterError, NotebookServer};
pub use notebook::{Cell, CellKind, CellType, Notebook, NotebookError};
pub use session::{CellExecution, NotebookSession, Persistence, SessionSettings};
pub use tracker::{DiffResult, Tracker};
