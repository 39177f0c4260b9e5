//! Notebook server REST client.
//!
//! Covers the document, session and kernel lifecycle endpoints. Code
//! execution goes over the kernel channel instead, see [`crate::channel`].

mod client;
mod error;
mod types;

use async_trait::async_trait;

pub use client::JupyterClient;
pub use error::{JupyterError, JupyterResult};
pub use types::*;

use crate::notebook::Notebook;

/// The server operations a notebook session depends on.
#[async_trait]
pub trait NotebookServer: Send + Sync {
    /// Fetch a notebook document.
    async fn get_notebook(&self, path: &str) -> JupyterResult<Notebook>;

    /// Create or overwrite a notebook document.
    async fn save_notebook(&self, path: &str, notebook: &Notebook) -> JupyterResult<()>;

    /// Write an empty notebook for `kernel_name` at `path`.
    async fn create_notebook(&self, path: &str, kernel_name: &str) -> JupyterResult<Notebook> {
        let notebook = Notebook::new(kernel_name);
        self.save_notebook(path, &notebook).await?;
        Ok(notebook)
    }

    /// The session bound to `path`, if one is running.
    async fn find_session(&self, path: &str) -> JupyterResult<Option<SessionInfo>>;

    /// Start a kernel bound to `path`.
    async fn create_session(&self, path: &str, kernel_name: &str) -> JupyterResult<SessionInfo>;

    async fn restart_kernel(&self, kernel_id: &str) -> JupyterResult<()>;

    async fn interrupt_kernel(&self, kernel_id: &str) -> JupyterResult<()>;
}
