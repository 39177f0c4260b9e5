//! Notebook server REST types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::notebook::Notebook;

/// `GET /api/status` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerStatus {
    pub started: Option<String>,
    pub last_activity: Option<String>,
    pub connections: u64,
    pub kernels: u64,
}

/// A running kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
}

/// Notebook reference carried by older session models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookRef {
    pub path: String,
    #[serde(default)]
    pub name: String,
}

/// A session binding a document path to a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook: Option<NotebookRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelInfo>,
}

impl SessionInfo {
    /// Whether this session is bound to `path`.
    pub fn matches_path(&self, path: &str) -> bool {
        self.path.as_deref() == Some(path)
            || self.notebook.as_ref().is_some_and(|nb| nb.path == path)
    }

    pub fn kernel_id(&self) -> Option<&str> {
        self.kernel.as_ref().map(|k| k.id.as_str())
    }
}

/// Kernel selection in a session request.
#[derive(Debug, Clone, Serialize)]
pub struct KernelSpecRef {
    pub name: String,
}

/// `POST /api/sessions` body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub kernel: KernelSpecRef,
}

impl CreateSessionRequest {
    pub fn notebook(path: &str, kernel_name: &str) -> Self {
        Self {
            path: path.to_string(),
            kind: "notebook".to_string(),
            kernel: KernelSpecRef {
                name: kernel_name.to_string(),
            },
        }
    }
}

/// `PUT /api/contents/<path>` body for notebooks.
#[derive(Debug, Clone, Serialize)]
pub struct SaveNotebookRequest<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content: &'a Notebook,
}

/// A contents API model (file, directory or notebook).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentsModel {
    #[serde(default)]
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Notebook document, directory listing, or file body.
    #[serde(default)]
    pub content: Value,
}
