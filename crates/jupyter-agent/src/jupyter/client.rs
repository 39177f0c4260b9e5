//! Notebook server HTTP client.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use std::time::Duration;

use super::NotebookServer;
use super::error::{JupyterError, JupyterResult};
use super::types::*;
use crate::notebook::Notebook;

/// Client for the notebook server REST API.
#[derive(Debug, Clone)]
pub struct JupyterClient {
    client: Client,
    /// Base URL without trailing slash (e.g. "http://localhost:8888").
    base_url: String,
    /// Access token. Empty when the server runs without auth.
    token: String,
}

impl JupyterClient {
    /// Create a new client.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> JupyterResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/api/kernels/{id}` plus an optional action segment.
    fn kernel_url(&self, kernel_id: &str, action: Option<&str>) -> String {
        let mut path = format!("/api/kernels/{}", urlencoding::encode(kernel_id));
        if let Some(action) = action {
            path.push('/');
            path.push_str(action);
        }
        self.url(&path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.header("Authorization", format!("token {}", self.token))
        }
    }

    /// Check the server is reachable and the token accepted.
    pub async fn check_connection(&self) -> JupyterResult<ServerStatus> {
        let url = self.url("/api/status");
        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| JupyterError::ConnectionFailed {
                url: url.clone(),
                message: e.to_string(),
            })?;

        self.handle_response(&url, response).await
    }

    /// List running kernels.
    pub async fn list_kernels(&self) -> JupyterResult<Vec<KernelInfo>> {
        let url = self.url("/api/kernels");
        let response = self.authed(self.client.get(&url)).send().await?;
        self.handle_response(&url, response).await
    }

    /// Start a kernel without binding it to a document.
    pub async fn start_kernel(&self, kernel_name: &str) -> JupyterResult<KernelInfo> {
        let url = self.url("/api/kernels");
        let response = self
            .authed(self.client.post(&url))
            .json(&json!({ "name": kernel_name }))
            .send()
            .await?;
        self.handle_response(&url, response).await
    }

    /// Shut a kernel down.
    pub async fn shutdown_kernel(&self, kernel_id: &str) -> JupyterResult<()> {
        let url = self.kernel_url(kernel_id, None);
        let response = self.authed(self.client.delete(&url)).send().await?;
        self.expect_success(&url, response).await
    }

    /// List sessions.
    pub async fn list_sessions(&self) -> JupyterResult<Vec<SessionInfo>> {
        let url = self.url("/api/sessions");
        let response = self.authed(self.client.get(&url)).send().await?;
        self.handle_response(&url, response).await
    }

    /// List a directory through the contents API.
    pub async fn list_contents(&self, path: &str) -> JupyterResult<Vec<ContentsModel>> {
        let url = self.url(&format!("/api/contents/{}", encode_path(path)));
        let response = self
            .authed(self.client.get(&url))
            .query(&[("content", "1")])
            .send()
            .await?;
        let model: ContentsModel = self.handle_response(&url, response).await?;
        directory_listing(model)
    }

    /// Handle response and parse JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        response: reqwest::Response,
    ) -> JupyterResult<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| JupyterError::ParseError(format!("Failed to parse response: {}", e)))
        } else {
            Err(status_error(url, status, response).await)
        }
    }

    /// Accept any success status, ignoring the body.
    async fn expect_success(&self, url: &str, response: reqwest::Response) -> JupyterResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error(url, status, response).await)
        }
    }
}

async fn status_error(url: &str, status: StatusCode, response: reqwest::Response) -> JupyterError {
    let body = response.text().await.unwrap_or_default();
    JupyterError::Status {
        status: status.as_u16(),
        url: url.to_string(),
        body,
    }
}

/// Entries of a directory model, sorted directories first then by name.
fn directory_listing(model: ContentsModel) -> JupyterResult<Vec<ContentsModel>> {
    if model.kind != "directory" {
        return Err(JupyterError::ParseError(format!(
            "{} is a {}, not a directory",
            model.path, model.kind
        )));
    }
    let mut entries: Vec<ContentsModel> = serde_json::from_value(model.content)
        .map_err(|e| JupyterError::ParseError(format!("Invalid directory listing: {}", e)))?;
    entries.sort_by(|a, b| {
        (a.kind != "directory", &a.name).cmp(&(b.kind != "directory", &b.name))
    });
    Ok(entries)
}

/// Percent-encode each segment of a contents path, keeping separators.
fn encode_path(path: &str) -> String {
    path.trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl NotebookServer for JupyterClient {
    async fn get_notebook(&self, path: &str) -> JupyterResult<Notebook> {
        let url = self.url(&format!("/api/contents/{}", encode_path(path)));
        let response = self
            .authed(self.client.get(&url))
            .query(&[("type", "notebook"), ("content", "1")])
            .send()
            .await?;
        let model: ContentsModel = self.handle_response(&url, response).await?;
        serde_json::from_value(model.content)
            .map_err(|e| JupyterError::ParseError(format!("Invalid notebook {}: {}", path, e)))
    }

    async fn save_notebook(&self, path: &str, notebook: &Notebook) -> JupyterResult<()> {
        let url = self.url(&format!("/api/contents/{}", encode_path(path)));
        debug!("Saving {} ({} cells)", path, notebook.len());
        let response = self
            .authed(self.client.put(&url))
            .json(&SaveNotebookRequest {
                kind: "notebook",
                content: notebook,
            })
            .send()
            .await?;
        self.expect_success(&url, response).await
    }

    async fn find_session(&self, path: &str) -> JupyterResult<Option<SessionInfo>> {
        let sessions = self.list_sessions().await?;
        Ok(sessions.into_iter().find(|s| s.matches_path(path)))
    }

    async fn create_session(&self, path: &str, kernel_name: &str) -> JupyterResult<SessionInfo> {
        let url = self.url("/api/sessions");
        let response = self
            .authed(self.client.post(&url))
            .json(&CreateSessionRequest::notebook(path, kernel_name))
            .send()
            .await?;
        self.handle_response(&url, response).await
    }

    async fn restart_kernel(&self, kernel_id: &str) -> JupyterResult<()> {
        let url = self.kernel_url(kernel_id, Some("restart"));
        let response = self.authed(self.client.post(&url)).send().await?;
        self.expect_success(&url, response).await
    }

    async fn interrupt_kernel(&self, kernel_id: &str) -> JupyterResult<()> {
        let url = self.kernel_url(kernel_id, Some("interrupt"));
        let response = self.authed(self.client.post(&url)).send().await?;
        self.expect_success(&url, response).await
    }
}
