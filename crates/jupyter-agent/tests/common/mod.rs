//! Test utilities: a scripted kernel transport and an in-memory notebook server.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jupyter_agent::channel::{ChannelResult, KernelChannel, KernelConnector};
use jupyter_agent::jupyter::{
    JupyterError, JupyterResult, KernelInfo, NotebookServer, SessionInfo,
};
use jupyter_agent::notebook::Notebook;
use jupyter_agent_protocol::{KernelMessage, ShellRequest};
use serde_json::{Value, json};

// ============================================================================
// Scripted kernel
// ============================================================================

/// One thing the fake kernel does in response to a submission.
#[derive(Debug, Clone)]
pub enum Step {
    /// A message correlated with the submitted request.
    Reply(&'static str, Value),
    /// A message correlated with some other request.
    Foreign(&'static str, &'static str, Value),
    /// The channel ends.
    Hangup,
}

pub fn stream(text: &str) -> Step {
    Step::Reply("stream", json!({"name": "stdout", "text": text}))
}

pub fn reply_ok(count: i64) -> Step {
    Step::Reply(
        "execute_reply",
        json!({"status": "ok", "execution_count": count}),
    )
}

pub fn idle() -> Step {
    Step::Reply("status", json!({"execution_state": "idle"}))
}

/// Build an inbound message whose parent is `parent`.
pub fn message(parent: &str, msg_type: &str, content: Value) -> KernelMessage {
    serde_json::from_value(json!({
        "msg_type": msg_type,
        "header": {"msg_id": format!("{parent}:{msg_type}"), "msg_type": msg_type},
        "parent_header": {"msg_id": parent},
        "content": content,
        "channel": "iopub",
    }))
    .expect("valid kernel message")
}

#[derive(Default)]
struct KernelState {
    scripts: VecDeque<Vec<Step>>,
    connects: Vec<String>,
    sent: Vec<ShellRequest>,
}

/// Connector whose channels answer each submission with the next queued
/// script. A submission without a script gets no reply at all.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<KernelState>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the kernel's behavior for the next submission.
    pub fn script(&self, steps: Vec<Step>) {
        self.state.lock().unwrap().scripts.push_back(steps);
    }

    /// Kernel ids connected to, in order.
    pub fn connects(&self) -> Vec<String> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn sent(&self) -> Vec<ShellRequest> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_codes(&self) -> Vec<String> {
        self.sent().into_iter().map(|r| r.content.code).collect()
    }
}

#[async_trait]
impl KernelConnector for ScriptedConnector {
    async fn connect(&self, kernel_id: &str) -> ChannelResult<Box<dyn KernelChannel>> {
        self.state
            .lock()
            .unwrap()
            .connects
            .push(kernel_id.to_string());
        Ok(Box::new(ScriptedChannel {
            state: Arc::clone(&self.state),
            inbox: VecDeque::new(),
            open: true,
        }))
    }
}

struct ScriptedChannel {
    state: Arc<Mutex<KernelState>>,
    /// `None` marks the end of the channel.
    inbox: VecDeque<Option<KernelMessage>>,
    open: bool,
}

#[async_trait]
impl KernelChannel for ScriptedChannel {
    async fn send(&mut self, request: &ShellRequest) -> ChannelResult<()> {
        let steps = {
            let mut state = self.state.lock().unwrap();
            state.sent.push(request.clone());
            state.scripts.pop_front().unwrap_or_default()
        };
        for step in steps {
            let next = match step {
                Step::Reply(msg_type, content) => {
                    Some(message(request.msg_id(), msg_type, content))
                }
                Step::Foreign(parent, msg_type, content) => {
                    Some(message(parent, msg_type, content))
                }
                Step::Hangup => None,
            };
            self.inbox.push_back(next);
        }
        Ok(())
    }

    async fn recv(&mut self) -> ChannelResult<Option<KernelMessage>> {
        match self.inbox.pop_front() {
            Some(Some(message)) => Ok(Some(message)),
            Some(None) => {
                self.open = false;
                Ok(None)
            }
            // A silent kernel: wait until the caller gives up.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> ChannelResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

// ============================================================================
// In-memory notebook server
// ============================================================================

#[derive(Default)]
struct ServerState {
    notebooks: HashMap<String, Notebook>,
    sessions: Vec<SessionInfo>,
    fail_saves: bool,
    saves: usize,
    restarts: Vec<String>,
    interrupts: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, notebook: Notebook) {
        self.state
            .lock()
            .unwrap()
            .notebooks
            .insert(path.to_string(), notebook);
    }

    pub fn notebook(&self, path: &str) -> Notebook {
        self.state.lock().unwrap().notebooks[path].clone()
    }

    /// Edit a stored document the way another collaborator would.
    pub fn edit(&self, path: &str, edit: impl FnOnce(&mut Notebook)) {
        let mut state = self.state.lock().unwrap();
        if let Some(notebook) = state.notebooks.get_mut(path) {
            edit(notebook);
        }
    }

    /// Register a running session bound to `path`.
    pub fn running_session(&self, path: &str, kernel_id: &str) {
        self.state.lock().unwrap().sessions.push(SessionInfo {
            id: format!("session-{kernel_id}"),
            path: Some(path.to_string()),
            notebook: None,
            kernel: Some(kernel(kernel_id)),
        });
    }

    pub fn fail_saves(&self, fail: bool) {
        self.state.lock().unwrap().fail_saves = fail;
    }

    pub fn saves(&self) -> usize {
        self.state.lock().unwrap().saves
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn restarts(&self) -> Vec<String> {
        self.state.lock().unwrap().restarts.clone()
    }

    pub fn interrupts(&self) -> Vec<String> {
        self.state.lock().unwrap().interrupts.clone()
    }
}

fn kernel(id: &str) -> KernelInfo {
    KernelInfo {
        id: id.to_string(),
        name: "python3".to_string(),
        execution_state: Some("idle".to_string()),
        last_activity: None,
    }
}

fn not_found(path: &str) -> JupyterError {
    JupyterError::Status {
        status: 404,
        url: format!("memory:///api/contents/{path}"),
        body: "No such file or directory".to_string(),
    }
}

#[async_trait]
impl NotebookServer for FakeServer {
    async fn get_notebook(&self, path: &str) -> JupyterResult<Notebook> {
        self.state
            .lock()
            .unwrap()
            .notebooks
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    async fn save_notebook(&self, path: &str, notebook: &Notebook) -> JupyterResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_saves {
            return Err(JupyterError::Status {
                status: 500,
                url: format!("memory:///api/contents/{path}"),
                body: "disk full".to_string(),
            });
        }
        state.saves += 1;
        state
            .notebooks
            .insert(path.to_string(), notebook.clone());
        Ok(())
    }

    async fn find_session(&self, path: &str) -> JupyterResult<Option<SessionInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state.sessions.iter().find(|s| s.matches_path(path)).cloned())
    }

    async fn create_session(&self, path: &str, kernel_name: &str) -> JupyterResult<SessionInfo> {
        let mut state = self.state.lock().unwrap();
        let kernel_id = format!("kernel-{}", state.sessions.len() + 1);
        let mut info = kernel(&kernel_id);
        info.name = kernel_name.to_string();
        let session = SessionInfo {
            id: format!("session-{kernel_id}"),
            path: Some(path.to_string()),
            notebook: None,
            kernel: Some(info),
        };
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn restart_kernel(&self, kernel_id: &str) -> JupyterResult<()> {
        self.state
            .lock()
            .unwrap()
            .restarts
            .push(kernel_id.to_string());
        Ok(())
    }

    async fn interrupt_kernel(&self, kernel_id: &str) -> JupyterResult<()> {
        self.state
            .lock()
            .unwrap()
            .interrupts
            .push(kernel_id.to_string());
        Ok(())
    }
}
