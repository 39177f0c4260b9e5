//! Kernel message envelopes and content payloads.
//!
//! Outbound, the agent only ever sends `execute_request` on the shell channel.
//! Inbound, every frame is decoded into a [`KernelMessage`] and its content is
//! interpreted according to [`MessageKind`].

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::outputs::MimeBundle;

/// Messaging protocol version stamped on outbound headers.
pub const PROTOCOL_VERSION: &str = "5.3";

// ============================================================================
// Envelope
// ============================================================================

/// Message header. Identifies one message and who sent it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    /// Correlation identifier of this message.
    pub msg_id: String,
    pub msg_type: String,
    /// Originator name.
    pub username: String,
    /// Protocol session id of the sender.
    pub session: String,
    /// RFC 3339 timestamp.
    pub date: String,
    pub version: String,
}

/// Reference to the message a reply answers. Empty on requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<String>,
}

// ============================================================================
// Outbound
// ============================================================================

/// Content of an `execute_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequestContent {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    pub user_expressions: Map<String, Value>,
    pub allow_stdin: bool,
    /// Abort the remaining statements of this unit on the first error.
    pub stop_on_error: bool,
}

/// A request sent on the kernel's shell channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellRequest {
    pub header: Header,
    pub parent_header: ParentHeader,
    pub metadata: Map<String, Value>,
    pub content: ExecuteRequestContent,
    pub channel: String,
}

impl ShellRequest {
    /// Build an `execute_request` for `code` with a fresh correlation id.
    ///
    /// Execution semantics are fixed: recorded in history, not silent, no
    /// user expressions, stdin disabled, halt on first error.
    pub fn execute(code: impl Into<String>, session: &str, username: &str) -> Self {
        Self {
            header: Header {
                msg_id: Uuid::new_v4().to_string(),
                msg_type: "execute_request".to_string(),
                username: username.to_string(),
                session: session.to_string(),
                date: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                version: PROTOCOL_VERSION.to_string(),
            },
            parent_header: ParentHeader::default(),
            metadata: Map::new(),
            content: ExecuteRequestContent {
                code: code.into(),
                silent: false,
                store_history: true,
                user_expressions: Map::new(),
                allow_stdin: false,
                stop_on_error: true,
            },
            channel: "shell".to_string(),
        }
    }

    /// Correlation id replies will carry in their parent header.
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Message kinds the agent distinguishes. Everything else is `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Stream,
    DisplayData,
    ExecuteResult,
    Error,
    /// Completion acknowledgment of an `execute_request`.
    ExecuteReply,
    /// Kernel liveness broadcast (busy/idle).
    Status,
    Other(String),
}

impl From<&str> for MessageKind {
    fn from(msg_type: &str) -> Self {
        match msg_type {
            "stream" => Self::Stream,
            "display_data" => Self::DisplayData,
            "execute_result" => Self::ExecuteResult,
            "error" => Self::Error,
            "execute_reply" => Self::ExecuteReply,
            "status" => Self::Status,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A decoded inbound frame from the kernel channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelMessage {
    #[serde(default)]
    pub header: Header,

    /// Absent, `null` and `{}` are all accepted.
    #[serde(default)]
    pub parent_header: Option<ParentHeader>,

    /// Top-level copy of the message type added by the notebook server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<String>,

    #[serde(default)]
    pub content: Value,

    #[serde(default)]
    pub metadata: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl KernelMessage {
    /// Message type, preferring the top-level field over the header.
    pub fn msg_type(&self) -> &str {
        self.msg_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.header.msg_type)
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::from(self.msg_type())
    }

    /// Correlation reference to the request this message belongs to.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header
            .as_ref()?
            .msg_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    /// Decode the content payload. A missing payload yields `T::default()`.
    pub fn decode_content<T>(&self) -> serde_json::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if self.content.is_null() {
            return Ok(T::default());
        }
        T::deserialize(&self.content)
    }
}

// ============================================================================
// Content payloads
// ============================================================================

fn default_stream_name() -> String {
    "stdout".to_string()
}

/// `stream` content: text written to stdout/stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamContent {
    #[serde(default = "default_stream_name")]
    pub name: String,
    #[serde(default)]
    pub text: String,
}

impl Default for StreamContent {
    fn default() -> Self {
        Self {
            name: default_stream_name(),
            text: String::new(),
        }
    }
}

/// `display_data` content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayDataContent {
    pub data: MimeBundle,
    pub metadata: Map<String, Value>,
}

/// `execute_result` content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteResultContent {
    pub data: MimeBundle,
    pub metadata: Map<String, Value>,
    pub execution_count: Option<i64>,
}

/// `error` content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

/// `execute_reply` content. Error fields are only populated when
/// `status == "error"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteReplyContent {
    pub status: String,
    pub execution_count: Option<i64>,
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl ExecuteReplyContent {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// `status` content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusContent {
    pub execution_state: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_request_shape() {
        let request = ShellRequest::execute("print(1)", "sess-1", "jupyter-agent");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["header"]["msg_type"], "execute_request");
        assert_eq!(value["header"]["session"], "sess-1");
        assert_eq!(value["header"]["username"], "jupyter-agent");
        assert_eq!(value["header"]["version"], PROTOCOL_VERSION);
        assert_eq!(value["parent_header"], json!({}));
        assert_eq!(value["metadata"], json!({}));
        assert_eq!(value["channel"], "shell");
        assert_eq!(
            value["content"],
            json!({
                "code": "print(1)",
                "silent": false,
                "store_history": true,
                "user_expressions": {},
                "allow_stdin": false,
                "stop_on_error": true,
            })
        );
    }

    #[test]
    fn test_fresh_correlation_ids() {
        let a = ShellRequest::execute("1", "s", "u");
        let b = ShellRequest::execute("1", "s", "u");
        assert_ne!(a.msg_id(), b.msg_id());
        assert!(!a.msg_id().is_empty());
    }

    #[test]
    fn test_inbound_prefers_top_level_msg_type() {
        let msg: KernelMessage = serde_json::from_value(json!({
            "msg_type": "stream",
            "header": {"msg_id": "m1", "msg_type": "ignored"},
            "parent_header": {"msg_id": "req-1"},
            "content": {"name": "stderr", "text": "oops"},
            "channel": "iopub",
        }))
        .unwrap();

        assert_eq!(msg.kind(), MessageKind::Stream);
        assert_eq!(msg.parent_msg_id(), Some("req-1"));
        let content: StreamContent = msg.decode_content().unwrap();
        assert_eq!(content.name, "stderr");
        assert_eq!(content.text, "oops");
    }

    #[test]
    fn test_inbound_falls_back_to_header_type() {
        let msg: KernelMessage = serde_json::from_value(json!({
            "header": {"msg_type": "execute_reply"},
            "parent_header": null,
        }))
        .unwrap();

        assert_eq!(msg.kind(), MessageKind::ExecuteReply);
        assert_eq!(msg.parent_msg_id(), None);
        let reply: ExecuteReplyContent = msg.decode_content().unwrap();
        assert!(!reply.is_error());
    }

    #[test]
    fn test_empty_parent_header_has_no_reference() {
        let msg: KernelMessage = serde_json::from_value(json!({
            "msg_type": "status",
            "parent_header": {},
            "content": {"execution_state": "idle"},
        }))
        .unwrap();
        assert_eq!(msg.parent_msg_id(), None);
        let status: StatusContent = msg.decode_content().unwrap();
        assert_eq!(status.execution_state, "idle");
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(
            MessageKind::from("comm_open"),
            MessageKind::Other("comm_open".to_string())
        );
    }

    #[test]
    fn test_stream_defaults_to_stdout() {
        let content: StreamContent = serde_json::from_value(json!({"text": "hi"})).unwrap();
        assert_eq!(content.name, "stdout");
    }
}
