//! Kernel messaging wire types for the Jupyter agent.
//!
//! This crate defines the subset of the Jupyter messaging protocol the agent
//! speaks over a kernel's websocket channel:
//!
//! ```text
//! Agent --[shell: execute_request]--> Kernel
//! Agent <--[iopub: stream | display_data | execute_result | error | status]-- Kernel
//! Agent <--[shell: execute_reply]-- Kernel
//! ```
//!
//! Messages are already-decoded JSON frames. Nothing here performs I/O.
//!
//! ## Design Principles
//!
//! 1. **Lenient on input.** Inbound payloads default every field so a partially
//!    populated frame still decodes.
//! 2. **Notebook-shaped outputs.** [`OutputRecord`] serializes in the on-disk
//!    notebook output shape, so records can be written into a document as-is.

pub mod ansi;
pub mod messages;
pub mod outputs;

pub use ansi::strip_ansi;
pub use messages::{
    DisplayDataContent, ErrorContent, ExecuteReplyContent, ExecuteRequestContent,
    ExecuteResultContent, Header, KernelMessage, MessageKind, PROTOCOL_VERSION, ParentHeader,
    ShellRequest, StatusContent, StreamContent,
};
pub use outputs::{MimeBundle, OutputRecord, bundle_text};
