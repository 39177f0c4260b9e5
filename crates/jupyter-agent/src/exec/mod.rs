//! Execution correlation.
//!
//! [`Executor::execute`] submits one unit of code with a fresh correlation id,
//! then drains the shared kernel channel until the matching `execute_reply`
//! arrives or the deadline elapses. Replies to other requests on the same
//! channel are discarded. On timeout the channel stays open and the outputs
//! received so far are returned.

mod collector;

pub use collector::{Collector, Flow};

use std::time::Duration;

use jupyter_agent_protocol::{OutputRecord, ShellRequest};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::{ChannelManager, ChannelResult, KernelConnector};

/// Originator name stamped on submitted requests by default.
pub const DEFAULT_USERNAME: &str = "jupyter-agent";

/// Terminal status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ok,
    Error,
    Timeout,
}

/// Readable error description (color sequences stripped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub ename: String,
    pub evalue: String,
    /// Trace lines joined with newlines.
    pub traceback: String,
}

/// Aggregated result of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// Output records in arrival order.
    pub outputs: Vec<OutputRecord>,
    pub error: Option<ErrorDetail>,
    /// Sequence number from the completion acknowledgment.
    pub execution_count: Option<i64>,
}

impl ExecutionOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }
}

/// Submits code to kernels and correlates their replies.
///
/// Executions through one executor are serialized by `&mut self`; callers
/// needing parallel execution use one executor per kernel.
pub struct Executor<C> {
    channels: ChannelManager<C>,
    session_id: String,
    username: String,
}

impl<C: KernelConnector> Executor<C> {
    pub fn new(connector: C) -> Self {
        Self {
            channels: ChannelManager::new(connector),
            session_id: Uuid::new_v4().to_string(),
            username: DEFAULT_USERNAME.to_string(),
        }
    }

    /// Override the originator name on submitted requests.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Protocol session id used in request headers.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run `code` on `kernel_id`, waiting at most `deadline` for completion.
    ///
    /// Kernel errors and timeouts are reported in the outcome. Only channel
    /// failures are returned as errors.
    pub async fn execute(
        &mut self,
        kernel_id: &str,
        code: &str,
        deadline: Duration,
    ) -> ChannelResult<ExecutionOutcome> {
        self.channels.ensure(kernel_id).await?;

        let request = ShellRequest::execute(code, &self.session_id, &self.username);
        let mut collector = Collector::new(request.msg_id());
        info!(
            "Submitting execute_request {} to kernel {}",
            request.msg_id(),
            kernel_id
        );
        self.channels.send(&request).await?;

        let channels = &mut self.channels;
        let collecting = &mut collector;
        let finished = tokio::time::timeout(deadline, async move {
            loop {
                let message = channels.receive().await?;
                if collecting.observe(&message) == Flow::Done {
                    return ChannelResult::Ok(());
                }
            }
        })
        .await;

        match finished {
            Ok(Ok(())) => {
                let outcome = collector.finish();
                debug!(
                    "execute_request {} finished: {:?}",
                    request.msg_id(),
                    outcome.status
                );
                Ok(outcome)
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => {
                warn!(
                    "execute_request {} timed out after {:?} with {} output(s)",
                    request.msg_id(),
                    deadline,
                    collector.outputs().len()
                );
                Ok(collector.timed_out(ErrorDetail {
                    ename: "TimeoutError".to_string(),
                    evalue: format!("Execution timed out after {deadline:?}"),
                    traceback: String::new(),
                }))
            }
        }
    }

    /// Close the kernel channel.
    pub async fn shutdown(&mut self) {
        self.channels.close().await;
    }
}
