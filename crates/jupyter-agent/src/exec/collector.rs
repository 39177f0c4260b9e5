//! Reconstruct one execution's result from the kernel message stream.

use jupyter_agent_protocol::{
    DisplayDataContent, ErrorContent, ExecuteReplyContent, ExecuteResultContent, KernelMessage,
    MessageKind, OutputRecord, StreamContent, strip_ansi,
};
use log::{debug, warn};
use serde::de::DeserializeOwned;

use super::{ErrorDetail, ExecutionOutcome, ExecutionStatus};

/// Whether the receive loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The completion acknowledgment arrived.
    Done,
}

/// Buckets inbound messages belonging to one request into output records.
#[derive(Debug)]
pub struct Collector {
    msg_id: String,
    outputs: Vec<OutputRecord>,
    error: Option<ErrorDetail>,
    status: ExecutionStatus,
    execution_count: Option<i64>,
}

impl Collector {
    /// Collect replies to the request with correlation id `msg_id`.
    pub fn new(msg_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            outputs: Vec::new(),
            error: None,
            status: ExecutionStatus::Ok,
            execution_count: None,
        }
    }

    /// Fold one inbound message into the result.
    pub fn observe(&mut self, message: &KernelMessage) -> Flow {
        if message.parent_msg_id() != Some(self.msg_id.as_str()) {
            debug!(
                "Discarding {} for {:?} (waiting on {})",
                message.msg_type(),
                message.parent_msg_id(),
                self.msg_id
            );
            return Flow::Continue;
        }

        match message.kind() {
            MessageKind::Stream => {
                if let Some(content) = decode::<StreamContent>(message) {
                    self.outputs.push(OutputRecord::Stream {
                        name: content.name,
                        text: content.text,
                    });
                }
            }
            MessageKind::DisplayData => {
                if let Some(content) = decode::<DisplayDataContent>(message) {
                    self.outputs.push(OutputRecord::DisplayData {
                        data: content.data,
                        metadata: content.metadata,
                    });
                }
            }
            MessageKind::ExecuteResult => {
                if let Some(content) = decode::<ExecuteResultContent>(message) {
                    self.outputs.push(OutputRecord::ExecuteResult {
                        data: content.data,
                        metadata: content.metadata,
                        execution_count: content.execution_count,
                    });
                }
            }
            MessageKind::Error => {
                if let Some(content) = decode::<ErrorContent>(message) {
                    let detail = ErrorDetail::from_kernel(
                        &content.ename,
                        &content.evalue,
                        &content.traceback,
                    );
                    self.outputs.push(OutputRecord::Error {
                        ename: content.ename,
                        evalue: detail.evalue.clone(),
                        traceback: content.traceback,
                    });
                    // First error wins.
                    if self.error.is_none() {
                        self.error = Some(detail);
                    }
                    self.status = ExecutionStatus::Error;
                }
            }
            MessageKind::ExecuteReply => {
                let reply = decode::<ExecuteReplyContent>(message).unwrap_or_default();
                self.execution_count = reply.execution_count;
                if reply.is_error() && self.error.is_none() {
                    self.error = Some(ErrorDetail::from_kernel(
                        &reply.ename,
                        &reply.evalue,
                        &reply.traceback,
                    ));
                    self.status = ExecutionStatus::Error;
                }
                return Flow::Done;
            }
            // Liveness broadcasts may precede late outputs; only the reply ends the run.
            MessageKind::Status | MessageKind::Other(_) => {}
        }
        Flow::Continue
    }

    /// Outputs collected so far, in arrival order.
    pub fn outputs(&self) -> &[OutputRecord] {
        &self.outputs
    }

    /// Finish after the completion acknowledgment.
    pub fn finish(self) -> ExecutionOutcome {
        ExecutionOutcome {
            status: self.status,
            outputs: self.outputs,
            error: self.error,
            execution_count: self.execution_count,
        }
    }

    /// Finish after the deadline elapsed. Collected outputs are kept.
    pub fn timed_out(self, detail: ErrorDetail) -> ExecutionOutcome {
        ExecutionOutcome {
            status: ExecutionStatus::Timeout,
            outputs: self.outputs,
            error: Some(detail),
            execution_count: self.execution_count,
        }
    }
}

fn decode<T>(message: &KernelMessage) -> Option<T>
where
    T: DeserializeOwned + Default,
{
    match message.decode_content() {
        Ok(content) => Some(content),
        Err(e) => {
            warn!("Dropping malformed {} content: {}", message.msg_type(), e);
            None
        }
    }
}

impl ErrorDetail {
    /// Error detail from kernel-reported fields, with color sequences stripped.
    pub fn from_kernel(ename: &str, evalue: &str, traceback: &[String]) -> Self {
        Self {
            ename: ename.to_string(),
            evalue: strip_ansi(evalue),
            traceback: strip_ansi(&traceback.join("\n")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn reply_to(parent: &str, msg_type: &str, content: Value) -> KernelMessage {
        serde_json::from_value(json!({
            "msg_type": msg_type,
            "header": {"msg_id": format!("{parent}-{msg_type}"), "msg_type": msg_type},
            "parent_header": {"msg_id": parent},
            "content": content,
        }))
        .unwrap()
    }

    #[test]
    fn test_stream_then_reply() {
        let mut collector = Collector::new("req");
        assert_eq!(
            collector.observe(&reply_to("req", "stream", json!({"name": "stdout", "text": "hi\n"}))),
            Flow::Continue
        );
        assert_eq!(
            collector.observe(&reply_to(
                "req",
                "execute_reply",
                json!({"status": "ok", "execution_count": 4})
            )),
            Flow::Done
        );

        let outcome = collector.finish();
        assert_eq!(outcome.status, ExecutionStatus::Ok);
        assert_eq!(outcome.execution_count, Some(4));
        assert_eq!(
            outcome.outputs,
            vec![OutputRecord::Stream {
                name: "stdout".to_string(),
                text: "hi\n".to_string()
            }]
        );
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_foreign_parent_is_ignored() {
        let mut collector = Collector::new("req");
        let stale = reply_to("old", "stream", json!({"text": "stale"}));
        let stale_reply = reply_to("old", "execute_reply", json!({"status": "error"}));

        assert_eq!(collector.observe(&stale), Flow::Continue);
        assert_eq!(collector.observe(&stale_reply), Flow::Continue);
        assert!(collector.outputs().is_empty());
    }

    #[test]
    fn test_first_error_wins() {
        let mut collector = Collector::new("req");
        collector.observe(&reply_to(
            "req",
            "error",
            json!({"ename": "NameError", "evalue": "\u{1b}[31mx\u{1b}[0m", "traceback": ["\u{1b}[31mtb1\u{1b}[0m", "tb2"]}),
        ));
        collector.observe(&reply_to(
            "req",
            "error",
            json!({"ename": "ValueError", "evalue": "second", "traceback": []}),
        ));
        collector.observe(&reply_to(
            "req",
            "execute_reply",
            json!({"status": "error", "ename": "ReplyError", "evalue": "from reply"}),
        ));

        let outcome = collector.finish();
        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert_eq!(outcome.outputs.len(), 2);
        let detail = outcome.error.unwrap();
        assert_eq!(detail.ename, "NameError");
        assert_eq!(detail.evalue, "x");
        assert_eq!(detail.traceback, "tb1\ntb2");

        // Raw trace lines survive in the record.
        match &outcome.outputs[0] {
            OutputRecord::Error { traceback, .. } => {
                assert_eq!(traceback[0], "\u{1b}[31mtb1\u{1b}[0m");
            }
            other => panic!("expected error record, got {other:?}"),
        }
    }

    #[test]
    fn test_error_reply_synthesizes_detail() {
        let mut collector = Collector::new("req");
        collector.observe(&reply_to(
            "req",
            "execute_reply",
            json!({"status": "error", "ename": "KeyboardInterrupt", "evalue": "", "traceback": ["a", "b"]}),
        ));
        let outcome = collector.finish();
        assert_eq!(outcome.status, ExecutionStatus::Error);
        let detail = outcome.error.unwrap();
        assert_eq!(detail.ename, "KeyboardInterrupt");
        assert_eq!(detail.traceback, "a\nb");
        assert!(outcome.outputs.is_empty());
    }

    #[test]
    fn test_idle_status_does_not_terminate() {
        let mut collector = Collector::new("req");
        let idle = reply_to("req", "status", json!({"execution_state": "idle"}));
        assert_eq!(collector.observe(&idle), Flow::Continue);
        collector.observe(&reply_to("req", "stream", json!({"text": "late"})));
        assert_eq!(collector.outputs().len(), 1);
    }

    #[test]
    fn test_display_and_result_are_kept_verbatim() {
        let mut collector = Collector::new("req");
        collector.observe(&reply_to(
            "req",
            "display_data",
            json!({"data": {"image/png": "iVBOR", "text/plain": "<Figure>"}, "metadata": {"image/png": {"width": 10}}}),
        ));
        collector.observe(&reply_to(
            "req",
            "execute_result",
            json!({"data": {"text/plain": "42"}, "metadata": {}, "execution_count": 7}),
        ));
        let outcome = collector.finish();

        match &outcome.outputs[0] {
            OutputRecord::DisplayData { data, metadata } => {
                assert_eq!(data["image/png"], "iVBOR");
                assert_eq!(metadata["image/png"]["width"], 10);
            }
            other => panic!("expected display record, got {other:?}"),
        }
        match &outcome.outputs[1] {
            OutputRecord::ExecuteResult {
                execution_count, ..
            } => assert_eq!(*execution_count, Some(7)),
            other => panic!("expected result record, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_keeps_partial_outputs() {
        let mut collector = Collector::new("req");
        collector.observe(&reply_to("req", "stream", json!({"text": "partial"})));
        let outcome = collector.timed_out(ErrorDetail {
            ename: "TimeoutError".to_string(),
            evalue: "late".to_string(),
            traceback: String::new(),
        });
        assert_eq!(outcome.status, ExecutionStatus::Timeout);
        assert_eq!(outcome.outputs.len(), 1);
        assert!(outcome.error.is_some());
    }
}
