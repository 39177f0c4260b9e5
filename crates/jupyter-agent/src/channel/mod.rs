//! Kernel channel management.
//!
//! A [`ChannelManager`] owns at most one live bidirectional channel to a
//! kernel. Asking for a channel bound to a different kernel (or after the held
//! one has closed) closes the old channel and opens a new one. The transport
//! itself sits behind [`KernelConnector`] / [`KernelChannel`]; production code
//! uses [`WebSocketConnector`].

mod websocket;

pub use websocket::{WebSocketChannel, WebSocketConnector, kernel_channel_url};

use async_trait::async_trait;
use jupyter_agent_protocol::{KernelMessage, ShellRequest};
use log::{debug, info, warn};
use thiserror::Error;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur on a kernel channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The transport could not be established. Not retried here.
    #[error("failed to connect to kernel {kernel_id}: {message}")]
    Connect { kernel_id: String, message: String },

    /// The channel ended or no channel is open.
    #[error("kernel channel closed")]
    Closed,

    /// Reading or writing a frame failed.
    #[error("kernel channel transport error: {0}")]
    Transport(String),

    /// An outbound message could not be encoded.
    #[error("failed to encode kernel message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An open bidirectional message stream to one kernel.
#[async_trait]
pub trait KernelChannel: Send {
    /// Write one message.
    async fn send(&mut self, request: &ShellRequest) -> ChannelResult<()>;

    /// Next inbound message, or `None` once the channel has ended.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no
    /// message.
    async fn recv(&mut self) -> ChannelResult<Option<KernelMessage>>;

    /// Close the channel. Closing twice is not an error.
    async fn close(&mut self) -> ChannelResult<()>;

    fn is_open(&self) -> bool;
}

/// Opens channels to kernels by id.
#[async_trait]
pub trait KernelConnector: Send + Sync {
    async fn connect(&self, kernel_id: &str) -> ChannelResult<Box<dyn KernelChannel>>;
}

struct BoundChannel {
    kernel_id: String,
    channel: Box<dyn KernelChannel>,
}

/// Holds the single live kernel channel.
pub struct ChannelManager<C> {
    connector: C,
    current: Option<BoundChannel>,
}

impl<C: KernelConnector> ChannelManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            current: None,
        }
    }

    /// Kernel the held channel is bound to, if it is still open.
    pub fn kernel_id(&self) -> Option<&str> {
        self.current
            .as_ref()
            .filter(|bound| bound.channel.is_open())
            .map(|bound| bound.kernel_id.as_str())
    }

    /// Return an open channel bound to `kernel_id`, replacing the held one if
    /// it is closed or bound elsewhere.
    pub async fn ensure(&mut self, kernel_id: &str) -> ChannelResult<&mut dyn KernelChannel> {
        if self.kernel_id() != Some(kernel_id) {
            self.close().await;

            info!("Opening kernel channel to {}", kernel_id);
            let channel = self.connector.connect(kernel_id).await?;
            self.current = Some(BoundChannel {
                kernel_id: kernel_id.to_string(),
                channel,
            });
        }

        match self.current.as_mut() {
            Some(bound) => Ok(bound.channel.as_mut()),
            None => Err(ChannelError::Closed),
        }
    }

    /// Write one message on the held channel.
    pub async fn send(&mut self, request: &ShellRequest) -> ChannelResult<()> {
        match self.current.as_mut() {
            Some(bound) => bound.channel.send(request).await,
            None => Err(ChannelError::Closed),
        }
    }

    /// Next inbound message on the held channel.
    ///
    /// A channel that has ended is dropped and reported as
    /// [`ChannelError::Closed`]; the next [`ensure`](Self::ensure) reopens.
    pub async fn receive(&mut self) -> ChannelResult<KernelMessage> {
        let Some(bound) = self.current.as_mut() else {
            return Err(ChannelError::Closed);
        };
        match bound.channel.recv().await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => {
                warn!("Kernel channel to {} ended", bound.kernel_id);
                self.current = None;
                Err(ChannelError::Closed)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the held channel, if any. Failures are logged, not returned.
    pub async fn close(&mut self) {
        if let Some(mut old) = self.current.take() {
            debug!("Closing kernel channel to {}", old.kernel_id);
            if let Err(e) = old.channel.close().await {
                warn!("Failed to close kernel channel to {}: {}", old.kernel_id, e);
            }
        }
    }
}
