//! Kernel channel over the notebook server's websocket endpoint.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use jupyter_agent_protocol::{KernelMessage, ShellRequest};
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{ChannelError, ChannelResult, KernelChannel, KernelConnector};

/// Build the channel URL for `kernel_id` from the server's HTTP base URL.
///
/// `http` maps to `ws`, `https` to `wss`; any base path is kept.
pub fn kernel_channel_url(server_url: &str, kernel_id: &str, token: &str) -> ChannelResult<String> {
    let base = server_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ChannelError::Connect {
            kernel_id: kernel_id.to_string(),
            message: format!("unsupported server URL scheme: {server_url}"),
        });
    };

    let mut url = format!(
        "{}/api/kernels/{}/channels",
        ws_base,
        urlencoding::encode(kernel_id)
    );
    if !token.is_empty() {
        url.push_str("?token=");
        url.push_str(&urlencoding::encode(token));
    }
    Ok(url)
}

/// Opens websocket channels against one notebook server.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    server_url: String,
    token: String,
}

impl WebSocketConnector {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl KernelConnector for WebSocketConnector {
    async fn connect(&self, kernel_id: &str) -> ChannelResult<Box<dyn KernelChannel>> {
        let connect_error = |message: String| ChannelError::Connect {
            kernel_id: kernel_id.to_string(),
            message,
        };

        let url = kernel_channel_url(&self.server_url, kernel_id, &self.token)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_error(e.to_string()))?;
        if !self.token.is_empty() {
            let value = HeaderValue::from_str(&format!("token {}", self.token))
                .map_err(|e| connect_error(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        debug!("Connected kernel channel for {}", kernel_id);

        Ok(Box::new(WebSocketChannel {
            kernel_id: kernel_id.to_string(),
            stream,
            open: true,
        }))
    }
}

/// A live websocket channel to one kernel.
pub struct WebSocketChannel {
    kernel_id: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    open: bool,
}

#[async_trait]
impl KernelChannel for WebSocketChannel {
    async fn send(&mut self, request: &ShellRequest) -> ChannelResult<()> {
        if !self.open {
            return Err(ChannelError::Closed);
        }
        let json = serde_json::to_string(request)?;
        self.stream
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> ChannelResult<Option<KernelMessage>> {
        while self.open {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<KernelMessage>(text.as_str()) {
                        Ok(message) => return Ok(Some(message)),
                        Err(e) => {
                            let display: String = text.as_str().chars().take(200).collect();
                            warn!("Failed to parse kernel message: {:?}, frame: {}", e, display);
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Kernel {} closed channel: {:?}", self.kernel_id, frame);
                    self.open = false;
                }
                // Binary buffers and ping/pong carry nothing the agent reads.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.open = false;
                    return Err(ChannelError::Transport(e.to_string()));
                }
                None => self.open = false,
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> ChannelResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.stream
            .close(None)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
