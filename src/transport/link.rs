// src/transport/link.rs
//! Collector connections
//!
//! A `Connector` opens a `Link`: a bidirectional stream of text frames. The
//! default implementation speaks newline-delimited JSON over TCP; the first
//! line the agent writes is the request target carrying the identity
//! parameters, e.g. `/api/in?site_id=..&visitor_id=..&session_id=..`.

use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};
use url::form_urlencoded;

/// Longest frame accepted from the collector
const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Where to connect and who is connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn new(path: impl Into<String>, params: Vec<(String, String)>) -> Self {
        Self {
            path: path.into(),
            params,
        }
    }

    /// Path plus encoded query string
    pub fn target(&self) -> String {
        if self.params.is_empty() {
            return self.path.clone();
        }

        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.params)
            .finish();

        format!("{}?{}", self.path, query)
    }
}

/// An open connection
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Next inbound frame; `None` once the remote side has gone away
    async fn recv(&mut self) -> Option<String>;

    async fn close(&mut self);
}

/// Opens links
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Link>>;
}

/// Newline-delimited frames over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Link>> {
        let stream = TcpStream::connect(&self.address).await.map_err(|e| {
            AgentError::TransportFailed(format!("Failed to connect to {}: {}", self.address, e))
        })?;

        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));

        framed
            .send(request.target())
            .await
            .map_err(|e| AgentError::TransportFailed(format!("Handshake failed: {}", e)))?;

        debug!("Connected to collector at {}", self.address);

        Ok(Box::new(TcpLink { framed }))
    }
}

struct TcpLink {
    framed: Framed<TcpStream, LinesCodec>,
}

#[async_trait]
impl Link for TcpLink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.framed
            .send(frame)
            .await
            .map_err(|e| AgentError::TransportFailed(format!("Send failed: {}", e)))
    }

    async fn recv(&mut self) -> Option<String> {
        match self.framed.next().await {
            Some(Ok(line)) => Some(line),
            Some(Err(e)) => {
                warn!("Collector stream error: {}", e);
                None
            }
            None => None,
        }
    }

    async fn close(&mut self) {
        if let Err(e) = SinkExt::<String>::close(&mut self.framed).await {
            debug!("Error while closing collector connection: {}", e);
        }
    }
}
