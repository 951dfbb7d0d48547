// src/transport/mod.rs
//! Collector transport
//!
//! - **Envelope**: `{key, value}` wire messages
//! - **Link**: connector/link abstraction and the default TCP implementation
//! - **Channel**: connection lifecycle, bounded reconnects, send gating

pub mod channel;
pub mod envelope;
pub mod link;

// Re-export commonly used types
pub use channel::{ChannelEvent, ConnectionState, ReconnectPolicy, TransportChannel};
pub use envelope::{Envelope, EventKind, PageError};
pub use link::{ConnectRequest, Connector, Link, TcpConnector};
