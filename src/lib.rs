// src/lib.rs
//! Squeaky Session Recording Agent
//!
//! Records a visitor's interaction with a page and streams it to the Squeaky
//! collector.
//!
//! # Architecture
//!
//! The agent is structured into several key modules:
//!
//! - **identity**: Visitor/session ids, persisted state, page context
//! - **capture**: Raw events, classification, enrichment, mutation throttling
//! - **session**: Site settings, consent, feedback scheduling, inactivity cutoff
//! - **transport**: Wire envelopes and the reconnecting collector channel
//! - **orchestrator**: Startup checks and the recording actor
//! - **observability**: Tracing and metrics
//! - **utils**: Configuration, errors, clocks

// Public module exports
pub mod capture;
pub mod identity;
pub mod observability;
pub mod orchestrator;
pub mod session;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use orchestrator::{Agent, AgentContext, AgentHandle, AgentOutcome};
pub use utils::config::AgentConfig;
pub use utils::errors::{AgentError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
