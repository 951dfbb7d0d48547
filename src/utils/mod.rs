// src/utils/mod.rs
//! Common utilities shared by every layer of the agent
//!
//! - **errors**: `AgentError` and the crate-wide `Result` alias
//! - **config**: layered configuration (defaults, file, environment)
//! - **clock**: wall-clock abstraction used for session staleness checks

pub mod clock;
pub mod config;
pub mod errors;

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use config::AgentConfig;
pub use errors::{AgentError, Result};
