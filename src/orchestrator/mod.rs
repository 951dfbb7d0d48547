// src/orchestrator/mod.rs
//! Recording orchestration
//!
//! Ties identity, settings, consent, capture, transport and the session
//! lifecycle together:
//!
//! - **Agent**: startup checks and the background task
//! - **Recorder**: the actor that owns the capture pipeline once recording is allowed
//! - **AgentHandle**: control surface for the embedding host
//! - **AgentContext**: injected collaborators (page, storage, clock, capture, collector)
//!
//! ```text
//!   host ──► AgentHandle ──► command queue ──► Recorder ──► TransportChannel ──► collector
//!                                 ▲
//!   CaptureProvider ── sink ──────┘
//! ```

pub mod agent;
pub mod context;
pub mod handle;
pub mod recorder;

// Re-export commonly used types
pub use agent::{Agent, AgentOutcome};
pub use context::{AgentContext, NoWidgets, WidgetHost};
pub use handle::AgentHandle;
pub use recorder::CaptureState;
