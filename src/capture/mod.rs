// src/capture/mod.rs
//! Capture pipeline
//!
//! ```text
//! ┌──────────────────┐   RawEvent   ┌────────────┐  Cosmetic  ┌──────────┐
//! │ CaptureProvider  │ ───────────► │ classifier │ ─────────► │ Throttle │ ──┐
//! │ (external / file)│              └─────┬──────┘            └──────────┘   │
//! └────────┬─────────┘                    │ everything else                  ▼
//!          │ NodeLookup                   └────────────────────────────► envelopes
//!          └──► selector (click enrichment)
//! ```

pub mod classifier;
pub mod event;
pub mod provider;
pub mod selector;
pub mod throttle;

// Re-export commonly used types
pub use classifier::{classify, EventClass};
pub use event::{IncrementalSource, MouseInteraction, RawEvent, RawEventType};
pub use provider::{CaptureConfig, CaptureProvider, CaptureSink, ReplayCapture};
pub use selector::{CssPathResolver, NodeLookup, NodeSnapshot, SelectorResolver};
pub use throttle::Throttle;
