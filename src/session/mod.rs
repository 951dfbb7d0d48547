// src/session/mod.rs
//! Session policy
//!
//! - **Settings**: site settings fetch, defaults and validation
//! - **Consent**: activation gating and widget messages
//! - **Lifecycle**: inactivity cutoff and the termination sequence
//! - **Feedback**: survey widget scheduling

pub mod consent;
pub mod feedback;
pub mod lifecycle;
pub mod settings;

// Re-export commonly used types
pub use consent::{ConsentConfig, ConsentDecision, ConsentLayout, ConsentMethod, WidgetMessage};
pub use feedback::{FeedbackPlan, FeedbackScheduler, FeedbackSettings, SurveyKind};
pub use lifecycle::{LifecyclePhase, SessionLifecycle, SessionTeardown, TimerOutcome};
pub use settings::{
    FileSettingsSource, HttpSettingsClient, RawSiteSessionSettings, SettingsRejection,
    SettingsSource, SiteSessionSettings, StaticSettingsSource,
};
