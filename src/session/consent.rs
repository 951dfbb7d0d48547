// src/session/consent.rs
//! Consent gating and widget control messages
//!
//! ```text
//! stored consent ──► Some(true)  ──────────────────────► Activate
//!                ├─► Some(false) ──────────────────────► Deny
//!                └─► None ─┬─ method disabled ─────────► Activate
//!                          ├─ method widget ───────────► Defer (show banner)
//!                          └─ method api ──────────────► Defer (wait for host)
//! ```

use crate::identity::visitor::IdentityStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentMethod {
    #[default]
    Disabled,
    Api,
    Widget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentLayout {
    #[default]
    BottomLeft,
    Center,
    BottomRight,
}

/// Consent settings delivered with the site settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsentConfig {
    pub consent_method: ConsentMethod,
    pub layout: ConsentLayout,
}

/// Outcome of the consent check at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
    /// Start recording now
    Activate,

    /// Never start; the visitor rejected
    Deny,

    /// Wait for an accept/reject signal
    Defer { show_banner: bool },
}

/// Decide whether recording may start
pub fn decide(stored: Option<bool>, config: &ConsentConfig) -> ConsentDecision {
    let decision = match (stored, config.consent_method) {
        (Some(true), _) => ConsentDecision::Activate,
        (Some(false), _) => ConsentDecision::Deny,
        (None, ConsentMethod::Disabled) => ConsentDecision::Activate,
        (None, ConsentMethod::Widget) => ConsentDecision::Defer { show_banner: true },
        (None, ConsentMethod::Api) => ConsentDecision::Defer { show_banner: false },
    };

    debug!("Consent decision: {:?}", decision);
    decision
}

/// Persist an accept; recording may start
pub fn accept(store: &IdentityStore) {
    info!("Consent accepted");
    store.set_consent(true);
}

/// Persist a reject; recording never starts for this visitor
pub fn reject(store: &IdentityStore) {
    info!("Consent rejected");
    store.set_consent(false);
}

/// Message posted by an embedded widget frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WidgetMessage {
    /// Malformed or unrecognised input
    Unknown,
    CloseNps,
    SubmitNps,
    SetStepNps { step: u32, height: f64 },
    CloseSentiment,
    AcceptConsent,
    RejectConsent,
    SetHeightConsent { height: f64 },
}

#[derive(Deserialize)]
struct RawMessage {
    key: String,

    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
struct StepValue {
    step: u32,
    height: f64,
}

#[derive(Deserialize)]
struct HeightValue {
    height: f64,
}

impl WidgetMessage {
    /// Parse a posted message, falling back to `Unknown`
    pub fn parse(input: &str) -> Self {
        let raw: RawMessage = match serde_json::from_str(input) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Ignoring malformed widget message: {}", e);
                return WidgetMessage::Unknown;
            }
        };

        match raw.key.as_str() {
            "__squeaky_close_nps" => WidgetMessage::CloseNps,
            "__squeaky_submit_nps" => WidgetMessage::SubmitNps,
            "__squeaky_set_step_nps" => serde_json::from_value::<StepValue>(raw.value)
                .map(|v| WidgetMessage::SetStepNps {
                    step: v.step,
                    height: v.height,
                })
                .unwrap_or(WidgetMessage::Unknown),
            "__squeaky_close_sentiment" => WidgetMessage::CloseSentiment,
            "__squeaky_accept_consent" => WidgetMessage::AcceptConsent,
            "__squeaky_reject_consent" => WidgetMessage::RejectConsent,
            "__squeaky_set_height_consent" => serde_json::from_value::<HeightValue>(raw.value)
                .map(|v| WidgetMessage::SetHeightConsent { height: v.height })
                .unwrap_or(WidgetMessage::Unknown),
            _ => WidgetMessage::Unknown,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            WidgetMessage::Unknown => "__squeaky_unknown",
            WidgetMessage::CloseNps => "__squeaky_close_nps",
            WidgetMessage::SubmitNps => "__squeaky_submit_nps",
            WidgetMessage::SetStepNps { .. } => "__squeaky_set_step_nps",
            WidgetMessage::CloseSentiment => "__squeaky_close_sentiment",
            WidgetMessage::AcceptConsent => "__squeaky_accept_consent",
            WidgetMessage::RejectConsent => "__squeaky_reject_consent",
            WidgetMessage::SetHeightConsent { .. } => "__squeaky_set_height_consent",
        }
    }
}
