// src/session/settings.rs
//! Site session settings
//!
//! Settings are fetched once at startup from the GraphQL gateway (or read
//! from a local file) and frozen. Missing fields are filled at the boundary by
//! `merge_with_defaults`; nothing downstream deals with partial settings.

use crate::identity::page::same_origin;
use crate::session::consent::ConsentConfig;
use crate::session::feedback::FeedbackSettings;
use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

const SETTINGS_FIELDS: &str = r#"
    url
    cssSelectorBlacklist
    anonymiseFormInputs
    anonymiseText
    ingestEnabled
    invalidOrExceededPlan
    magicErasureEnabled
    feedback {
      npsEnabled
      npsAccentColor
      npsSchedule
      npsPhrase
      npsFollowUpEnabled
      npsLayout
      npsExcludedPages
      sentimentEnabled
      sentimentAccentColor
      sentimentExcludedPages
      sentimentLayout
      sentimentDevices
      sentimentSchedule
    }
    consent {
      consentMethod
      layout
    }
"#;

/// Settings as returned by the gateway; any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawSiteSessionSettings {
    pub url: Option<String>,
    pub css_selector_blacklist: Option<Vec<String>>,
    pub anonymise_form_inputs: Option<bool>,
    pub anonymise_text: Option<bool>,
    pub ingest_enabled: Option<bool>,
    pub invalid_or_exceeded_plan: Option<bool>,
    pub magic_erasure_enabled: Option<bool>,
    pub feedback: Option<FeedbackSettings>,
    pub consent: Option<ConsentConfig>,
}

impl RawSiteSessionSettings {
    /// Fill every missing field with its default; present values are kept
    pub fn merge_with_defaults(self, origin: &str) -> SiteSessionSettings {
        SiteSessionSettings {
            url: self
                .url
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| origin.to_string()),
            css_selector_blacklist: self.css_selector_blacklist.unwrap_or_default(),
            anonymise_form_inputs: self.anonymise_form_inputs.unwrap_or(true),
            anonymise_text: self.anonymise_text.unwrap_or(false),
            ingest_enabled: self.ingest_enabled.unwrap_or(true),
            invalid_or_exceeded_plan: self.invalid_or_exceeded_plan.unwrap_or(false),
            magic_erasure_enabled: self.magic_erasure_enabled.unwrap_or(false),
            feedback: self.feedback,
            consent: self.consent.unwrap_or_default(),
        }
    }
}

/// Frozen settings snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSessionSettings {
    /// Origin the site is registered for
    pub url: String,

    /// Selectors the capture provider must block
    pub css_selector_blacklist: Vec<String>,

    pub anonymise_form_inputs: bool,

    pub anonymise_text: bool,

    pub ingest_enabled: bool,

    pub invalid_or_exceeded_plan: bool,

    /// Redaction tool is available to site owners
    pub magic_erasure_enabled: bool,

    pub feedback: Option<FeedbackSettings>,

    pub consent: ConsentConfig,
}

/// Why settings forbid recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SettingsRejection {
    #[error("ingestion is disabled for this site")]
    IngestDisabled,

    #[error("plan is invalid or exceeded")]
    PlanExceeded,

    #[error("page origin does not match the site url")]
    OriginMismatch,
}

impl SiteSessionSettings {
    /// Recording is allowed for a page on `origin`
    pub fn validate(&self, origin: &str) -> std::result::Result<(), SettingsRejection> {
        if !self.ingest_enabled {
            return Err(SettingsRejection::IngestDisabled);
        }

        if self.invalid_or_exceeded_plan {
            return Err(SettingsRejection::PlanExceeded);
        }

        if !same_origin(&self.url, origin) {
            return Err(SettingsRejection::OriginMismatch);
        }

        Ok(())
    }
}

/// Where settings come from
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn fetch(&self, site_id: &str) -> Result<RawSiteSessionSettings>;
}

/// GraphQL query for one site
pub fn settings_query(site_id: &str) -> String {
    // JSON string quoting doubles as GraphQL string quoting
    let site_id = serde_json::to_string(site_id).unwrap_or_else(|_| "\"\"".to_string());
    format!("{{ siteSessionSettings(siteId: {}) {{ {} }} }}", site_id, SETTINGS_FIELDS)
}

/// Extract settings from a GraphQL response, or accept bare settings
pub fn parse_settings(value: Value) -> Result<RawSiteSessionSettings> {
    let settings = if value.get("data").is_some() {
        value
            .pointer("/data/siteSessionSettings")
            .cloned()
            .filter(|settings| !settings.is_null())
            .ok_or_else(|| {
                AgentError::SettingsFetchFailed("Response has no siteSessionSettings".to_string())
            })?
    } else {
        value
    };

    Ok(serde_json::from_value(settings)?)
}

/// Settings fetched from the gateway over HTTP
pub struct HttpSettingsClient {
    url: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpSettingsClient {
    /// `url` is the full GraphQL endpoint, e.g. `http://host/gateway/graphql`
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build_http();

        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl SettingsSource for HttpSettingsClient {
    async fn fetch(&self, site_id: &str) -> Result<RawSiteSessionSettings> {
        let body = serde_json::to_vec(&serde_json::json!({ "query": settings_query(site_id) }))?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.url.as_str())
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| AgentError::SettingsFetchFailed(format!("Request build error: {}", e)))?;

        debug!("Fetching settings for {} from {}", site_id, self.url);

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| AgentError::SettingsFetchFailed(format!("Request failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(AgentError::SettingsFetchFailed(
                "API returned non 200".to_string(),
            ));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| AgentError::SettingsFetchFailed(format!("Response body error: {}", e)))?
            .to_bytes();

        let value: Value = serde_json::from_slice(&body)?;
        let settings = parse_settings(value)?;

        info!("Fetched session settings for {}", site_id);
        Ok(settings)
    }
}

/// Settings read from a JSON file
#[derive(Debug, Clone)]
pub struct FileSettingsSource {
    path: PathBuf,
}

impl FileSettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsSource for FileSettingsSource {
    async fn fetch(&self, _site_id: &str) -> Result<RawSiteSessionSettings> {
        let contents = tokio::fs::read(&self.path).await.map_err(|e| {
            AgentError::SettingsFetchFailed(format!("Failed to read {:?}: {}", self.path, e))
        })?;

        parse_settings(serde_json::from_slice(&contents)?)
    }
}

/// Settings held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticSettingsSource {
    settings: RawSiteSessionSettings,
}

impl StaticSettingsSource {
    pub fn new(settings: RawSiteSessionSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SettingsSource for StaticSettingsSource {
    async fn fetch(&self, _site_id: &str) -> Result<RawSiteSessionSettings> {
        Ok(self.settings.clone())
    }
}
