// src/session/feedback.rs
//! Feedback survey scheduling
//!
//! Decides which survey widgets the host should show on the current page.
//! Rendering is entirely up to the `WidgetHost`; this module only answers
//! "show / hide / not allowed".

use crate::identity::page::DeviceType;
use crate::identity::storage::{Scope, Storage};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Local-scope key holding the ISO timestamp of the last NPS submission
pub const NPS_LAST_SUBMITTED_KEY: &str = "squeaky_nps_last_submitted_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NpsSchedule {
    #[default]
    Once,
    Monthly,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentSchedule {
    #[default]
    Always,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NpsLayout {
    #[default]
    FullWidth,
    Boxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLayout {
    #[default]
    RightMiddle,
    RightBottom,
    LeftMiddle,
    LeftBottom,
}

/// Survey settings delivered with the site settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedbackSettings {
    pub nps_enabled: bool,
    pub nps_accent_color: String,
    pub nps_schedule: NpsSchedule,
    pub nps_phrase: String,
    pub nps_follow_up_enabled: bool,
    pub nps_layout: NpsLayout,
    pub nps_excluded_pages: Vec<String>,
    pub sentiment_enabled: bool,
    pub sentiment_accent_color: String,
    pub sentiment_excluded_pages: Vec<String>,
    pub sentiment_layout: SentimentLayout,
    /// Device classes (`desktop`, `tablet`, `mobile`) that get the widget
    pub sentiment_devices: Vec<String>,
    pub sentiment_schedule: SentimentSchedule,
}

/// Survey kind, also the name used by custom triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurveyKind {
    Nps,
    Sentiment,
}

impl SurveyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyKind::Nps => "nps",
            SurveyKind::Sentiment => "sentiment",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "nps" => Some(SurveyKind::Nps),
            "sentiment" => Some(SurveyKind::Sentiment),
            _ => None,
        }
    }
}

/// Which widgets to show on the current page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedbackPlan {
    pub show_nps: bool,
    pub show_sentiment: bool,
}

impl FeedbackPlan {
    pub fn shows(&self, kind: SurveyKind) -> bool {
        match kind {
            SurveyKind::Nps => self.show_nps,
            SurveyKind::Sentiment => self.show_sentiment,
        }
    }
}

/// Survey eligibility for one visitor
#[derive(Debug, Clone)]
pub struct FeedbackScheduler {
    settings: FeedbackSettings,
    nps_eligible: bool,
    sentiment_eligible: bool,
}

impl FeedbackScheduler {
    /// Decide eligibility once, at activation
    pub fn new(
        settings: FeedbackSettings,
        device: DeviceType,
        storage: &dyn Storage,
        now: DateTime<Utc>,
    ) -> Self {
        let last_submitted = storage
            .get(Scope::Local, NPS_LAST_SUBMITTED_KEY)
            .and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
            .map(|value| value.with_timezone(&Utc));

        let nps_eligible =
            settings.nps_enabled && nps_due(settings.nps_schedule, last_submitted, now);

        let sentiment_eligible = settings.sentiment_enabled
            && settings
                .sentiment_devices
                .iter()
                .any(|name| name == device.as_str());

        debug!(
            "Feedback eligibility: nps={} sentiment={}",
            nps_eligible, sentiment_eligible
        );

        Self {
            settings,
            nps_eligible,
            sentiment_eligible,
        }
    }

    pub fn settings(&self) -> &FeedbackSettings {
        &self.settings
    }

    /// Widgets to show automatically on `pathname`
    pub fn plan(&self, pathname: &str) -> FeedbackPlan {
        FeedbackPlan {
            show_nps: self.nps_eligible
                && self.settings.nps_schedule != NpsSchedule::Custom
                && !excluded(&self.settings.nps_excluded_pages, pathname),
            show_sentiment: self.sentiment_eligible
                && self.settings.sentiment_schedule != SentimentSchedule::Custom
                && !excluded(&self.settings.sentiment_excluded_pages, pathname),
        }
    }

    /// Custom triggers only open widgets scheduled as `custom`
    pub fn custom_trigger_allowed(&self, kind: SurveyKind) -> bool {
        match kind {
            SurveyKind::Nps => {
                self.nps_eligible && self.settings.nps_schedule == NpsSchedule::Custom
            }
            SurveyKind::Sentiment => {
                self.sentiment_eligible
                    && self.settings.sentiment_schedule == SentimentSchedule::Custom
            }
        }
    }
}

/// Record an NPS submission (or dismissal)
pub fn record_nps_submission(storage: &dyn Storage, now: DateTime<Utc>) {
    storage.set(Scope::Local, NPS_LAST_SUBMITTED_KEY, &now.to_rfc3339());
}

fn nps_due(schedule: NpsSchedule, last_submitted: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let last = match last_submitted {
        Some(last) => last,
        None => return true,
    };

    match schedule {
        NpsSchedule::Once => false,
        NpsSchedule::Custom => true,
        NpsSchedule::Monthly => now
            .checked_sub_months(Months::new(1))
            .map_or(false, |month_ago| last <= month_ago),
    }
}

fn excluded(pages: &[String], pathname: &str) -> bool {
    pages.iter().any(|page| page == pathname)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::storage::MemoryStorage;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn settings() -> FeedbackSettings {
        FeedbackSettings {
            nps_enabled: true,
            nps_schedule: NpsSchedule::Monthly,
            nps_excluded_pages: vec!["/checkout".to_string()],
            sentiment_enabled: true,
            sentiment_devices: vec!["desktop".to_string(), "tablet".to_string()],
            sentiment_excluded_pages: vec!["/admin".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_respects_excluded_pages() {
        let storage = MemoryStorage::new();
        let scheduler = FeedbackScheduler::new(settings(), DeviceType::Desktop, &storage, now());

        assert_eq!(
            scheduler.plan("/"),
            FeedbackPlan {
                show_nps: true,
                show_sentiment: true
            }
        );
        assert!(!scheduler.plan("/checkout").show_nps);
        assert!(scheduler.plan("/checkout").show_sentiment);
        assert!(!scheduler.plan("/admin").show_sentiment);
    }

    #[test]
    fn test_sentiment_device_filter() {
        let storage = MemoryStorage::new();
        let scheduler = FeedbackScheduler::new(settings(), DeviceType::Mobile, &storage, now());

        assert!(!scheduler.plan("/").show_sentiment);
        assert!(scheduler.plan("/").show_nps);
    }

    #[test]
    fn test_disabled_surveys_never_show() {
        let storage = MemoryStorage::new();
        let scheduler = FeedbackScheduler::new(
            FeedbackSettings::default(),
            DeviceType::Desktop,
            &storage,
            now(),
        );

        assert_eq!(scheduler.plan("/"), FeedbackPlan::default());
        assert!(!scheduler.custom_trigger_allowed(SurveyKind::Nps));
    }

    #[test]
    fn test_custom_schedule_waits_for_trigger() {
        let storage = MemoryStorage::new();
        let mut custom = settings();
        custom.nps_schedule = NpsSchedule::Custom;
        custom.sentiment_schedule = SentimentSchedule::Custom;

        let scheduler = FeedbackScheduler::new(custom, DeviceType::Desktop, &storage, now());

        assert_eq!(scheduler.plan("/"), FeedbackPlan::default());
        assert!(scheduler.custom_trigger_allowed(SurveyKind::Nps));
        assert!(scheduler.custom_trigger_allowed(SurveyKind::Sentiment));

        // Automatic schedules ignore custom triggers
        let scheduler = FeedbackScheduler::new(settings(), DeviceType::Desktop, &storage, now());
        assert!(!scheduler.custom_trigger_allowed(SurveyKind::Nps));
    }

    #[test]
    fn test_nps_once_after_submission() {
        let storage = MemoryStorage::new();
        let mut once = settings();
        once.nps_schedule = NpsSchedule::Once;

        record_nps_submission(&storage, now() - chrono::Duration::days(400));
        let scheduler = FeedbackScheduler::new(once, DeviceType::Desktop, &storage, now());

        assert!(!scheduler.plan("/").show_nps);
    }

    #[test]
    fn test_nps_monthly_after_submission() {
        let storage = MemoryStorage::new();

        record_nps_submission(&storage, now() - chrono::Duration::days(3));
        let scheduler = FeedbackScheduler::new(settings(), DeviceType::Desktop, &storage, now());
        assert!(!scheduler.plan("/").show_nps);

        record_nps_submission(&storage, now() - chrono::Duration::days(45));
        let scheduler = FeedbackScheduler::new(settings(), DeviceType::Desktop, &storage, now());
        assert!(scheduler.plan("/").show_nps);
    }

    #[test]
    fn test_settings_deserialize_camel_case() {
        let settings: FeedbackSettings = serde_json::from_value(serde_json::json!({
            "npsEnabled": true,
            "npsSchedule": "custom",
            "npsLayout": "boxed",
            "sentimentLayout": "left_bottom",
            "sentimentDevices": ["desktop"],
        }))
        .unwrap();

        assert!(settings.nps_enabled);
        assert_eq!(settings.nps_schedule, NpsSchedule::Custom);
        assert_eq!(settings.nps_layout, NpsLayout::Boxed);
        assert_eq!(settings.sentiment_layout, SentimentLayout::LeftBottom);
        assert_eq!(settings.sentiment_schedule, SentimentSchedule::Always);
    }

    #[test]
    fn test_survey_kind_parse() {
        assert_eq!(SurveyKind::parse("nps"), Some(SurveyKind::Nps));
        assert_eq!(SurveyKind::parse("sentiment"), Some(SurveyKind::Sentiment));
        assert_eq!(SurveyKind::parse("poll"), None);
        assert_eq!(SurveyKind::Nps.as_str(), "nps");
    }
}
