// src/identity/visitor.rs
//! Visitor and session identity
//!
//! A `Visitor` is built once per page load. Identifiers are read from storage
//! and created when missing; the session id is discarded first when the last
//! qualifying interaction is older than the cutoff, so a returning visitor
//! never resumes a dead session.

use crate::identity::id::{generate_id, IdSource};
use crate::identity::page::{self, PageContext};
use crate::identity::storage::{
    Scope, Storage, CONSENT_KEY, LAST_EVENT_AT_KEY, SESSION_ID_KEY, VISITOR_ID_KEY,
};
use crate::utils::clock::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Caller-supplied attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Number(f64),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

/// Attributes attached to a visitor by `identify`
pub type ExternalAttributes = BTreeMap<String, AttributeValue>;

/// Which identifier to look up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Visitor,
    Session,
}

impl IdKind {
    fn location(&self) -> (Scope, &'static str) {
        match self {
            IdKind::Visitor => (Scope::Local, VISITOR_ID_KEY),
            IdKind::Session => (Scope::Session, SESSION_ID_KEY),
        }
    }
}

/// Identity state persisted in storage
#[derive(Clone)]
pub struct IdentityStore {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    cutoff: Duration,
}

impl fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityStore")
            .field("cutoff", &self.cutoff)
            .finish_non_exhaustive()
    }
}

impl IdentityStore {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, cutoff: Duration) -> Self {
        Self {
            storage,
            clock,
            cutoff,
        }
    }

    pub fn cutoff(&self) -> Duration {
        self.cutoff
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Return the stored id of `kind`, creating and persisting one if absent.
    ///
    /// The boolean is `true` when the id was created by this call.
    pub fn get_or_create(&self, kind: IdKind, ids: &dyn IdSource) -> (String, bool) {
        let (scope, key) = kind.location();
        let mut existing = self.storage.get(scope, key);

        if kind == IdKind::Session && self.should_start_new_session() {
            debug!("Last event is older than the cutoff, discarding session id");
            existing = None;
        }

        match existing {
            Some(id) if !id.is_empty() => (id, false),
            _ => {
                let id = generate_id(ids);
                self.storage.set(scope, key, &id);
                (id, true)
            }
        }
    }

    /// Timestamp of the last qualifying interaction
    pub fn last_event_at(&self) -> Option<i64> {
        self.storage
            .get(Scope::Local, LAST_EVENT_AT_KEY)
            .and_then(|value| value.parse().ok())
    }

    pub fn set_last_event_at(&self) {
        let now = self.clock.now_ms();
        self.storage
            .set(Scope::Local, LAST_EVENT_AT_KEY, &now.to_string());
    }

    /// More than `cutoff` has elapsed since the last qualifying interaction
    pub fn should_start_new_session(&self) -> bool {
        match self.last_event_at() {
            Some(last) => self.clock.now_ms() - last > self.cutoff.as_millis() as i64,
            None => false,
        }
    }

    pub fn delete_session_id(&self) {
        self.storage.remove(Scope::Session, SESSION_ID_KEY);
    }

    /// Persisted consent; `None` when never answered
    pub fn consent(&self) -> Option<bool> {
        self.storage
            .get(Scope::Local, CONSENT_KEY)
            .filter(|value| !value.is_empty())
            .map(|value| value == "true")
    }

    pub fn set_consent(&self, consent: bool) {
        self.storage
            .set(Scope::Local, CONSENT_KEY, if consent { "true" } else { "false" });
    }
}

/// Contextual attributes sent when a recording starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorObject {
    pub locale: String,
    pub device_x: u32,
    pub device_y: u32,
    pub viewport_x: u32,
    pub viewport_y: u32,
    pub referrer: Option<String>,
    pub useragent: String,
    pub timezone: String,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    pub gad: Option<String>,
    pub gclid: Option<String>,
}

/// Identity of the browsing entity for this page load
#[derive(Debug)]
pub struct Visitor {
    site_id: String,
    visitor_id: String,
    session_id: String,
    key: String,
    is_new_visitor: bool,
    is_new_session: bool,
    external_attributes: Option<ExternalAttributes>,
    store: IdentityStore,
}

impl Visitor {
    pub fn new(site_id: impl Into<String>, store: IdentityStore, ids: &dyn IdSource) -> Self {
        let site_id = site_id.into();
        let (visitor_id, is_new_visitor) = store.get_or_create(IdKind::Visitor, ids);
        let (session_id, is_new_session) = store.get_or_create(IdKind::Session, ids);
        let key = format!("{}::{}::{}", site_id, visitor_id, session_id);

        debug!(
            key = %key,
            is_new_visitor,
            is_new_session,
            "Visitor identified"
        );

        Self {
            site_id,
            visitor_id,
            session_id,
            key,
            is_new_visitor,
            is_new_session,
            external_attributes: None,
            store,
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `site_id::visitor_id::session_id`
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_new_visitor(&self) -> bool {
        self.is_new_visitor
    }

    pub fn is_new_session(&self) -> bool {
        self.is_new_session
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub fn consent(&self) -> Option<bool> {
        self.store.consent()
    }

    /// Connection parameters identifying this visitor to the collector
    pub fn params(&self) -> Vec<(String, String)> {
        vec![
            ("site_id".to_string(), self.site_id.clone()),
            ("visitor_id".to_string(), self.visitor_id.clone()),
            ("session_id".to_string(), self.session_id.clone()),
        ]
    }

    /// Stage attributes for the next emission, replacing anything unsent
    pub fn stage_attributes(&mut self, attributes: ExternalAttributes) {
        self.external_attributes = Some(attributes);
    }

    pub fn has_staged_attributes(&self) -> bool {
        self.external_attributes.is_some()
    }

    /// Take staged attributes; a second call returns `None`
    pub fn take_attributes(&mut self) -> Option<ExternalAttributes> {
        self.external_attributes.take()
    }

    pub fn to_object(&self, page: &dyn PageContext) -> VisitorObject {
        let (device_x, device_y) = page.screen();
        let (viewport_x, viewport_y) = page.viewport();

        VisitorObject {
            locale: page
                .language()
                .filter(|language| !language.is_empty())
                .unwrap_or_else(|| "zz-ZZ".to_string()),
            device_x,
            device_y,
            viewport_x,
            viewport_y,
            referrer: page::normalize_referrer(&page.referrer(), &page.origin()),
            useragent: page.user_agent(),
            timezone: page.timezone(),
            utm_source: page::campaign_parameter(page, "utm_source"),
            utm_medium: page::campaign_parameter(page, "utm_medium"),
            utm_campaign: page::campaign_parameter(page, "utm_campaign"),
            utm_content: page::campaign_parameter(page, "utm_content"),
            utm_term: page::campaign_parameter(page, "utm_term"),
            gad: page::campaign_parameter(page, "gad"),
            gclid: page::campaign_parameter(page, "gclid"),
        }
    }
}

/// Automated browsers and crawlers are never recorded
pub fn is_bot(page: &dyn PageContext) -> bool {
    let agent = page.user_agent().to_lowercase();
    page.webdriver()
        || ["bot", "crawler", "spider", "crawling"]
            .iter()
            .any(|marker| agent.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_numbers_keep_their_form() {
        let parsed: ExternalAttributes =
            serde_json::from_str(r#"{"age": 34, "score": 4.5, "name": "Jim"}"#).unwrap();

        assert_eq!(parsed["age"], AttributeValue::Integer(34));
        assert_eq!(parsed["score"], AttributeValue::Number(4.5));
        assert_eq!(
            serde_json::to_string(&parsed).unwrap(),
            r#"{"age":34,"name":"Jim","score":4.5}"#
        );
    }
    use crate::identity::id::SeededIdSource;
    use crate::identity::page::{PageState, SharedPage};
    use crate::identity::storage::MemoryStorage;
    use crate::utils::clock::ManualClock;

    const CUTOFF: Duration = Duration::from_secs(30 * 60);

    fn store(storage: &MemoryStorage, clock: &Arc<ManualClock>) -> IdentityStore {
        IdentityStore::new(Arc::new(storage.clone()), clock.clone(), CUTOFF)
    }

    #[test]
    fn test_new_visitor_and_session() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let ids = SeededIdSource::new(0.94650188893523);

        let visitor = Visitor::new("site_id", store(&storage, &clock), &ids);

        assert!(visitor.is_new_visitor());
        assert!(visitor.is_new_session());
        assert_eq!(visitor.visitor_id(), "y2nzpstozup");
        assert_eq!(visitor.session_id(), "y2nzpstozup");
        assert_eq!(visitor.key(), "site_id::y2nzpstozup::y2nzpstozup");
    }

    #[test]
    fn test_existing_visitor_new_session() {
        let storage = MemoryStorage::new();
        storage.set(Scope::Local, VISITOR_ID_KEY, "y2nzpstozup");
        let clock = Arc::new(ManualClock::new(1_000_000));
        let ids = SeededIdSource::new(0.533014828068594);

        let visitor = Visitor::new("site_id", store(&storage, &clock), &ids);

        assert!(!visitor.is_new_visitor());
        assert!(visitor.is_new_session());
        assert_eq!(visitor.visitor_id(), "y2nzpstozup");
        assert_eq!(visitor.session_id(), "j6sc8ekd9m");
        assert_eq!(visitor.key(), "site_id::y2nzpstozup::j6sc8ekd9m");
    }

    #[test]
    fn test_existing_visitor_existing_session() {
        let storage = MemoryStorage::new();
        storage.set(Scope::Local, VISITOR_ID_KEY, "y2nzpstozup");
        storage.set(Scope::Session, SESSION_ID_KEY, "j6sc8ekd9m");
        let clock = Arc::new(ManualClock::new(1_000_000));
        let ids = SeededIdSource::new(0.8004654844642498);

        let visitor = Visitor::new("site_id", store(&storage, &clock), &ids);

        assert!(!visitor.is_new_visitor());
        assert!(!visitor.is_new_session());
        assert_eq!(visitor.key(), "site_id::y2nzpstozup::j6sc8ekd9m");
    }

    #[test]
    fn test_session_id_stable_without_elapsed_time() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = store(&storage, &clock);
        store.set_last_event_at();

        let (first, created) = store.get_or_create(IdKind::Session, &SeededIdSource::new(0.1));
        assert!(created);

        for seed in [0.2, 0.3, 0.4] {
            let (id, created) = store.get_or_create(IdKind::Session, &SeededIdSource::new(seed));
            assert_eq!(id, first);
            assert!(!created);
        }
    }

    #[test]
    fn test_session_id_regenerated_after_cutoff() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = store(&storage, &clock);

        let (first, _) = store.get_or_create(IdKind::Session, &SeededIdSource::new(0.1));
        store.set_last_event_at();

        // Exactly at the cutoff the session is still alive
        clock.advance(CUTOFF.as_millis() as i64);
        assert!(!store.should_start_new_session());
        let (same, created) = store.get_or_create(IdKind::Session, &SeededIdSource::new(0.2));
        assert_eq!(same, first);
        assert!(!created);

        clock.advance(1);
        assert!(store.should_start_new_session());
        let (second, created) = store.get_or_create(IdKind::Session, &SeededIdSource::new(0.2));
        assert_ne!(second, first);
        assert!(created);
    }

    #[test]
    fn test_visitor_id_survives_cutoff() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = store(&storage, &clock);

        let (first, _) = store.get_or_create(IdKind::Visitor, &SeededIdSource::new(0.1));
        store.set_last_event_at();
        clock.advance(CUTOFF.as_millis() as i64 * 2);

        let (id, created) = store.get_or_create(IdKind::Visitor, &SeededIdSource::new(0.2));
        assert_eq!(id, first);
        assert!(!created);
    }

    #[test]
    fn test_no_last_event_never_stale() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(1_000_000));
        assert!(!store(&storage, &clock).should_start_new_session());
    }

    #[test]
    fn test_delete_session_id() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(0));
        let visitor = Visitor::new("site_id", store(&storage, &clock), &SeededIdSource::new(0.1));

        assert!(storage.get(Scope::Session, SESSION_ID_KEY).is_some());
        visitor.store().delete_session_id();
        assert!(storage.get(Scope::Session, SESSION_ID_KEY).is_none());
        assert!(storage.get(Scope::Local, VISITOR_ID_KEY).is_some());
    }

    #[test]
    fn test_consent_tri_state() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(0));
        let store = store(&storage, &clock);

        assert_eq!(store.consent(), None);

        store.set_consent(true);
        assert_eq!(store.consent(), Some(true));

        store.set_consent(false);
        assert_eq!(store.consent(), Some(false));

        storage.set(Scope::Local, CONSENT_KEY, "garbage");
        assert_eq!(store.consent(), Some(false));
    }

    #[test]
    fn test_params() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(0));
        let visitor = Visitor::new(
            "site_id",
            store(&storage, &clock),
            &SeededIdSource::new(0.6856535641319799),
        );

        assert_eq!(
            visitor.params(),
            vec![
                ("site_id".to_string(), "site_id".to_string()),
                ("visitor_id".to_string(), "oolup30n8v".to_string()),
                ("session_id".to_string(), "oolup30n8v".to_string()),
            ]
        );
    }

    #[test]
    fn test_staged_attributes_are_taken_once() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(0));
        let mut visitor =
            Visitor::new("site_id", store(&storage, &clock), &SeededIdSource::new(0.1));

        let mut attributes = ExternalAttributes::new();
        attributes.insert("id".to_string(), "id".into());
        attributes.insert("firstName".to_string(), "Jim".into());
        visitor.stage_attributes(attributes.clone());

        assert!(visitor.has_staged_attributes());
        assert_eq!(visitor.take_attributes(), Some(attributes));
        assert_eq!(visitor.take_attributes(), None);
    }

    #[test]
    fn test_to_object() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(0));
        let visitor = Visitor::new("site_id", store(&storage, &clock), &SeededIdSource::new(0.1));

        let page = SharedPage::new(PageState::from_url(
            "http://localhost/?utm_campaign=test&utm_content=test&utm_medium=organic&utm_source=google&utm_term=test",
        ));
        page.update(|state| {
            state.referrer = "https://google.com/".to_string();
            state.timezone = "Europe/London".to_string();
            state.screen = (1024, 768);
            state.viewport = (1024, 768);
        });

        let object = visitor.to_object(&page);
        assert_eq!(object.locale, "en-GB");
        assert_eq!(object.device_x, 1024);
        assert_eq!(object.viewport_y, 768);
        assert_eq!(object.referrer.as_deref(), Some("https://google.com"));
        assert_eq!(object.timezone, "Europe/London");
        assert_eq!(object.utm_campaign.as_deref(), Some("test"));
        assert_eq!(object.utm_medium.as_deref(), Some("organic"));
        assert_eq!(object.utm_source.as_deref(), Some("google"));
        assert_eq!(object.gclid, None);
    }

    #[test]
    fn test_locale_fallback() {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(0));
        let visitor = Visitor::new("site_id", store(&storage, &clock), &SeededIdSource::new(0.1));

        let page = SharedPage::default();
        page.update(|state| state.language = None);

        assert_eq!(visitor.to_object(&page).locale, "zz-ZZ");
    }

    #[test]
    fn test_bot_detection() {
        let page = SharedPage::default();
        assert!(!is_bot(&page));

        page.update(|state| state.user_agent = "Mozilla/5.0 (compatible; Googlebot/2.1)".to_string());
        assert!(is_bot(&page));

        page.update(|state| {
            state.user_agent = "Mozilla/5.0".to_string();
            state.webdriver = true;
        });
        assert!(is_bot(&page));
    }
}
