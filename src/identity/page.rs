// src/identity/page.rs
//! Page context
//!
//! Everything the agent knows about the hosting page comes through
//! `PageContext`. Derived attributes (device type, referrer, campaign
//! parameters) are pure functions over it and are never cached.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use url::{form_urlencoded, Url};

/// Viewport width below which a device counts as mobile
pub const MOBILE_MAX_WIDTH: u32 = 800;

/// Viewport width below which a device counts as a tablet
pub const TABLET_MAX_WIDTH: u32 = 1024;

/// Campaign parameters captured from the query string
pub const CAMPAIGN_PARAMETERS: [&str; 7] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    "gad",
    "gclid",
];

/// Read-only view of the hosting page
pub trait PageContext: Send + Sync {
    /// Scheme, host and port, e.g. `https://www.example.com`
    fn origin(&self) -> String;

    /// Path component, always starting with `/`
    fn pathname(&self) -> String;

    /// Query string including the leading `?`, or empty
    fn search(&self) -> String;

    /// Full location
    fn href(&self) -> String {
        format!("{}{}{}", self.origin(), self.pathname(), self.search())
    }

    /// `document.referrer`; empty when there is none
    fn referrer(&self) -> String;

    /// Inner window size
    fn viewport(&self) -> (u32, u32);

    /// Screen size
    fn screen(&self) -> (u32, u32);

    /// Current scroll offset
    fn scroll_offset(&self) -> (f64, f64);

    fn language(&self) -> Option<String>;

    fn user_agent(&self) -> String;

    fn timezone(&self) -> String;

    fn has_focus(&self) -> bool;

    /// Browser is under automation
    fn webdriver(&self) -> bool;
}

/// Device class derived from viewport width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    /// Classify a viewport width; recomputed on every call
    pub fn from_width(width: u32) -> Self {
        if width < MOBILE_MAX_WIDTH {
            DeviceType::Mobile
        } else if width < TABLET_MAX_WIDTH {
            DeviceType::Tablet
        } else {
            DeviceType::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }
}

/// Device class of the page's current viewport
pub fn device_type(page: &dyn PageContext) -> DeviceType {
    DeviceType::from_width(page.viewport().0)
}

/// Drop the first `www.` so `www.example.com` and `example.com` compare equal
pub fn strip_www(value: &str) -> String {
    value.replacen("www.", "", 1)
}

/// External referrer, or `None` for empty and same-site referrers
pub fn normalize_referrer(referrer: &str, origin: &str) -> Option<String> {
    if referrer.is_empty() || strip_www(referrer).starts_with(&strip_www(origin)) {
        return None;
    }

    Some(referrer.strip_suffix('/').unwrap_or(referrer).to_string())
}

/// Whether two origins name the same site, ignoring `www.` and a trailing `/`
pub fn same_origin(a: &str, b: &str) -> bool {
    let a = strip_www(a);
    let b = strip_www(b);
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Decode an `application/x-www-form-urlencoded` query string
pub fn parse_query(search: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(search.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}

/// Value of a campaign parameter in the current query string
pub fn campaign_parameter(page: &dyn PageContext, name: &str) -> Option<String> {
    if !CAMPAIGN_PARAMETERS.contains(&name) {
        return None;
    }

    parse_query(&page.search())
        .into_iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value)
        .last()
        .filter(|value| !value.is_empty())
}

/// Mutable page state
#[derive(Debug, Clone)]
pub struct PageState {
    pub origin: String,
    pub pathname: String,
    pub search: String,
    pub referrer: String,
    pub viewport: (u32, u32),
    pub screen: (u32, u32),
    pub scroll_offset: (f64, f64),
    pub language: Option<String>,
    pub user_agent: String,
    pub timezone: String,
    pub has_focus: bool,
    pub webdriver: bool,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            pathname: "/".to_string(),
            search: String::new(),
            referrer: String::new(),
            viewport: (1024, 768),
            screen: (1024, 768),
            scroll_offset: (0.0, 0.0),
            language: Some("en-GB".to_string()),
            user_agent: format!("squeaky-agent/{}", env!("CARGO_PKG_VERSION")),
            timezone: "UTC".to_string(),
            has_focus: true,
            webdriver: false,
        }
    }
}

impl PageState {
    /// Build from a full URL such as `https://example.com/pricing?utm_source=x`
    ///
    /// An unparseable URL leaves the default location in place.
    pub fn from_url(url: &str) -> Self {
        let mut state = Self::default();

        match Url::parse(url) {
            Ok(url) => state.set_location(&url),
            Err(e) => warn!("Ignoring page URL {:?}: {}", url, e),
        }

        state
    }

    fn set_location(&mut self, url: &Url) {
        self.origin = url.origin().ascii_serialization();
        self.pathname = url.path().to_string();
        self.search = match url.query() {
            Some(query) if !query.is_empty() => format!("?{}", query),
            _ => String::new(),
        };
    }
}

/// Page whose state can be changed by the host (navigation, focus, resize)
#[derive(Debug, Clone, Default)]
pub struct SharedPage {
    state: Arc<RwLock<PageState>>,
}

impl SharedPage {
    pub fn new(state: PageState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Client-side navigation to `path_and_query`, resolved against the current location
    pub fn navigate(&self, path_and_query: &str) {
        let mut state = self.state.write();
        let current = format!("{}{}{}", state.origin, state.pathname, state.search);

        match Url::parse(&current).and_then(|base| base.join(path_and_query)) {
            Ok(url) => state.set_location(&url),
            Err(e) => warn!("Ignoring navigation to {:?}: {}", path_and_query, e),
        }
    }

    pub fn set_focus(&self, focused: bool) {
        self.state.write().has_focus = focused;
    }

    pub fn set_viewport(&self, width: u32, height: u32) {
        self.state.write().viewport = (width, height);
    }

    pub fn set_scroll_offset(&self, x: f64, y: f64) {
        self.state.write().scroll_offset = (x, y);
    }

    pub fn update(&self, f: impl FnOnce(&mut PageState)) {
        f(&mut self.state.write());
    }
}

impl PageContext for SharedPage {
    fn origin(&self) -> String {
        self.state.read().origin.clone()
    }

    fn pathname(&self) -> String {
        self.state.read().pathname.clone()
    }

    fn search(&self) -> String {
        self.state.read().search.clone()
    }

    fn referrer(&self) -> String {
        self.state.read().referrer.clone()
    }

    fn viewport(&self) -> (u32, u32) {
        self.state.read().viewport
    }

    fn screen(&self) -> (u32, u32) {
        self.state.read().screen
    }

    fn scroll_offset(&self) -> (f64, f64) {
        self.state.read().scroll_offset
    }

    fn language(&self) -> Option<String> {
        self.state.read().language.clone()
    }

    fn user_agent(&self) -> String {
        self.state.read().user_agent.clone()
    }

    fn timezone(&self) -> String {
        self.state.read().timezone.clone()
    }

    fn has_focus(&self) -> bool {
        self.state.read().has_focus
    }

    fn webdriver(&self) -> bool {
        self.state.read().webdriver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_thresholds() {
        assert_eq!(DeviceType::from_width(1024), DeviceType::Desktop);
        assert_eq!(DeviceType::from_width(1280), DeviceType::Desktop);
        assert_eq!(DeviceType::from_width(900), DeviceType::Tablet);
        assert_eq!(DeviceType::from_width(800), DeviceType::Tablet);
        assert_eq!(DeviceType::from_width(799), DeviceType::Mobile);
        assert_eq!(DeviceType::from_width(480), DeviceType::Mobile);
    }

    #[test]
    fn test_device_type_follows_viewport() {
        let page = SharedPage::default();
        assert_eq!(device_type(&page), DeviceType::Desktop);

        page.set_viewport(480, 800);
        assert_eq!(device_type(&page), DeviceType::Mobile);
    }

    #[test]
    fn test_referrer_normalization() {
        let origin = "http://localhost";

        assert_eq!(
            normalize_referrer("https://google.com/", origin).as_deref(),
            Some("https://google.com")
        );
        assert_eq!(normalize_referrer("", origin), None);
        assert_eq!(normalize_referrer("http://localhost/pricing", origin), None);
    }

    #[test]
    fn test_referrer_same_site_ignores_www() {
        assert_eq!(
            normalize_referrer("https://www.example.com/blog/", "https://example.com"),
            None
        );
        assert_eq!(
            normalize_referrer("https://example.com/", "https://www.example.com"),
            None
        );
        assert_eq!(
            normalize_referrer("https://other.com/path/", "https://example.com").as_deref(),
            Some("https://other.com/path")
        );
    }

    #[test]
    fn test_same_origin() {
        assert!(same_origin("https://www.example.com", "https://example.com"));
        assert!(same_origin("https://example.com/", "https://example.com"));
        assert!(!same_origin("https://example.com", "https://example.org"));
    }

    #[test]
    fn test_parse_query() {
        let params = parse_query("?utm_source=google&utm_term=red+shoes&q=a%20b&flag");
        assert_eq!(
            params,
            vec![
                ("utm_source".to_string(), "google".to_string()),
                ("utm_term".to_string(), "red shoes".to_string()),
                ("q".to_string(), "a b".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_campaign_parameter() {
        let page = SharedPage::new(PageState::from_url(
            "https://example.com/?utm_campaign=test&utm_medium=organic&other=1",
        ));

        assert_eq!(campaign_parameter(&page, "utm_campaign").as_deref(), Some("test"));
        assert_eq!(campaign_parameter(&page, "utm_medium").as_deref(), Some("organic"));
        assert_eq!(campaign_parameter(&page, "utm_source"), None);
        // Not a campaign parameter
        assert_eq!(campaign_parameter(&page, "other"), None);
    }

    #[test]
    fn test_page_state_from_url() {
        let state = PageState::from_url("https://www.example.com/pricing?plan=pro#faq");
        assert_eq!(state.origin, "https://www.example.com");
        assert_eq!(state.pathname, "/pricing");
        assert_eq!(state.search, "?plan=pro");

        let state = PageState::from_url("https://example.com");
        assert_eq!(state.origin, "https://example.com");
        assert_eq!(state.pathname, "/");
        assert_eq!(state.search, "");
    }

    #[test]
    fn test_navigate_updates_location() {
        let page = SharedPage::new(PageState::from_url("https://example.com/"));
        page.navigate("/checkout?step=2");

        assert_eq!(page.pathname(), "/checkout");
        assert_eq!(page.href(), "https://example.com/checkout?step=2");

        page.navigate("/pricing#plans");
        assert_eq!(page.href(), "https://example.com/pricing");
    }

    #[test]
    fn test_unparseable_url_keeps_default_location() {
        let state = PageState::from_url("not a url");
        assert_eq!(state.origin, "http://localhost");
        assert_eq!(state.pathname, "/");
    }
}
