// src/orchestrator/context.rs
//! Collaborators the agent runs against
//!
//! Everything the orchestrator touches outside its own state is injected here
//! so the binary can wire real implementations and tests can wire fakes.

use crate::capture::provider::CaptureProvider;
use crate::capture::selector::{CssPathResolver, SelectorResolver};
use crate::identity::id::{IdSource, RandomIdSource};
use crate::identity::page::PageContext;
use crate::identity::storage::{MemoryStorage, Storage};
use crate::session::consent::{ConsentLayout, WidgetMessage};
use crate::session::feedback::{FeedbackPlan, FeedbackSettings, SurveyKind};
use crate::session::settings::SettingsSource;
use crate::transport::link::Connector;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::config::AgentConfig;
use std::sync::Arc;
use tracing::debug;

/// Renders consent and feedback widgets
///
/// Every method has a no-op default; a headless host implements nothing.
pub trait WidgetHost: Send {
    fn show_consent(&mut self, _layout: ConsentLayout) {}

    fn hide_consent(&mut self) {}

    /// Surveys eligible to show on the current page
    fn apply_feedback(&mut self, _plan: FeedbackPlan, _settings: &FeedbackSettings) {}

    fn open_survey(&mut self, _kind: SurveyKind) {}

    fn close_survey(&mut self, _kind: SurveyKind) {}

    /// Step and height changes reported by a widget frame
    fn resize(&mut self, message: &WidgetMessage) {
        debug!("Ignoring widget resize: {:?}", message);
    }
}

/// Host without any widget surface
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWidgets;

impl WidgetHost for NoWidgets {}

/// Everything `Agent::spawn` needs
pub struct AgentContext {
    pub config: AgentConfig,
    pub page: Arc<dyn PageContext>,
    pub storage: Arc<dyn Storage>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdSource>,
    pub resolver: Arc<dyn SelectorResolver>,
    pub settings: Arc<dyn SettingsSource>,
    pub connector: Arc<dyn Connector>,
    pub capture: Box<dyn CaptureProvider>,
    pub widgets: Box<dyn WidgetHost>,
}

impl AgentContext {
    /// Context with in-memory storage, the system clock and random ids
    pub fn new(
        config: AgentConfig,
        page: Arc<dyn PageContext>,
        settings: Arc<dyn SettingsSource>,
        connector: Arc<dyn Connector>,
        capture: Box<dyn CaptureProvider>,
    ) -> Self {
        Self {
            config,
            page,
            storage: Arc::new(MemoryStorage::new()),
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIdSource),
            resolver: Arc::new(CssPathResolver),
            settings,
            connector,
            capture,
            widgets: Box::new(NoWidgets),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SelectorResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_widgets(mut self, widgets: Box<dyn WidgetHost>) -> Self {
        self.widgets = widgets;
        self
    }
}
