// src/orchestrator/recorder.rs
//! The recording actor
//!
//! Runs once settings and consent allow recording. One task owns every piece
//! of mutable pipeline state and reacts to a single command queue plus the
//! transport's notifications and three timers:
//!
//! ```text
//!  commands ───┐
//!  channel ────┤                ┌─► classify ─► enrich ─► envelope ─► channel
//!  cutoff ─────┼─► select! ─────┤
//!  throttle ───┤                └─► focus / blur / navigation / widgets
//!  nav poll ───┘
//! ```
//!
//! Capture runs only while the channel is open and the page has focus. Every
//! capture start gets a new epoch; events still queued from an earlier start
//! are dropped.

use crate::capture::classifier::{classify, enrich, meta_href, EventClass};
use crate::capture::event::RawEvent;
use crate::capture::provider::{CaptureConfig, CaptureProvider, CaptureSink};
use crate::capture::selector::SelectorResolver;
use crate::capture::throttle::Throttle;
use crate::identity::page::{device_type, PageContext};
use crate::identity::storage::Storage;
use crate::identity::visitor::{ExternalAttributes, Visitor};
use crate::observability::MUTATIONS_COALESCED;
use crate::orchestrator::agent::AgentOutcome;
use crate::orchestrator::context::{AgentContext, WidgetHost};
use crate::orchestrator::handle::Command;
use crate::session::consent::{self, WidgetMessage};
use crate::session::feedback::{record_nps_submission, FeedbackScheduler, SurveyKind};
use crate::session::lifecycle::{SessionLifecycle, SessionTeardown, TimerOutcome};
use crate::session::settings::SiteSessionSettings;
use crate::transport::channel::{ChannelEvent, ReconnectPolicy, TransportChannel};
use crate::transport::envelope::{Envelope, PageError};
use crate::transport::link::ConnectRequest;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// How long a closing channel may take to flush
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Where capture stands relative to the channel and page focus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Channel not open
    Offline,

    /// Channel open, waiting for the page to gain focus
    AwaitingFocus,

    Capturing { epoch: u64 },

    /// Stopped by blur or a failed start; focus restarts it
    Paused,

    /// Never restarts
    Halted,
}

/// Side effects of session termination, borrowed from the recorder
struct Teardown<'a> {
    channel: &'a TransportChannel,
    capture: &'a mut Box<dyn CaptureProvider>,
    throttle: &'a mut Throttle<RawEvent>,
    capturing: bool,
    timestamp: i64,
}

impl SessionTeardown for Teardown<'_> {
    fn emit_inactivity(&mut self) {
        self.channel.send(&Envelope::inactivity(self.timestamp));
    }

    fn close_transport(&mut self) {
        self.channel.close();
    }

    fn stop_capture(&mut self) {
        self.throttle.cancel();
        if self.capturing {
            self.capture.stop();
        }
    }
}

pub(crate) struct Recorder {
    page: Arc<dyn PageContext>,
    storage: Arc<dyn Storage>,
    resolver: Arc<dyn SelectorResolver>,
    capture: Box<dyn CaptureProvider>,
    widgets: Box<dyn WidgetHost>,
    visitor: Visitor,
    capture_config: CaptureConfig,
    feedback: Option<FeedbackScheduler>,
    channel: TransportChannel,
    channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    sink_commands: mpsc::WeakUnboundedSender<Command>,
    lifecycle: SessionLifecycle,
    throttle: Throttle<RawEvent>,
    navigation_poll: Duration,
    state: CaptureState,
    epoch: u64,
    last_pathname: String,
    last_pageview: Option<String>,
}

impl Recorder {
    /// Connect the channel and plan feedback widgets
    pub(crate) fn activate(
        context: AgentContext,
        visitor: Visitor,
        settings: SiteSessionSettings,
        sink_commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        let AgentContext {
            config,
            page,
            storage,
            resolver,
            connector,
            capture,
            mut widgets,
            ..
        } = context;

        info!("Activating recorder for {}", visitor.key());

        let (events, channel_events) = mpsc::unbounded_channel();
        let request = ConnectRequest::new(config.collector.path.clone(), visitor.params());
        let policy = ReconnectPolicy {
            max_attempts: config.collector.max_reconnect_attempts,
            step: Duration::from_millis(config.collector.reconnect_step_ms),
        };
        let channel = TransportChannel::connect(connector, request, policy, events);

        let last_pathname = page.pathname();
        let now = wall_clock(visitor.store().now_ms());

        let feedback = settings.feedback.clone().map(|feedback| {
            FeedbackScheduler::new(feedback, device_type(page.as_ref()), storage.as_ref(), now)
        });

        if let Some(feedback) = &feedback {
            widgets.apply_feedback(feedback.plan(&last_pathname), feedback.settings());
        }

        Self {
            page,
            storage,
            resolver,
            capture,
            widgets,
            visitor,
            capture_config: CaptureConfig::from_settings(&settings),
            feedback,
            channel,
            channel_events,
            sink_commands,
            lifecycle: SessionLifecycle::new(config.session.check_interval()),
            throttle: Throttle::new(config.session.throttle_window()),
            navigation_poll: config.session.navigation_poll(),
            state: CaptureState::Offline,
            epoch: 0,
            last_pathname,
            last_pageview: None,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> AgentOutcome {
        let mut navigation = tokio::time::interval(self.navigation_poll);
        navigation.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let cutoff = self.lifecycle.deadline();
            let flush = self.throttle.deadline();

            let outcome = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => Some(AgentOutcome::Shutdown),
                },

                Some(event) = self.channel_events.recv() => self.handle_channel_event(event),

                _ = sleep_until(cutoff) => self.on_cutoff_timer(),

                _ = sleep_until(flush) => {
                    self.flush_throttle();
                    None
                }

                _ = navigation.tick() => {
                    self.check_navigation();
                    None
                }
            };

            if let Some(outcome) = outcome {
                return self.finish(outcome).await;
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Option<AgentOutcome> {
        match command {
            Command::Capture { epoch, event } => self.on_capture(epoch, event),
            Command::Focus => return self.on_focus(),
            Command::Blur => self.on_blur(),
            Command::Navigate => self.check_navigation(),
            Command::PageError(error) => self.on_page_error(&error),
            Command::Identify(attributes) => self.visitor.stage_attributes(attributes),
            Command::AddEvent { name, attributes } => self.add_event(&name, &attributes),
            Command::AddPageView => {
                let href = self.page.href();
                self.emit_pageview(href);
            }
            Command::AcceptConsent => self.on_widget_message(WidgetMessage::AcceptConsent),
            Command::RejectConsent => self.on_widget_message(WidgetMessage::RejectConsent),
            Command::TriggerSurvey(kind) => self.trigger_survey(kind),
            Command::Widget(message) => self.on_widget_message(message),
            Command::Shutdown => return Some(AgentOutcome::Shutdown),
        }

        None
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) -> Option<AgentOutcome> {
        match event {
            ChannelEvent::Connected => {
                if self.state != CaptureState::Offline {
                    return None;
                }

                if self.page.has_focus() {
                    self.start_capture();
                } else {
                    debug!("Page not focused, capture starts on first focus");
                    self.state = CaptureState::AwaitingFocus;
                }
                None
            }
            ChannelEvent::Disconnected => {
                if self.state != CaptureState::Halted {
                    self.stop_capture(CaptureState::Offline);
                }
                None
            }
            ChannelEvent::GaveUp => {
                warn!("Collector unreachable, recording stopped");
                Some(AgentOutcome::TransportLost)
            }
        }
    }

    fn is_capturing(&self) -> bool {
        matches!(self.state, CaptureState::Capturing { .. })
    }

    fn start_capture(&mut self) {
        self.epoch += 1;
        let epoch = self.epoch;

        let commands = self.sink_commands.clone();
        let sink = CaptureSink::new(move |event| {
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Capture { epoch, event });
            }
        });

        if let Err(e) = self.capture.start(&self.capture_config, sink) {
            error!("Failed to start capture: {}", e);
            self.state = CaptureState::Paused;
            return;
        }

        self.state = CaptureState::Capturing { epoch };
        info!("Capture started (epoch {})", epoch);

        let visitor = self.visitor.to_object(self.page.as_ref());
        match Envelope::recording(&visitor, self.now_ms()) {
            Ok(envelope) => {
                self.emit(&envelope);
            }
            Err(e) => error!("Failed to encode recording envelope: {}", e),
        }

        self.lifecycle.arm(Instant::now());
    }

    fn stop_capture(&mut self, next: CaptureState) {
        if self.is_capturing() {
            self.capture.stop();
            debug!("Capture stopped (epoch {})", self.epoch);
        }

        self.throttle.cancel();
        self.lifecycle.disarm();
        self.state = next;
    }

    fn on_focus(&mut self) -> Option<AgentOutcome> {
        match self.state {
            CaptureState::Paused if self.visitor.store().should_start_new_session() => {
                info!("Session expired while the page was in the background");
                self.terminate();
                Some(AgentOutcome::SessionTerminated)
            }
            CaptureState::AwaitingFocus | CaptureState::Paused => {
                self.start_capture();
                None
            }
            _ => None,
        }
    }

    fn on_blur(&mut self) {
        if self.is_capturing() {
            self.stop_capture(CaptureState::Paused);
        }
    }

    fn on_capture(&mut self, epoch: u64, mut event: RawEvent) {
        if self.state != (CaptureState::Capturing { epoch }) {
            trace!("Dropping event from capture epoch {}", epoch);
            return;
        }

        let class = classify(&event);

        if class == EventClass::CosmeticMutation {
            let replacing = self.throttle.has_pending();

            match self.throttle.offer(Instant::now(), event) {
                Some(event) => self.emit_event(&event),
                None if replacing => metrics::counter!(MUTATIONS_COALESCED).increment(1),
                None => {}
            }
            return;
        }

        // The page view for a new path precedes any event stamped with it
        self.check_navigation();

        enrich(
            class,
            &mut event,
            &*self.capture,
            self.resolver.as_ref(),
            self.page.as_ref(),
        );

        if class == EventClass::PageMeta {
            if let Some(href) = meta_href(&event) {
                self.emit_pageview(href);
            }
        }

        if class.is_user_interaction() {
            self.lifecycle.arm(Instant::now());
        }

        self.flush_identify();

        if !class.is_mutation() {
            self.visitor.store().set_last_event_at();
        }

        self.emit_event(&event);
    }

    fn flush_throttle(&mut self) {
        if let Some(event) = self.throttle.fire(Instant::now()) {
            self.emit_event(&event);
        }
    }

    fn check_navigation(&mut self) {
        let pathname = self.page.pathname();
        if pathname == self.last_pathname {
            return;
        }

        debug!("Page changed from {} to {}", self.last_pathname, pathname);
        self.last_pathname = pathname.clone();

        let href = self.page.href();
        if self.is_capturing() {
            self.capture.record_navigation(&href);
            self.lifecycle.arm(Instant::now());
        }

        self.visitor.store().set_last_event_at();
        self.emit_pageview(href);

        if let Some(feedback) = &self.feedback {
            self.widgets
                .apply_feedback(feedback.plan(&pathname), feedback.settings());
        }
    }

    fn on_cutoff_timer(&mut self) -> Option<AgentOutcome> {
        match self.lifecycle.on_timer(Instant::now(), self.visitor.store()) {
            TimerOutcome::Terminate => {
                self.terminate();
                Some(AgentOutcome::SessionTerminated)
            }
            TimerOutcome::Rearmed | TimerOutcome::Ignored => None,
        }
    }

    fn terminate(&mut self) {
        let mut teardown = Teardown {
            channel: &self.channel,
            capture: &mut self.capture,
            throttle: &mut self.throttle,
            capturing: matches!(self.state, CaptureState::Capturing { .. }),
            timestamp: self.visitor.store().now_ms(),
        };

        self.lifecycle.terminate(&mut teardown, self.visitor.store());
        self.state = CaptureState::Halted;
    }

    fn on_page_error(&mut self, error: &PageError) {
        let envelope = Envelope::error(error, &self.page.pathname(), self.now_ms());
        self.emit(&envelope);
    }

    fn add_event(&mut self, name: &str, attributes: &ExternalAttributes) {
        if !self.is_capturing() {
            trace!("Not capturing, dropping custom event {}", name);
            return;
        }

        self.flush_identify();

        match Envelope::custom(name, attributes, &self.page.pathname(), self.now_ms()) {
            Ok(envelope) => {
                self.emit(&envelope);
            }
            Err(e) => error!("Failed to encode custom event {}: {}", name, e),
        }
    }

    fn trigger_survey(&mut self, kind: SurveyKind) {
        let allowed = self
            .feedback
            .as_ref()
            .map_or(false, |feedback| feedback.custom_trigger_allowed(kind));

        if allowed {
            self.widgets.open_survey(kind);
        } else {
            debug!("Ignoring {} trigger, survey is not custom-scheduled", kind.as_str());
        }
    }

    fn on_widget_message(&mut self, message: WidgetMessage) {
        match message {
            WidgetMessage::AcceptConsent => {
                consent::accept(self.visitor.store());
                self.widgets.hide_consent();
            }
            WidgetMessage::RejectConsent => {
                consent::reject(self.visitor.store());
                self.widgets.hide_consent();
            }
            WidgetMessage::CloseNps => {
                record_nps_submission(self.storage.as_ref(), wall_clock(self.now_ms()));
                self.widgets.close_survey(SurveyKind::Nps);
            }
            WidgetMessage::SubmitNps => {
                record_nps_submission(self.storage.as_ref(), wall_clock(self.now_ms()));
            }
            WidgetMessage::CloseSentiment => self.widgets.close_survey(SurveyKind::Sentiment),
            WidgetMessage::SetStepNps { .. } | WidgetMessage::SetHeightConsent { .. } => {
                self.widgets.resize(&message)
            }
            WidgetMessage::Unknown => debug!("Ignoring unknown widget message"),
        }
    }

    fn flush_identify(&mut self) {
        if !self.is_capturing() {
            return;
        }

        if let Some(attributes) = self.visitor.take_attributes() {
            match Envelope::identify(&attributes, self.now_ms()) {
                Ok(envelope) => {
                    self.emit(&envelope);
                }
                Err(e) => error!("Failed to encode identify envelope: {}", e),
            }
        }
    }

    /// Page view unless `href` was the last one sent
    fn emit_pageview(&mut self, href: String) {
        if self.last_pageview.as_deref() == Some(href.as_str()) {
            trace!("Skipping duplicate pageview for {}", href);
            return;
        }

        if self.emit(&Envelope::pageview(&href, self.now_ms())) {
            self.last_pageview = Some(href);
        }
    }

    fn emit_event(&self, event: &RawEvent) {
        match Envelope::event(event) {
            Ok(envelope) => {
                self.emit(&envelope);
            }
            Err(e) => error!("Failed to encode capture event: {}", e),
        }
    }

    /// Send while capturing; everything else is dropped
    fn emit(&self, envelope: &Envelope) -> bool {
        if !self.is_capturing() {
            trace!("Not capturing, dropping {:?} envelope", envelope.key);
            return false;
        }

        self.channel.send(envelope)
    }

    fn now_ms(&self) -> i64 {
        self.visitor.store().now_ms()
    }

    async fn finish(mut self, outcome: AgentOutcome) -> AgentOutcome {
        if outcome != AgentOutcome::SessionTerminated {
            self.stop_capture(CaptureState::Halted);
            self.channel.close();
        }

        if tokio::time::timeout(CLOSE_GRACE, self.channel.join())
            .await
            .is_err()
        {
            warn!("Collector connection did not close within {:?}", CLOSE_GRACE);
        }

        info!("Recorder finished: {:?}", outcome);
        outcome
    }
}

/// Sleep until `deadline`, forever if there is none
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn wall_clock(now_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
}
