// src/orchestrator/agent.rs
//! Agent startup
//!
//! Startup runs in a fixed order and stops at the first check that fails:
//!
//! 1. Validate the configuration and identify the visitor
//! 2. Stop if consent was rejected before, or the page is driven by a bot
//! 3. Fetch site settings
//! 4. Validate ingestion, plan and origin
//! 5. Resolve consent, waiting for an accept/reject signal when required
//!
//! After that the `Recorder` takes over until the session ends.

use crate::identity::visitor::{is_bot, IdentityStore, Visitor};
use crate::orchestrator::context::AgentContext;
use crate::orchestrator::handle::{AgentHandle, Command};
use crate::orchestrator::recorder::Recorder;
use crate::session::consent::{self, ConsentDecision, WidgetMessage};
use crate::session::settings::{RawSiteSessionSettings, SettingsRejection, SettingsSource};
use crate::utils::errors::{AgentError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Why the agent stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    /// The visitor rejected recording
    ConsentDenied,

    /// Automated browser
    Bot,

    /// The supplied `AgentConfig` failed validation
    InvalidConfig,

    SettingsUnavailable,

    SettingsRejected(SettingsRejection),

    /// The inactivity cutoff ended the session
    SessionTerminated,

    /// Reconnect attempts exhausted
    TransportLost,

    /// Stopped by the host
    Shutdown,
}

pub struct Agent;

impl Agent {
    /// Start the agent in the background
    pub fn spawn(context: AgentContext) -> (AgentHandle, JoinHandle<AgentOutcome>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let sink_commands = commands_tx.downgrade();
        let handle = AgentHandle::new(commands_tx);

        let task = tokio::spawn(run(context, sink_commands, commands));

        (handle, task)
    }
}

async fn run(
    mut context: AgentContext,
    sink_commands: mpsc::WeakUnboundedSender<Command>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> AgentOutcome {
    if let Err(e) = context.config.validate() {
        error!("Not starting: {}", e);
        return AgentOutcome::InvalidConfig;
    }

    let store = IdentityStore::new(
        Arc::clone(&context.storage),
        Arc::clone(&context.clock),
        context.config.session.cutoff(),
    );
    let mut visitor = Visitor::new(context.config.site.id.clone(), store, context.ids.as_ref());

    if visitor.consent() == Some(false) {
        info!("Visitor rejected consent, not recording");
        return AgentOutcome::ConsentDenied;
    }

    if is_bot(context.page.as_ref()) {
        info!("Automated browser detected, not recording");
        return AgentOutcome::Bot;
    }

    let source = Arc::clone(&context.settings);
    let timeout = Duration::from_millis(context.config.api.settings_timeout_ms);

    let raw = match fetch_settings(source, timeout, visitor.site_id().to_string()).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to fetch site settings: {}", e);
            return AgentOutcome::SettingsUnavailable;
        }
    };

    let origin = context.page.origin();
    let settings = raw.merge_with_defaults(&origin);

    if let Err(reason) = settings.validate(&origin) {
        info!("Not recording: {}", reason);
        return AgentOutcome::SettingsRejected(reason);
    }

    match consent::decide(visitor.consent(), &settings.consent) {
        ConsentDecision::Activate => {}
        ConsentDecision::Deny => return AgentOutcome::ConsentDenied,
        ConsentDecision::Defer { show_banner } => {
            if show_banner {
                context.widgets.show_consent(settings.consent.layout);
            }

            if let Some(outcome) = await_consent(&mut context, &mut visitor, &mut commands).await {
                return outcome;
            }
        }
    }

    Recorder::activate(context, visitor, settings, sink_commands)
        .run(commands)
        .await
}

async fn fetch_settings(
    source: Arc<dyn SettingsSource>,
    timeout: Duration,
    site_id: String,
) -> Result<RawSiteSessionSettings> {
    match tokio::time::timeout(timeout, source.fetch(&site_id)).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::SettingsFetchFailed(format!(
            "No response within {:?}",
            timeout
        ))),
    }
}

/// Block until consent is given; `Some` when the agent should stop instead
async fn await_consent(
    context: &mut AgentContext,
    visitor: &mut Visitor,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<AgentOutcome> {
    debug!("Waiting for consent");

    loop {
        match commands.recv().await {
            None | Some(Command::Shutdown) => return Some(AgentOutcome::Shutdown),
            Some(Command::AcceptConsent) | Some(Command::Widget(WidgetMessage::AcceptConsent)) => {
                consent::accept(visitor.store());
                context.widgets.hide_consent();
                return None;
            }
            Some(Command::RejectConsent) | Some(Command::Widget(WidgetMessage::RejectConsent)) => {
                consent::reject(visitor.store());
                context.widgets.hide_consent();
                return Some(AgentOutcome::ConsentDenied);
            }
            Some(Command::Widget(message @ WidgetMessage::SetHeightConsent { .. })) => {
                context.widgets.resize(&message);
            }
            Some(Command::Identify(attributes)) => visitor.stage_attributes(attributes),
            Some(other) => trace!("Ignoring {:?} while waiting for consent", other),
        }
    }
}
