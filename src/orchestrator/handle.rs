// src/orchestrator/handle.rs
//! Public control surface
//!
//! `AgentHandle` is a cheap clone around the agent's command queue. Methods
//! validate their primary argument and otherwise never fail: once the agent
//! has stopped, commands are silently dropped.

use crate::capture::event::RawEvent;
use crate::identity::visitor::{AttributeValue, ExternalAttributes};
use crate::session::consent::WidgetMessage;
use crate::session::feedback::SurveyKind;
use crate::transport::envelope::PageError;
use crate::utils::errors::{AgentError, Result};
use tokio::sync::mpsc;
use tracing::trace;

/// Everything the agent task reacts to
#[derive(Debug)]
pub(crate) enum Command {
    /// Event from the capture provider started at `epoch`
    Capture { epoch: u64, event: RawEvent },
    Focus,
    Blur,
    Navigate,
    PageError(PageError),
    Identify(ExternalAttributes),
    AddEvent {
        name: String,
        attributes: ExternalAttributes,
    },
    AddPageView,
    AcceptConsent,
    RejectConsent,
    TriggerSurvey(SurveyKind),
    Widget(WidgetMessage),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct AgentHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl AgentHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    fn dispatch(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            trace!("Agent stopped, dropping {:?}", e.0);
        }
    }

    /// Attach external attributes to the visitor; sent with the next event
    pub fn identify(&self, id: &str, mut attributes: ExternalAttributes) -> Result<()> {
        if id.is_empty() {
            return Err(AgentError::InvalidArgument(
                "identify requires a non-empty id".to_string(),
            ));
        }

        attributes.insert("id".to_string(), AttributeValue::from(id));
        self.dispatch(Command::Identify(attributes));
        Ok(())
    }

    /// Record a named custom event
    pub fn add_event(&self, name: &str, attributes: ExternalAttributes) -> Result<()> {
        if name.is_empty() {
            return Err(AgentError::InvalidArgument(
                "add_event requires a non-empty name".to_string(),
            ));
        }

        self.dispatch(Command::AddEvent {
            name: name.to_string(),
            attributes,
        });
        Ok(())
    }

    /// Record a page view for the current location
    pub fn add_page_view(&self) {
        self.dispatch(Command::AddPageView);
    }

    pub fn accept_consent(&self) {
        self.dispatch(Command::AcceptConsent);
    }

    pub fn reject_consent(&self) {
        self.dispatch(Command::RejectConsent);
    }

    /// Open a survey whose schedule is `custom`; `name` is `nps` or `sentiment`
    pub fn trigger_survey(&self, name: &str) -> Result<()> {
        let kind = SurveyKind::parse(name).ok_or_else(|| {
            AgentError::InvalidArgument(format!("Unknown survey: {:?}", name))
        })?;

        self.dispatch(Command::TriggerSurvey(kind));
        Ok(())
    }

    /// Page gained focus; the host keeps its `PageContext` in sync
    pub fn focus(&self) {
        self.dispatch(Command::Focus);
    }

    pub fn blur(&self) {
        self.dispatch(Command::Blur);
    }

    /// Location changed; checked now instead of at the next poll
    pub fn navigate(&self) {
        self.dispatch(Command::Navigate);
    }

    /// Report an uncaught page error
    pub fn page_error(&self, error: PageError) -> Result<()> {
        if error.message.is_empty() {
            return Err(AgentError::InvalidArgument(
                "page_error requires a message".to_string(),
            ));
        }

        self.dispatch(Command::PageError(error));
        Ok(())
    }

    /// Forward a message posted by a widget frame
    pub fn widget_message(&self, raw: &str) -> Result<()> {
        if raw.is_empty() {
            return Err(AgentError::InvalidArgument(
                "widget_message requires a payload".to_string(),
            ));
        }

        self.dispatch(Command::Widget(WidgetMessage::parse(raw)));
        Ok(())
    }

    /// Stop recording without ending the session
    pub fn shutdown(&self) {
        self.dispatch(Command::Shutdown);
    }

    /// The agent task is still accepting commands
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (AgentHandle, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AgentHandle::new(tx), rx)
    }

    #[test]
    fn test_identify_adds_id() {
        let (handle, mut rx) = handle();

        let mut attributes = ExternalAttributes::new();
        attributes.insert("email".to_string(), AttributeValue::from("a@b.c"));
        handle.identify("user-1", attributes).unwrap();

        match rx.try_recv().unwrap() {
            Command::Identify(attributes) => {
                assert_eq!(attributes.get("id"), Some(&AttributeValue::from("user-1")));
                assert_eq!(attributes.len(), 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_empty_arguments_rejected() {
        let (handle, mut rx) = handle();

        assert!(matches!(
            handle.identify("", ExternalAttributes::new()),
            Err(AgentError::InvalidArgument(_))
        ));
        assert!(handle.add_event("", ExternalAttributes::new()).is_err());
        assert!(handle.trigger_survey("").is_err());
        assert!(handle.trigger_survey("poll").is_err());
        assert!(handle.page_error(PageError::default()).is_err());
        assert!(handle.widget_message("").is_err());

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_widget_message_parsed() {
        let (handle, mut rx) = handle();

        handle
            .widget_message(r#"{"key":"__squeaky_accept_consent"}"#)
            .unwrap();
        handle.widget_message("not json").unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            Command::Widget(WidgetMessage::AcceptConsent)
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Command::Widget(WidgetMessage::Unknown)
        ));
    }

    #[test]
    fn test_stopped_agent_is_silent() {
        let (handle, rx) = handle();
        drop(rx);

        assert!(!handle.is_running());
        handle.focus();
        handle.add_page_view();
        assert!(handle.add_event("signup", ExternalAttributes::new()).is_ok());
    }
}
