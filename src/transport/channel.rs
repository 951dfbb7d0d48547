// src/transport/channel.rs
//! Transport channel to the collector
//!
//! Owns one outbound connection, driven by a background task:
//!
//! ```text
//!                 connect ok                 remote close
//! Disconnected ─► Connecting ──────────► Open ─────────────► Disconnected
//!      ▲              │ connect err                                │
//!      └──────────────┴──── wait attempt × step (≤ max attempts) ◄─┘
//!
//! close() from any state ─► Closing ─► Terminated (absorbing)
//! ```
//!
//! Envelopes are only accepted while `Open`. Anything still queued when the
//! connection drops is discarded, never replayed on the next connection.
//! Dropping the channel closes it once queued frames are written.

use crate::observability::{ENVELOPES_DROPPED, ENVELOPES_SENT, RECONNECT_ATTEMPTS};
use crate::transport::envelope::Envelope;
use crate::transport::link::{ConnectRequest, Connector, Link};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Terminated,
}

/// Lifecycle notifications delivered to the channel's owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,

    /// Reconnect attempts exhausted; the channel stays disconnected
    GaveUp,
}

/// Reconnect schedule: attempt `n` waits `n × step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            step: Duration::from_millis(100),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

enum Outbound {
    Frame(String),
    Close,
}

/// How a live connection ended
enum LinkEnd {
    Lost,
    Closed,
}

#[derive(Debug, Clone)]
struct SharedState(Arc<Mutex<ConnectionState>>);

impl SharedState {
    fn get(&self) -> ConnectionState {
        *self.0.lock()
    }

    /// Move to `next`. Terminated never changes and Closing only moves on
    /// to Terminated.
    fn set(&self, next: ConnectionState) -> bool {
        let mut state = self.0.lock();
        match (*state, next) {
            (ConnectionState::Terminated, _) => false,
            (ConnectionState::Closing, ConnectionState::Terminated) => {
                *state = next;
                true
            }
            (ConnectionState::Closing, _) => false,
            _ => {
                *state = next;
                true
            }
        }
    }

    fn is_closing(&self) -> bool {
        matches!(
            self.get(),
            ConnectionState::Closing | ConnectionState::Terminated
        )
    }
}

pub struct TransportChannel {
    state: SharedState,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: Option<JoinHandle<()>>,
}

impl TransportChannel {
    /// Start connecting in the background
    pub fn connect(
        connector: Arc<dyn Connector>,
        request: ConnectRequest,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        let state = SharedState(Arc::new(Mutex::new(ConnectionState::Connecting)));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        info!("Connecting to collector at {}", request.path);

        let task = tokio::spawn(Self::drive(
            connector,
            request,
            policy,
            state.clone(),
            outbound_rx,
            events,
        ));

        Self {
            state,
            outbound,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue an envelope; returns `false` (and drops it) unless open
    pub fn send(&self, envelope: &Envelope) -> bool {
        if !self.is_open() {
            metrics::counter!(ENVELOPES_DROPPED).increment(1);
            debug!("Dropping {:?} envelope, channel is {:?}", envelope.key, self.state());
            return false;
        }

        let frame = match envelope.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {:?} envelope: {}", envelope.key, e);
                return false;
            }
        };

        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            metrics::counter!(ENVELOPES_DROPPED).increment(1);
            return false;
        }

        true
    }

    /// Close for good; idempotent
    pub fn close(&self) {
        if self.state.is_closing() {
            return;
        }

        self.state.set(ConnectionState::Closing);

        if self.outbound.send(Outbound::Close).is_err() {
            self.state.set(ConnectionState::Terminated);
        }
    }

    /// Wait for the background task to finish
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("Transport task failed: {}", e);
                }
            }
        }
    }

    async fn drive(
        connector: Arc<dyn Connector>,
        request: ConnectRequest,
        policy: ReconnectPolicy,
        state: SharedState,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) {
        let mut attempt: u32 = 0;

        loop {
            if state.is_closing() {
                break;
            }

            state.set(ConnectionState::Connecting);

            match connector.connect(&request).await {
                Ok(mut link) => {
                    if state.is_closing() {
                        link.close().await;
                        break;
                    }

                    state.set(ConnectionState::Open);
                    let _ = events.send(ChannelEvent::Connected);
                    info!("Collector connection open");

                    match Self::pump(link.as_mut(), &mut outbound).await {
                        LinkEnd::Closed => break,
                        LinkEnd::Lost => {
                            if state.is_closing() {
                                break;
                            }
                            warn!("Collector connection lost");
                        }
                    }
                }
                Err(e) => warn!("Collector connection failed: {}", e),
            }

            state.set(ConnectionState::Disconnected);
            Self::discard_queued(&mut outbound, &state);
            if state.is_closing() {
                break;
            }
            let _ = events.send(ChannelEvent::Disconnected);

            if attempt >= policy.max_attempts {
                error!(
                    "Giving up on collector after {} reconnect attempts",
                    policy.max_attempts
                );
                let _ = events.send(ChannelEvent::GaveUp);
                Self::idle(&mut outbound, &state).await;
                return;
            }

            attempt += 1;
            metrics::counter!(RECONNECT_ATTEMPTS).increment(1);
            let delay = policy.delay(attempt);
            debug!("Reconnect attempt {} in {:?}", attempt, delay);

            if !Self::backoff(delay, &mut outbound, &state).await {
                break;
            }
        }

        state.set(ConnectionState::Terminated);
        debug!("Transport task finished");
    }

    /// Forward frames until the link drops or a close is requested
    async fn pump(link: &mut dyn Link, outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> LinkEnd {
        loop {
            tokio::select! {
                command = outbound.recv() => match command {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = link.send(frame).await {
                            warn!("{}", e);
                            return LinkEnd::Lost;
                        }
                        metrics::counter!(ENVELOPES_SENT).increment(1);
                    }
                    Some(Outbound::Close) | None => {
                        link.close().await;
                        return LinkEnd::Closed;
                    }
                },

                inbound = link.recv() => match inbound {
                    Some(frame) => debug!("Collector frame: {}", frame),
                    None => return LinkEnd::Lost,
                },
            }
        }
    }

    /// Sleep out a reconnect delay, dropping sends; `false` if closed meanwhile
    async fn backoff(
        delay: Duration,
        outbound: &mut mpsc::UnboundedReceiver<Outbound>,
        state: &SharedState,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return !state.is_closing(),

                command = outbound.recv() => match command {
                    Some(Outbound::Frame(_)) => {
                        metrics::counter!(ENVELOPES_DROPPED).increment(1);
                    }
                    Some(Outbound::Close) | None => return false,
                },
            }
        }
    }

    /// After giving up: drop sends until closed
    async fn idle(outbound: &mut mpsc::UnboundedReceiver<Outbound>, state: &SharedState) {
        while let Some(command) = outbound.recv().await {
            match command {
                Outbound::Frame(_) => metrics::counter!(ENVELOPES_DROPPED).increment(1),
                Outbound::Close => {
                    state.set(ConnectionState::Terminated);
                    return;
                }
            }
        }
    }

    fn discard_queued(outbound: &mut mpsc::UnboundedReceiver<Outbound>, state: &SharedState) {
        let mut discarded = 0u64;

        while let Ok(command) = outbound.try_recv() {
            match command {
                Outbound::Frame(_) => discarded += 1,
                Outbound::Close => {
                    state.set(ConnectionState::Closing);
                }
            }
        }

        if discarded > 0 {
            metrics::counter!(ENVELOPES_DROPPED).increment(discarded);
            debug!("Discarded {} queued envelopes after disconnect", discarded);
        }
    }
}
