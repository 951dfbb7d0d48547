// src/capture/provider.rs
//! Capture provider boundary
//!
//! The provider owns DOM snapshotting and mutation diffing; the agent only
//! configures it, starts and stops it, and receives its events through a
//! `CaptureSink`. `ReplayCapture` feeds a recorded JSON-lines file through the
//! same boundary.

use crate::capture::event::{MouseInteraction, RawEvent};
use crate::capture::selector::{NodeLookup, NodeSnapshot};
use crate::session::settings::SiteSessionSettings;
use crate::utils::errors::{AgentError, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Elements with this class are never recorded
pub const BLOCK_CLASS: &str = "squeaky-hide";

/// Text inside elements with this class is masked
pub const MASK_TEXT_CLASS: &str = "squeaky-mask";

/// Options handed to the capture provider on start
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub block_class: String,

    /// Site-configured selectors to block, joined into one selector list
    pub block_selector: Option<String>,

    pub mask_text_class: String,

    pub mask_all_inputs: bool,

    pub mask_all_text: bool,

    /// Drop `<script>` contents from snapshots
    pub slim_dom_script: bool,

    /// Drop comments from snapshots
    pub slim_dom_comment: bool,

    /// Which mouse interactions are recorded
    pub mouse_interaction: Vec<(MouseInteraction, bool)>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            block_class: BLOCK_CLASS.to_string(),
            block_selector: None,
            mask_text_class: MASK_TEXT_CLASS.to_string(),
            mask_all_inputs: true,
            mask_all_text: false,
            slim_dom_script: true,
            slim_dom_comment: true,
            mouse_interaction: MouseInteraction::ALL
                .iter()
                .map(|kind| {
                    let sampled = !matches!(
                        kind,
                        MouseInteraction::MouseUp
                            | MouseInteraction::MouseDown
                            | MouseInteraction::ContextMenu
                    );
                    (*kind, sampled)
                })
                .collect(),
        }
    }
}

impl CaptureConfig {
    pub fn from_settings(settings: &SiteSessionSettings) -> Self {
        let block_selector = if settings.css_selector_blacklist.is_empty() {
            None
        } else {
            Some(settings.css_selector_blacklist.join(", "))
        };

        Self {
            block_selector,
            mask_all_inputs: settings.anonymise_form_inputs,
            mask_all_text: settings.anonymise_text,
            ..Default::default()
        }
    }

    /// Whether events of this interaction kind are recorded
    pub fn samples(&self, kind: MouseInteraction) -> bool {
        self.mouse_interaction
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(false, |(_, sampled)| *sampled)
    }

    /// Whether an event passes interaction sampling
    pub fn accepts(&self, event: &RawEvent) -> bool {
        event
            .mouse_interaction()
            .map_or(true, |kind| self.samples(kind))
    }
}

/// Where a running provider delivers events
#[derive(Clone)]
pub struct CaptureSink {
    emit: Arc<dyn Fn(RawEvent) + Send + Sync>,
}

impl CaptureSink {
    pub fn new(emit: impl Fn(RawEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Sink backed by an unbounded channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RawEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    pub fn emit(&self, event: RawEvent) {
        (self.emit)(event)
    }
}

/// External DOM capture provider
pub trait CaptureProvider: NodeLookup {
    /// Begin capturing; the first event should be a full snapshot
    fn start(&mut self, config: &CaptureConfig, sink: CaptureSink) -> Result<()>;

    /// Stop capturing; idempotent
    fn stop(&mut self);

    /// Record a client-side navigation
    fn record_navigation(&mut self, href: &str) {
        debug!("Navigation to {}", href);
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Node { node: i64, snapshot: NodeSnapshot },
    Event(RawEvent),
}

/// Replays recorded capture events from a JSON-lines file.
///
/// Each line is either a raw event or a `{"node": id, "snapshot": {...}}`
/// record that registers a node for lookups. Stopping and restarting resumes
/// after the last delivered line.
pub struct ReplayCapture {
    path: PathBuf,
    realtime: bool,
    cursor: Arc<AtomicUsize>,
    nodes: Arc<Mutex<HashMap<i64, NodeSnapshot>>>,
    task: Option<JoinHandle<()>>,
}

impl ReplayCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: false,
            cursor: Arc::new(AtomicUsize::new(0)),
            nodes: Arc::new(Mutex::new(HashMap::new())),
            task: None,
        }
    }

    /// Pace events by their recorded timestamps
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    async fn replay(
        path: PathBuf,
        realtime: bool,
        config: CaptureConfig,
        sink: CaptureSink,
        cursor: Arc<AtomicUsize>,
        nodes: Arc<Mutex<HashMap<i64, NodeSnapshot>>>,
    ) {
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read capture file {:?}: {}", path, e);
                return;
            }
        };

        let start = cursor.load(Ordering::SeqCst);
        let mut previous: Option<i64> = None;

        for (index, line) in contents.lines().enumerate().skip(start) {
            let line = line.trim();

            if !line.is_empty() {
                match serde_json::from_str::<ReplayLine>(line) {
                    Ok(ReplayLine::Node { node, snapshot }) => {
                        nodes.lock().insert(node, snapshot);
                    }
                    Ok(ReplayLine::Event(event)) => {
                        if realtime {
                            if let Some(previous) = previous {
                                let gap = (event.timestamp - previous).max(0) as u64;
                                tokio::time::sleep(Duration::from_millis(gap)).await;
                            }
                            previous = Some(event.timestamp);
                        }

                        if config.accepts(&event) {
                            sink.emit(event);
                        }
                    }
                    Err(e) => warn!("Skipping capture line {}: {}", index + 1, e),
                }
            }

            cursor.store(index + 1, Ordering::SeqCst);
        }

        info!("Capture replay reached end of {:?}", path);
    }
}

impl NodeLookup for ReplayCapture {
    fn node(&self, id: i64) -> Option<NodeSnapshot> {
        self.nodes.lock().get(&id).cloned()
    }
}

impl CaptureProvider for ReplayCapture {
    fn start(&mut self, config: &CaptureConfig, sink: CaptureSink) -> Result<()> {
        if self.is_running() {
            return Err(AgentError::CaptureFailed(
                "Replay is already running".to_string(),
            ));
        }

        debug!(
            "Starting capture replay from {:?} at line {}",
            self.path,
            self.cursor.load(Ordering::SeqCst)
        );

        let handle = tokio::spawn(Self::replay(
            self.path.clone(),
            self.realtime,
            config.clone(),
            sink,
            Arc::clone(&self.cursor),
            Arc::clone(&self.nodes),
        ));

        self.task = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Capture replay stopped");
        }
    }
}

impl Drop for ReplayCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
