// src/capture/event.rs
//! Raw capture-provider events
//!
//! The provider emits `{type, data, timestamp}` records. Only the numeric
//! discriminants are interpreted here; `data` stays an opaque JSON value
//! until the classifier looks at it.

use crate::utils::errors::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RawEventType {
    DomContentLoaded,
    Load,
    FullSnapshot,
    IncrementalSnapshot,
    Meta,
    Custom,
    Plugin,
}

impl TryFrom<u8> for RawEventType {
    type Error = AgentError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => RawEventType::DomContentLoaded,
            1 => RawEventType::Load,
            2 => RawEventType::FullSnapshot,
            3 => RawEventType::IncrementalSnapshot,
            4 => RawEventType::Meta,
            5 => RawEventType::Custom,
            6 => RawEventType::Plugin,
            other => {
                return Err(AgentError::CaptureFailed(format!(
                    "Unknown event type: {}",
                    other
                )))
            }
        })
    }
}

impl From<RawEventType> for u8 {
    fn from(value: RawEventType) -> Self {
        match value {
            RawEventType::DomContentLoaded => 0,
            RawEventType::Load => 1,
            RawEventType::FullSnapshot => 2,
            RawEventType::IncrementalSnapshot => 3,
            RawEventType::Meta => 4,
            RawEventType::Custom => 5,
            RawEventType::Plugin => 6,
        }
    }
}

/// Source of an incremental snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum IncrementalSource {
    Mutation,
    MouseMove,
    MouseInteraction,
    Scroll,
    ViewportResize,
    Input,
    TouchMove,
    MediaInteraction,
    StyleSheetRule,
    CanvasMutation,
    Font,
    Log,
    Drag,
    StyleDeclaration,
    Selection,
    AdoptedStyleSheet,
}

const SOURCES: [IncrementalSource; 16] = [
    IncrementalSource::Mutation,
    IncrementalSource::MouseMove,
    IncrementalSource::MouseInteraction,
    IncrementalSource::Scroll,
    IncrementalSource::ViewportResize,
    IncrementalSource::Input,
    IncrementalSource::TouchMove,
    IncrementalSource::MediaInteraction,
    IncrementalSource::StyleSheetRule,
    IncrementalSource::CanvasMutation,
    IncrementalSource::Font,
    IncrementalSource::Log,
    IncrementalSource::Drag,
    IncrementalSource::StyleDeclaration,
    IncrementalSource::Selection,
    IncrementalSource::AdoptedStyleSheet,
];

impl TryFrom<u8> for IncrementalSource {
    type Error = AgentError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SOURCES.get(value as usize).copied().ok_or_else(|| {
            AgentError::CaptureFailed(format!("Unknown incremental source: {}", value))
        })
    }
}

impl From<IncrementalSource> for u8 {
    fn from(value: IncrementalSource) -> Self {
        SOURCES
            .iter()
            .position(|source| *source == value)
            .unwrap_or_default() as u8
    }
}

/// Mouse interaction kinds reported with `IncrementalSource::MouseInteraction`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseInteraction {
    MouseUp = 0,
    MouseDown = 1,
    Click = 2,
    ContextMenu = 3,
    DblClick = 4,
    Focus = 5,
    Blur = 6,
    TouchStart = 7,
    TouchEnd = 9,
}

impl MouseInteraction {
    pub const ALL: [MouseInteraction; 9] = [
        MouseInteraction::MouseUp,
        MouseInteraction::MouseDown,
        MouseInteraction::Click,
        MouseInteraction::ContextMenu,
        MouseInteraction::DblClick,
        MouseInteraction::Focus,
        MouseInteraction::Blur,
        MouseInteraction::TouchStart,
        MouseInteraction::TouchEnd,
    ];

    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| *kind as u64 == code)
    }

    /// Name used in capture sampling options
    pub fn name(&self) -> &'static str {
        match self {
            MouseInteraction::MouseUp => "MouseUp",
            MouseInteraction::MouseDown => "MouseDown",
            MouseInteraction::Click => "Click",
            MouseInteraction::ContextMenu => "ContextMenu",
            MouseInteraction::DblClick => "DblClick",
            MouseInteraction::Focus => "Focus",
            MouseInteraction::Blur => "Blur",
            MouseInteraction::TouchStart => "TouchStart",
            MouseInteraction::TouchEnd => "TouchEnd",
        }
    }
}

/// One event from the capture provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: RawEventType,

    #[serde(default)]
    pub data: Map<String, Value>,

    pub timestamp: i64,
}

impl RawEvent {
    /// Build an event; non-object `data` is replaced by an empty object
    pub fn new(kind: RawEventType, data: Value, timestamp: i64) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Self {
            kind,
            data,
            timestamp,
        }
    }

    /// Incremental source, when this is an incremental snapshot with a
    /// recognised `data.source`
    pub fn source(&self) -> Option<IncrementalSource> {
        if self.kind != RawEventType::IncrementalSnapshot {
            return None;
        }

        self.data
            .get("source")
            .and_then(Value::as_u64)
            .and_then(|source| u8::try_from(source).ok())
            .and_then(|source| IncrementalSource::try_from(source).ok())
    }

    /// Capture-provider node id targeted by the event
    pub fn node_id(&self) -> Option<i64> {
        self.data.get("id").and_then(Value::as_i64)
    }

    /// Interaction kind of a mouse-interaction event
    pub fn mouse_interaction(&self) -> Option<MouseInteraction> {
        if self.source() != Some(IncrementalSource::MouseInteraction) {
            return None;
        }

        self.data
            .get("type")
            .and_then(Value::as_u64)
            .and_then(MouseInteraction::from_code)
    }
}
