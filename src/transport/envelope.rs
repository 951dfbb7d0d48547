// src/transport/envelope.rs
//! Wire envelopes
//!
//! Everything sent to the collector is `{"key": <kind>, "value": <payload>}`.
//! `event` envelopes carry the enriched capture event untouched; every other
//! kind carries a synthetic custom event `{type: 5, data, timestamp}`.

use crate::capture::event::{RawEvent, RawEventType};
use crate::identity::visitor::{ExternalAttributes, VisitorObject};
use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Envelope key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Recording,
    Event,
    Pageview,
    Identify,
    Inactivity,
    Error,
    Custom,
}

/// Uncaught error reported by the host page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageError {
    pub message: String,
    pub line_number: u32,
    pub col_number: u32,
    pub stack: Option<String>,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub key: EventKind,
    pub value: Value,
}

impl Envelope {
    /// Enriched capture event
    pub fn event(event: &RawEvent) -> Result<Self> {
        Ok(Self {
            key: EventKind::Event,
            value: serde_json::to_value(event)?,
        })
    }

    /// Synthetic custom event wrapping `data`
    pub fn synthetic(key: EventKind, data: Value, timestamp: i64) -> Self {
        Self {
            key,
            value: json!({
                "type": u8::from(RawEventType::Custom),
                "data": data,
                "timestamp": timestamp,
            }),
        }
    }

    /// Sent once each time capture starts
    pub fn recording(visitor: &VisitorObject, timestamp: i64) -> Result<Self> {
        Ok(Self::synthetic(
            EventKind::Recording,
            serde_json::to_value(visitor)?,
            timestamp,
        ))
    }

    pub fn pageview(href: &str, timestamp: i64) -> Self {
        Self::synthetic(EventKind::Pageview, json!({ "href": href }), timestamp)
    }

    pub fn identify(attributes: &ExternalAttributes, timestamp: i64) -> Result<Self> {
        Ok(Self::synthetic(
            EventKind::Identify,
            serde_json::to_value(attributes)?,
            timestamp,
        ))
    }

    pub fn inactivity(timestamp: i64) -> Self {
        Self::synthetic(EventKind::Inactivity, json!({}), timestamp)
    }

    /// `pathname` is the page path at the time of the error
    pub fn error(error: &PageError, pathname: &str, timestamp: i64) -> Self {
        Self::synthetic(
            EventKind::Error,
            json!({
                "line_number": error.line_number,
                "col_number": error.col_number,
                "message": error.message,
                "stack": error.stack,
                "filename": error.filename,
                "href": pathname,
            }),
            timestamp,
        )
    }

    /// Caller-defined event `{name, ...attributes, href}`
    pub fn custom(
        name: &str,
        attributes: &ExternalAttributes,
        pathname: &str,
        timestamp: i64,
    ) -> Result<Self> {
        let mut data = Map::new();
        data.insert("name".to_string(), json!(name));

        for (key, value) in attributes {
            data.insert(key.clone(), serde_json::to_value(value)?);
        }

        data.insert("href".to_string(), json!(pathname));

        Ok(Self::synthetic(EventKind::Custom, Value::Object(data), timestamp))
    }

    /// `data` of a synthetic payload
    pub fn data(&self) -> Option<&Value> {
        self.value.get("data")
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
