use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{AggregateTick, DeltaAction, Row};

/// Inbound message from the ranking and market-data feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedMessage {
    Snapshot {
        list: String,
        #[serde(default)]
        sequence: u64,
        rows: Vec<Row>,
    },
    Delta {
        list: String,
        #[serde(default)]
        sequence: u64,
        deltas: Vec<DeltaAction>,
    },
    Aggregate {
        symbol: String,
        data: AggregateData,
    },
}

/// Compact tick payload: close, high, low and accumulated volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub av: Option<f64>,
}

impl AggregateData {
    pub fn into_tick(self, symbol: String) -> AggregateTick {
        AggregateTick {
            symbol,
            close: self.c,
            high: self.h,
            low: self.l,
            volume: self.av,
        }
    }
}

impl From<&AggregateTick> for AggregateData {
    fn from(tick: &AggregateTick) -> Self {
        AggregateData {
            c: tick.close,
            h: tick.high,
            l: tick.low,
            av: tick.volume,
        }
    }
}

/// Reasons an inbound payload is dropped before reaching a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Json(String),
    UnrecognizedType(Option<String>),
    Malformed(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Json(err) => write!(f, "invalid json: {err}"),
            DecodeError::UnrecognizedType(Some(kind)) => write!(f, "unrecognized type {kind:?}"),
            DecodeError::UnrecognizedType(None) => f.write_str("message has no type"),
            DecodeError::Malformed(err) => write!(f, "malformed message: {err}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl FeedMessage {
    pub const TYPES: [&'static str; 3] = ["snapshot", "delta", "aggregate"];

    /// Validate and decode a raw payload.
    ///
    /// Housekeeping traffic such as connection acks surfaces as
    /// `UnrecognizedType`; known types missing required fields as `Malformed`.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|err| DecodeError::Json(err.to_string()))?;

        match value.get("type").and_then(Value::as_str) {
            Some(kind) if Self::TYPES.contains(&kind) => {}
            Some(kind) => return Err(DecodeError::UnrecognizedType(Some(kind.to_string()))),
            None => return Err(DecodeError::UnrecognizedType(None)),
        }

        serde_json::from_value(value).map_err(|err| DecodeError::Malformed(err.to_string()))
    }

    /// List the message is scoped to; aggregates are global.
    pub fn list(&self) -> Option<&str> {
        match self {
            FeedMessage::Snapshot { list, .. } | FeedMessage::Delta { list, .. } => Some(list),
            FeedMessage::Aggregate { .. } => None,
        }
    }
}

/// Outbound control message sent to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    SubscribeList { list: String },
    UnsubscribeList { list: String },
    Resync { list: String },
}

impl ControlMessage {
    pub fn list(&self) -> &str {
        match self {
            ControlMessage::SubscribeList { list }
            | ControlMessage::UnsubscribeList { list }
            | ControlMessage::Resync { list } => list,
        }
    }

    pub fn to_payload(&self) -> String {
        // A tagged enum of plain strings always serialises.
        serde_json::to_string(self).unwrap_or_default()
    }
}
