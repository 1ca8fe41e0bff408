//! Realtime message envelope and its JSON wire format.
//!
//! Wire format: `{"type":"stroke_end","payload":{...},"senderId":"<16 hex>","timestamp":1700000000000}`
//!
//! Decoding runs in two stages: the envelope is parsed with an untyped
//! payload, then the payload is parsed according to `type`. Message types
//! this build does not know are reported as `Ok(None)` so newer peers can
//! add types without breaking older ones.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::payload::{
    AddTextPayload, PageRef, PagesPayload, SetPagePayload, StatusPayload, StrokeEndPayload,
    StrokePreviewPayload,
};
use crate::document::Document;
use crate::sender_id::SenderId;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid payload for {msg_type}: {source}")]
    InvalidPayload {
        msg_type: String,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Typed message body, one variant per wire `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    RequestState,
    StateSnapshot(Document),
    StrokeStart(StrokePreviewPayload),
    StrokeMove(StrokePreviewPayload),
    StrokeEnd(StrokeEndPayload),
    AddText(AddTextPayload),
    ClearPage(PageRef),
    AddPage(PageRef),
    SetPage(SetPagePayload),
    Undo(PagesPayload),
    Redo(PagesPayload),
    ClassStatusChanged(StatusPayload),
}

impl MessageKind {
    /// The wire `type` string.
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageKind::RequestState => "request_state",
            MessageKind::StateSnapshot(_) => "state_snapshot",
            MessageKind::StrokeStart(_) => "stroke_start",
            MessageKind::StrokeMove(_) => "stroke_move",
            MessageKind::StrokeEnd(_) => "stroke_end",
            MessageKind::AddText(_) => "add_text",
            MessageKind::ClearPage(_) => "clear_page",
            MessageKind::AddPage(_) => "add_page",
            MessageKind::SetPage(_) => "set_page",
            MessageKind::Undo(_) => "undo",
            MessageKind::Redo(_) => "redo",
            MessageKind::ClassStatusChanged(_) => "class_status_changed",
        }
    }

    fn payload_value(&self) -> serde_json::Result<Value> {
        match self {
            MessageKind::RequestState => Ok(Value::Null),
            MessageKind::StateSnapshot(doc) => serde_json::to_value(doc),
            MessageKind::StrokeStart(p) | MessageKind::StrokeMove(p) => serde_json::to_value(p),
            MessageKind::StrokeEnd(p) => serde_json::to_value(p),
            MessageKind::AddText(p) => serde_json::to_value(p),
            MessageKind::ClearPage(p) | MessageKind::AddPage(p) => serde_json::to_value(p),
            MessageKind::SetPage(p) => serde_json::to_value(p),
            MessageKind::Undo(p) | MessageKind::Redo(p) => serde_json::to_value(p),
            MessageKind::ClassStatusChanged(p) => serde_json::to_value(p),
        }
    }

    /// Parse a payload for a known `type`. Returns `Ok(None)` for unknown types.
    fn from_parts(msg_type: &str, payload: Value) -> Result<Option<Self>> {
        let kind = match msg_type {
            "request_state" => MessageKind::RequestState,
            "state_snapshot" => MessageKind::StateSnapshot(parse(msg_type, payload)?),
            "stroke_start" => MessageKind::StrokeStart(parse_or_default(msg_type, payload)?),
            "stroke_move" => MessageKind::StrokeMove(parse_or_default(msg_type, payload)?),
            "stroke_end" => MessageKind::StrokeEnd(parse(msg_type, payload)?),
            "add_text" => MessageKind::AddText(parse(msg_type, payload)?),
            "clear_page" => MessageKind::ClearPage(parse_or_default(msg_type, payload)?),
            "add_page" => MessageKind::AddPage(parse_or_default(msg_type, payload)?),
            "set_page" => MessageKind::SetPage(parse(msg_type, payload)?),
            "undo" => MessageKind::Undo(parse(msg_type, payload)?),
            "redo" => MessageKind::Redo(parse(msg_type, payload)?),
            "class_status_changed" => MessageKind::ClassStatusChanged(parse(msg_type, payload)?),
            _ => return Ok(None),
        };
        Ok(Some(kind))
    }
}

fn parse<T: DeserializeOwned>(msg_type: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload {
        msg_type: msg_type.to_string(),
        source,
    })
}

/// Like [`parse`], but a `null` or missing payload yields the default body.
fn parse_or_default<T: DeserializeOwned + Default>(msg_type: &str, payload: Value) -> Result<T> {
    if payload.is_null() {
        Ok(T::default())
    } else {
        parse(msg_type, payload)
    }
}

/// Envelope as it appears on the wire.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    payload: Value,
    sender_id: SenderId,
    #[serde(default)]
    timestamp: u64,
}

/// A message exchanged between peers in a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeMessage {
    pub kind: MessageKind,
    pub sender_id: SenderId,
    /// Wall-clock milliseconds at send time.
    pub timestamp: u64,
}

impl RealtimeMessage {
    pub fn new(kind: MessageKind, sender_id: SenderId, timestamp: u64) -> Self {
        Self {
            kind,
            sender_id,
            timestamp,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        let wire = WireMessage {
            msg_type: self.kind.type_name().to_string(),
            payload: self.kind.payload_value()?,
            sender_id: self.sender_id,
            timestamp: self.timestamp,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Parse from a JSON string.
    ///
    /// Returns `Ok(None)` for a well-formed envelope with an unrecognised
    /// `type`, and an error for anything that is not a valid envelope or whose
    /// payload does not match its type.
    pub fn from_json(data: &str) -> Result<Option<Self>> {
        let wire: WireMessage = serde_json::from_str(data)?;
        let Some(kind) = MessageKind::from_parts(&wire.msg_type, wire.payload)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            kind,
            sender_id: wire.sender_id,
            timestamp: wire.timestamp,
        }))
    }
}
