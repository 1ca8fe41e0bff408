//! Wire protocol for room messages.
//!
//! - Envelope and typed message kinds (`envelope`)
//! - Payload bodies per message type (`payload`)

pub mod envelope;
pub mod payload;

pub use envelope::{MessageKind, ProtocolError, RealtimeMessage};
pub use payload::{
    AddTextPayload, PageRef, PagesPayload, SetPagePayload, StatusPayload, StrokeEndPayload,
    StrokePreviewPayload,
};
