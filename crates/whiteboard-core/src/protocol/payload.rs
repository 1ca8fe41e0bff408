//! Payload bodies carried in the `payload` field of a realtime message.
//!
//! Fields that older peers may omit (`pageId`, operation `id`) are optional
//! and skipped when absent, so a payload stays readable in both directions.

use serde::{Deserialize, Serialize};

use crate::document::ClassStatus;
use crate::operations::{
    DrawOperation, OperationId, Page, PageId, Point, StrokeOperation, StrokeStyle, TextOperation,
    Tool,
};

/// Optional target page for `clear_page` and `add_page`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<PageId>,
}

impl PageRef {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id: Some(page_id),
        }
    }
}

/// A committed stroke, addressed to a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeEndPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<PageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<OperationId>,
    pub points: Vec<Point>,
    pub color: String,
    pub width: f64,
    #[serde(default)]
    pub tool: Tool,
}

impl StrokeEndPayload {
    pub fn from_stroke(page_id: PageId, stroke: &StrokeOperation) -> Self {
        Self {
            page_id: Some(page_id),
            id: Some(stroke.id.clone()),
            points: stroke.points.clone(),
            color: stroke.color.clone(),
            width: stroke.width,
            tool: stroke.tool,
        }
    }

    /// Build the operation to append. A missing id is regenerated locally.
    pub fn to_operation(&self) -> DrawOperation {
        DrawOperation::Stroke(StrokeOperation {
            id: self
                .id
                .clone()
                .unwrap_or_else(|| OperationId::generate("stroke")),
            points: self.points.clone(),
            color: self.color.clone(),
            width: self.width,
            tool: self.tool,
        })
    }
}

/// A committed text label, addressed to a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTextPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<PageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<OperationId>,
    pub position: Point,
    pub text: String,
    pub color: String,
    pub font_size: f64,
}

impl AddTextPayload {
    pub fn from_text(page_id: PageId, text: &TextOperation) -> Self {
        Self {
            page_id: Some(page_id),
            id: Some(text.id.clone()),
            position: text.position,
            text: text.text.clone(),
            color: text.color.clone(),
            font_size: text.font_size,
        }
    }

    pub fn to_operation(&self) -> DrawOperation {
        DrawOperation::Text(TextOperation {
            id: self
                .id
                .clone()
                .unwrap_or_else(|| OperationId::generate("text")),
            position: self.position,
            text: self.text.clone(),
            color: self.color.clone(),
            font_size: self.font_size,
        })
    }
}

/// In-progress stroke points. `style` is sent with `stroke_start` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokePreviewPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<PageId>,
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StrokeStyle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPagePayload {
    pub index: usize,
}

/// Full page list, as sent by `undo` and `redo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagesPayload {
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: ClassStatus,
}
