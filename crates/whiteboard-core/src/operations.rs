//! Drawing operations and the pages that hold them.
//!
//! Operations are immutable once created. Page transforms never touch the
//! page they are given; each returns a new `Page` value.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::unix_millis;

/// Canvas coordinates in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Stroke tool. An eraser stroke paints the background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    Eraser,
}

/// Build a `<prefix>_<unix ms>_<random hex>` identifier.
fn generate_id(prefix: &str) -> String {
    let suffix: u32 = rand::rng().random();
    format!("{}_{}_{:08x}", prefix, unix_millis(), suffix)
}

/// Identifier of a drawing operation (`stroke_…` or `text_…`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn generate(kind: &str) -> Self {
        Self(generate_id(kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a page (`page_…`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub fn generate() -> Self {
        Self(generate_id("page"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A freehand stroke. Fewer than two points renders nothing but is still valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeOperation {
    pub id: OperationId,
    pub points: Vec<Point>,
    pub color: String,
    pub width: f64,
    pub tool: Tool,
}

/// A text label anchored at `position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOperation {
    pub id: OperationId,
    pub position: Point,
    pub text: String,
    pub color: String,
    pub font_size: f64,
}

/// A single entry in a page's operation log.
///
/// Wire format is internally tagged: `{"type":"stroke", ...}` / `{"type":"text", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DrawOperation {
    Stroke(StrokeOperation),
    Text(TextOperation),
}

impl DrawOperation {
    pub fn id(&self) -> &OperationId {
        match self {
            DrawOperation::Stroke(stroke) => &stroke.id,
            DrawOperation::Text(text) => &text.id,
        }
    }
}

/// Visual style of a stroke in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub color: String,
    pub width: f64,
    pub tool: Tool,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: "#000000".to_string(),
            width: 3.0,
            tool: Tool::Pen,
        }
    }
}

/// An ordered operation log. Insertion order is render order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    #[serde(default)]
    pub operations: Vec<DrawOperation>,
}

impl Page {
    /// Empty page with a caller-supplied id. Receivers use this to mirror a
    /// page created by another peer.
    pub fn with_id(id: PageId) -> Self {
        Self {
            id,
            operations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

pub fn create_empty_page() -> Page {
    Page::with_id(PageId::generate())
}

pub fn create_stroke(
    points: Vec<Point>,
    color: impl Into<String>,
    width: f64,
    tool: Tool,
) -> DrawOperation {
    DrawOperation::Stroke(StrokeOperation {
        id: OperationId::generate("stroke"),
        points,
        color: color.into(),
        width,
        tool,
    })
}

pub fn create_text(
    position: Point,
    text: impl Into<String>,
    color: impl Into<String>,
    font_size: f64,
) -> DrawOperation {
    DrawOperation::Text(TextOperation {
        id: OperationId::generate("text"),
        position,
        text: text.into(),
        color: color.into(),
        font_size,
    })
}

/// Returns a copy of `page` with `op` appended last.
pub fn add_operation_to_page(page: &Page, op: DrawOperation) -> Page {
    let mut operations = Vec::with_capacity(page.operations.len() + 1);
    operations.extend(page.operations.iter().cloned());
    operations.push(op);
    Page {
        id: page.id.clone(),
        operations,
    }
}

/// Returns a page with the same id and no operations.
pub fn clear_page(page: &Page) -> Page {
    Page::with_id(page.id.clone())
}

/// Returns a copy of `page` without its final operation. Empty pages are returned unchanged.
pub fn remove_last_operation(page: &Page) -> Page {
    let mut next = page.clone();
    next.operations.pop();
    next
}
