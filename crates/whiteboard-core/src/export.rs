//! Export collaborator interface.
//!
//! An exporter reads the page list once and produces a single artifact.
//! It never mutates the document.

use thiserror::Error;

use crate::operations::{DrawOperation, Page};

/// Default page canvas size used by exporters, in pixels.
pub const PAGE_WIDTH: f64 = 800.0;
pub const PAGE_HEIGHT: f64 = 600.0;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Nothing to export")]
    Empty,

    #[error("Export failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Outcome of a successful export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// Where the artifact was written (a path, URL, or similar).
    pub location: String,
    pub pages: usize,
}

pub trait Exporter {
    fn export(&mut self, room_id: &str, pages: &[Page]) -> Result<ExportReport>;
}

/// Operations that produce visible output, in render order.
///
/// Strokes with fewer than two points draw nothing and are skipped.
pub fn renderable_operations(page: &Page) -> impl Iterator<Item = &DrawOperation> {
    page.operations.iter().filter(|op| match op {
        DrawOperation::Stroke(stroke) => stroke.points.len() >= 2,
        DrawOperation::Text(_) => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{add_operation_to_page, create_empty_page, create_stroke, create_text, Point, Tool};

    #[test]
    fn test_renderable_skips_short_strokes() {
        let dot = create_stroke(vec![Point::new(1.0, 1.0)], "#000", 3.0, Tool::Pen);
        let line = create_stroke(
            vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
            "#000",
            3.0,
            Tool::Pen,
        );
        let label = create_text(Point::new(5.0, 5.0), "x", "#000", 24.0);

        let mut page = create_empty_page();
        for op in [dot, line.clone(), label.clone()] {
            page = add_operation_to_page(&page, op);
        }

        let visible: Vec<_> = renderable_operations(&page).cloned().collect();
        assert_eq!(visible, vec![line, label]);
    }
}
