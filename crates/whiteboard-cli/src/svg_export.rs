//! SVG export of a room's pages.
//!
//! All pages go into a single SVG document, stacked top to bottom, each on
//! an 800x600 white canvas. Eraser strokes are painted in the background
//! color, the same way they appear on the live canvas.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use whiteboard_core::export::{
    renderable_operations, ExportError, ExportReport, Exporter, Result, PAGE_HEIGHT, PAGE_WIDTH,
};
use whiteboard_core::{DrawOperation, Page, Tool};

const BACKGROUND: &str = "#ffffff";

/// Writes `whiteboard-<room>.svg` into an output directory.
#[derive(Debug, Clone)]
pub struct SvgExporter {
    out_dir: PathBuf,
}

impl SvgExporter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn output_path(&self, room_id: &str) -> PathBuf {
        let name: String = room_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.out_dir.join(format!("whiteboard-{}.svg", name))
    }
}

impl Exporter for SvgExporter {
    fn export(&mut self, room_id: &str, pages: &[Page]) -> Result<ExportReport> {
        if pages.is_empty() {
            return Err(ExportError::Empty);
        }
        let svg = render_svg(pages).map_err(|e| ExportError::Failed(e.to_string()))?;
        let path = self.output_path(room_id);
        write_file(&path, &svg)?;
        debug!("Wrote {} bytes to {}", svg.len(), path.display());

        Ok(ExportReport {
            location: path.display().to_string(),
            pages: pages.len(),
        })
    }
}

fn write_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

/// Render every page into one SVG document.
pub fn render_svg(pages: &[Page]) -> std::result::Result<String, std::fmt::Error> {
    let total_height = PAGE_HEIGHT * pages.len() as f64;
    let mut out = String::new();

    writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = PAGE_WIDTH,
        h = total_height
    )?;

    for (index, page) in pages.iter().enumerate() {
        let offset = PAGE_HEIGHT * index as f64;
        writeln!(
            out,
            r#"  <g id="{}" transform="translate(0 {})">"#,
            escape(page.id.as_str()),
            offset
        )?;
        writeln!(
            out,
            r#"    <rect width="{}" height="{}" fill="{}"/>"#,
            PAGE_WIDTH, PAGE_HEIGHT, BACKGROUND
        )?;
        for op in renderable_operations(page) {
            render_operation(&mut out, op)?;
        }
        writeln!(out, "  </g>")?;
    }

    writeln!(out, "</svg>")?;
    Ok(out)
}

fn render_operation(out: &mut String, op: &DrawOperation) -> std::fmt::Result {
    match op {
        DrawOperation::Stroke(stroke) => {
            let color = match stroke.tool {
                Tool::Pen => stroke.color.as_str(),
                Tool::Eraser => BACKGROUND,
            };
            let points: Vec<String> = stroke
                .points
                .iter()
                .map(|p| format!("{},{}", p.x, p.y))
                .collect();
            writeln!(
                out,
                r#"    <polyline points="{}" fill="none" stroke="{}" stroke-width="{}" stroke-linecap="round" stroke-linejoin="round"/>"#,
                points.join(" "),
                escape(color),
                stroke.width
            )
        }
        DrawOperation::Text(text) => writeln!(
            out,
            r#"    <text x="{}" y="{}" fill="{}" font-size="{}" font-family="sans-serif">{}</text>"#,
            text.position.x,
            text.position.y,
            escape(&text.color),
            text.font_size,
            escape(&text.text)
        ),
    }
}

/// Escape text for use in XML content and attribute values.
fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
